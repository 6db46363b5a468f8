use async_trait::async_trait;
use qizhen_flow::{Context, FlowError, NextAction, Task, TaskResult};
use regex::Regex;
use std::sync::LazyLock;
use tracing::info;

use super::types::{GRAPH_TEMPERATURE, generation_params, keys, required};
use crate::llm::{ChatMessage, ChatOptions, LlmInvoker};
use crate::prompts;
use crate::retrieval::{MAX_SNIPPETS, Retriever, dedupe};
use crate::subjects::SubjectProfile;

const TRIGGER_WORDS: &[&str] = &[
    "知识图谱", "思维导图", "mindmap", "图谱", "生成", "制作", "构建", "画", "帮我", "请", "关于",
    "：", ":",
];

static MERMAID_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```mermaid(.*?)```").expect("mermaid block regex is valid"));

/// Strip request phrasing so only the subject matter remains.
pub fn extract_topic(user_input: &str) -> String {
    let mut topic = user_input.to_string();
    for word in TRIGGER_WORDS {
        topic = topic.replace(word, "");
    }
    let topic = topic
        .trim()
        .trim_start_matches(['，', ',', '。', ' ', '、']);
    if topic.is_empty() {
        user_input.to_string()
    } else {
        topic.to_string()
    }
}

/// Normalise a reply to one mermaid block followed by the summary.
pub fn format_mindmap(raw: &str) -> String {
    let raw = raw.trim();
    let (code, summary) = match MERMAID_BLOCK_RE.captures(raw) {
        Some(caps) => {
            let end = caps.get(0).map_or(raw.len(), |m| m.end());
            let code = caps.get(1).map_or("", |m| m.as_str()).trim().to_string();
            (code, raw[end..].trim())
        }
        None => (
            raw.replace("```mermaid", "").replace("```", "").trim().to_string(),
            "",
        ),
    };

    let mut formatted = format!("```mermaid\n{code}\n```");
    if !summary.is_empty() {
        formatted.push_str("\n\n");
        formatted.push_str(summary);
    }
    formatted
}

pub struct ExtractGraphTopicTask;

#[async_trait]
impl Task for ExtractGraphTopicTask {
    async fn run(&self, context: Context) -> qizhen_flow::Result<TaskResult> {
        let user_input: String = required(&context, keys::USER_INPUT)?;
        let topic = extract_topic(&user_input);
        info!(topic = %topic, "knowledge graph topic");
        context.set(keys::GRAPH_TOPIC, topic).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

pub struct RetrieveGraphContextTask {
    subject: &'static SubjectProfile,
    retriever: Retriever,
}

impl RetrieveGraphContextTask {
    pub fn new(subject: &'static SubjectProfile, retriever: Retriever) -> Self {
        Self { subject, retriever }
    }
}

#[async_trait]
impl Task for RetrieveGraphContextTask {
    async fn run(&self, context: Context) -> qizhen_flow::Result<TaskResult> {
        let topic: String = required(&context, keys::GRAPH_TOPIC)?;
        let params = generation_params(&context);

        let query = format!("{topic} {}", self.subject.name);
        let mut snippets = dedupe(self.retriever.search(&query, params.retrieval_k).await);
        snippets.truncate(MAX_SNIPPETS);

        context.set(keys::RETRIEVED_SNIPPETS, &snippets).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

/// Asks for a Mermaid mindmap of the topic and normalises the reply.
pub struct GenerateMindmapTask {
    subject: &'static SubjectProfile,
    llm: LlmInvoker,
}

impl GenerateMindmapTask {
    pub fn new(subject: &'static SubjectProfile, llm: LlmInvoker) -> Self {
        Self { subject, llm }
    }
}

#[async_trait]
impl Task for GenerateMindmapTask {
    async fn run(&self, context: Context) -> qizhen_flow::Result<TaskResult> {
        let topic: String = required(&context, keys::GRAPH_TOPIC)?;
        let snippets: Vec<String> = context
            .get(keys::RETRIEVED_SNIPPETS)
            .await
            .unwrap_or_default();
        let params = generation_params(&context);

        let messages = vec![
            ChatMessage::system(prompts::KNOWLEDGE_GRAPH_SYSTEM),
            ChatMessage::user(prompts::knowledge_graph_prompt(
                self.subject,
                &topic,
                &snippets.join("\n\n"),
            )),
        ];
        let raw = self
            .llm
            .chat(messages, ChatOptions::new(GRAPH_TEMPERATURE, &params))
            .await
            .map_err(|e| FlowError::TaskExecutionFailed(format!("mindmap generation failed: {e}")))?;

        Ok(TaskResult::new(Some(format_mindmap(&raw)), NextAction::End))
    }
}
