use async_trait::async_trait;
use qizhen_flow::{Context, FlowError, NextAction, Task, TaskResult};
use tracing::info;

use super::types::{ANSWER_TEMPERATURE, generation_params, keys, required};
use crate::llm::{ChatMessage, ChatOptions, LlmInvoker};
use crate::prompts;
use crate::retrieval::{MAX_SNIPPETS, Retriever, dedupe};
use crate::subjects::SubjectProfile;

pub struct RetrieveAnswerContextTask {
    subject: &'static SubjectProfile,
    retriever: Retriever,
}

impl RetrieveAnswerContextTask {
    pub fn new(subject: &'static SubjectProfile, retriever: Retriever) -> Self {
        Self { subject, retriever }
    }
}

#[async_trait]
impl Task for RetrieveAnswerContextTask {
    async fn run(&self, context: Context) -> qizhen_flow::Result<TaskResult> {
        let question: String = required(&context, keys::USER_INPUT)?;
        let params = generation_params(&context);

        let query = format!("{question} {}", self.subject.name);
        let found = self.retriever.search(&query, params.retrieval_k).await;
        let mut snippets = dedupe(
            found
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        );
        snippets.truncate(MAX_SNIPPETS);

        info!(subject = self.subject.slug, snippets = snippets.len(), "answer context retrieved");
        context.set(keys::RETRIEVED_SNIPPETS, &snippets).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

/// Structured-Markdown answer grounded on the retrieved snippets.
pub struct GenerateAnswerTask {
    subject: &'static SubjectProfile,
    llm: LlmInvoker,
}

impl GenerateAnswerTask {
    pub fn new(subject: &'static SubjectProfile, llm: LlmInvoker) -> Self {
        Self { subject, llm }
    }
}

#[async_trait]
impl Task for GenerateAnswerTask {
    async fn run(&self, context: Context) -> qizhen_flow::Result<TaskResult> {
        let question: String = required(&context, keys::USER_INPUT)?;
        let snippets: Vec<String> = context
            .get(keys::RETRIEVED_SNIPPETS)
            .await
            .unwrap_or_default();
        let params = generation_params(&context);

        let messages = vec![
            ChatMessage::system(prompts::answer_system(self.subject)),
            ChatMessage::user(prompts::answer_prompt(
                self.subject,
                &question,
                &snippets.join("\n\n"),
            )),
        ];
        let reply = self
            .llm
            .chat(messages, ChatOptions::new(ANSWER_TEMPERATURE, &params))
            .await
            .map_err(|e| FlowError::TaskExecutionFailed(format!("answer generation failed: {e}")))?;

        let answer = strip_fences(&reply);
        info!(subject = self.subject.slug, chars = answer.chars().count(), "answer generated");
        Ok(TaskResult::new(Some(answer), NextAction::End))
    }
}

/// Drop backticks wrapping the whole reply.
pub fn strip_fences(reply: &str) -> String {
    reply.trim().trim_matches('`').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{ScriptedChat, invoker};
    use crate::retrieval::testing::retriever_over;

    fn sdfz() -> &'static SubjectProfile {
        SubjectProfile::by_slug("sdfz").unwrap()
    }

    #[test]
    fn fences_are_removed() {
        assert_eq!(strip_fences("```\n### 核心结论\n```"), "### 核心结论");
        assert_eq!(strip_fences("  纯文本  "), "纯文本");
        assert_eq!(strip_fences("含有 `代码` 的回答"), "含有 `代码` 的回答");
    }

    #[tokio::test]
    async fn answer_uses_retrieved_context() {
        let backend = ScriptedChat::new(vec![Ok("```### 核心结论\n- **理想信念**```".into())]);
        let retriever = retriever_over(&["长征 精神", "鸦片战争 背景"]).await;
        let context = Context::new();
        context.set(keys::USER_INPUT, "长征精神的内涵是什么？").await;

        RetrieveAnswerContextTask::new(sdfz(), retriever)
            .run(context.clone())
            .await
            .unwrap();
        let result = GenerateAnswerTask::new(sdfz(), invoker(backend.clone()))
            .run(context)
            .await
            .unwrap();

        assert_eq!(result.response.as_deref(), Some("### 核心结论\n- **理想信念**"));
        let request = &backend.requests()[0];
        assert_eq!(request.model, "qwen-max");
        assert_eq!(request.options.temperature, ANSWER_TEMPERATURE);
        assert!(request.messages[1].content.contains("长征 精神"));
        assert!(request.messages[1].content.contains("学生问题：长征精神的内涵是什么？"));
    }
}
