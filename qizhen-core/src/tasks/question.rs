use async_trait::async_trait;
use qizhen_flow::{Context, FlowError, NextAction, Task, TaskResult};
use regex::Regex;
use std::sync::LazyLock;
use tracing::info;

use super::types::{QUESTION_TEMPERATURE, generation_params, keys, required};
use crate::filter::strip_explanations;
use crate::intent::IntentParser;
use crate::llm::{ChatMessage, ChatOptions, LlmInvoker};
use crate::models::{GeneratedOutput, ParsedIntent};
use crate::prompts;
use crate::retrieval::{MAX_SNIPPETS, Retriever, dedupe};
use crate::subjects::SubjectProfile;

pub const REVEAL_KEYWORDS: &[&str] = &["解析", "答案", "讲解", "答案解析", "参考答案"];

pub const NO_CACHED_QUESTIONS: &str = "当前没有可供解析的题目，请先提出出题需求。";

/// Snippets from the retrieved set that go into the prompt.
const PROMPT_SNIPPETS: usize = 3;

static TOPIC_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[;；、，]").expect("topic split regex is valid"));

pub fn wants_reveal(text: &str) -> bool {
    REVEAL_KEYWORDS.iter().any(|kw| text.contains(kw))
}

/// Decides between revealing cached answers and generating new questions.
pub struct ParseQuestionRequestTask {
    subject: &'static SubjectProfile,
    parser: IntentParser,
}

impl ParseQuestionRequestTask {
    pub fn new(subject: &'static SubjectProfile, parser: IntentParser) -> Self {
        Self { subject, parser }
    }
}

#[async_trait]
impl Task for ParseQuestionRequestTask {
    async fn run(&self, context: Context) -> qizhen_flow::Result<TaskResult> {
        let user_input: String = required(&context, keys::USER_INPUT)?;

        if wants_reveal(&user_input) {
            context.set(keys::REVEAL_REQUESTED, true).await;
            return Ok(TaskResult::new(None, NextAction::Continue));
        }
        context.set(keys::REVEAL_REQUESTED, false).await;

        let intent = self.parser.parse(
            &user_input,
            self.subject.known_topics,
            self.subject.default_topic,
        );
        info!(
            subject = self.subject.slug,
            topics = ?intent.topics,
            num_questions = intent.num_questions,
            difficulty = intent.difficulty.label(),
            question_type = intent.question_type.label(),
            "parsed question request"
        );
        context.set(keys::PARSED_INTENT, &intent).await;

        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

/// Returns the full text of the session's last generated questions.
pub struct RevealAnswersTask;

#[async_trait]
impl Task for RevealAnswersTask {
    async fn run(&self, context: Context) -> qizhen_flow::Result<TaskResult> {
        let cached: Option<GeneratedOutput> = context.get(keys::CACHED_OUTPUT).await;
        let (response, status) = match cached {
            Some(output) => (output.full_text, "revealed cached answers"),
            None => (NO_CACHED_QUESTIONS.to_string(), "nothing cached to reveal"),
        };
        Ok(TaskResult::new_with_status(
            Some(response),
            NextAction::End,
            Some(status.to_string()),
        ))
    }
}

/// One similarity query per requested topic, merged into a single snippet list.
pub struct RetrieveQuestionContextTask {
    subject: &'static SubjectProfile,
    retriever: Retriever,
}

impl RetrieveQuestionContextTask {
    pub fn new(subject: &'static SubjectProfile, retriever: Retriever) -> Self {
        Self { subject, retriever }
    }
}

#[async_trait]
impl Task for RetrieveQuestionContextTask {
    async fn run(&self, context: Context) -> qizhen_flow::Result<TaskResult> {
        let intent: ParsedIntent = required(&context, keys::PARSED_INTENT)?;
        let params = generation_params(&context);

        let mut snippets = Vec::new();
        for topic in query_topics(&intent) {
            let query = format!("{topic} {}", self.subject.name);
            snippets.extend(self.retriever.search(&query, params.retrieval_k).await);
        }
        let mut snippets = dedupe(snippets);
        snippets.truncate(MAX_SNIPPETS);

        info!(subject = self.subject.slug, snippets = snippets.len(), "question context retrieved");
        context.set(keys::RETRIEVED_SNIPPETS, &snippets).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

fn query_topics(intent: &ParsedIntent) -> Vec<String> {
    intent
        .topics
        .iter()
        .flat_map(|topic| TOPIC_SPLIT_RE.split(topic))
        .map(str::trim)
        .filter(|topic| !topic.is_empty())
        .map(str::to_string)
        .collect()
}

/// Calls the chat model and keeps both the full and the question-only text.
pub struct GenerateQuestionsTask {
    subject: &'static SubjectProfile,
    llm: LlmInvoker,
}

impl GenerateQuestionsTask {
    pub fn new(subject: &'static SubjectProfile, llm: LlmInvoker) -> Self {
        Self { subject, llm }
    }
}

#[async_trait]
impl Task for GenerateQuestionsTask {
    async fn run(&self, context: Context) -> qizhen_flow::Result<TaskResult> {
        let user_input: String = required(&context, keys::USER_INPUT)?;
        let intent: ParsedIntent = required(&context, keys::PARSED_INTENT)?;
        let snippets: Vec<String> = context
            .get(keys::RETRIEVED_SNIPPETS)
            .await
            .unwrap_or_default();
        let params = generation_params(&context);

        let reference = snippets
            .iter()
            .take(PROMPT_SNIPPETS)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n\n");
        let messages = vec![
            ChatMessage::system(prompts::question_system(self.subject)),
            ChatMessage::user(prompts::question_prompt(
                self.subject,
                &intent,
                &reference,
                &user_input,
            )),
        ];

        let full_text = self
            .llm
            .chat(messages, ChatOptions::new(QUESTION_TEMPERATURE, &params))
            .await
            .map_err(|e| FlowError::TaskExecutionFailed(format!("question generation failed: {e}")))?
            .trim()
            .to_string();

        let output = GeneratedOutput {
            question_only_text: strip_explanations(&full_text),
            full_text,
        };
        info!(
            subject = self.subject.slug,
            full_chars = output.full_text.chars().count(),
            shown_chars = output.question_only_text.chars().count(),
            "questions generated"
        );
        context.set(keys::GENERATED_OUTPUT, &output).await;

        Ok(TaskResult::new(
            Some(output.question_only_text),
            NextAction::End,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{ScriptedChat, invoker};
    use crate::models::{Difficulty, QuestionKind, QuestionType};
    use crate::retrieval::testing::retriever_over;

    fn jindaishi() -> &'static SubjectProfile {
        SubjectProfile::by_slug("jindaishi").unwrap()
    }

    #[test]
    fn reveal_keywords() {
        assert!(wants_reveal("讲解一下刚才的题"));
        assert!(wants_reveal("给出参考答案"));
        assert!(!wants_reveal("出3道选择题"));
    }

    #[test]
    fn topics_split_on_separators() {
        let intent = ParsedIntent {
            topics: vec!["鸦片战争、辛亥革命".into(), " 长征 ".into()],
            num_questions: 1,
            difficulty: Difficulty::Medium,
            question_type: QuestionType::Single(QuestionKind::Choice),
            type_counts: vec![(QuestionKind::Choice, 1)],
        };
        assert_eq!(query_topics(&intent), vec!["鸦片战争", "辛亥革命", "长征"]);
    }

    #[tokio::test]
    async fn parse_stores_intent() {
        let task = ParseQuestionRequestTask::new(jindaishi(), IntentParser::default());
        let context = Context::new();
        context.set(keys::USER_INPUT, "请出3道关于戊戌变法的简单选择题").await;

        task.run(context.clone()).await.unwrap();

        assert_eq!(context.get::<bool>(keys::REVEAL_REQUESTED).await, Some(false));
        let intent: ParsedIntent = context.get(keys::PARSED_INTENT).await.unwrap();
        assert_eq!(intent.topics, vec!["戊戌变法"]);
        assert_eq!(intent.num_questions, 3);
    }

    #[tokio::test]
    async fn reveal_without_cache_explains_itself() {
        let result = RevealAnswersTask.run(Context::new()).await.unwrap();
        assert_eq!(result.response.as_deref(), Some(NO_CACHED_QUESTIONS));
        assert_eq!(result.next_action, NextAction::End);
    }

    #[tokio::test]
    async fn retrieval_merges_topics() {
        let retriever = retriever_over(&["鸦片战争 史料", "辛亥革命 史料", "长征 史料"]).await;
        let task = RetrieveQuestionContextTask::new(jindaishi(), retriever);
        let context = Context::new();
        context
            .set(
                keys::PARSED_INTENT,
                ParsedIntent {
                    topics: vec!["鸦片战争".into(), "长征".into()],
                    num_questions: 2,
                    difficulty: Difficulty::Easy,
                    question_type: QuestionType::Single(QuestionKind::Choice),
                    type_counts: vec![(QuestionKind::Choice, 2)],
                },
            )
            .await;

        task.run(context.clone()).await.unwrap();

        let snippets: Vec<String> = context.get(keys::RETRIEVED_SNIPPETS).await.unwrap();
        assert!(snippets.len() <= MAX_SNIPPETS);
        assert_eq!(snippets[0], "鸦片战争 史料");
        assert!(snippets.contains(&"长征 史料".to_string()));
        let unique: std::collections::HashSet<_> = snippets.iter().collect();
        assert_eq!(unique.len(), snippets.len());
    }

    #[tokio::test]
    async fn generation_failure_is_a_task_error() {
        let backend = ScriptedChat::new(vec![Err(crate::error::LlmError::Timeout(
            std::time::Duration::from_secs(1),
        ))]);
        let task = GenerateQuestionsTask::new(jindaishi(), invoker(backend));
        let context = Context::new();
        context.set(keys::USER_INPUT, "出题").await;
        context
            .set(
                keys::PARSED_INTENT,
                crate::intent::parse_intent("出题", &[], "中国近现代史纲要"),
            )
            .await;

        let err = task.run(context.clone()).await.unwrap_err();
        assert!(matches!(err, FlowError::TaskExecutionFailed(_)));
        assert!(context.get::<GeneratedOutput>(keys::GENERATED_OUTPUT).await.is_none());
    }
}
