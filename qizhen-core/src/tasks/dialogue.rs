use async_trait::async_trait;
use qizhen_flow::{Context, FlowError, NextAction, Task, TaskResult};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::{info, warn};

use super::types::{DIALOGUE_TEMPERATURE, INTENT_TEMPERATURE, generation_params, keys, required};
use crate::llm::{ChatMessage, ChatOptions, LlmInvoker};
use crate::models::DialogueState;
use crate::prompts;
use crate::retrieval::{MAX_SNIPPETS, Retriever, dedupe};
use crate::subjects::{Persona, SubjectProfile};

static JSON_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("json object regex is valid"));

#[derive(Debug, Default, Deserialize)]
struct DialogueIntent {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    character: Option<String>,
}

/// Read `{topic, character}` out of a model reply. Anything unusable falls
/// back to the persona defaults, field by field.
pub fn parse_dialogue_intent(reply: &str, defaults: Persona) -> (String, String) {
    let parsed = JSON_OBJECT_RE
        .find(reply)
        .and_then(|m| match serde_json::from_str::<DialogueIntent>(m.as_str()) {
            Ok(intent) => Some(intent),
            Err(e) => {
                warn!("dialogue intent is not valid JSON, using defaults: {}", e);
                None
            }
        })
        .unwrap_or_default();

    let pick = |value: Option<String>, fallback: &str| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    };
    (
        pick(parsed.topic, defaults.topic),
        pick(parsed.character, defaults.character),
    )
}

/// Settles topic and persona. The first turn asks the model; later turns reuse
/// the stored dialogue. Either way the user's message joins the history.
pub struct ResolveDialogueIntentTask {
    subject: &'static SubjectProfile,
    persona: Persona,
    llm: LlmInvoker,
}

impl ResolveDialogueIntentTask {
    pub fn new(subject: &'static SubjectProfile, persona: Persona, llm: LlmInvoker) -> Self {
        Self {
            subject,
            persona,
            llm,
        }
    }

    async fn ask_model(&self, user_input: &str, context: &Context) -> (String, String) {
        let params = generation_params(context);
        let messages = vec![
            ChatMessage::system(prompts::INTENT_SYSTEM),
            ChatMessage::user(prompts::dialogue_intent_prompt(
                self.subject,
                user_input,
                self.persona.character,
                self.persona.topic,
            )),
        ];
        match self
            .llm
            .chat(messages, ChatOptions::new(INTENT_TEMPERATURE, &params))
            .await
        {
            Ok(reply) => parse_dialogue_intent(&reply, self.persona),
            Err(e) => {
                warn!(subject = self.subject.slug, "dialogue intent call failed, using defaults: {}", e);
                (self.persona.topic.to_string(), self.persona.character.to_string())
            }
        }
    }
}

#[async_trait]
impl Task for ResolveDialogueIntentTask {
    async fn run(&self, context: Context) -> qizhen_flow::Result<TaskResult> {
        let user_input: String = required(&context, keys::USER_INPUT)?;
        let stored: Option<DialogueState> = context.get(keys::DIALOGUE_STATE).await;

        let (topic, character) = match stored {
            Some(state) => {
                context.load_messages(state.history).await;
                (state.topic, state.persona_character)
            }
            None => self.ask_model(&user_input, &context).await,
        };
        info!(topic = %topic, character = %character, "dialogue persona");

        context.add_user_message(user_input).await;
        context.set(keys::DIALOGUE_TOPIC, topic).await;
        context.set(keys::DIALOGUE_CHARACTER, character).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

pub struct RetrieveDialogueContextTask {
    subject: &'static SubjectProfile,
    retriever: Retriever,
}

impl RetrieveDialogueContextTask {
    pub fn new(subject: &'static SubjectProfile, retriever: Retriever) -> Self {
        Self { subject, retriever }
    }
}

#[async_trait]
impl Task for RetrieveDialogueContextTask {
    async fn run(&self, context: Context) -> qizhen_flow::Result<TaskResult> {
        let topic: String = required(&context, keys::DIALOGUE_TOPIC)?;
        let character: String = required(&context, keys::DIALOGUE_CHARACTER)?;
        let params = generation_params(&context);

        let query = format!("{topic} {} {character}", self.subject.name);
        let mut snippets = dedupe(self.retriever.search(&query, params.retrieval_k).await);
        snippets.truncate(MAX_SNIPPETS);

        context.set(keys::RETRIEVED_SNIPPETS, &snippets).await;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

/// In-character reply that asks guiding questions instead of giving answers.
pub struct SocraticReplyTask {
    subject: &'static SubjectProfile,
    llm: LlmInvoker,
}

impl SocraticReplyTask {
    pub fn new(subject: &'static SubjectProfile, llm: LlmInvoker) -> Self {
        Self { subject, llm }
    }
}

#[async_trait]
impl Task for SocraticReplyTask {
    async fn run(&self, context: Context) -> qizhen_flow::Result<TaskResult> {
        let topic: String = required(&context, keys::DIALOGUE_TOPIC)?;
        let character: String = required(&context, keys::DIALOGUE_CHARACTER)?;
        let snippets: Vec<String> = context
            .get(keys::RETRIEVED_SNIPPETS)
            .await
            .unwrap_or_default();
        let params = generation_params(&context);

        let mut messages = vec![ChatMessage::system(prompts::socratic_system(
            self.subject,
            &character,
            &topic,
            &snippets,
        ))];
        messages.extend(context.get_all_messages().await.iter().map(ChatMessage::from));

        let reply = self
            .llm
            .chat(messages, ChatOptions::new(DIALOGUE_TEMPERATURE, &params))
            .await
            .map_err(|e| FlowError::TaskExecutionFailed(format!("dialogue reply failed: {e}")))?;

        context.add_assistant_message(reply.clone()).await;
        Ok(TaskResult::new(Some(reply), NextAction::End))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{ScriptedChat, invoker};
    use qizhen_flow::{MessageRole, SerializableMessage};

    const MAO: Persona = Persona {
        character: "毛泽东",
        topic: "毛泽东思想",
    };

    fn maogai() -> &'static SubjectProfile {
        SubjectProfile::by_slug("maogai").unwrap()
    }

    #[test]
    fn intent_reply_parsing() {
        let reply = "好的，识别结果如下：\n{\n  \"topic\": \"实事求是\",\n  \"character\": \"毛泽东\"\n}";
        assert_eq!(
            parse_dialogue_intent(reply, MAO),
            ("实事求是".to_string(), "毛泽东".to_string())
        );

        let blank = r#"{"topic": "  ", "character": "周恩来"}"#;
        assert_eq!(
            parse_dialogue_intent(blank, MAO),
            ("毛泽东思想".to_string(), "周恩来".to_string())
        );
    }

    #[test]
    fn untrusted_reply_fails_closed() {
        for reply in [
            "没有 JSON",
            "{'topic': '实践'}",
            "{\"topic\": __import__('os')}",
            "{\"topic\": 42}",
        ] {
            assert_eq!(
                parse_dialogue_intent(reply, MAO),
                ("毛泽东思想".to_string(), "毛泽东".to_string()),
                "reply: {reply}"
            );
        }
    }

    #[tokio::test]
    async fn first_turn_asks_model_for_persona() {
        let backend = ScriptedChat::new(vec![Ok(r#"{"topic":"群众路线","character":"毛泽东"}"#.into())]);
        let task = ResolveDialogueIntentTask::new(maogai(), MAO, invoker(backend.clone()));
        let context = Context::new();
        context.set(keys::USER_INPUT, "我想聊聊群众路线").await;

        task.run(context.clone()).await.unwrap();

        assert_eq!(context.get::<String>(keys::DIALOGUE_TOPIC).await.unwrap(), "群众路线");
        let messages = context.get_all_messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
        let prompt = &backend.requests()[0].messages[1].content;
        assert!(prompt.contains("用户输入: 我想聊聊群众路线"));
    }

    #[tokio::test]
    async fn later_turns_reuse_stored_persona() {
        let backend = ScriptedChat::new(vec![]);
        let task = ResolveDialogueIntentTask::new(maogai(), MAO, invoker(backend.clone()));
        let context = Context::new();
        context.set(keys::USER_INPUT, "是实践").await;
        context
            .set(
                keys::DIALOGUE_STATE,
                DialogueState {
                    topic: "实践论".into(),
                    persona_character: "毛泽东".into(),
                    turn_count: 1,
                    history: vec![
                        SerializableMessage::user("什么是认识的来源？"),
                        SerializableMessage::assistant("同志，你怎么看？"),
                    ],
                },
            )
            .await;

        task.run(context.clone()).await.unwrap();

        assert!(backend.requests().is_empty());
        assert_eq!(context.get::<String>(keys::DIALOGUE_TOPIC).await.unwrap(), "实践论");
        assert_eq!(context.get_all_messages().await.len(), 3);
    }

    #[tokio::test]
    async fn reply_is_sent_with_history_and_recorded() {
        let backend = ScriptedChat::new(vec![Ok("那么，实践又从何而来？".into())]);
        let context = Context::new();
        context.set(keys::DIALOGUE_TOPIC, "实践论").await;
        context.set(keys::DIALOGUE_CHARACTER, "毛泽东").await;
        context.add_user_message("认识来源于实践").await;

        let result = SocraticReplyTask::new(maogai(), invoker(backend.clone()))
            .run(context.clone())
            .await
            .unwrap();

        assert_eq!(result.response.as_deref(), Some("那么，实践又从何而来？"));
        let request = &backend.requests()[0];
        assert_eq!(request.messages.len(), 2);
        assert!(request.messages[0].content.contains("正在扮演 毛泽东"));
        assert!(request.messages[0].content.ends_with("当前对话历史：\n"));
        assert_eq!(context.get_all_messages().await.len(), 2);
    }

    #[tokio::test]
    async fn failed_reply_leaves_history_untouched() {
        let backend = ScriptedChat::new(vec![]);
        let context = Context::new();
        context.set(keys::DIALOGUE_TOPIC, "实践论").await;
        context.set(keys::DIALOGUE_CHARACTER, "毛泽东").await;
        context.add_user_message("认识来源于实践").await;

        let err = SocraticReplyTask::new(maogai(), invoker(backend))
            .run(context.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::TaskExecutionFailed(_)));
        assert_eq!(context.get_all_messages().await.len(), 1);
    }
}
