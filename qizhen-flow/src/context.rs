use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A chat message that can travel through the context and be stored with a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl SerializableMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Shared state handed to every task of one graph execution.
///
/// Values are stored as JSON so tasks can exchange any serde type without the
/// graph knowing about it. Cloning is cheap and clones share the same storage.
#[derive(Clone, Debug)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
    history: Arc<RwLock<Vec<SerializableMessage>>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Serialize) {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.data.insert(key, value);
            }
            Err(e) => warn!(key = %key, error = %e, "dropping context value that failed to serialize"),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_sync(key)
    }

    pub fn get_sync<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub async fn add_user_message(&self, content: impl Into<String>) {
        self.history
            .write()
            .await
            .push(SerializableMessage::user(content));
    }

    pub async fn add_assistant_message(&self, content: impl Into<String>) {
        self.history
            .write()
            .await
            .push(SerializableMessage::assistant(content));
    }

    /// Replace the chat history wholesale, e.g. when resuming a stored dialogue.
    pub async fn load_messages(&self, messages: Vec<SerializableMessage>) {
        *self.history.write().await = messages;
    }

    pub async fn get_all_messages(&self) -> Vec<SerializableMessage> {
        self.history.read().await.clone()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_round_trip_through_json() {
        let context = Context::new();
        context.set("count", 3u32).await;
        context.set("topics", vec!["长征", "遵义会议"]).await;

        assert_eq!(context.get::<u32>("count").await, Some(3));
        assert_eq!(
            context.get_sync::<Vec<String>>("topics"),
            Some(vec!["长征".to_string(), "遵义会议".to_string()])
        );
        assert_eq!(context.get::<String>("count").await, None);
        assert!(context.get_sync::<u32>("missing").is_none());
    }

    #[tokio::test]
    async fn clones_share_storage() {
        let context = Context::new();
        let clone = context.clone();
        clone.set("answer", "ok").await;
        assert_eq!(context.get::<String>("answer").await.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn history_keeps_order_and_roles() {
        let context = Context::new();
        context.add_user_message("一").await;
        context.add_assistant_message("二").await;
        context.add_user_message("三").await;

        let messages = context.get_all_messages().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content, "二");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[2].role, MessageRole::User);
    }

    #[tokio::test]
    async fn load_messages_replaces_history() {
        let context = Context::new();
        context.add_user_message("old").await;
        context
            .load_messages(vec![
                SerializableMessage::user("q"),
                SerializableMessage::assistant("a"),
            ])
            .await;
        assert_eq!(context.get_all_messages().await.len(), 2);
        assert_eq!(context.get_all_messages().await[0].content, "q");
    }
}
