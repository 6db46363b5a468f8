use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::SessionError;
use crate::models::{DialogueState, GeneratedOutput};

/// Everything remembered about one caller between requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub subject: String,
    /// Active persona dialogue, if one was started
    pub dialogue: Option<DialogueState>,
    /// Most recent generated questions, kept so answers can be revealed later
    pub last_output: Option<GeneratedOutput>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(subject: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), subject)
    }

    pub fn with_id(id: impl Into<String>, subject: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            subject: subject.into(),
            dialogue: None,
            last_output: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Key-value storage for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Session>, SessionError>;

    async fn put(&self, session: Session) -> Result<(), SessionError>;

    /// Returns whether a session was removed.
    async fn delete(&self, id: &str) -> Result<bool, SessionError>;
}

/// Process-local store. Sessions live until deleted or the process exits.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.sessions.get(id).map(|entry| entry.value().clone()))
    }

    async fn put(&self, session: Session) -> Result<(), SessionError> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.sessions.remove(id).is_some())
    }
}

/// One async mutex per session id. Requests for the same session run one at a
/// time so a read-modify-write of the session is never interleaved.
#[derive(Default)]
pub struct SessionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Unlock `id` and stop tracking it unless another request is already
    /// queued on the same lock. The entry is removed while the guard is held.
    pub fn release(&self, id: &str, guard: OwnedMutexGuard<()>) {
        // One reference in the map, one in `guard`.
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) <= 2);
        drop(guard);
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.locks.len()
    }
}
