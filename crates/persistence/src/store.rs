//! Session store trait and in-memory backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use coach_core::{
    CoachError, ErrorKind, FeedbackItem, PipelineSummary, Result, Session, SessionConfig,
    SessionStatus,
};

/// Filters for listing sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionQuery {
    pub user_id: Option<String>,
    pub status: Option<SessionStatus>,
    /// Page size, clamped to 1-100.
    pub limit: usize,
    pub offset: usize,
}

impl SessionQuery {
    pub fn clamped_limit(&self) -> usize {
        self.limit.clamp(1, 100)
    }
}

/// Partial update applied through `PUT /sessions/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<SessionStatus>,
    pub config: Option<SessionConfig>,
}

/// A feedback item as persisted, keyed by session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFeedback {
    pub session_id: Uuid,
    pub item: FeedbackItem,
    pub stored_at: DateTime<Utc>,
}

/// Filters for listing feedback.
#[derive(Debug, Clone, Default)]
pub struct FeedbackQuery {
    pub kind: Option<coach_core::FeedbackKind>,
    pub limit: usize,
    pub offset: usize,
}

/// Storage capability consumed by the core.
///
/// All mutation of persisted sessions flows through this trait; the core
/// only holds in-memory per-session state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &Session) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Session>>;

    async fn update(&self, session: &Session) -> Result<()>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    async fn list(&self, query: &SessionQuery) -> Result<Vec<Session>>;

    /// Append feedback to the session's append-only log.
    async fn append_feedback(&self, session_id: Uuid, item: &FeedbackItem) -> Result<()>;

    async fn list_feedback(
        &self,
        session_id: Uuid,
        query: &FeedbackQuery,
    ) -> Result<Vec<StoredFeedback>>;

    /// Persist the final pipeline summary on teardown.
    async fn store_summary(&self, session_id: Uuid, summary: &PipelineSummary) -> Result<()>;

    /// Store an audio blob when the session has `store_audio` enabled.
    /// Returns the blob path.
    async fn store_audio(&self, session_id: Uuid, data: &[u8]) -> Result<String>;
}

/// In-memory store, the default backend.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
    feedback: RwLock<HashMap<Uuid, Vec<StoredFeedback>>>,
    summaries: RwLock<HashMap<Uuid, PipelineSummary>>,
    audio: RwLock<HashMap<Uuid, Vec<Vec<u8>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(id: Uuid) -> CoachError {
        CoachError::new(ErrorKind::SessionNotFound, format!("session {id} not found"))
            .with_detail("session_id", id.to_string())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id) {
            return Err(CoachError::new(
                ErrorKind::DataIntegrity,
                format!("session {} already exists", session.id),
            ));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.sessions.read().get(&id).cloned())
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write();
        if !sessions.contains_key(&session.id) {
            return Err(Self::not_found(session.id));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.sessions.write().remove(&id);
        self.feedback.write().remove(&id);
        self.summaries.write().remove(&id);
        self.audio.write().remove(&id);
        Ok(())
    }

    async fn list(&self, query: &SessionQuery) -> Result<Vec<Session>> {
        let sessions = self.sessions.read();
        let mut matching: Vec<Session> = sessions
            .values()
            .filter(|s| {
                query
                    .user_id
                    .as_ref()
                    .map(|u| &s.user_id == u)
                    .unwrap_or(true)
                    && query.status.map(|st| s.status() == st).unwrap_or(true)
            })
            .cloned()
            .collect();

        // Newest first for stable pagination.
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matching
            .into_iter()
            .skip(query.offset)
            .take(query.clamped_limit())
            .collect())
    }

    async fn append_feedback(&self, session_id: Uuid, item: &FeedbackItem) -> Result<()> {
        if !self.sessions.read().contains_key(&session_id) {
            return Err(Self::not_found(session_id));
        }
        self.feedback
            .write()
            .entry(session_id)
            .or_default()
            .push(StoredFeedback {
                session_id,
                item: item.clone(),
                stored_at: Utc::now(),
            });
        Ok(())
    }

    async fn list_feedback(
        &self,
        session_id: Uuid,
        query: &FeedbackQuery,
    ) -> Result<Vec<StoredFeedback>> {
        let feedback = self.feedback.read();
        let entries = feedback.get(&session_id).cloned().unwrap_or_default();
        Ok(entries
            .into_iter()
            .filter(|f| query.kind.map(|k| f.item.kind == k).unwrap_or(true))
            .skip(query.offset)
            .take(query.limit.clamp(1, 100))
            .collect())
    }

    async fn store_summary(&self, session_id: Uuid, summary: &PipelineSummary) -> Result<()> {
        self.summaries.write().insert(session_id, summary.clone());
        tracing::debug!(session_id = %session_id, "Final summary persisted");
        Ok(())
    }

    async fn store_audio(&self, session_id: Uuid, data: &[u8]) -> Result<String> {
        if !self.sessions.read().contains_key(&session_id) {
            return Err(Self::not_found(session_id));
        }
        let mut audio = self.audio.write();
        let blobs = audio.entry(session_id).or_default();
        blobs.push(data.to_vec());
        Ok(format!("mem://sessions/{}/audio/{}", session_id, blobs.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_core::{FeedbackKind, FeedbackSource, Severity};

    fn session(user: &str) -> Session {
        Session::new(user, SessionConfig::default())
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = InMemorySessionStore::new();
        let s = session("user-1");

        store.create(&s).await.unwrap();
        let loaded = store.get(s.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, s.id);
        assert_eq!(loaded.user_id, "user-1");

        store.delete(s.id).await.unwrap();
        assert!(store.get(s.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = InMemorySessionStore::new();
        let s = session("user-1");
        store.create(&s).await.unwrap();
        let err = store.create(&s).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataIntegrity);
    }

    #[tokio::test]
    async fn test_update_missing_session() {
        let store = InMemorySessionStore::new();
        let err = store.update(&session("u")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn test_list_filters_and_pagination() {
        let store = InMemorySessionStore::new();
        for i in 0..5 {
            let user = if i % 2 == 0 { "alice" } else { "bob" };
            store.create(&session(user)).await.unwrap();
        }

        let query = SessionQuery {
            user_id: Some("alice".to_string()),
            limit: 10,
            ..Default::default()
        };
        let listed = store.list(&query).await.unwrap();
        assert_eq!(listed.len(), 3);

        let query = SessionQuery {
            limit: 2,
            offset: 2,
            ..Default::default()
        };
        let page = store.list(&query).await.unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn test_feedback_log_append_only() {
        let store = InMemorySessionStore::new();
        let s = session("user-1");
        store.create(&s).await.unwrap();

        for kind in [FeedbackKind::Pace, FeedbackKind::Clarity, FeedbackKind::Pace] {
            let item = FeedbackItem::new(
                kind,
                Severity::Info,
                "m",
                "s",
                0.8,
                FeedbackSource::Rule,
            );
            store.append_feedback(s.id, &item).await.unwrap();
        }

        let all = store
            .list_feedback(s.id, &FeedbackQuery { limit: 10, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let pace_only = store
            .list_feedback(
                s.id,
                &FeedbackQuery {
                    kind: Some(FeedbackKind::Pace),
                    limit: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(pace_only.len(), 2);
    }

    #[tokio::test]
    async fn test_store_audio_returns_path() {
        let store = InMemorySessionStore::new();
        let s = session("user-1");
        store.create(&s).await.unwrap();

        let path = store.store_audio(s.id, &[0u8; 128]).await.unwrap();
        assert!(path.contains(&s.id.to_string()));
    }
}
