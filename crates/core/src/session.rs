//! Session model
//!
//! The unit of work for the coaching server. Lifecycle transitions are
//! enforced here; anything beyond a terminal state is rejected.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoachError, ErrorKind, Result};
use crate::language::Language;

/// Session lifecycle states.
///
/// `Created -> Active <-> Paused -> {Completed, Cancelled}`; `Expired` and
/// `Error` can be reached from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Created,
    Active,
    Paused,
    Completed,
    Cancelled,
    Expired,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed
                | SessionStatus::Cancelled
                | SessionStatus::Expired
                | SessionStatus::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Expired => "expired",
            SessionStatus::Error => "error",
        }
    }
}

/// What kind of coaching session this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    #[default]
    Practice,
    LiveCoaching,
    Evaluation,
    Training,
}

/// Per-session configuration, fixed at creation.
///
/// Runtime-mutable fields are limited to the `config_update` whitelist in
/// the connection manager; everything else is immutable after create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub language: Language,
    #[serde(default)]
    pub kind: SessionKind,
    /// Maximum session duration in seconds (60-7200).
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,
    /// Seconds of continuous silence before auto-pause.
    #[serde(default = "default_silence_threshold")]
    pub silence_pause_threshold_secs: u64,
    /// Chunks between LLM coaching calls (1-30).
    #[serde(default = "default_feedback_frequency")]
    pub feedback_frequency: u32,
    #[serde(default = "default_true")]
    pub real_time_feedback: bool,
    #[serde(default = "default_true")]
    pub detailed_analysis: bool,
    #[serde(default = "default_true")]
    pub ai_coaching: bool,
    #[serde(default)]
    pub store_audio: bool,
}

fn default_max_duration() -> u64 {
    1800
}

fn default_silence_threshold() -> u64 {
    10
}

fn default_feedback_frequency() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            language: Language::French,
            kind: SessionKind::Practice,
            max_duration_secs: default_max_duration(),
            silence_pause_threshold_secs: default_silence_threshold(),
            feedback_frequency: default_feedback_frequency(),
            real_time_feedback: true,
            detailed_analysis: true,
            ai_coaching: true,
            store_audio: false,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(60..=7200).contains(&self.max_duration_secs) {
            return Err(CoachError::new(
                ErrorKind::Validation,
                "max_duration_secs must be between 60 and 7200",
            )
            .with_detail("max_duration_secs", self.max_duration_secs));
        }
        if !(1..=30).contains(&self.feedback_frequency) {
            return Err(CoachError::new(
                ErrorKind::Validation,
                "feedback_frequency must be between 1 and 30",
            )
            .with_detail("feedback_frequency", self.feedback_frequency));
        }
        Ok(())
    }
}

/// Mutable per-session processing state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionState {
    pub status: SessionStatus,
    pub chunks_processed: u64,
    /// Monotonically non-decreasing error counter.
    pub processing_errors: u64,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn record_error(&mut self) {
        self.processing_errors += 1;
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Some(Utc::now());
    }
}

/// A presentation coaching session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub config: SessionConfig,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            title: None,
            description: None,
            config,
            state: SessionState::default(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            duration_seconds: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.config.max_duration_secs as i64)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at()
    }

    pub fn is_active(&self) -> bool {
        self.state.status == SessionStatus::Active
    }

    fn transition(&mut self, from: &[SessionStatus], to: SessionStatus) -> Result<()> {
        if self.state.status.is_terminal() {
            return Err(CoachError::new(
                ErrorKind::InvalidSessionState,
                format!(
                    "session is {} and cannot transition to {}",
                    self.state.status.as_str(),
                    to.as_str()
                ),
            )
            .with_detail("session_id", self.id.to_string()));
        }
        if !from.contains(&self.state.status) {
            return Err(CoachError::new(
                ErrorKind::InvalidSessionState,
                format!(
                    "cannot transition from {} to {}",
                    self.state.status.as_str(),
                    to.as_str()
                ),
            )
            .with_detail("session_id", self.id.to_string()));
        }
        self.state.status = to;
        Ok(())
    }

    /// Finalize the end timestamp and duration on a terminal transition.
    fn finalize(&mut self) {
        let now = Utc::now();
        self.ended_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration_seconds = Some((now - started).num_milliseconds() as f64 / 1000.0);
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(&[SessionStatus::Created], SessionStatus::Active)?;
        self.started_at = Some(Utc::now());
        self.state.touch();
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.transition(&[SessionStatus::Active], SessionStatus::Paused)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.transition(&[SessionStatus::Paused], SessionStatus::Active)
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(
            &[SessionStatus::Active, SessionStatus::Paused],
            SessionStatus::Completed,
        )?;
        self.finalize();
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(
            &[
                SessionStatus::Created,
                SessionStatus::Active,
                SessionStatus::Paused,
            ],
            SessionStatus::Cancelled,
        )?;
        self.finalize();
        Ok(())
    }

    pub fn expire(&mut self) -> Result<()> {
        self.transition(
            &[
                SessionStatus::Created,
                SessionStatus::Active,
                SessionStatus::Paused,
            ],
            SessionStatus::Expired,
        )?;
        self.finalize();
        Ok(())
    }

    pub fn mark_error(&mut self, message: &str) -> Result<()> {
        self.transition(
            &[
                SessionStatus::Created,
                SessionStatus::Active,
                SessionStatus::Paused,
            ],
            SessionStatus::Error,
        )?;
        self.finalize();
        tracing::warn!(session_id = %self.id, error = %message, "Session marked as errored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut session = Session::new("user-1", SessionConfig::default());
        assert_eq!(session.status(), SessionStatus::Created);

        session.start().unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
        assert!(session.started_at.is_some());

        session.pause().unwrap();
        session.resume().unwrap();
        session.complete().unwrap();

        assert_eq!(session.status(), SessionStatus::Completed);
        assert!(session.ended_at.is_some());
        assert!(session.duration_seconds.is_some());
        assert!(session.started_at.unwrap() <= session.ended_at.unwrap());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut session = Session::new("user-1", SessionConfig::default());
        session.start().unwrap();
        session.complete().unwrap();

        let err = session.start().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidSessionState);
        let err = session.pause().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidSessionState);
    }

    #[test]
    fn test_invalid_transition() {
        let mut session = Session::new("user-1", SessionConfig::default());
        // Cannot pause before starting.
        assert!(session.pause().is_err());
        // Cannot resume a session that was never paused.
        session.start().unwrap();
        assert!(session.resume().is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SessionConfig::default();
        assert!(config.validate().is_ok());

        config.max_duration_secs = 30;
        assert!(config.validate().is_err());

        config.max_duration_secs = 600;
        config.feedback_frequency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_error_counter_monotonic() {
        let mut state = SessionState::default();
        state.record_error();
        state.record_error();
        assert_eq!(state.processing_errors, 2);
    }
}
