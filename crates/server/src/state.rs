//! Application state
//!
//! Shared state across all handlers. Upstream bridges are optional: when a
//! key is missing the corresponding path degrades (rule-based feedback,
//! 503 on TTS) instead of failing startup.

use parking_lot::RwLock;
use std::sync::Arc;

use coach_config::Settings;
use coach_persistence::{InMemorySessionStore, SessionStore};
use coach_upstream::{AvatarBridge, CoachingModel, GenerativeLlmClient, SpeechSynthesizer};

use crate::websocket::ConnectionManager;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Configuration behind a lock for hot-reload support.
    pub config: Arc<RwLock<Settings>>,
    /// Session store (in-memory by default).
    pub store: Arc<dyn SessionStore>,
    /// Active connection manager.
    pub connections: Arc<ConnectionManager>,
    /// Coaching model, when an API key is configured.
    pub llm: Option<Arc<dyn CoachingModel>>,
    /// TTS bridge, when an API key is configured.
    pub tts: Option<Arc<SpeechSynthesizer>>,
    /// Avatar bridge, when an API key is configured.
    pub avatar: Option<Arc<AvatarBridge>>,
}

impl AppState {
    /// Build state with the default in-memory store.
    pub fn new(config: Settings) -> Self {
        Self::with_store(config, Arc::new(InMemorySessionStore::new()))
    }

    /// Build state with a custom session store backend.
    pub fn with_store(config: Settings, store: Arc<dyn SessionStore>) -> Self {
        let llm: Option<Arc<dyn CoachingModel>> = match GenerativeLlmClient::new(&config.llm) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                tracing::warn!("LLM bridge disabled: {}", e);
                None
            }
        };

        let tts = match SpeechSynthesizer::new(&config.tts) {
            Ok(synth) => Some(Arc::new(synth)),
            Err(e) => {
                tracing::warn!("TTS bridge disabled: {}", e);
                None
            }
        };

        let avatar = match AvatarBridge::new(&config.avatar) {
            Ok(bridge) => Some(Arc::new(bridge)),
            Err(e) => {
                tracing::warn!("Avatar bridge disabled: {}", e);
                None
            }
        };

        let connections = Arc::new(ConnectionManager::new(
            config.server.max_concurrent_sessions,
        ));

        Self {
            config: Arc::new(RwLock::new(config)),
            store,
            connections,
            llm,
            tts,
            avatar,
        }
    }

    pub fn get_config(&self) -> parking_lot::RwLockReadGuard<'_, Settings> {
        self.config.read()
    }
}
