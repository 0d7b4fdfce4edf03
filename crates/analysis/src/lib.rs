//! Language-aware voice analysis
//!
//! Frame-level DSP, energy VAD, language-adapted scoring, and the stateful
//! per-session [`VoiceAnalyzer`].

pub mod advanced;
pub mod analyzer;
pub mod features;
pub mod scoring;
pub mod vad;

pub use analyzer::VoiceAnalyzer;
pub use features::{compute_frame_features, FrameFeatures};
pub use vad::{detect_voice_activity, VoiceActivity};
