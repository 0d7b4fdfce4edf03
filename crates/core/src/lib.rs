//! Core types for the presentation coaching server
//!
//! This crate provides the foundational types used across all other crates:
//! - Audio ring buffer, decoding, and resampling
//! - Session model and lifecycle
//! - Voice metrics and pipeline envelope types
//! - Error taxonomy

pub mod audio;
pub mod envelope;
pub mod error;
pub mod language;
pub mod metrics;
pub mod session;

pub use audio::{
    decode_audio, detect_format, f32_to_pcm16, pcm16_to_f32, resample, validate_audio_bytes,
    AudioFormat, AudioRing, AudioValidation, DecodedAudio,
};
pub use envelope::{
    BenchmarkComparison, ChunkPriority, CoachingFeedback, CoachingReply, CoachingResult, Envelope,
    FeedbackItem, FeedbackKind, FeedbackSource, Improvement, LearningCurve, Milestone,
    MilestoneKind, PerformanceLevel, PerformanceReport, PipelineInfo, PipelineStats,
    PipelineSummary, Severity, SessionProgress, TaggedChunk,
};
pub use error::{CoachError, ErrorEnvelope, ErrorKind, Result};
pub use language::Language;
pub use metrics::{
    AdvancedMetrics, ClarityReport, PaceReport, PitchReport, SpeechSegment, TrendLabel,
    TrendSummary, VoiceMetrics, VolumeReport,
};
pub use session::{Session, SessionConfig, SessionKind, SessionState, SessionStatus};
