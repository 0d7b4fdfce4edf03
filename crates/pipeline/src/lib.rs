//! Session pipeline orchestration
//!
//! One [`SessionPipeline`] per active session: drains audio chunks,
//! coordinates analysis, feedback, and metrics under a per-chunk deadline,
//! and emits typed envelopes.

pub mod pipeline;

pub use pipeline::{PipelineConfig, PipelineConfigUpdate, SessionPipeline};
