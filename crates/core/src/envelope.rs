//! Pipeline output envelopes
//!
//! Typed records the pipeline emits to subscribers. Every envelope carries
//! the session id, the chunk id that produced it, and an ISO-8601 timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::ErrorEnvelope;
use crate::metrics::VoiceMetrics;

/// Feedback categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Pace,
    Volume,
    Clarity,
    Structure,
    Engagement,
    Confidence,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKind::Pace => "pace",
            FeedbackKind::Volume => "volume",
            FeedbackKind::Clarity => "clarity",
            FeedbackKind::Structure => "structure",
            FeedbackKind::Engagement => "engagement",
            FeedbackKind::Confidence => "confidence",
        }
    }
}

/// Feedback severity, ordered for tie-breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Positive,
    Warning,
    Critical,
}

/// Where a feedback item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSource {
    Rule,
    Llm,
    Fallback,
}

/// A single coaching suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub id: Uuid,
    pub kind: FeedbackKind,
    pub severity: Severity,
    pub message: String,
    pub suggestion: String,
    /// Confidence in the suggestion, 0-1.
    pub confidence: f64,
    pub source: FeedbackSource,
    pub produced_at: DateTime<Utc>,
}

impl FeedbackItem {
    pub fn new(
        kind: FeedbackKind,
        severity: Severity,
        message: impl Into<String>,
        suggestion: impl Into<String>,
        confidence: f64,
        source: FeedbackSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            message: message.into(),
            suggestion: suggestion.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source,
            produced_at: Utc::now(),
        }
    }
}

/// One improvement area inside an LLM coaching reply.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Improvement {
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub current_issue: String,
    #[serde(default)]
    pub actionable_tip: String,
    #[serde(default)]
    pub why_important: String,
}

/// Structured reply expected from the coaching model.
///
/// Fields default to empty on parse so a partially valid reply can be
/// repaired rather than discarded.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoachingReply {
    #[serde(default)]
    pub feedback_summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<Improvement>,
    #[serde(default)]
    pub encouragement: String,
    #[serde(default)]
    pub next_focus: String,
}

impl CoachingReply {
    /// A reply is usable when the summary is present and every improvement
    /// names its area and tip.
    pub fn is_valid(&self) -> bool {
        !self.feedback_summary.trim().is_empty()
            && self
                .improvements
                .iter()
                .all(|i| !i.area.trim().is_empty() && !i.actionable_tip.trim().is_empty())
    }
}

/// Coaching feedback attached to a chunk result.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoachingFeedback {
    pub items: Vec<FeedbackItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<CoachingReply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<FeedbackSource>,
}

/// Per-category stability and benchmark figures from the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkComparison {
    pub user_score: f64,
    pub benchmark_mean: f64,
    pub benchmark_std: f64,
    pub percentile_rank: f64,
    pub z_score: f64,
    pub performance_level: PerformanceLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    Excellent,
    Good,
    Average,
    BelowAverage,
    NeedsImprovement,
}

/// Linear-regression view of the quality series.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LearningCurve {
    pub slope: f64,
    pub acceleration: f64,
    pub plateau_indicator: f64,
}

/// Aggregated performance block emitted on metrics runs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerformanceReport {
    /// Stability per category, 0-1.
    pub stability: BTreeMap<String, f64>,
    pub improvement_rate: f64,
    pub learning_curve: LearningCurve,
    pub benchmarks: BTreeMap<String, BenchmarkComparison>,
    pub trend_direction: String,
    pub volatility: f64,
    pub momentum: f64,
    pub quick_wins: Vec<String>,
    pub long_term_goals: Vec<String>,
}

/// One-shot achievement kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneKind {
    QualityMilestone,
    ConsistencyMilestone,
    EnduranceMilestone,
    ImprovementMilestone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub kind: MilestoneKind,
    pub title: String,
    pub description: String,
    pub score: f64,
    pub chunk_number: u64,
}

/// Processing priority derived from voice activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// An audio chunk tagged for pipeline processing.
#[derive(Debug, Clone)]
pub struct TaggedChunk {
    pub session_id: Uuid,
    pub chunk_id: String,
    pub chunk_number: u64,
    pub priority: ChunkPriority,
    pub timestamp: DateTime<Utc>,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl TaggedChunk {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Session progress indicators attached to each result.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionProgress {
    pub chunks_completed: u64,
    pub session_duration_seconds: f64,
    pub processing_efficiency: f64,
    pub quality_trend: String,
    pub improvement_rate: f64,
}

/// How the chunk was processed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineInfo {
    pub processing_mode: String,
    pub chunk_priority: ChunkPriority,
    pub pipeline_time_ms: f64,
}

/// The main per-chunk result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachingResult {
    pub session_id: Uuid,
    pub chunk_id: String,
    pub chunk_number: u64,
    pub timestamp: DateTime<Utc>,
    pub voice_analysis: VoiceMetrics,
    pub coaching_feedback: CoachingFeedback,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_metrics: Option<PerformanceReport>,
    pub realtime_insights: Vec<String>,
    pub session_progress: SessionProgress,
    pub pipeline_info: PipelineInfo,
}

/// Typed output record of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    CoachingResult(CoachingResult),
    RealtimeSuggestion {
        session_id: Uuid,
        chunk_id: String,
        item: FeedbackItem,
        timestamp: DateTime<Utc>,
    },
    PerformanceUpdate {
        session_id: Uuid,
        chunk_id: String,
        report: PerformanceReport,
        timestamp: DateTime<Utc>,
    },
    Milestone {
        session_id: Uuid,
        chunk_id: String,
        milestone: Milestone,
        timestamp: DateTime<Utc>,
    },
    AudioProcessingError {
        session_id: Uuid,
        chunk_id: String,
        error: ErrorEnvelope,
        timestamp: DateTime<Utc>,
    },
    ProcessingError {
        session_id: Uuid,
        chunk_id: String,
        stage: String,
        error: ErrorEnvelope,
        timestamp: DateTime<Utc>,
    },
}

impl Envelope {
    pub fn session_id(&self) -> Uuid {
        match self {
            Envelope::CoachingResult(r) => r.session_id,
            Envelope::RealtimeSuggestion { session_id, .. }
            | Envelope::PerformanceUpdate { session_id, .. }
            | Envelope::Milestone { session_id, .. }
            | Envelope::AudioProcessingError { session_id, .. }
            | Envelope::ProcessingError { session_id, .. } => *session_id,
        }
    }

    pub fn chunk_id(&self) -> &str {
        match self {
            Envelope::CoachingResult(r) => &r.chunk_id,
            Envelope::RealtimeSuggestion { chunk_id, .. }
            | Envelope::PerformanceUpdate { chunk_id, .. }
            | Envelope::Milestone { chunk_id, .. }
            | Envelope::AudioProcessingError { chunk_id, .. }
            | Envelope::ProcessingError { chunk_id, .. } => chunk_id,
        }
    }

    /// Envelopes that may be dropped under client-side backpressure.
    pub fn is_droppable(&self) -> bool {
        matches!(self, Envelope::RealtimeSuggestion { .. })
    }
}

/// Pipeline counters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineStats {
    pub chunks_processed: u64,
    pub errors_count: u64,
    pub analysis_time_ms: f64,
    pub feedback_time_ms: f64,
    pub metrics_time_ms: f64,
    pub total_pipeline_time_ms: f64,
    pub success_rate: f64,
    pub average_chunk_ms: f64,
}

/// Session summary returned by `summary()` and on `session_ended`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PipelineSummary {
    pub session_id: Uuid,
    pub total_duration_seconds: f64,
    pub chunks_processed: u64,
    pub analysis_time_ms: f64,
    pub feedback_time_ms: f64,
    pub metrics_time_ms: f64,
    pub error_rate: f64,
    pub processing_efficiency: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Positive);
        assert!(Severity::Positive > Severity::Info);
    }

    #[test]
    fn test_envelope_tagging() {
        let item = FeedbackItem::new(
            FeedbackKind::Pace,
            Severity::Warning,
            "slow down",
            "take a breath",
            0.9,
            FeedbackSource::Rule,
        );
        let envelope = Envelope::RealtimeSuggestion {
            session_id: Uuid::new_v4(),
            chunk_id: "c-1".to_string(),
            item,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "realtime_suggestion");
        assert_eq!(json["item"]["kind"], "pace");
        assert_eq!(json["item"]["severity"], "warning");
    }

    #[test]
    fn test_reply_validation() {
        let reply = CoachingReply {
            feedback_summary: "good pace".to_string(),
            strengths: vec!["steady volume".to_string()],
            improvements: vec![Improvement {
                area: "clarity".to_string(),
                current_issue: "mumbling".to_string(),
                actionable_tip: "open your mouth wider".to_string(),
                why_important: "audibility".to_string(),
            }],
            encouragement: "keep going".to_string(),
            next_focus: "clarity".to_string(),
        };
        assert!(reply.is_valid());

        let empty_summary = CoachingReply {
            feedback_summary: "  ".to_string(),
            ..reply
        };
        assert!(!empty_summary.is_valid());
    }

    #[test]
    fn test_droppable_envelopes() {
        let suggestion = Envelope::RealtimeSuggestion {
            session_id: Uuid::new_v4(),
            chunk_id: "c".to_string(),
            item: FeedbackItem::new(
                FeedbackKind::Volume,
                Severity::Info,
                "m",
                "s",
                0.5,
                FeedbackSource::Rule,
            ),
            timestamp: Utc::now(),
        };
        assert!(suggestion.is_droppable());
    }
}
