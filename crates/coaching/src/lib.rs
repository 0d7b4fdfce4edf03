//! Coaching feedback and performance aggregation
//!
//! [`FeedbackGenerator`] produces realtime rule-based suggestions and
//! throttled LLM coaching; [`MetricsAggregator`] maintains sliding-window
//! statistics, benchmarks, and milestones.

pub mod feedback;
pub mod metrics;

pub use feedback::{parse_coaching_reply, FeedbackGenerator};
pub use metrics::MetricsAggregator;
