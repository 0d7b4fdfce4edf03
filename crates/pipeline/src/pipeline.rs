//! Session pipeline
//!
//! Drives one session's chunks through Analyzer -> (Feedback || Metrics)
//! under a per-chunk deadline. A single chunk failure never aborts the
//! session; errors surface as typed envelopes and counters.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use coach_analysis::VoiceAnalyzer;
use coach_coaching::{FeedbackGenerator, MetricsAggregator};
use coach_core::{
    ChunkPriority, CoachError, CoachingFeedback, CoachingResult, Envelope, ErrorKind, Language,
    PerformanceReport, PipelineInfo, PipelineStats, PipelineSummary, SessionProgress, TaggedChunk,
    VoiceMetrics,
};
use coach_upstream::CoachingModel;

/// Runtime pipeline configuration. Mutable fields are limited to the
/// `config_update` whitelist.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub enable_parallel_processing: bool,
    pub chunk_timeout: Duration,
    pub feedback_frequency: u32,
    pub metrics_interval: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_parallel_processing: true,
            chunk_timeout: Duration::from_secs(5),
            feedback_frequency: 5,
            metrics_interval: 3,
        }
    }
}

/// Whitelisted runtime config updates.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct PipelineConfigUpdate {
    pub enable_parallel_processing: Option<bool>,
    pub feedback_frequency: Option<u32>,
    pub metrics_calculation_interval: Option<u32>,
}

struct StageTimes {
    feedback_ms: f64,
    metrics_ms: f64,
}

/// Orchestrates per-chunk processing for a single session.
///
/// Owned exclusively by the session's driver task; none of the contained
/// processors are shared.
pub struct SessionPipeline {
    session_id: Uuid,
    config: PipelineConfig,
    analyzer: Option<VoiceAnalyzer>,
    feedback: FeedbackGenerator,
    aggregator: MetricsAggregator,

    started_at: Instant,
    processed_chunks: u64,
    errors_count: u64,
    analysis_time_ms: f64,
    feedback_time_ms: f64,
    metrics_time_ms: f64,
    total_time_ms: f64,
    /// Session duration captured at the last processed chunk, so that
    /// `summary()` is stable between chunks.
    duration_at_last_chunk: f64,
}

impl SessionPipeline {
    pub fn new(
        session_id: Uuid,
        language: Language,
        sample_rate: u32,
        model: Option<Arc<dyn CoachingModel>>,
        config: PipelineConfig,
    ) -> Self {
        let feedback = FeedbackGenerator::new(
            language,
            model,
            config.feedback_frequency,
            config.chunk_timeout,
        );
        let aggregator = MetricsAggregator::new(language, config.metrics_interval);

        Self {
            session_id,
            analyzer: Some(VoiceAnalyzer::new(language, sample_rate)),
            feedback,
            aggregator,
            config,
            started_at: Instant::now(),
            processed_chunks: 0,
            errors_count: 0,
            analysis_time_ms: 0.0,
            feedback_time_ms: 0.0,
            metrics_time_ms: 0.0,
            total_time_ms: 0.0,
            duration_at_last_chunk: 0.0,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Apply a whitelisted runtime config update; unknown fields were
    /// already dropped at deserialization.
    pub fn update_config(&mut self, update: &PipelineConfigUpdate) {
        if let Some(parallel) = update.enable_parallel_processing {
            self.config.enable_parallel_processing = parallel;
        }
        if let Some(frequency) = update.feedback_frequency {
            self.config.feedback_frequency = frequency.clamp(1, 30);
            self.feedback.set_feedback_frequency(frequency);
        }
        if let Some(interval) = update.metrics_calculation_interval {
            self.config.metrics_interval = interval.max(1);
            self.aggregator.set_metrics_interval(interval);
        }
        tracing::info!(
            session_id = %self.session_id,
            parallel = self.config.enable_parallel_processing,
            feedback_frequency = self.config.feedback_frequency,
            metrics_interval = self.config.metrics_interval,
            "Pipeline config updated"
        );
    }

    /// Process one chunk into an ordered group of envelopes.
    pub async fn process_chunk(&mut self, chunk: TaggedChunk) -> Vec<Envelope> {
        let step_start = Instant::now();
        let deadline = self.config.chunk_timeout;

        // Stage 1: analysis, offloaded so DSP never blocks the driver.
        let analysis_start = Instant::now();
        let metrics = match self.run_analysis(&chunk).await {
            Ok(metrics) => metrics,
            Err(err) => {
                self.record_chunk(step_start, analysis_start.elapsed(), 0.0, 0.0, false);
                tracing::warn!(
                    session_id = %self.session_id,
                    chunk_id = %chunk.chunk_id,
                    error = %err,
                    "Analysis failed, dropping chunk"
                );
                return vec![Envelope::AudioProcessingError {
                    session_id: self.session_id,
                    chunk_id: chunk.chunk_id.clone(),
                    error: err.to_envelope(),
                    timestamp: Utc::now(),
                }];
            }
        };
        let analysis_elapsed = analysis_start.elapsed();

        let priority = priority_for(metrics.voice_activity_ratio);
        let quality = metrics.overall_quality();

        // Realtime rule engine runs on every chunk, unconditionally.
        let realtime_items = self.feedback.realtime_feedback(&metrics);

        // Low-priority chunks skip the LLM path even when due.
        let llm_due = priority != ChunkPriority::Low && self.feedback.llm_due(chunk.chunk_number);
        let report_due = self.aggregator.report_due(chunk.chunk_number, quality);

        // Milestones are evaluated on every chunk.
        let milestones = self.aggregator.record(&metrics, chunk.chunk_number);

        let remaining = deadline.saturating_sub(step_start.elapsed());
        let mut timed_out = false;

        let (coaching, report, times) = if self.config.enable_parallel_processing {
            self.run_parallel(&metrics, &chunk, llm_due, report_due, remaining, &mut timed_out)
                .await
        } else {
            self.run_sequential(&metrics, &chunk, llm_due, report_due, remaining, &mut timed_out)
                .await
        };

        let mut envelopes = Vec::new();

        if timed_out {
            self.errors_count += 1;
            let err = CoachError::new(
                ErrorKind::PipelineTimeout,
                format!(
                    "chunk processing exceeded {}ms deadline",
                    deadline.as_millis()
                ),
            );
            envelopes.push(Envelope::ProcessingError {
                session_id: self.session_id,
                chunk_id: chunk.chunk_id.clone(),
                stage: "feedback".to_string(),
                error: err.to_envelope(),
                timestamp: Utc::now(),
            });
        }

        let report_for_result = report.clone();
        let improvement_rate = report
            .as_ref()
            .map(|r| r.improvement_rate)
            .unwrap_or_default();

        let total_ms = step_start.elapsed();
        self.record_chunk(
            step_start,
            analysis_elapsed,
            times.feedback_ms,
            times.metrics_ms,
            true,
        );

        let quality_trend = metrics.trends.pace.as_str().to_string();
        let result = CoachingResult {
            session_id: self.session_id,
            chunk_id: chunk.chunk_id.clone(),
            chunk_number: chunk.chunk_number,
            timestamp: Utc::now(),
            realtime_insights: realtime_insights(&metrics),
            voice_analysis: metrics,
            coaching_feedback: coaching,
            performance_metrics: report_for_result,
            session_progress: SessionProgress {
                chunks_completed: self.processed_chunks,
                session_duration_seconds: self.started_at.elapsed().as_secs_f64(),
                processing_efficiency: self.processing_efficiency(),
                quality_trend,
                improvement_rate,
            },
            pipeline_info: PipelineInfo {
                processing_mode: if self.config.enable_parallel_processing {
                    "parallel".to_string()
                } else {
                    "sequential".to_string()
                },
                chunk_priority: priority,
                pipeline_time_ms: total_ms.as_secs_f64() * 1000.0,
            },
        };

        envelopes.push(Envelope::CoachingResult(result));

        for item in realtime_items {
            envelopes.push(Envelope::RealtimeSuggestion {
                session_id: self.session_id,
                chunk_id: chunk.chunk_id.clone(),
                item,
                timestamp: Utc::now(),
            });
        }

        if let Some(report) = report {
            envelopes.push(Envelope::PerformanceUpdate {
                session_id: self.session_id,
                chunk_id: chunk.chunk_id.clone(),
                report,
                timestamp: Utc::now(),
            });
        }

        for milestone in milestones {
            envelopes.push(Envelope::Milestone {
                session_id: self.session_id,
                chunk_id: chunk.chunk_id.clone(),
                milestone,
                timestamp: Utc::now(),
            });
        }

        envelopes
    }

    async fn run_analysis(&mut self, chunk: &TaggedChunk) -> Result<VoiceMetrics, CoachError> {
        let mut analyzer = match self.analyzer.take() {
            Some(analyzer) => analyzer,
            None => {
                return Err(CoachError::new(
                    ErrorKind::PipelineResource,
                    "analyzer unavailable",
                ))
            }
        };
        let samples = chunk.samples.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let result = analyzer.analyze(&samples);
            (analyzer, result)
        })
        .await;

        match joined {
            Ok((analyzer, result)) => {
                self.analyzer = Some(analyzer);
                result
            }
            Err(join_err) => Err(CoachError::new(
                ErrorKind::PipelineResource,
                format!("analysis task failed: {join_err}"),
            )),
        }
    }

    async fn run_parallel(
        &mut self,
        metrics: &VoiceMetrics,
        chunk: &TaggedChunk,
        llm_due: bool,
        report_due: bool,
        remaining: Duration,
        timed_out: &mut bool,
    ) -> (CoachingFeedback, Option<PerformanceReport>, StageTimes) {
        let feedback = &mut self.feedback;
        let aggregator = &self.aggregator;

        let feedback_start = Instant::now();
        let work = async {
            let coaching = async {
                if llm_due {
                    feedback.coaching_feedback(metrics, chunk.chunk_number).await
                } else {
                    CoachingFeedback::default()
                }
            };
            let report = async {
                if report_due {
                    Some(aggregator.report())
                } else {
                    None
                }
            };
            tokio::join!(coaching, report)
        };

        // Bind the awaited outcome first so the joined future (and its
        // borrows of the processors) is dropped before the match body.
        let outcome = tokio::time::timeout(remaining, work).await;

        match outcome {
            Ok((coaching, report)) => {
                let elapsed = feedback_start.elapsed().as_secs_f64() * 1000.0;
                (
                    coaching,
                    report,
                    StageTimes {
                        feedback_ms: elapsed,
                        metrics_ms: if report_due { elapsed } else { 0.0 },
                    },
                )
            }
            Err(_) => {
                *timed_out = true;
                let coaching = if llm_due {
                    self.feedback.fallback_feedback(metrics)
                } else {
                    CoachingFeedback::default()
                };
                (
                    coaching,
                    None,
                    StageTimes {
                        feedback_ms: remaining.as_secs_f64() * 1000.0,
                        metrics_ms: 0.0,
                    },
                )
            }
        }
    }

    async fn run_sequential(
        &mut self,
        metrics: &VoiceMetrics,
        chunk: &TaggedChunk,
        llm_due: bool,
        report_due: bool,
        remaining: Duration,
        timed_out: &mut bool,
    ) -> (CoachingFeedback, Option<PerformanceReport>, StageTimes) {
        let feedback_start = Instant::now();
        let coaching = if llm_due {
            let outcome = tokio::time::timeout(
                remaining,
                self.feedback.coaching_feedback(metrics, chunk.chunk_number),
            )
            .await;
            match outcome {
                Ok(coaching) => coaching,
                Err(_) => {
                    *timed_out = true;
                    self.feedback.fallback_feedback(metrics)
                }
            }
        } else {
            CoachingFeedback::default()
        };
        let feedback_ms = feedback_start.elapsed().as_secs_f64() * 1000.0;

        let metrics_start = Instant::now();
        let report = if report_due && !*timed_out {
            Some(self.aggregator.report())
        } else {
            None
        };
        let metrics_ms = metrics_start.elapsed().as_secs_f64() * 1000.0;

        (
            coaching,
            report,
            StageTimes {
                feedback_ms,
                metrics_ms,
            },
        )
    }

    fn record_chunk(
        &mut self,
        step_start: Instant,
        analysis: Duration,
        feedback_ms: f64,
        metrics_ms: f64,
        success: bool,
    ) {
        self.processed_chunks += 1;
        if !success {
            self.errors_count += 1;
        }
        self.analysis_time_ms += analysis.as_secs_f64() * 1000.0;
        self.feedback_time_ms += feedback_ms;
        self.metrics_time_ms += metrics_ms;
        self.total_time_ms += step_start.elapsed().as_secs_f64() * 1000.0;
        self.duration_at_last_chunk = self.started_at.elapsed().as_secs_f64();
    }

    fn success_rate(&self) -> f64 {
        if self.processed_chunks == 0 {
            return 1.0;
        }
        1.0 - self.errors_count as f64 / self.processed_chunks as f64
    }

    fn average_chunk_ms(&self) -> f64 {
        if self.processed_chunks == 0 {
            return 0.0;
        }
        self.total_time_ms / self.processed_chunks as f64
    }

    /// `0.5 * success_rate + 0.5 * min(100ms / avg_chunk_ms, 1)`.
    fn processing_efficiency(&self) -> f64 {
        if self.processed_chunks == 0 {
            return 1.0;
        }
        let time_efficiency = (100.0 / self.average_chunk_ms().max(1.0)).min(1.0);
        0.5 * self.success_rate() + 0.5 * time_efficiency
    }

    /// Current counters.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            chunks_processed: self.processed_chunks,
            errors_count: self.errors_count,
            analysis_time_ms: self.analysis_time_ms,
            feedback_time_ms: self.feedback_time_ms,
            metrics_time_ms: self.metrics_time_ms,
            total_pipeline_time_ms: self.total_time_ms,
            success_rate: self.success_rate(),
            average_chunk_ms: self.average_chunk_ms(),
        }
    }

    /// Session summary; pure over the current counters, so repeated calls
    /// without intervening chunks return identical values.
    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            session_id: self.session_id,
            total_duration_seconds: self.duration_at_last_chunk,
            chunks_processed: self.processed_chunks,
            analysis_time_ms: self.analysis_time_ms,
            feedback_time_ms: self.feedback_time_ms,
            metrics_time_ms: self.metrics_time_ms,
            error_rate: 1.0 - self.success_rate(),
            processing_efficiency: self.processing_efficiency(),
        }
    }
}

/// Priority from voice activity: `<0.3 -> Low`, `>0.8 -> High`.
fn priority_for(activity_ratio: f64) -> ChunkPriority {
    if activity_ratio < 0.3 {
        ChunkPriority::Low
    } else if activity_ratio > 0.8 {
        ChunkPriority::High
    } else {
        ChunkPriority::Normal
    }
}

/// Short textual insights surfaced alongside the result.
fn realtime_insights(metrics: &VoiceMetrics) -> Vec<String> {
    let mut insights = Vec::new();
    if !metrics.pace_analysis.is_optimal && !metrics.pace_analysis.feedback.is_empty() {
        insights.push(metrics.pace_analysis.feedback.clone());
    }
    if metrics.pitch_analysis.is_monotone && !metrics.pitch_analysis.feedback.is_empty() {
        insights.push(metrics.pitch_analysis.feedback.clone());
    }
    if !metrics.clarity_analysis.feedback.is_empty() {
        insights.push(metrics.clarity_analysis.feedback.clone());
    }
    insights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_bands() {
        assert_eq!(priority_for(0.1), ChunkPriority::Low);
        assert_eq!(priority_for(0.5), ChunkPriority::Normal);
        assert_eq!(priority_for(0.9), ChunkPriority::High);
    }

    #[test]
    fn test_config_update_whitelist() {
        let mut pipeline = SessionPipeline::new(
            Uuid::new_v4(),
            Language::French,
            16_000,
            None,
            PipelineConfig::default(),
        );

        let update: PipelineConfigUpdate = serde_json::from_value(serde_json::json!({
            "enable_parallel_processing": false,
            "feedback_frequency": 7,
            "metrics_calculation_interval": 4,
            "not_whitelisted": "ignored"
        }))
        .unwrap();
        pipeline.update_config(&update);

        assert!(!pipeline.config.enable_parallel_processing);
        assert_eq!(pipeline.config.feedback_frequency, 7);
        assert_eq!(pipeline.config.metrics_interval, 4);
    }

    #[test]
    fn test_summary_idempotent_without_chunks() {
        let pipeline = SessionPipeline::new(
            Uuid::new_v4(),
            Language::English,
            16_000,
            None,
            PipelineConfig::default(),
        );
        let a = pipeline.summary();
        let b = pipeline.summary();
        assert_eq!(a.chunks_processed, b.chunks_processed);
        assert_eq!(a.error_rate, b.error_rate);
        assert_eq!(a.processing_efficiency, b.processing_efficiency);
    }
}
