//! Performance metrics aggregation
//!
//! Sliding-window statistics, stability, learning curve, benchmark
//! comparison, and one-shot milestones for a single session.

use std::collections::{BTreeMap, HashSet, VecDeque};

use coach_config::{language_profile, ui_message, LanguageProfile};
use coach_core::{
    BenchmarkComparison, LearningCurve, Milestone, MilestoneKind, PerformanceLevel,
    PerformanceReport, VoiceMetrics,
};

/// Sliding-window size per metric category.
const WINDOW: usize = 100;
/// Performance history bound; truncated back to 150 when exceeded.
const HISTORY_MAX: usize = 200;
const HISTORY_KEEP: usize = 150;
/// Outlier rejection threshold in standard deviations.
const OUTLIER_SIGMA: f64 = 2.0;
/// Relative improvement over baseline that fires a milestone.
const MILESTONE_THRESHOLD: f64 = 0.1;
/// Chunk counts that fire endurance milestones.
const ENDURANCE_MARKS: [u64; 4] = [10, 25, 50, 100];
/// Quality spikes above this force a metrics run off-interval.
const QUALITY_SPIKE: f64 = 0.8;

/// One sample of the session's quality track.
#[derive(Debug, Clone, Copy)]
struct QualitySample {
    pace: f64,
    volume_consistency: f64,
    clarity: f64,
    confidence: f64,
    engagement: f64,
}

impl QualitySample {
    fn quality(&self) -> f64 {
        (self.clarity + self.confidence + (self.pace / 150.0).min(1.0)) / 3.0
    }
}

/// Sliding-window performance aggregation for one session.
pub struct MetricsAggregator {
    profile: &'static LanguageProfile,
    metrics_interval: u32,

    pace: VecDeque<f64>,
    volume: VecDeque<f64>,
    clarity: VecDeque<f64>,
    pause_frequency: VecDeque<f64>,
    engagement: VecDeque<f64>,

    history: Vec<QualitySample>,

    quality_milestone_fired: bool,
    consistency_milestone_fired: bool,
    endurance_fired: HashSet<u64>,
    improvement_baseline: Option<f64>,

    chunks_observed: u64,
}

impl MetricsAggregator {
    pub fn new(language: coach_core::Language, metrics_interval: u32) -> Self {
        Self {
            profile: language_profile(language),
            metrics_interval: metrics_interval.max(1),
            pace: VecDeque::with_capacity(WINDOW),
            volume: VecDeque::with_capacity(WINDOW),
            clarity: VecDeque::with_capacity(WINDOW),
            pause_frequency: VecDeque::with_capacity(WINDOW),
            engagement: VecDeque::with_capacity(WINDOW),
            history: Vec::new(),
            quality_milestone_fired: false,
            consistency_milestone_fired: false,
            endurance_fired: HashSet::new(),
            improvement_baseline: None,
            chunks_observed: 0,
        }
    }

    /// Runtime update through the `config_update` whitelist.
    pub fn set_metrics_interval(&mut self, interval: u32) {
        self.metrics_interval = interval.max(1);
    }

    pub fn chunks_observed(&self) -> u64 {
        self.chunks_observed
    }

    /// Whether the full report should be computed for this chunk: every
    /// `metrics_interval` chunks, or on a quality spike.
    pub fn report_due(&self, chunk_number: u64, quality: f64) -> bool {
        chunk_number % self.metrics_interval as u64 == 0 || quality > QUALITY_SPIKE
    }

    /// Record one chunk's metrics and return any milestones it fired.
    ///
    /// Milestones are one-shot per kind, except the improvement milestone
    /// whose baseline resets after every firing.
    pub fn record(&mut self, metrics: &VoiceMetrics, chunk_number: u64) -> Vec<Milestone> {
        self.chunks_observed += 1;

        let pause_freq = if metrics.duration > 0.0 {
            (metrics.speech_segments.len().saturating_sub(1)) as f64 / metrics.duration
        } else {
            0.0
        };
        let engagement =
            (metrics.advanced.confidence_score + metrics.advanced.speech_continuity) / 2.0;

        push_window(&mut self.pace, metrics.pace_wpm);
        push_window(&mut self.volume, metrics.avg_volume);
        push_window(&mut self.clarity, metrics.clarity_score);
        push_window(&mut self.pause_frequency, pause_freq);
        push_window(&mut self.engagement, engagement);

        self.history.push(QualitySample {
            pace: metrics.pace_wpm,
            volume_consistency: metrics.volume_consistency,
            clarity: metrics.clarity_score,
            confidence: metrics.advanced.confidence_score,
            engagement,
        });
        if self.history.len() > HISTORY_MAX {
            let drop = self.history.len() - HISTORY_KEEP;
            self.history.drain(..drop);
        }

        self.check_milestones(metrics, chunk_number)
    }

    fn check_milestones(&mut self, metrics: &VoiceMetrics, chunk_number: u64) -> Vec<Milestone> {
        let lang = self.profile.language;
        let mut milestones = Vec::new();
        let quality = metrics.overall_quality();

        if quality > 0.9 && !self.quality_milestone_fired {
            self.quality_milestone_fired = true;
            milestones.push(Milestone {
                kind: MilestoneKind::QualityMilestone,
                title: ui_message("quality_milestone", lang, "Excellent performance!").to_string(),
                description: ui_message(
                    "quality_milestone_desc",
                    lang,
                    "Exceptional quality level reached",
                )
                .to_string(),
                score: quality,
                chunk_number,
            });
        }

        if metrics.volume_consistency > 0.85 && !self.consistency_milestone_fired {
            self.consistency_milestone_fired = true;
            milestones.push(Milestone {
                kind: MilestoneKind::ConsistencyMilestone,
                title: ui_message("consistency_milestone", lang, "Remarkable consistency!")
                    .to_string(),
                description: ui_message(
                    "consistency_milestone_desc",
                    lang,
                    "Very steady performance",
                )
                .to_string(),
                score: metrics.volume_consistency,
                chunk_number,
            });
        }

        if ENDURANCE_MARKS.contains(&chunk_number) && !self.endurance_fired.contains(&chunk_number)
        {
            self.endurance_fired.insert(chunk_number);
            milestones.push(Milestone {
                kind: MilestoneKind::EnduranceMilestone,
                title: ui_message("endurance_milestone", lang, "Great endurance!").to_string(),
                description: format!("{chunk_number} chunks processed"),
                score: chunk_number as f64,
                chunk_number,
            });
        }

        // Improvement milestone: baseline is the mean of the first few
        // qualities, reset to the current quality after each firing.
        if self.history.len() >= 5 {
            let baseline = *self.improvement_baseline.get_or_insert_with(|| {
                self.history[..3].iter().map(|s| s.quality()).sum::<f64>() / 3.0
            });
            if baseline > 0.0 {
                let improvement = (quality - baseline) / baseline;
                if improvement >= MILESTONE_THRESHOLD {
                    self.improvement_baseline = Some(quality);
                    milestones.push(Milestone {
                        kind: MilestoneKind::ImprovementMilestone,
                        title: ui_message("improvement_milestone", lang, "Significant progress!")
                            .to_string(),
                        description: format!("{:.0}% over baseline", improvement * 100.0),
                        score: improvement,
                        chunk_number,
                    });
                }
            }
        }

        milestones
    }

    /// Full performance report over the current windows.
    pub fn report(&self) -> PerformanceReport {
        let mut stability = BTreeMap::new();
        stability.insert("pace".to_string(), stability_score(&self.pace));
        stability.insert("volume".to_string(), stability_score(&self.volume));
        stability.insert("clarity".to_string(), stability_score(&self.clarity));
        stability.insert(
            "pause_frequency".to_string(),
            stability_score(&self.pause_frequency),
        );
        stability.insert("engagement".to_string(), stability_score(&self.engagement));

        let improvement_rate = self.improvement_rate();
        let learning_curve = self.learning_curve();
        let benchmarks = self.benchmark_comparison();

        let volatility = 1.0
            - (stability["pace"] + stability["volume"] + stability["clarity"]) / 3.0;

        let trend_direction = if improvement_rate > 0.05 {
            "improving"
        } else if improvement_rate < -0.05 {
            "declining"
        } else {
            "stable"
        }
        .to_string();

        let momentum = self.momentum();

        let mut quick_wins = Vec::new();
        let mut long_term_goals = Vec::new();
        for (category, comparison) in &benchmarks {
            if comparison.percentile_rank <= 40.0 {
                if comparison.z_score > -1.0 {
                    quick_wins.push(category.clone());
                } else {
                    long_term_goals.push(category.clone());
                }
            }
        }

        PerformanceReport {
            stability,
            improvement_rate,
            learning_curve,
            benchmarks,
            trend_direction,
            volatility: volatility.clamp(0.0, 1.0),
            momentum,
            quick_wins,
            long_term_goals,
        }
    }

    /// Mean quality of the last 3 samples against the 3 before, clamped.
    fn improvement_rate(&self) -> f64 {
        if self.history.len() < 6 {
            return 0.0;
        }
        let qualities: Vec<f64> = self.history.iter().map(|s| s.quality()).collect();
        let n = qualities.len();
        let recent = qualities[n - 3..].iter().sum::<f64>() / 3.0;
        let earlier = qualities[n - 6..n - 3].iter().sum::<f64>() / 3.0;
        ((recent - earlier) / earlier.max(0.1)).clamp(-1.0, 1.0)
    }

    /// Least-squares slope over the quality series, half-window
    /// acceleration, and a plateau indicator from recent spread.
    fn learning_curve(&self) -> LearningCurve {
        if self.history.len() < 10 {
            return LearningCurve::default();
        }

        let points: Vec<(f64, f64)> = self
            .history
            .iter()
            .enumerate()
            .map(|(i, s)| (i as f64, s.quality()))
            .collect();

        let slope = slope_of(&points);

        let acceleration = if points.len() >= 20 {
            let mid = points.len() / 2;
            slope_of(&points[mid..]) - slope_of(&points[..mid])
        } else {
            0.0
        };

        let recent: Vec<f64> = points.iter().rev().take(10).map(|(_, q)| *q).collect();
        let plateau_indicator = (1.0 - std_of(&recent)).clamp(0.0, 1.0);

        LearningCurve {
            slope,
            acceleration,
            plateau_indicator,
        }
    }

    /// Benchmark each category against the language's quintile tables.
    fn benchmark_comparison(&self) -> BTreeMap<String, BenchmarkComparison> {
        let mut comparisons = BTreeMap::new();
        if self.history.is_empty() {
            return comparisons;
        }

        let latest = self.history[self.history.len() - 1];
        let scores = [
            // Pace benchmarks live on the syllables/second scale.
            ("pace", latest.pace / 60.0),
            ("volume", mean_window(&self.volume)),
            ("clarity", latest.clarity),
            ("consistency", latest.volume_consistency),
            ("engagement", latest.engagement),
        ];

        for (category, score) in scores {
            if let Some(benchmark) = self.profile.benchmarks.get(category) {
                let percentile = benchmark.percentile_rank(score);
                comparisons.insert(
                    category.to_string(),
                    BenchmarkComparison {
                        user_score: score,
                        benchmark_mean: benchmark.mean,
                        benchmark_std: benchmark.std,
                        percentile_rank: percentile,
                        z_score: benchmark.z_score(score),
                        performance_level: level_for_percentile(percentile),
                    },
                );
            }
        }

        comparisons
    }

    /// Quality momentum: last 5 samples against the 5 before.
    fn momentum(&self) -> f64 {
        if self.history.len() < 10 {
            return 0.0;
        }
        let qualities: Vec<f64> = self.history.iter().map(|s| s.quality()).collect();
        let n = qualities.len();
        let recent = qualities[n - 5..].iter().sum::<f64>() / 5.0;
        let earlier = qualities[n - 10..n - 5].iter().sum::<f64>() / 5.0;
        (recent - earlier).clamp(-1.0, 1.0)
    }
}

fn push_window(window: &mut VecDeque<f64>, value: f64) {
    if window.len() == WINDOW {
        window.pop_front();
    }
    window.push_back(value);
}

fn mean_window(window: &VecDeque<f64>) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    window.iter().sum::<f64>() / window.len() as f64
}

fn mean_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_of(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean_of(values);
    (values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64).sqrt()
}

/// `1 / (1 + CV)` after removing outliers beyond 2 standard deviations.
fn stability_score(window: &VecDeque<f64>) -> f64 {
    if window.len() < 3 {
        return 0.5;
    }

    let values: Vec<f64> = window.iter().copied().collect();
    let m = mean_of(&values);
    let sd = std_of(&values);

    let clean: Vec<f64> = if sd > 0.0 {
        values
            .iter()
            .copied()
            .filter(|v| (v - m).abs() <= OUTLIER_SIGMA * sd)
            .collect()
    } else {
        values
    };

    if clean.len() < 2 {
        return 0.5;
    }

    let clean_mean = mean_of(&clean);
    if clean_mean == 0.0 {
        return if clean.iter().all(|&v| v == 0.0) { 1.0 } else { 0.0 };
    }

    let cv = std_of(&clean) / clean_mean;
    (1.0 / (1.0 + cv)).clamp(0.0, 1.0)
}

fn slope_of(points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let sum_x2: f64 = points.iter().map(|(x, _)| x * x).sum();

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        0.0
    } else {
        (n * sum_xy - sum_x * sum_y) / denominator
    }
}

fn level_for_percentile(percentile: f64) -> PerformanceLevel {
    if percentile >= 80.0 {
        PerformanceLevel::Excellent
    } else if percentile >= 60.0 {
        PerformanceLevel::Good
    } else if percentile >= 40.0 {
        PerformanceLevel::Average
    } else if percentile >= 20.0 {
        PerformanceLevel::BelowAverage
    } else {
        PerformanceLevel::NeedsImprovement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_core::Language;

    fn metrics_with_quality(clarity: f64, confidence: f64, volume_consistency: f64) -> VoiceMetrics {
        let mut m: VoiceMetrics = serde_json::from_value(serde_json::json!({
            "duration": 1.0,
            "language": "fr",
            "avg_volume": 0.06,
            "volume_consistency": volume_consistency,
            "avg_pitch": 180.0,
            "pitch_variance": 400.0,
            "spectral_centroid": 1500.0,
            "tempo": 110.0,
            "zero_crossing_rate": 0.05,
            "spectral_rolloff": 3000.0,
            "voice_activity_ratio": 0.7,
            "speech_segments": [
                {"start_frame": 0, "end_frame": 30},
                {"start_frame": 60, "end_frame": 90}
            ],
            "estimated_words": 3,
            "clarity_score": clarity,
            "pace_wpm": 150.0,
            "pace_analysis": {"wpm": 150.0, "optimal_wpm": 282.0, "score": 0.8, "is_optimal": false, "feedback": ""},
            "volume_analysis": {"level": 0.06, "consistency": volume_consistency, "target_level": 0.06, "score": 0.9, "feedback": ""},
            "pitch_analysis": {"variation_ratio": 0.15, "expected_variance": 0.15, "is_monotone": false, "score": 1.0, "feedback": ""},
            "clarity_analysis": {"raw_score": clarity, "adjusted_score": clarity, "weight_applied": 1.0, "feedback": ""},
            "language_score": 0.8,
            "advanced": {
                "rhythm_regularity": 0.7,
                "pause_effectiveness": 0.5,
                "speech_continuity": 0.9,
                "confidence_score": confidence,
                "nervousness_score": 0.2
            },
            "trends": {"pace": "stable", "volume": "stable", "clarity": "stable"}
        }))
        .unwrap();
        m.clarity_score = clarity;
        m
    }

    #[test]
    fn test_report_due_schedule() {
        let agg = MetricsAggregator::new(Language::French, 3);
        assert!(agg.report_due(3, 0.5));
        assert!(agg.report_due(6, 0.5));
        assert!(!agg.report_due(4, 0.5));
        // Quality spikes force a run off-interval.
        assert!(agg.report_due(4, 0.85));
    }

    #[test]
    fn test_quality_milestone_fires_once() {
        let mut agg = MetricsAggregator::new(Language::French, 3);
        let excellent = metrics_with_quality(0.95, 0.95, 0.8);

        let first = agg.record(&excellent, 1);
        assert!(first
            .iter()
            .any(|m| m.kind == MilestoneKind::QualityMilestone));

        let second = agg.record(&excellent, 2);
        assert!(!second
            .iter()
            .any(|m| m.kind == MilestoneKind::QualityMilestone));
    }

    #[test]
    fn test_consistency_milestone_fires_once() {
        let mut agg = MetricsAggregator::new(Language::French, 3);
        let steady = metrics_with_quality(0.7, 0.7, 0.9);

        let first = agg.record(&steady, 1);
        assert!(first
            .iter()
            .any(|m| m.kind == MilestoneKind::ConsistencyMilestone));
        let second = agg.record(&steady, 2);
        assert!(second.is_empty());
    }

    #[test]
    fn test_endurance_milestones() {
        let mut agg = MetricsAggregator::new(Language::French, 3);
        let plain = metrics_with_quality(0.5, 0.5, 0.5);

        let mut endurance = 0;
        for chunk in 1..=100u64 {
            let milestones = agg.record(&plain, chunk);
            endurance += milestones
                .iter()
                .filter(|m| m.kind == MilestoneKind::EnduranceMilestone)
                .count();
        }
        assert_eq!(endurance, ENDURANCE_MARKS.len());
    }

    #[test]
    fn test_improvement_milestone_resets_baseline() {
        let mut agg = MetricsAggregator::new(Language::French, 3);

        // Low baseline.
        for chunk in 1..=4 {
            agg.record(&metrics_with_quality(0.4, 0.4, 0.5), chunk);
        }
        // Big jump: fires and resets the baseline.
        let fired = agg.record(&metrics_with_quality(0.9, 0.9, 0.5), 5);
        assert!(fired
            .iter()
            .any(|m| m.kind == MilestoneKind::ImprovementMilestone));

        // Same level again: no second firing without further improvement.
        let again = agg.record(&metrics_with_quality(0.9, 0.9, 0.5), 6);
        assert!(!again
            .iter()
            .any(|m| m.kind == MilestoneKind::ImprovementMilestone));
    }

    #[test]
    fn test_stability_with_outliers() {
        let mut window: VecDeque<f64> = VecDeque::new();
        for _ in 0..20 {
            window.push_back(0.8);
        }
        let steady = stability_score(&window);
        assert!(steady > 0.95);

        window.push_back(10.0); // outlier, rejected by the 2-sigma filter
        let with_outlier = stability_score(&window);
        assert!(with_outlier > 0.9);
    }

    #[test]
    fn test_improvement_rate_direction() {
        let mut agg = MetricsAggregator::new(Language::English, 3);
        for chunk in 1..=3 {
            agg.record(&metrics_with_quality(0.4, 0.4, 0.5), chunk);
        }
        for chunk in 4..=6 {
            agg.record(&metrics_with_quality(0.8, 0.8, 0.5), chunk);
        }
        let report = agg.report();
        assert!(report.improvement_rate > 0.0);
        assert_eq!(report.trend_direction, "improving");
    }

    #[test]
    fn test_benchmark_levels() {
        let mut agg = MetricsAggregator::new(Language::French, 3);
        agg.record(&metrics_with_quality(0.95, 0.8, 0.95), 1);
        let report = agg.report();

        let clarity = &report.benchmarks["clarity"];
        assert_eq!(clarity.performance_level, PerformanceLevel::Excellent);
        assert!(clarity.z_score > 1.0);

        let consistency = &report.benchmarks["consistency"];
        assert!(consistency.percentile_rank >= 80.0);
    }

    #[test]
    fn test_learning_curve_slope_positive_for_rising_quality() {
        let mut agg = MetricsAggregator::new(Language::English, 3);
        for chunk in 1..=20u64 {
            let q = 0.3 + 0.03 * chunk as f64;
            agg.record(&metrics_with_quality(q.min(1.0), q.min(1.0), 0.5), chunk);
        }
        let report = agg.report();
        assert!(report.learning_curve.slope > 0.0);
    }

    #[test]
    fn test_history_truncation() {
        let mut agg = MetricsAggregator::new(Language::French, 3);
        for chunk in 1..=250u64 {
            agg.record(&metrics_with_quality(0.5, 0.5, 0.5), chunk);
        }
        assert!(agg.history.len() <= HISTORY_MAX);
        assert!(agg.history.len() >= HISTORY_KEEP);
    }
}
