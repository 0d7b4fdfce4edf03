//! Voice analysis output types

use serde::{Deserialize, Serialize};

use crate::language::Language;

/// A contiguous run of voiced frames, as frame indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechSegment {
    pub start_frame: usize,
    pub end_frame: usize,
}

/// Direction of a metric over the recent sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrendLabel {
    Improving,
    Declining,
    Stable,
    #[default]
    InsufficientData,
}

impl TrendLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendLabel::Improving => "improving",
            TrendLabel::Declining => "declining",
            TrendLabel::Stable => "stable",
            TrendLabel::InsufficientData => "insufficient_data",
        }
    }
}

/// Language-adapted pace report.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PaceReport {
    pub wpm: f64,
    pub optimal_wpm: f64,
    /// 1.0 inside the language's natural range, linearly degraded outside.
    pub score: f64,
    pub is_optimal: bool,
    pub feedback: String,
}

/// Language-adapted volume report.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VolumeReport {
    pub level: f64,
    /// `1 - stdev/mean` of the frame RMS track.
    pub consistency: f64,
    pub target_level: f64,
    pub score: f64,
    pub feedback: String,
}

/// Language-adapted pitch report.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PitchReport {
    /// stdev/mean of the voiced pitch track.
    pub variation_ratio: f64,
    pub expected_variance: f64,
    pub is_monotone: bool,
    pub score: f64,
    pub feedback: String,
}

/// Language-adapted clarity report.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClarityReport {
    pub raw_score: f64,
    pub adjusted_score: f64,
    pub weight_applied: f64,
    pub feedback: String,
}

/// Trend labels over the analyzer's sliding windows.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrendSummary {
    pub pace: TrendLabel,
    pub volume: TrendLabel,
    pub clarity: TrendLabel,
}

/// Secondary indicators derived from the same frame features.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdvancedMetrics {
    /// Regularity of energy peaks (0-1).
    pub rhythm_regularity: f64,
    /// How well pauses are placed relative to speech segments (0-1).
    pub pause_effectiveness: f64,
    /// Fraction of the chunk covered by sustained speech (0-1).
    pub speech_continuity: f64,
    pub confidence_score: f64,
    pub nervousness_score: f64,
}

/// Full analysis output for one chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceMetrics {
    pub duration: f64,
    pub language: Language,

    pub avg_volume: f64,
    pub volume_consistency: f64,
    pub avg_pitch: f64,
    pub pitch_variance: f64,
    pub spectral_centroid: f64,
    pub tempo: f64,
    pub zero_crossing_rate: f64,
    pub spectral_rolloff: f64,
    pub voice_activity_ratio: f64,
    pub speech_segments: Vec<SpeechSegment>,
    pub estimated_words: u32,
    pub clarity_score: f64,
    pub pace_wpm: f64,

    pub pace_analysis: PaceReport,
    pub volume_analysis: VolumeReport,
    pub pitch_analysis: PitchReport,
    pub clarity_analysis: ClarityReport,
    /// Weighted combination of the four sub-scores with per-language weights.
    pub language_score: f64,

    pub advanced: AdvancedMetrics,
    pub trends: TrendSummary,
}

impl VoiceMetrics {
    /// Composite chunk quality used by the aggregator and milestone checks.
    pub fn overall_quality(&self) -> f64 {
        let pace_quality = (self.pace_wpm / 150.0).min(1.0);
        ((self.clarity_score + self.advanced.confidence_score + pace_quality) / 3.0).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics_with(clarity: f64, confidence: f64, pace: f64) -> VoiceMetrics {
        VoiceMetrics {
            duration: 1.0,
            language: Language::French,
            avg_volume: 0.06,
            volume_consistency: 0.8,
            avg_pitch: 180.0,
            pitch_variance: 20.0,
            spectral_centroid: 1500.0,
            tempo: 110.0,
            zero_crossing_rate: 0.05,
            spectral_rolloff: 3000.0,
            voice_activity_ratio: 0.7,
            speech_segments: vec![],
            estimated_words: 3,
            clarity_score: clarity,
            pace_wpm: pace,
            pace_analysis: PaceReport::default(),
            volume_analysis: VolumeReport::default(),
            pitch_analysis: PitchReport::default(),
            clarity_analysis: ClarityReport::default(),
            language_score: 0.7,
            advanced: AdvancedMetrics {
                confidence_score: confidence,
                ..Default::default()
            },
            trends: TrendSummary::default(),
        }
    }

    #[test]
    fn test_overall_quality_bounds() {
        let high = metrics_with(1.0, 1.0, 300.0);
        assert!((high.overall_quality() - 1.0).abs() < 1e-9);

        let low = metrics_with(0.0, 0.0, 0.0);
        assert_eq!(low.overall_quality(), 0.0);
    }

    #[test]
    fn test_overall_quality_caps_pace_component() {
        // 150 wpm and 450 wpm contribute the same pace term.
        let a = metrics_with(0.5, 0.5, 150.0);
        let b = metrics_with(0.5, 0.5, 450.0);
        assert!((a.overall_quality() - b.overall_quality()).abs() < 1e-9);
    }
}
