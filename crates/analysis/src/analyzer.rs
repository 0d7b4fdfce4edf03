//! Stateful per-session voice analyzer

use std::collections::VecDeque;

use coach_config::{language_profile, LanguageProfile};
use coach_core::{
    CoachError, ErrorKind, Language, Result, TrendLabel, TrendSummary, VoiceMetrics,
};

use crate::advanced::{compute_advanced, AdvancedInputs};
use crate::features::compute_frame_features;
use crate::scoring;
use crate::vad::detect_voice_activity;

/// Sliding-window length for trend analysis.
const TREND_WINDOW: usize = 10;
/// Relative band within which a trend counts as stable.
const STABLE_BAND: f64 = 0.02;
/// Minimum chunk length accepted for analysis.
const MIN_CHUNK_SECS: f64 = 0.1;
/// Below this activity ratio (on chunks longer than half a second) the
/// audio is considered unusable.
const MIN_ACTIVITY_RATIO: f64 = 0.02;

/// Stateful DSP over audio chunks producing voice metrics.
///
/// One analyzer per session; owned exclusively by the session's pipeline.
pub struct VoiceAnalyzer {
    profile: &'static LanguageProfile,
    sample_rate: u32,
    pace_readings: VecDeque<f64>,
    volume_readings: VecDeque<f64>,
    clarity_readings: VecDeque<f64>,
    chunks_analyzed: u64,
}

impl VoiceAnalyzer {
    pub fn new(language: Language, sample_rate: u32) -> Self {
        Self {
            profile: language_profile(language),
            sample_rate,
            pace_readings: VecDeque::with_capacity(TREND_WINDOW),
            volume_readings: VecDeque::with_capacity(TREND_WINDOW),
            clarity_readings: VecDeque::with_capacity(TREND_WINDOW),
            chunks_analyzed: 0,
        }
    }

    pub fn language(&self) -> Language {
        self.profile.language
    }

    pub fn chunks_analyzed(&self) -> u64 {
        self.chunks_analyzed
    }

    /// Analyze one chunk of canonical mono samples.
    pub fn analyze(&mut self, samples: &[f32]) -> Result<VoiceMetrics> {
        let duration = samples.len() as f64 / self.sample_rate as f64;
        if duration < MIN_CHUNK_SECS {
            return Err(CoachError::new(
                ErrorKind::AudioQuality,
                format!("chunk too short for analysis: {:.0}ms", duration * 1000.0),
            )
            .with_detail("duration_ms", (duration * 1000.0) as u64));
        }

        let features = compute_frame_features(samples, self.sample_rate);
        if features.frame_count == 0 {
            // Frame extraction yielded nothing despite the length check;
            // recoverable on the next chunk.
            return Err(CoachError::new(
                ErrorKind::PipelineResource,
                "frame extraction produced no frames",
            ));
        }

        let activity = detect_voice_activity(&features.rms);
        if activity.activity_ratio < MIN_ACTIVITY_RATIO && duration > 0.5 {
            return Err(CoachError::new(
                ErrorKind::AudioQuality,
                "audio contains no detectable speech",
            )
            .with_detail("activity_ratio", activity.activity_ratio)
            .with_detail("duration", duration));
        }

        let mean_rms = features.mean_rms();
        let rms_std = features.rms_std();
        let mean_pitch = features.mean_pitch();
        let pitch_std = features.pitch_variance().sqrt();

        let pace = scoring::score_pace(activity.activity_ratio, self.profile);
        let volume = scoring::score_volume(mean_rms, rms_std, self.profile);
        let pitch = scoring::score_pitch(mean_pitch, pitch_std, self.profile);
        let clarity = scoring::score_clarity(
            features.mean_zcr(),
            features.mean_centroid(),
            mean_rms,
            self.profile,
        );
        let language_score =
            scoring::language_score(&pace, &volume, &pitch, &clarity, self.profile);

        let advanced = compute_advanced(&AdvancedInputs {
            energy_variance: features.energy_variance(),
            speech_segments: &activity.segments,
            duration,
            voice_activity_ratio: activity.activity_ratio,
            volume_consistency: volume.consistency,
            pitch_variance: features.pitch_variance(),
            pace_wpm: pace.wpm,
            clarity_score: clarity.adjusted_score,
        });

        let trends = self.update_trends(pace.wpm, mean_rms, clarity.adjusted_score);
        self.chunks_analyzed += 1;

        Ok(VoiceMetrics {
            duration,
            language: self.profile.language,
            avg_volume: mean_rms,
            volume_consistency: volume.consistency,
            avg_pitch: mean_pitch,
            pitch_variance: features.pitch_variance(),
            spectral_centroid: features.mean_centroid(),
            tempo: features.tempo,
            zero_crossing_rate: features.mean_zcr(),
            spectral_rolloff: features.mean_rolloff(),
            voice_activity_ratio: activity.activity_ratio,
            speech_segments: activity.segments,
            estimated_words: scoring::estimate_words(duration, activity.activity_ratio),
            clarity_score: clarity.adjusted_score,
            pace_wpm: pace.wpm,
            pace_analysis: pace,
            volume_analysis: volume,
            pitch_analysis: pitch,
            clarity_analysis: clarity,
            language_score,
            advanced,
            trends,
        })
    }

    /// Push the latest readings and label each track by comparing the mean
    /// of the last 3 readings against the prior ones.
    fn update_trends(&mut self, pace: f64, volume: f64, clarity: f64) -> TrendSummary {
        push_bounded(&mut self.pace_readings, pace);
        push_bounded(&mut self.volume_readings, volume);
        push_bounded(&mut self.clarity_readings, clarity);

        TrendSummary {
            pace: label_trend(&self.pace_readings),
            volume: label_trend(&self.volume_readings),
            clarity: label_trend(&self.clarity_readings),
        }
    }
}

fn push_bounded(readings: &mut VecDeque<f64>, value: f64) {
    if readings.len() == TREND_WINDOW {
        readings.pop_front();
    }
    readings.push_back(value);
}

fn label_trend(readings: &VecDeque<f64>) -> TrendLabel {
    if readings.len() < 3 {
        return TrendLabel::InsufficientData;
    }

    let values: Vec<f64> = readings.iter().copied().collect();
    let recent: f64 = values[values.len() - 3..].iter().sum::<f64>() / 3.0;
    let older_slice = &values[..values.len() - 3];
    let older = if older_slice.is_empty() {
        recent
    } else {
        older_slice.iter().sum::<f64>() / older_slice.len() as f64
    };

    let band = STABLE_BAND * older.abs().max(f64::EPSILON);
    if (recent - older).abs() <= band {
        TrendLabel::Stable
    } else if recent > older {
        TrendLabel::Improving
    } else {
        TrendLabel::Declining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speech_like(secs: f64, rate: u32) -> Vec<f32> {
        // Fundamental plus harmonics, amplitude-modulated to mimic syllables.
        let n = (secs * rate as f64) as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 / rate as f64;
                let envelope = 0.6 + 0.4 * (2.0 * std::f64::consts::PI * 3.0 * t).sin();
                let signal = 0.5 * (2.0 * std::f64::consts::PI * 200.0 * t).sin()
                    + 0.3 * (2.0 * std::f64::consts::PI * 400.0 * t).sin()
                    + 0.1 * (2.0 * std::f64::consts::PI * 600.0 * t).sin();
                (signal * envelope * 0.3) as f32
            })
            .collect()
    }

    #[test]
    fn test_analyze_speech_chunk() {
        let mut analyzer = VoiceAnalyzer::new(Language::French, 16_000);
        let samples = speech_like(1.0, 16_000);
        let metrics = analyzer.analyze(&samples).unwrap();

        assert!((metrics.duration - 1.0).abs() < 0.01);
        assert!(metrics.voice_activity_ratio > 0.5);
        assert!(metrics.avg_pitch > 100.0 && metrics.avg_pitch < 300.0);
        assert!(metrics.language_score > 0.0);
        assert_eq!(metrics.language, Language::French);
        assert_eq!(analyzer.chunks_analyzed(), 1);
    }

    #[test]
    fn test_rejects_short_chunk() {
        let mut analyzer = VoiceAnalyzer::new(Language::French, 16_000);
        let err = analyzer.analyze(&vec![0.1; 800]).unwrap_err(); // 50ms
        assert_eq!(err.kind, ErrorKind::AudioQuality);
        assert_eq!(analyzer.chunks_analyzed(), 0);
    }

    #[test]
    fn test_insufficient_data_trend() {
        let mut analyzer = VoiceAnalyzer::new(Language::English, 16_000);
        let samples = speech_like(0.5, 16_000);
        let metrics = analyzer.analyze(&samples).unwrap();
        assert_eq!(metrics.trends.pace, TrendLabel::InsufficientData);
    }

    #[test]
    fn test_trends_after_three_chunks() {
        let mut analyzer = VoiceAnalyzer::new(Language::English, 16_000);
        let samples = speech_like(0.5, 16_000);
        for _ in 0..4 {
            let metrics = analyzer.analyze(&samples).unwrap();
            let _ = metrics;
        }
        let metrics = analyzer.analyze(&samples).unwrap();
        // Identical chunks: every track settles on stable.
        assert_eq!(metrics.trends.pace, TrendLabel::Stable);
        assert_eq!(metrics.trends.clarity, TrendLabel::Stable);
    }

    #[test]
    fn test_label_trend_directions() {
        let rising: VecDeque<f64> = vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0].into();
        assert_eq!(label_trend(&rising), TrendLabel::Improving);

        let falling: VecDeque<f64> = vec![2.0, 2.0, 2.0, 1.0, 1.0, 1.0].into();
        assert_eq!(label_trend(&falling), TrendLabel::Declining);

        let flat: VecDeque<f64> = vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0].into();
        assert_eq!(label_trend(&flat), TrendLabel::Stable);

        let short: VecDeque<f64> = vec![1.0, 2.0].into();
        assert_eq!(label_trend(&short), TrendLabel::InsufficientData);
    }
}
