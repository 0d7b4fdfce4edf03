//! Language-adapted scoring
//!
//! Maps raw acoustic features onto per-language pace/volume/pitch/clarity
//! reports using the thresholds from the language registry.

use coach_config::{ui_message, LanguageProfile};
use coach_core::{ClarityReport, PaceReport, PitchReport, VolumeReport};

/// Normalization anchors for the clarity features, typical of speech.
const ZCR_NORM: f64 = 0.1;
const CENTROID_NORM: f64 = 2000.0;
const VOLUME_NORM: f64 = 0.1;

/// Average words per second of active speech for word-count estimation.
/// A documented proxy rather than a transcription-based count; downstream
/// metrics depend on it.
const WORDS_PER_SECOND: f64 = 2.5;

/// Pace on the WPM scale from the activity ratio, using the per-language
/// speaking rate so full activity lands on the language optimum.
pub fn estimate_wpm(activity_ratio: f64, profile: &LanguageProfile) -> f64 {
    if activity_ratio <= 0.0 {
        return 0.0;
    }
    activity_ratio * profile.audio.words_per_second * 60.0
}

/// Estimated word count for a chunk.
pub fn estimate_words(duration: f64, activity_ratio: f64) -> u32 {
    if duration <= 0.0 || activity_ratio <= 0.0 {
        return 0;
    }
    (duration * activity_ratio * WORDS_PER_SECOND) as u32
}

/// Score 1.0 inside the language's natural WPM range, linearly degraded
/// outside, floored at zero.
pub fn score_pace(activity_ratio: f64, profile: &LanguageProfile) -> PaceReport {
    let wpm = estimate_wpm(activity_ratio, profile);
    let optimal = profile.audio.optimal_wpm();
    let min_wpm = profile.audio.min_wpm();
    let max_wpm = profile.audio.max_wpm();

    let (score, is_optimal) = if wpm >= min_wpm && wpm <= max_wpm {
        (1.0, true)
    } else if wpm < min_wpm {
        ((wpm / min_wpm).max(0.0), false)
    } else {
        ((1.0 - (wpm - max_wpm) / optimal).max(0.0), false)
    };

    let feedback = if is_optimal {
        ui_message("volume_good", profile.language, "Good pace").to_string()
    } else if wpm > max_wpm {
        ui_message("pace_slow_down", profile.language, "Slow down").to_string()
    } else {
        ui_message("pace_speed_up", profile.language, "Speed up a little").to_string()
    };

    PaceReport {
        wpm,
        optimal_wpm: optimal,
        score,
        is_optimal,
        feedback,
    }
}

/// Volume score: consistency (`1 - stdev/mean`) combined with level
/// plausibility against the language's optimal dynamic range.
pub fn score_volume(mean_rms: f64, rms_std: f64, profile: &LanguageProfile) -> VolumeReport {
    let consistency = if mean_rms > 0.0 {
        (1.0 - rms_std / mean_rms).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let target = profile.audio.dynamic_range_optimal;
    let deviation = if target > 0.0 {
        (mean_rms - target).abs() / target
    } else {
        1.0
    };
    let level_score = (1.0 - deviation).max(0.0);
    let score = (level_score * consistency).clamp(0.0, 1.0);

    let feedback = if consistency < profile.audio.volume_consistency_threshold {
        ui_message("volume_inconsistent", profile.language, "Keep volume steady").to_string()
    } else {
        ui_message("volume_good", profile.language, "Volume is fine").to_string()
    };

    VolumeReport {
        level: mean_rms,
        consistency,
        target_level: target,
        score,
        feedback,
    }
}

/// Pitch score from the variation ratio against the language expectation.
///
/// Below the monotone threshold the delivery is flagged monotone; beyond
/// 1.3x the expected variation the score is penalized.
pub fn score_pitch(mean_pitch: f64, pitch_std: f64, profile: &LanguageProfile) -> PitchReport {
    let variation_ratio = if mean_pitch > 0.0 {
        pitch_std / mean_pitch
    } else {
        0.0
    };
    let expected = profile.audio.pitch_variance_expected;
    let is_monotone = variation_ratio < profile.audio.monotone_threshold;

    let ratio = if expected > 0.0 {
        variation_ratio / expected
    } else {
        0.0
    };
    let score = if ratio <= 1.3 {
        (1.0 - (ratio - 1.0).abs()).clamp(0.0, 1.0)
    } else {
        (1.0 - (ratio - 1.3) * 0.5).clamp(0.0, 1.0)
    };

    let feedback = if is_monotone {
        ui_message("monotone", profile.language, "Vary your intonation").to_string()
    } else {
        String::new()
    };

    PitchReport {
        variation_ratio,
        expected_variance: expected,
        is_monotone,
        score,
        feedback,
    }
}

/// Clarity: weighted sum of normalized centroid (+), normalized ZCR (-),
/// and normalized volume (+), scaled by the language clarity weight.
pub fn score_clarity(
    mean_zcr: f64,
    mean_centroid: f64,
    mean_rms: f64,
    profile: &LanguageProfile,
) -> ClarityReport {
    let zcr_norm = (mean_zcr / ZCR_NORM).min(1.0);
    let centroid_norm = (mean_centroid / CENTROID_NORM).min(1.0);
    let volume_norm = (mean_rms / VOLUME_NORM).min(1.0);

    let raw = (0.4 * centroid_norm + 0.3 * (1.0 - zcr_norm) + 0.3 * volume_norm).clamp(0.0, 1.0);
    let weight = profile.audio.clarity_weight;
    let adjusted = (raw * weight).clamp(0.0, 1.0);

    let feedback = if adjusted < 0.6 {
        ui_message("clarity_low", profile.language, "Articulate more clearly").to_string()
    } else {
        String::new()
    };

    ClarityReport {
        raw_score: raw,
        adjusted_score: adjusted,
        weight_applied: weight,
        feedback,
    }
}

/// Weighted combination of the four sub-scores with the language weights.
pub fn language_score(
    pace: &PaceReport,
    volume: &VolumeReport,
    pitch: &PitchReport,
    clarity: &ClarityReport,
    profile: &LanguageProfile,
) -> f64 {
    let w = profile.weights;
    (w.pace * pace.score
        + w.volume * volume.score
        + w.pitch * pitch.score
        + w.clarity * clarity.adjusted_score)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_config::language_profile;
    use coach_core::Language;

    #[test]
    fn test_pace_inside_range_is_optimal() {
        let fr = language_profile(Language::French);
        // activity 0.95 -> ~268 wpm, within the fr band [228, 336].
        let report = score_pace(0.95, fr);
        assert!(report.is_optimal);
        assert_eq!(report.score, 1.0);

        // Full activity lands on the optimum itself.
        let full = score_pace(1.0, fr);
        assert!((full.wpm - fr.audio.optimal_wpm()).abs() < 1e-9);
        assert!(full.is_optimal);
    }

    #[test]
    fn test_pace_degrades_outside_range() {
        let fr = language_profile(Language::French);
        let slow = score_pace(0.2, fr); // 30 wpm
        assert!(!slow.is_optimal);
        assert!(slow.score < 0.5);
        assert!(slow.score >= 0.0);
    }

    #[test]
    fn test_volume_consistency() {
        let fr = language_profile(Language::French);
        let steady = score_volume(0.06, 0.003, fr);
        assert!(steady.consistency > 0.9);
        assert!(steady.score > 0.8);

        let wobbly = score_volume(0.06, 0.05, fr);
        assert!(wobbly.consistency < steady.consistency);
        assert!(wobbly.score < steady.score);
    }

    #[test]
    fn test_pitch_monotone_flag() {
        let fr = language_profile(Language::French);
        let monotone = score_pitch(180.0, 5.0, fr); // ratio 0.028
        assert!(monotone.is_monotone);

        let varied = score_pitch(180.0, 27.0, fr); // ratio 0.15 = expected
        assert!(!varied.is_monotone);
        assert!((varied.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pitch_excess_penalized() {
        let fr = language_profile(Language::French);
        // ratio = 0.45 -> 3x expected, penalized past the 1.3x knee.
        let excessive = score_pitch(180.0, 81.0, fr);
        assert!(excessive.score < 0.5);
    }

    #[test]
    fn test_language_adaptation_differs() {
        // Same acoustics, different language weights and thresholds.
        let fr = language_profile(Language::French);
        let en = language_profile(Language::English);

        let activity = 0.75;
        let fr_score = {
            let pace = score_pace(activity, fr);
            let vol = score_volume(0.06, 0.01, fr);
            let pitch = score_pitch(180.0, 27.0, fr);
            let clarity = score_clarity(0.05, 1500.0, 0.06, fr);
            language_score(&pace, &vol, &pitch, &clarity, fr)
        };
        let en_score = {
            let pace = score_pace(activity, en);
            let vol = score_volume(0.06, 0.01, en);
            let pitch = score_pitch(180.0, 27.0, en);
            let clarity = score_clarity(0.05, 1500.0, 0.06, en);
            language_score(&pace, &vol, &pitch, &clarity, en)
        };

        assert!((fr_score - en_score).abs() > 1e-6);
    }

    #[test]
    fn test_clarity_weight_applied() {
        let fr = language_profile(Language::French);
        let report = score_clarity(0.05, 1500.0, 0.06, fr);
        assert_eq!(report.weight_applied, fr.audio.clarity_weight);
        assert!(report.adjusted_score <= 1.0);
    }

    #[test]
    fn test_zero_words_at_zero_activity() {
        let fr = language_profile(Language::French);
        assert_eq!(estimate_words(3.0, 0.0), 0);
        assert_eq!(estimate_wpm(0.0, fr), 0.0);

        // 3 seconds fully active -> 7 words at the 2.5 words/s proxy.
        assert_eq!(estimate_words(3.0, 1.0), 7);
    }
}
