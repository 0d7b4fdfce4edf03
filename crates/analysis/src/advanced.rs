//! Secondary speech indicators
//!
//! Rhythm, pause, continuity, confidence, and nervousness indicators
//! derived from the same frame features as the base metrics.

use coach_core::{AdvancedMetrics, SpeechSegment};

/// Frame hop in seconds, the unit speech segments are measured in.
const HOP_SECS: f64 = 0.010;

/// Inputs already computed by the base analysis.
pub struct AdvancedInputs<'a> {
    pub energy_variance: f64,
    pub speech_segments: &'a [SpeechSegment],
    pub duration: f64,
    pub voice_activity_ratio: f64,
    pub volume_consistency: f64,
    pub pitch_variance: f64,
    pub pace_wpm: f64,
    pub clarity_score: f64,
}

pub fn compute_advanced(inputs: &AdvancedInputs<'_>) -> AdvancedMetrics {
    AdvancedMetrics {
        rhythm_regularity: rhythm_regularity(inputs.energy_variance),
        pause_effectiveness: pause_effectiveness(inputs.speech_segments),
        speech_continuity: speech_continuity(inputs.voice_activity_ratio),
        confidence_score: confidence_score(inputs),
        nervousness_score: nervousness_score(inputs),
    }
}

/// Higher = more regular energy contour.
fn rhythm_regularity(energy_variance: f64) -> f64 {
    (1.0 / (1.0 + energy_variance) * 2.0).min(1.0)
}

/// Effective pauses sit around 0.5s; scored from the gaps between
/// consecutive speech segments.
fn pause_effectiveness(segments: &[SpeechSegment]) -> f64 {
    if segments.len() < 2 {
        return 0.5;
    }

    let mut pauses = Vec::new();
    for pair in segments.windows(2) {
        if pair[1].start_frame > pair[0].end_frame {
            pauses.push((pair[1].start_frame - pair[0].end_frame) as f64 * HOP_SECS);
        }
    }
    if pauses.is_empty() {
        return 0.5;
    }

    let avg = pauses.iter().sum::<f64>() / pauses.len() as f64;
    let effectiveness = if avg <= 1.0 {
        1.0 - (avg - 0.5).abs() / 0.5
    } else {
        0.3
    };
    effectiveness.clamp(0.0, 1.0)
}

/// Good continuity is 0.7-0.9 activity; wall-to-wall talking is penalized.
fn speech_continuity(voice_activity: f64) -> f64 {
    if (0.7..=0.9).contains(&voice_activity) {
        1.0
    } else if voice_activity < 0.7 {
        voice_activity / 0.7
    } else {
        (1.0 - (voice_activity - 0.9) * 2.0).max(0.5)
    }
}

/// Confident delivery: steady volume, pace near the 120-180 band, activity
/// around 0.7, clear articulation.
fn confidence_score(inputs: &AdvancedInputs<'_>) -> f64 {
    let pace_confidence = if (120.0..=180.0).contains(&inputs.pace_wpm) {
        1.0
    } else {
        (1.0 - (inputs.pace_wpm - 150.0).abs() / 150.0).max(0.3)
    };
    let activity_confidence = if (0.6..=0.8).contains(&inputs.voice_activity_ratio) {
        1.0
    } else {
        (1.0 - (inputs.voice_activity_ratio - 0.7).abs() / 0.7).max(0.3)
    };

    (0.3 * inputs.volume_consistency
        + 0.25 * pace_confidence
        + 0.25 * activity_confidence
        + 0.2 * inputs.clarity_score)
        .clamp(0.0, 1.0)
}

/// Nervousness from pace extremes, unsteady volume, and pitch variance.
fn nervousness_score(inputs: &AdvancedInputs<'_>) -> f64 {
    let pace_nervousness = if inputs.pace_wpm > 200.0 {
        ((inputs.pace_wpm - 200.0) / 100.0).min(1.0)
    } else if inputs.pace_wpm > 0.0 && inputs.pace_wpm < 80.0 {
        ((80.0 - inputs.pace_wpm) / 40.0).min(1.0)
    } else {
        0.0
    };

    let volume_nervousness = 1.0 - inputs.volume_consistency;
    let pitch_nervousness = (inputs.pitch_variance / 2000.0).min(1.0);

    ((pace_nervousness + volume_nervousness + pitch_nervousness) / 3.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(segments: &[SpeechSegment]) -> AdvancedInputs<'_> {
        AdvancedInputs {
            energy_variance: 0.1,
            speech_segments: segments,
            duration: 1.0,
            voice_activity_ratio: 0.75,
            volume_consistency: 0.85,
            pitch_variance: 400.0,
            pace_wpm: 150.0,
            clarity_score: 0.8,
        }
    }

    #[test]
    fn test_confidence_in_sweet_spot() {
        let segments = vec![];
        let metrics = compute_advanced(&inputs(&segments));
        // Steady volume + ideal pace + ideal activity + good clarity.
        assert!(metrics.confidence_score > 0.8);
        assert!(metrics.nervousness_score < 0.3);
    }

    #[test]
    fn test_continuity_bands() {
        assert_eq!(speech_continuity(0.8), 1.0);
        assert!((speech_continuity(0.35) - 0.5).abs() < 1e-9);
        assert!(speech_continuity(1.0) >= 0.5);
        assert!(speech_continuity(1.0) < 1.0);
    }

    #[test]
    fn test_pause_effectiveness_half_second() {
        // Two segments separated by 50 frames = 0.5s: the ideal pause.
        let segments = vec![
            SpeechSegment {
                start_frame: 0,
                end_frame: 100,
            },
            SpeechSegment {
                start_frame: 150,
                end_frame: 250,
            },
        ];
        assert!((pause_effectiveness(&segments) - 1.0).abs() < 1e-9);

        // Single segment: no pause information.
        assert_eq!(pause_effectiveness(&segments[..1]), 0.5);
    }

    #[test]
    fn test_fast_pace_raises_nervousness() {
        let segments = vec![];
        let mut fast = inputs(&segments);
        fast.pace_wpm = 280.0;
        fast.volume_consistency = 0.5;
        let metrics = compute_advanced(&fast);
        assert!(metrics.nervousness_score > 0.4);
    }
}
