//! Energy-based voice activity detection

use coach_core::SpeechSegment;

use crate::features::mean;

/// Threshold as a factor of mean frame energy.
const THRESHOLD_FACTOR: f64 = 0.1;

/// Voice activity over one chunk.
#[derive(Debug, Clone, Default)]
pub struct VoiceActivity {
    /// voiced_frames / total_frames.
    pub activity_ratio: f64,
    /// Continuous voiced runs as frame index ranges.
    pub segments: Vec<SpeechSegment>,
}

/// Threshold the RMS track at `mean(rms) * 0.1` and collect continuous
/// voiced segments.
pub fn detect_voice_activity(rms: &[f64]) -> VoiceActivity {
    if rms.is_empty() {
        return VoiceActivity::default();
    }

    let threshold = mean(rms) * THRESHOLD_FACTOR;
    let voiced: Vec<bool> = rms.iter().map(|&r| r > threshold).collect();
    let active = voiced.iter().filter(|&&v| v).count();

    let mut segments = Vec::new();
    let mut start = None;
    for (i, &is_voiced) in voiced.iter().enumerate() {
        match (is_voiced, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                segments.push(SpeechSegment {
                    start_frame: s,
                    end_frame: i,
                });
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        segments.push(SpeechSegment {
            start_frame: s,
            end_frame: voiced.len(),
        });
    }

    VoiceActivity {
        activity_ratio: active as f64 / voiced.len() as f64,
        segments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_voiced() {
        let rms = vec![0.5; 20];
        let activity = detect_voice_activity(&rms);
        assert_eq!(activity.activity_ratio, 1.0);
        assert_eq!(activity.segments.len(), 1);
        assert_eq!(activity.segments[0].start_frame, 0);
        assert_eq!(activity.segments[0].end_frame, 20);
    }

    #[test]
    fn test_segment_boundaries() {
        // Frames 0-4 loud, 5-9 silent, 10-14 loud.
        let mut rms = vec![0.5; 5];
        rms.extend(vec![0.0; 5]);
        rms.extend(vec![0.5; 5]);
        let activity = detect_voice_activity(&rms);

        assert_eq!(activity.segments.len(), 2);
        assert_eq!(activity.segments[0].start_frame, 0);
        assert_eq!(activity.segments[0].end_frame, 5);
        assert_eq!(activity.segments[1].start_frame, 10);
        assert_eq!(activity.segments[1].end_frame, 15);
        assert!((activity.activity_ratio - 10.0 / 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty() {
        let activity = detect_voice_activity(&[]);
        assert_eq!(activity.activity_ratio, 0.0);
        assert!(activity.segments.is_empty());
    }
}
