//! Frame-level acoustic features
//!
//! 25 ms analysis windows with a 10 ms hop. Spectral features use a real
//! FFT; the pitch track is autocorrelation-based with unvoiced frames
//! filtered out.

use realfft::RealFftPlanner;

/// Pitch search range in Hz.
const PITCH_MIN_HZ: f64 = 50.0;
const PITCH_MAX_HZ: f64 = 400.0;
/// Normalized autocorrelation below this is treated as unvoiced.
const VOICING_THRESHOLD: f64 = 0.3;
/// Rolloff point: frequency below which 85% of spectral energy lies.
const ROLLOFF_FRACTION: f64 = 0.85;

/// Per-frame feature tracks for one chunk.
#[derive(Debug, Clone, Default)]
pub struct FrameFeatures {
    /// RMS energy per frame.
    pub rms: Vec<f64>,
    /// Zero-crossing rate per frame (fraction of sign changes).
    pub zcr: Vec<f64>,
    /// Spectral centroid per frame, Hz.
    pub centroid: Vec<f64>,
    /// Spectral rolloff per frame, Hz.
    pub rolloff: Vec<f64>,
    /// Fundamental frequency of voiced frames only, Hz.
    pub pitch: Vec<f64>,
    /// Energy-peak based tempo estimate, peaks per minute.
    pub tempo: f64,
    pub frame_count: usize,
}

impl FrameFeatures {
    pub fn mean_rms(&self) -> f64 {
        mean(&self.rms)
    }

    pub fn rms_std(&self) -> f64 {
        std_dev(&self.rms)
    }

    pub fn mean_zcr(&self) -> f64 {
        mean(&self.zcr)
    }

    pub fn mean_centroid(&self) -> f64 {
        mean(&self.centroid)
    }

    pub fn mean_rolloff(&self) -> f64 {
        mean(&self.rolloff)
    }

    pub fn mean_pitch(&self) -> f64 {
        mean(&self.pitch)
    }

    /// Variance of the voiced pitch track.
    pub fn pitch_variance(&self) -> f64 {
        let sd = std_dev(&self.pitch);
        sd * sd
    }

    /// Variance of per-frame energy (sum of squares), the rhythm input.
    pub fn energy_variance(&self) -> f64 {
        let energies: Vec<f64> = self.rms.iter().map(|r| r * r).collect();
        let sd = std_dev(&energies);
        sd * sd
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Compute all frame features for a chunk of mono samples.
pub fn compute_frame_features(samples: &[f32], sample_rate: u32) -> FrameFeatures {
    let frame_len = (0.025 * sample_rate as f64) as usize;
    let hop = (0.010 * sample_rate as f64) as usize;

    if samples.len() < frame_len || frame_len == 0 {
        return FrameFeatures::default();
    }

    let fft_len = frame_len.next_power_of_two();
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(fft_len);
    let mut spectrum = fft.make_output_vec();
    let mut scratch = vec![0.0f64; fft_len];

    let bin_hz = sample_rate as f64 / fft_len as f64;
    let lag_min = (sample_rate as f64 / PITCH_MAX_HZ) as usize;
    let lag_max = ((sample_rate as f64 / PITCH_MIN_HZ) as usize).min(frame_len - 1);

    let mut features = FrameFeatures::default();

    let mut start = 0;
    while start + frame_len <= samples.len() {
        let frame: Vec<f64> = samples[start..start + frame_len]
            .iter()
            .map(|&s| s as f64)
            .collect();

        // RMS energy
        let energy: f64 = frame.iter().map(|s| s * s).sum();
        features.rms.push((energy / frame_len as f64).sqrt());

        // Zero crossing rate
        let crossings = frame
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        features.zcr.push(crossings as f64 / frame_len as f64);

        // Spectral centroid and rolloff
        scratch[..frame_len].copy_from_slice(&frame);
        scratch[frame_len..].fill(0.0);
        if fft.process(&mut scratch, &mut spectrum).is_ok() {
            let magnitudes: Vec<f64> = spectrum.iter().map(|c| c.norm()).collect();
            let total: f64 = magnitudes.iter().sum();
            if total > 0.0 {
                let weighted: f64 = magnitudes
                    .iter()
                    .enumerate()
                    .map(|(i, m)| i as f64 * bin_hz * m)
                    .sum();
                features.centroid.push(weighted / total);

                let target = total * ROLLOFF_FRACTION;
                let mut cumulative = 0.0;
                let mut rolloff_bin = magnitudes.len() - 1;
                for (i, m) in magnitudes.iter().enumerate() {
                    cumulative += m;
                    if cumulative >= target {
                        rolloff_bin = i;
                        break;
                    }
                }
                features.rolloff.push(rolloff_bin as f64 * bin_hz);
            } else {
                features.centroid.push(0.0);
                features.rolloff.push(0.0);
            }
        }

        // Autocorrelation pitch, voiced frames only
        if let Some(pitch) = frame_pitch(&frame, sample_rate, lag_min, lag_max) {
            features.pitch.push(pitch);
        }

        features.frame_count += 1;
        start += hop;
    }

    features.tempo = estimate_tempo(&features.rms, samples.len(), sample_rate);
    features
}

/// Autocorrelation pitch estimate for one frame. Returns `None` for
/// unvoiced frames (pitch <= 0 is never emitted).
fn frame_pitch(frame: &[f64], sample_rate: u32, lag_min: usize, lag_max: usize) -> Option<f64> {
    if lag_min >= lag_max || frame.len() <= lag_max {
        return None;
    }

    let energy: f64 = frame.iter().map(|s| s * s).sum();
    if energy <= f64::EPSILON {
        return None;
    }

    let mut best_lag = 0;
    let mut best_corr = 0.0;
    for lag in lag_min..=lag_max {
        let mut corr = 0.0;
        for i in 0..frame.len() - lag {
            corr += frame[i] * frame[i + lag];
        }
        let normalized = corr / energy;
        if normalized > best_corr {
            best_corr = normalized;
            best_lag = lag;
        }
    }

    if best_corr >= VOICING_THRESHOLD && best_lag > 0 {
        Some(sample_rate as f64 / best_lag as f64)
    } else {
        None
    }
}

/// Tempo from energy-peak spacing, expressed in peaks per minute.
fn estimate_tempo(rms: &[f64], sample_count: usize, sample_rate: u32) -> f64 {
    if rms.len() < 3 || sample_count == 0 {
        return 0.0;
    }

    let threshold = mean(rms);
    let mut peaks = 0usize;
    for i in 1..rms.len() - 1 {
        if rms[i] > threshold && rms[i] > rms[i - 1] && rms[i] >= rms[i + 1] {
            peaks += 1;
        }
    }

    let duration = sample_count as f64 / sample_rate as f64;
    if duration <= 0.0 {
        return 0.0;
    }
    peaks as f64 / duration * 60.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, secs: f64, rate: u32, amp: f32) -> Vec<f32> {
        let n = (secs * rate as f64) as usize;
        (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / rate as f64).sin() as f32 * amp)
            .collect()
    }

    #[test]
    fn test_frame_counts() {
        let samples = sine(220.0, 1.0, 16_000, 0.5);
        let features = compute_frame_features(&samples, 16_000);
        // 1s at 25ms/10ms -> ~98 frames
        assert!(features.frame_count >= 95 && features.frame_count <= 100);
        assert_eq!(features.rms.len(), features.frame_count);
        assert_eq!(features.zcr.len(), features.frame_count);
    }

    #[test]
    fn test_pitch_tracks_sine() {
        let samples = sine(200.0, 0.5, 16_000, 0.5);
        let features = compute_frame_features(&samples, 16_000);
        assert!(!features.pitch.is_empty());
        let pitch = features.mean_pitch();
        assert!((pitch - 200.0).abs() < 20.0, "pitch estimate {pitch}");
    }

    #[test]
    fn test_silence_is_unvoiced() {
        let samples = vec![0.0f32; 16_000];
        let features = compute_frame_features(&samples, 16_000);
        assert!(features.pitch.is_empty());
        assert!(features.mean_rms() < 1e-9);
    }

    #[test]
    fn test_higher_frequency_raises_centroid() {
        let low = compute_frame_features(&sine(200.0, 0.5, 16_000, 0.5), 16_000);
        let high = compute_frame_features(&sine(2_000.0, 0.5, 16_000, 0.5), 16_000);
        assert!(high.mean_centroid() > low.mean_centroid());
    }

    #[test]
    fn test_too_short_chunk() {
        let samples = vec![0.1f32; 100];
        let features = compute_frame_features(&samples, 16_000);
        assert_eq!(features.frame_count, 0);
    }
}
