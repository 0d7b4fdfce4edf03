//! Audio ingestion
//!
//! Circular PCM buffer plus decoding and resampling for streamed and
//! uploaded audio. All audio is canonicalized to mono f32 at the configured
//! sample rate before analysis.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::{CoachError, ErrorKind, Result};

const PCM16_NORMALIZE: f32 = 32768.0;
const PCM16_SCALE: f32 = 32767.0;

/// Audio container formats recognized from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Wav,
    Mp3,
    Flac,
    Ogg,
    M4a,
    /// No recognizable header; treated as raw 16-bit PCM.
    RawPcm,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::M4a => "m4a",
            AudioFormat::RawPcm => "raw_pcm",
        }
    }
}

/// Detect the container format from the leading bytes.
pub fn detect_format(data: &[u8]) -> AudioFormat {
    if data.len() < 12 {
        return AudioFormat::RawPcm;
    }
    if &data[..4] == b"RIFF" && &data[8..12] == b"WAVE" {
        return AudioFormat::Wav;
    }
    if &data[..3] == b"ID3" || (data[0] == 0xFF && (data[1] & 0xE0) == 0xE0) {
        return AudioFormat::Mp3;
    }
    if &data[..4] == b"fLaC" {
        return AudioFormat::Flac;
    }
    if &data[..4] == b"OggS" {
        return AudioFormat::Ogg;
    }
    if data[..12].windows(4).any(|w| w == b"ftyp") {
        return AudioFormat::M4a;
    }
    AudioFormat::RawPcm
}

/// Result of decoding an audio payload.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono samples normalized to [-1.0, 1.0] at `sample_rate`.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub format: AudioFormat,
    pub warnings: Vec<String>,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode an audio payload to mono f32 at `target_rate`.
///
/// WAV goes through hound; compressed formats go through symphonia. When no
/// header is recognized the payload is interpreted as raw 16-bit PCM at
/// `source_rate_hint` (or `target_rate`) and a warning is attached. A decode
/// that yields no samples is an error, never silence.
pub fn decode_audio(
    data: &[u8],
    source_rate_hint: Option<u32>,
    target_rate: u32,
) -> Result<DecodedAudio> {
    if data.is_empty() {
        return Err(CoachError::new(ErrorKind::AudioFormat, "audio payload is empty"));
    }

    let format = detect_format(data);
    let mut warnings = Vec::new();

    let (samples, source_rate) = match format {
        AudioFormat::Wav => decode_wav(data)?,
        AudioFormat::Mp3 | AudioFormat::Flac | AudioFormat::Ogg | AudioFormat::M4a => {
            decode_compressed(data, format)?
        }
        AudioFormat::RawPcm => {
            let rate = source_rate_hint.unwrap_or(target_rate);
            warnings.push(format!(
                "no audio header detected, assuming raw 16-bit PCM at {} Hz",
                rate
            ));
            (pcm16_to_f32(data), rate)
        }
    };

    if samples.is_empty() {
        return Err(
            CoachError::new(ErrorKind::AudioFormat, "decoding produced no samples")
                .with_detail("format", format.as_str()),
        );
    }

    let samples = if source_rate != target_rate {
        resample(&samples, source_rate, target_rate)
    } else {
        samples
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: target_rate,
        format,
        warnings,
    })
}

/// Convert little-endian 16-bit PCM bytes to normalized f32 samples.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            sample as f32 / PCM16_NORMALIZE
        })
        .collect()
}

/// Convert normalized f32 samples to little-endian 16-bit PCM bytes.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            let clamped = sample.clamp(-1.0, 1.0);
            let pcm16 = (clamped * PCM16_SCALE) as i16;
            pcm16.to_le_bytes()
        })
        .collect()
}

fn decode_wav(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(std::io::Cursor::new(data))
        .map_err(|e| CoachError::new(ErrorKind::AudioFormat, format!("WAV decode failed: {e}")))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| CoachError::new(ErrorKind::AudioFormat, format!("WAV read failed: {e}")))?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| CoachError::new(ErrorKind::AudioFormat, format!("WAV read failed: {e}")))?
        }
    };

    Ok((downmix(&interleaved, channels), spec.sample_rate))
}

fn decode_compressed(data: &[u8], format: AudioFormat) -> Result<(Vec<f32>, u32)> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let cursor = std::io::Cursor::new(data.to_vec());
    let stream = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(format.as_str());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| {
            CoachError::new(ErrorKind::AudioFormat, format!("unrecognized audio container: {e}"))
                .with_detail("format", format.as_str())
        })?;

    let mut reader = probed.format;
    let track = reader
        .default_track()
        .ok_or_else(|| CoachError::new(ErrorKind::AudioFormat, "no audio track found"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(16_000);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| CoachError::new(ErrorKind::AudioFormat, format!("codec init failed: {e}")))?;

    let mut samples = Vec::new();
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                // Truncated uploads are common; keep whatever decoded so far.
                tracing::debug!("audio packet read stopped: {}", e);
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                let channels = spec.channels.count().max(1);
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend(downmix(buf.samples(), channels));
            }
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => {
                return Err(CoachError::new(
                    ErrorKind::AudioFormat,
                    format!("decode failed: {e}"),
                ))
            }
        }
    }

    Ok((samples, sample_rate))
}

/// Average interleaved channels down to mono.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Bandlimited resampling via rubato, with a linear fallback for buffers
/// too short for the FFT resampler.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    if samples.len() < 64 {
        return resample_linear(samples, from_rate, to_rate);
    }

    let chunk_size = samples.len().min(1024);
    match FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, 2, 1) {
        Ok(mut resampler) => {
            let mut output = Vec::new();
            let input: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
            for chunk in input.chunks(chunk_size) {
                let mut frame = chunk.to_vec();
                // The FFT resampler needs full frames; the tail is padded and
                // trimmed below based on the rate ratio.
                let pad = chunk_size - frame.len();
                frame.resize(chunk_size, 0.0);
                match resampler.process(&[frame], None) {
                    Ok(mut frames) => {
                        let mut out = frames.remove(0);
                        if pad > 0 {
                            let keep = ((chunk.len() as f64 * to_rate as f64)
                                / from_rate as f64)
                                .round() as usize;
                            out.truncate(keep.min(out.len()));
                        }
                        output.extend(out.iter().map(|&s| s as f32));
                    }
                    Err(e) => {
                        tracing::warn!("resampler failed, using linear fallback: {}", e);
                        return resample_linear(samples, from_rate, to_rate);
                    }
                }
            }
            output
        }
        Err(e) => {
            tracing::warn!("resampler init failed, using linear fallback: {}", e);
            resample_linear(samples, from_rate, to_rate)
        }
    }
}

fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;

    let mut resampled = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx_floor = src_idx.floor() as usize;
        let idx_ceil = (idx_floor + 1).min(samples.len().saturating_sub(1));
        let frac = (src_idx - idx_floor as f64) as f32;

        let sample = samples[idx_floor] * (1.0 - frac) + samples[idx_ceil] * frac;
        resampled.push(sample);
    }
    resampled
}

struct RingState {
    buffer: VecDeque<f32>,
    capacity: usize,
    overflow_count: u64,
    total_samples_appended: u64,
}

/// Thread-safe circular buffer of canonicalized audio samples.
///
/// Single producer (connection intake) and single consumer (the session's
/// pipeline driver) by contract. Appends beyond capacity overwrite the
/// oldest samples and bump the overflow counter; the producer never blocks.
pub struct AudioRing {
    state: Mutex<RingState>,
    sample_rate: u32,
}

impl AudioRing {
    /// Capacity is `sample_rate * max_buffer_seconds` samples.
    pub fn new(sample_rate: u32, max_buffer_seconds: f64) -> Self {
        let capacity = (sample_rate as f64 * max_buffer_seconds) as usize;
        Self {
            state: Mutex::new(RingState {
                buffer: VecDeque::with_capacity(capacity),
                capacity,
                overflow_count: 0,
                total_samples_appended: 0,
            }),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Decode `data` (any supported container or raw PCM) and append it.
    ///
    /// Returns decode warnings, if any.
    pub fn append_bytes(&self, data: &[u8], source_rate: Option<u32>) -> Result<Vec<String>> {
        let decoded = decode_audio(data, source_rate, self.sample_rate)?;
        self.append_samples(&decoded.samples);
        Ok(decoded.warnings)
    }

    /// Append already-canonical samples.
    pub fn append_samples(&self, samples: &[f32]) {
        let mut state = self.state.lock();
        let capacity = state.capacity;
        if state.buffer.len() + samples.len() > capacity {
            let excess = state.buffer.len() + samples.len() - capacity;
            for _ in 0..excess.min(state.buffer.len()) {
                state.buffer.pop_front();
            }
            state.overflow_count += 1;
            tracing::warn!(
                dropped = excess,
                overflow_count = state.overflow_count,
                "Audio ring overflow, oldest samples dropped"
            );
        }
        for &sample in samples.iter().skip(samples.len().saturating_sub(capacity)) {
            state.buffer.push_back(sample);
        }
        state.total_samples_appended += samples.len() as u64;
    }

    /// Remove and return exactly `n` samples, or `None` if fewer are
    /// available. Never returns a partial chunk.
    pub fn read_chunk(&self, n: usize) -> Option<Vec<f32>> {
        let mut state = self.state.lock();
        if state.buffer.len() < n {
            return None;
        }
        Some(state.buffer.drain(..n).collect())
    }

    /// Return `n` samples without consuming them.
    pub fn peek_chunk(&self, n: usize) -> Option<Vec<f32>> {
        let state = self.state.lock();
        if state.buffer.len() < n {
            return None;
        }
        Some(state.buffer.iter().take(n).copied().collect())
    }

    pub fn available(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub fn clear(&self) {
        self.state.lock().buffer.clear();
    }

    pub fn overflow_count(&self) -> u64 {
        self.state.lock().overflow_count
    }

    pub fn total_samples_appended(&self) -> u64 {
        self.state.lock().total_samples_appended
    }
}

/// Validation report for uploaded audio payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioValidation {
    pub valid: bool,
    pub size_bytes: usize,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Validate an uploaded payload without feeding it to a session.
pub fn validate_audio_bytes(data: &[u8], max_size: usize, target_rate: u32) -> AudioValidation {
    let mut result = AudioValidation {
        valid: false,
        size_bytes: data.len(),
        format: detect_format(data).as_str().to_string(),
        duration_seconds: None,
        samples: None,
        sample_rate: None,
        warnings: Vec::new(),
        error: None,
    };

    if data.is_empty() {
        result.error = Some("audio data is empty".to_string());
        return result;
    }
    if data.len() > max_size {
        result.error = Some(format!(
            "audio data too large: {} bytes (max: {})",
            data.len(),
            max_size
        ));
        return result;
    }

    match decode_audio(data, None, target_rate) {
        Ok(decoded) => {
            result.valid = true;
            result.duration_seconds = Some(decoded.duration_secs());
            result.samples = Some(decoded.samples.len());
            result.sample_rate = Some(decoded.sample_rate);
            result.warnings.extend(decoded.warnings);

            let peak = decoded.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            if peak < 0.001 {
                result
                    .warnings
                    .push("audio appears to be very quiet or silent".to_string());
            }
            if decoded.samples.len() < (target_rate as usize) / 10 {
                result
                    .warnings
                    .push("audio is very short (less than 100ms)".to_string());
            }
        }
        Err(e) => {
            result.error = Some(e.to_string());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_pcm16(freq: f32, secs: f32, rate: u32) -> Vec<u8> {
        let n = (secs * rate as f32) as usize;
        let samples: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect();
        f32_to_pcm16(&samples)
    }

    #[test]
    fn test_format_detection() {
        let mut wav = b"RIFF".to_vec();
        wav.extend_from_slice(&[0, 0, 0, 0]);
        wav.extend_from_slice(b"WAVE");
        assert_eq!(detect_format(&wav), AudioFormat::Wav);

        assert_eq!(detect_format(b"OggS\0\0\0\0\0\0\0\0"), AudioFormat::Ogg);
        assert_eq!(detect_format(b"fLaC\0\0\0\0\0\0\0\0"), AudioFormat::Flac);
        assert_eq!(detect_format(b"ID3\x04\0\0\0\0\0\0\0\0"), AudioFormat::Mp3);
        assert_eq!(detect_format(&[0u8; 16]), AudioFormat::RawPcm);
        assert_eq!(detect_format(&[0u8; 4]), AudioFormat::RawPcm);
    }

    #[test]
    fn test_pcm16_round_trip() {
        let samples = vec![0.0, 0.5, -0.5, 0.99];
        let bytes = f32_to_pcm16(&samples);
        let back = pcm16_to_f32(&bytes);
        assert_eq!(back.len(), samples.len());
        for (a, b) in samples.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_decode_raw_pcm_attaches_warning() {
        let data = sine_pcm16(220.0, 0.5, 16_000);
        let decoded = decode_audio(&data, Some(16_000), 16_000).unwrap();
        assert_eq!(decoded.format, AudioFormat::RawPcm);
        assert_eq!(decoded.samples.len(), 8000);
        assert_eq!(decoded.warnings.len(), 1);
    }

    #[test]
    fn test_decode_empty_fails() {
        let err = decode_audio(&[], None, 16_000).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AudioFormat);
    }

    #[test]
    fn test_resample_halves_length() {
        let samples: Vec<f32> = (0..16_000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin())
            .collect();
        let resampled = resample(&samples, 16_000, 8_000);
        let expected = samples.len() / 2;
        assert!((resampled.len() as i64 - expected as i64).abs() < 64);
    }

    #[test]
    fn test_ring_read_exact_or_none() {
        let ring = AudioRing::new(16_000, 1.0);
        ring.append_samples(&[0.1; 100]);

        assert_eq!(ring.available(), 100);
        assert!(ring.read_chunk(200).is_none());
        let chunk = ring.read_chunk(100).unwrap();
        assert_eq!(chunk.len(), 100);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn test_ring_overflow_drops_oldest() {
        let ring = AudioRing::new(100, 1.0); // capacity 100 samples
        ring.append_samples(&[1.0; 80]);
        ring.append_samples(&[2.0; 40]);

        assert_eq!(ring.available(), 100);
        assert_eq!(ring.overflow_count(), 1);

        // Oldest 20 samples were overwritten; the front is still 1.0.
        let chunk = ring.read_chunk(100).unwrap();
        assert_eq!(chunk[0], 1.0);
        assert_eq!(chunk[99], 2.0);
        assert_eq!(chunk.iter().filter(|&&s| s == 2.0).count(), 40);
    }

    #[test]
    fn test_ring_bounds_invariant() {
        let ring = AudioRing::new(100, 1.0);
        for _ in 0..50 {
            ring.append_samples(&[0.3; 7]);
            let _ = ring.read_chunk(5);
            assert!(ring.available() <= ring.capacity());
        }
    }

    #[test]
    fn test_peek_does_not_consume() {
        let ring = AudioRing::new(16_000, 1.0);
        ring.append_samples(&[0.5; 50]);
        let peeked = ring.peek_chunk(50).unwrap();
        assert_eq!(peeked.len(), 50);
        assert_eq!(ring.available(), 50);
    }

    #[test]
    fn test_validate_rejects_oversize() {
        let data = vec![0u8; 2048];
        let result = validate_audio_bytes(&data, 1024, 16_000);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("too large"));
    }

    #[test]
    fn test_validate_flags_silence() {
        let silence = f32_to_pcm16(&vec![0.0; 16_000]);
        let result = validate_audio_bytes(&silence, 10 << 20, 16_000);
        assert!(result.valid);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("quiet or silent")));
    }
}
