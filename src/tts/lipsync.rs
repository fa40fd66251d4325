//! Amplitude envelope extraction: turns a speech waveform into mouth openness.

use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LipSyncConfig {
    /// Analysis frames per second.
    pub analysis_rate: u32,
    pub gain: f32,
    pub silence_threshold: f32,
    pub curve_exponent: f32,
    pub headroom: f32,
    pub param_id: String,
    /// Smoothing applied to the broadcast `lip_sync` value.
    pub broadcast_smoothing: f32,
    pub min_broadcast_interval_ms: u64,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        Self {
            analysis_rate: 30,
            gain: 8.0,
            silence_threshold: 0.15,
            curve_exponent: 1.8,
            headroom: 1.2,
            param_id: crate::animation::PARAM_MOUTH_OPEN_Y.to_string(),
            broadcast_smoothing: 0.3,
            min_broadcast_interval_ms: 16,
        }
    }
}

/// Per-frame loudness of one utterance. Cheap to clone and replay.
#[derive(Debug, Clone, PartialEq)]
pub struct AmplitudeFrames {
    values: Arc<[f32]>,
    frame_duration: Duration,
}

impl AmplitudeFrames {
    pub fn new(values: Vec<f32>, analysis_rate: u32) -> Self {
        Self {
            values: values.into(),
            frame_duration: Duration::from_secs_f64(1.0 / analysis_rate.max(1) as f64),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 30)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    pub fn duration(&self) -> Duration {
        self.frame_duration * self.values.len() as u32
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.values.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.values.iter().copied()
    }
}

#[derive(Debug, Clone)]
pub struct AmplitudeEnvelopeExtractor {
    config: LipSyncConfig,
}

impl AmplitudeEnvelopeExtractor {
    pub fn new(config: LipSyncConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LipSyncConfig {
        &self.config
    }

    /// Loudness envelope of mono samples already scaled to [-1, 1].
    pub fn envelope(&self, samples: &[f32], sample_rate: u32) -> AmplitudeFrames {
        let rate = self.config.analysis_rate.max(1);
        let window = (sample_rate / rate) as usize;
        if window == 0 {
            return AmplitudeFrames::new(Vec::new(), rate);
        }
        let values = samples
            .chunks_exact(window)
            .map(|chunk| {
                let mean_sq =
                    chunk.iter().map(|s| (*s as f64) * (*s as f64)).sum::<f64>() / window as f64;
                ((mean_sq.sqrt() as f32) * self.config.gain).clamp(0.0, 1.0)
            })
            .collect();
        AmplitudeFrames::new(values, rate)
    }

    /// Decode a WAV clip and measure it. Anything other than 8- or 16-bit
    /// integer PCM, or a clip that fails to decode, yields an empty envelope.
    pub fn extract_wav(&self, bytes: &[u8]) -> AmplitudeFrames {
        let empty = || AmplitudeFrames::new(Vec::new(), self.config.analysis_rate);
        let reader = match hound::WavReader::new(Cursor::new(bytes)) {
            Ok(reader) => reader,
            Err(e) => {
                tracing::warn!(error = %e, "speech audio is not decodable WAV, skipping lip sync");
                return empty();
            }
        };
        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int
            || !matches!(spec.bits_per_sample, 8 | 16)
        {
            tracing::warn!(
                bits = spec.bits_per_sample,
                format = ?spec.sample_format,
                "unsupported sample width, skipping lip sync"
            );
            return empty();
        }

        let peak = (1i32 << (spec.bits_per_sample - 1)) as f32;
        let channels = spec.channels.max(1) as usize;
        let mut mono = Vec::with_capacity(reader.len() as usize / channels);
        // First channel only.
        for (i, sample) in reader.into_samples::<i32>().enumerate() {
            match sample {
                Ok(s) if i % channels == 0 => mono.push(s as f32 / peak),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "corrupt speech audio, skipping lip sync");
                    return empty();
                }
            }
        }
        self.envelope(&mono, spec.sample_rate)
    }

    /// Map loudness to mouth openness: silence gate, rescale, power curve, headroom.
    pub fn mouth_openness(&self, amplitude: f32) -> f32 {
        let threshold = self.config.silence_threshold.clamp(0.0, 0.99);
        if !(amplitude >= threshold) {
            return 0.0;
        }
        let scaled = ((amplitude - threshold) / (1.0 - threshold)).clamp(0.0, 1.0);
        (scaled.powf(self.config.curve_exponent) * self.config.headroom).min(1.0)
    }

    /// Mouth openness for every frame of a WAV clip.
    pub fn openness_frames(&self, bytes: &[u8]) -> AmplitudeFrames {
        let envelope = self.extract_wav(bytes);
        let values = envelope.iter().map(|a| self.mouth_openness(a)).collect();
        AmplitudeFrames::new(values, self.config.analysis_rate)
    }
}

/// Smoothed, rate-limited value for `lip_sync` broadcasts.
#[derive(Debug, Clone)]
pub struct LipSyncSmoother {
    value: f32,
    smoothing: f32,
    min_interval: Duration,
    last_sent: Option<tokio::time::Instant>,
}

impl LipSyncSmoother {
    pub fn new(smoothing: f32, min_interval: Duration) -> Self {
        Self {
            value: 0.0,
            smoothing: smoothing.clamp(0.0, 1.0),
            min_interval,
            last_sent: None,
        }
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    /// Feed a raw value. Returns the smoothed value when a broadcast is due.
    /// `force` bypasses the rate limit (used for the final close-mouth frame).
    pub fn push(&mut self, raw: f32, now: tokio::time::Instant, force: bool) -> Option<f32> {
        self.value += (raw - self.value) * self.smoothing;
        if force {
            self.value = raw;
        }
        let due = force
            || self
                .last_sent
                .map_or(true, |t| now.saturating_duration_since(t) >= self.min_interval);
        if !due {
            return None;
        }
        self.last_sent = Some(now);
        Some(self.value)
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
        self.last_sent = None;
    }
}
