//! Audio frame types and conversions
//!
//! Decoded audio moves through the pipelines as [`AudioFrame`]s (normalized
//! f32 samples); encoded audio crosses provider and media boundaries as
//! [`EncodedAudio`] byte buffers tagged with their format.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Supported sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 16kHz - speech recognition input
    #[default]
    Hz16000,
    /// 24kHz - typical TTS output
    Hz24000,
    /// 48kHz - media-server opus
    Hz48000,
}

impl SampleRate {
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz24000 => 24000,
            SampleRate::Hz48000 => 48000,
        }
    }

    /// Samples in a 20ms frame (one opus frame)
    pub fn frame_size_20ms(&self) -> usize {
        (self.as_u32() as usize * 20) / 1000
    }

    pub fn from_u32(rate: u32) -> Option<Self> {
        match rate {
            16000 => Some(SampleRate::Hz16000),
            24000 => Some(SampleRate::Hz24000),
            48000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }
}

/// Channel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Channels {
    #[default]
    Mono,
    Stereo,
}

impl Channels {
    pub fn count(&self) -> usize {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

/// Encoded-audio formats crossing the provider/media boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// 16-bit signed little-endian PCM
    Pcm16,
    /// Opus packets, length-prefixed framing
    Opus,
    /// MP3 elementary stream
    Mp3,
}

/// Encoded audio with its format tag
#[derive(Debug, Clone)]
pub struct EncodedAudio {
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    pub channels: u16,
    pub data: Bytes,
}

impl EncodedAudio {
    pub fn new(encoding: AudioEncoding, sample_rate: u32, channels: u16, data: Bytes) -> Self {
        Self {
            encoding,
            sample_rate,
            channels,
            data,
        }
    }

    pub fn pcm16(sample_rate: u32, channels: u16, data: Bytes) -> Self {
        Self::new(AudioEncoding::Pcm16, sample_rate, channels, data)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

/// Decoded audio frame
///
/// Samples are f32 normalized to [-1.0, 1.0]; full scale is 1.0.
#[derive(Clone)]
pub struct AudioFrame {
    pub samples: Arc<[f32]>,
    pub sample_rate: SampleRate,
    pub channels: Channels,
    /// Sequence number for ordering within a stream
    pub sequence: u64,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("sequence", &self.sequence)
            .finish()
    }
}

const PCM16_NORMALIZE: f32 = 32768.0;
const PCM16_SCALE: f32 = 32767.0;

impl AudioFrame {
    pub fn new(
        samples: Vec<f32>,
        sample_rate: SampleRate,
        channels: Channels,
        sequence: u64,
    ) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
            sequence,
        }
    }

    /// Decode PCM16 little-endian bytes
    pub fn from_pcm16(
        bytes: &[u8],
        sample_rate: SampleRate,
        channels: Channels,
        sequence: u64,
    ) -> Self {
        let samples: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|chunk| {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                sample as f32 / PCM16_NORMALIZE
            })
            .collect();

        Self::new(samples, sample_rate, channels, sequence)
    }

    /// Encode to PCM16 little-endian bytes
    pub fn to_pcm16(&self) -> Vec<u8> {
        self.samples
            .iter()
            .flat_map(|&sample| {
                let clamped = sample.clamp(-1.0, 1.0);
                let pcm16 = (clamped * PCM16_SCALE) as i16;
                pcm16.to_le_bytes()
            })
            .collect()
    }

    /// Samples as i16, for codecs that take integer PCM
    pub fn to_i16(&self) -> Vec<i16> {
        self.samples
            .iter()
            .map(|&sample| (sample.clamp(-1.0, 1.0) * PCM16_SCALE) as i16)
            .collect()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(
            self.samples.len() as f64
                / (self.sample_rate.as_u32() as f64 * self.channels.count() as f64),
        )
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration().as_millis() as u64
    }

    /// RMS amplitude as a fraction of full scale
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_squares / self.samples.len() as f32).sqrt()
    }

    /// High-quality resampling via rubato, linear interpolation for frames
    /// too short for the FFT resampler
    pub fn resample(&self, target_rate: SampleRate) -> Self {
        use rubato::{FftFixedIn, Resampler};

        if self.sample_rate == target_rate {
            return self.clone();
        }

        if self.samples.len() < 64 {
            return self.resample_linear(target_rate);
        }

        let from_rate = self.sample_rate.as_u32() as usize;
        let to_rate = target_rate.as_u32() as usize;
        let samples_f64: Vec<f64> = self.samples.iter().map(|&s| s as f64).collect();
        let chunk_size = self.samples.len().min(1024);

        match FftFixedIn::<f64>::new(from_rate, to_rate, chunk_size, 2, 1) {
            Ok(mut resampler) => {
                let input_frames = vec![samples_f64];
                match resampler.process(&input_frames, None) {
                    Ok(output_frames) => {
                        let resampled: Vec<f32> =
                            output_frames[0].iter().map(|&s| s as f32).collect();
                        Self::new(resampled, target_rate, self.channels, self.sequence)
                    },
                    Err(e) => {
                        tracing::warn!("resampler failed, using linear fallback: {}", e);
                        self.resample_linear(target_rate)
                    },
                }
            },
            Err(e) => {
                tracing::warn!("resampler init failed, using linear fallback: {}", e);
                self.resample_linear(target_rate)
            },
        }
    }

    fn resample_linear(&self, target_rate: SampleRate) -> Self {
        let ratio = target_rate.as_u32() as f64 / self.sample_rate.as_u32() as f64;
        let new_len = (self.samples.len() as f64 * ratio) as usize;

        let mut resampled = Vec::with_capacity(new_len);
        for i in 0..new_len {
            let src_idx = i as f64 / ratio;
            let idx_floor = src_idx.floor() as usize;
            let idx_ceil = (idx_floor + 1).min(self.samples.len().saturating_sub(1));
            let frac = (src_idx - idx_floor as f64) as f32;

            let sample = self.samples[idx_floor] * (1.0 - frac) + self.samples[idx_ceil] * frac;
            resampled.push(sample);
        }

        Self::new(resampled, target_rate, self.channels, self.sequence)
    }

    /// Average stereo down to mono
    pub fn to_mono(&self) -> Self {
        if self.channels == Channels::Mono {
            return self.clone();
        }

        let mono: Vec<f32> = self
            .samples
            .chunks_exact(2)
            .map(|chunk| (chunk[0] + chunk[1]) / 2.0)
            .collect();

        Self::new(mono, self.sample_rate, Channels::Mono, self.sequence)
    }

    /// Split into fixed-size chunks, renumbering sequences
    pub fn split(&self, chunk_samples: usize) -> Vec<AudioFrame> {
        let mut chunks = Vec::new();
        let mut seq = self.sequence;
        for chunk in self.samples.chunks(chunk_samples) {
            chunks.push(AudioFrame::new(
                chunk.to_vec(),
                self.sample_rate,
                self.channels,
                seq,
            ));
            seq += 1;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_roundtrip() {
        let pcm: Vec<u8> = vec![0x00, 0x40, 0x00, 0xC0];
        let frame = AudioFrame::from_pcm16(&pcm, SampleRate::Hz16000, Channels::Mono, 0);
        assert_eq!(frame.samples.len(), 2);
        assert!(frame.samples[0] > 0.0);
        assert!(frame.samples[1] < 0.0);

        let back = frame.to_pcm16();
        assert_eq!(back.len(), 4);
    }

    #[test]
    fn test_rms_silence_and_tone() {
        let silent = AudioFrame::new(vec![0.0; 160], SampleRate::Hz16000, Channels::Mono, 0);
        assert_eq!(silent.rms(), 0.0);

        let loud = AudioFrame::new(vec![0.8; 160], SampleRate::Hz16000, Channels::Mono, 0);
        assert!(loud.rms() > 0.5);
    }

    #[test]
    fn test_resample_lengths() {
        let frame = AudioFrame::new(vec![0.1; 480], SampleRate::Hz48000, Channels::Mono, 0);
        let down = frame.resample(SampleRate::Hz16000);
        assert_eq!(down.samples.len(), 160);
    }

    #[test]
    fn test_split_renumbers() {
        let frame = AudioFrame::new(vec![0.0; 400], SampleRate::Hz16000, Channels::Mono, 7);
        let parts = frame.split(160);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].sequence, 7);
        assert_eq!(parts[2].sequence, 9);
        assert_eq!(parts[2].samples.len(), 80);
    }

    #[test]
    fn test_mono_downmix() {
        let stereo = AudioFrame::new(
            vec![0.5, -0.5, 1.0, 0.0],
            SampleRate::Hz48000,
            Channels::Stereo,
            0,
        );
        let mono = stereo.to_mono();
        assert_eq!(mono.samples.len(), 2);
        assert!((mono.samples[0] - 0.0).abs() < f32::EPSILON);
        assert!((mono.samples[1] - 0.5).abs() < f32::EPSILON);
    }
}
