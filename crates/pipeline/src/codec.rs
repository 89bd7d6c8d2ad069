//! Codec transcoding
//!
//! Converts between the formats crossing the pipeline boundaries: opus at
//! the media server, mp3/pcm from speech synthesis, pcm16 toward speech
//! recognition.
//!
//! Opus packets are carried inside media chunks with a u16 little-endian
//! length prefix per packet, so one chunk can hold several 20ms frames.

use parking_lot::Mutex;
use std::io::Cursor;

use chorus_core::{AudioEncoding, AudioFrame, Channels, EncodedAudio, SampleRate};

use crate::PipelineError;

/// Largest opus packet we accept or emit
const MAX_OPUS_PACKET: usize = 1275;
/// Decoder scratch: 120ms at 48kHz is the longest legal opus frame
const MAX_OPUS_FRAME_SAMPLES: usize = 5760;

/// Opus encoder at the media boundary rate (48kHz mono, ~64kbps)
pub struct OpusEncoder {
    inner: Mutex<audiopus::coder::Encoder>,
}

impl OpusEncoder {
    pub fn new() -> Result<Self, PipelineError> {
        let mut encoder = audiopus::coder::Encoder::new(
            audiopus::SampleRate::Hz48000,
            audiopus::Channels::Mono,
            audiopus::Application::Voip,
        )?;
        encoder.set_bitrate(audiopus::Bitrate::BitsPerSecond(64_000))?;
        Ok(Self {
            inner: Mutex::new(encoder),
        })
    }

    /// Encode one 20ms frame (960 samples at 48kHz)
    pub fn encode_frame(&self, pcm: &[i16]) -> Result<Vec<u8>, PipelineError> {
        let mut output = vec![0u8; MAX_OPUS_PACKET];
        let written = self.inner.lock().encode(pcm, &mut output[..])?;
        output.truncate(written);
        Ok(output)
    }
}

/// Opus decoder at the media boundary rate
pub struct OpusDecoder {
    inner: Mutex<audiopus::coder::Decoder>,
}

impl OpusDecoder {
    pub fn new() -> Result<Self, PipelineError> {
        let decoder = audiopus::coder::Decoder::new(
            audiopus::SampleRate::Hz48000,
            audiopus::Channels::Mono,
        )?;
        Ok(Self {
            inner: Mutex::new(decoder),
        })
    }

    /// Decode one opus packet to 48kHz mono PCM
    pub fn decode_packet(&self, packet: &[u8]) -> Result<Vec<i16>, PipelineError> {
        let mut output = vec![0i16; MAX_OPUS_FRAME_SAMPLES];
        let input = audiopus::packet::Packet::try_from(packet)?;
        let output_signals = audiopus::MutSignals::try_from(&mut output[..])?;
        let decoded = self.inner.lock().decode(Some(input), output_signals, false)?;
        output.truncate(decoded);
        Ok(output)
    }
}

/// Prefix-frame a sequence of opus packets into one chunk payload
pub fn frame_opus_packets(packets: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = packets.iter().map(|p| p.len() + 2).sum();
    let mut out = Vec::with_capacity(total);
    for packet in packets {
        out.extend_from_slice(&(packet.len() as u16).to_le_bytes());
        out.extend_from_slice(packet);
    }
    out
}

/// Split a chunk payload back into opus packets
pub fn unframe_opus_packets(chunk: &[u8]) -> Result<Vec<&[u8]>, PipelineError> {
    let mut packets = Vec::new();
    let mut offset = 0usize;
    while offset < chunk.len() {
        if offset + 2 > chunk.len() {
            return Err(PipelineError::Codec("truncated opus frame header".into()));
        }
        let len = u16::from_le_bytes([chunk[offset], chunk[offset + 1]]) as usize;
        offset += 2;
        if offset + len > chunk.len() {
            return Err(PipelineError::Codec("truncated opus frame body".into()));
        }
        packets.push(&chunk[offset..offset + len]);
        offset += len;
    }
    Ok(packets)
}

/// Format converter owned by one pipeline
///
/// Codec state lives here so frames within a stream decode continuously;
/// transcoders are never shared across bindings.
pub struct Transcoder {
    opus_encoder: OpusEncoder,
    opus_decoder: OpusDecoder,
}

impl Transcoder {
    pub fn new() -> Result<Self, PipelineError> {
        Ok(Self {
            opus_encoder: OpusEncoder::new()?,
            opus_decoder: OpusDecoder::new()?,
        })
    }

    /// Decode any supported input into a mono [`AudioFrame`] at its native
    /// rate (nearest supported)
    pub fn decode(&self, audio: &EncodedAudio, sequence: u64) -> Result<AudioFrame, PipelineError> {
        match audio.encoding {
            AudioEncoding::Pcm16 => {
                let rate = SampleRate::from_u32(audio.sample_rate).ok_or_else(|| {
                    PipelineError::UnsupportedFormat(format!(
                        "pcm sample rate {}",
                        audio.sample_rate
                    ))
                })?;
                let channels = if audio.channels >= 2 {
                    Channels::Stereo
                } else {
                    Channels::Mono
                };
                Ok(AudioFrame::from_pcm16(&audio.data, rate, channels, sequence).to_mono())
            },
            AudioEncoding::Opus => {
                let mut samples: Vec<i16> = Vec::new();
                for packet in unframe_opus_packets(&audio.data)? {
                    samples.extend(self.opus_decoder.decode_packet(packet)?);
                }
                let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                Ok(AudioFrame::from_pcm16(
                    &bytes,
                    SampleRate::Hz48000,
                    Channels::Mono,
                    sequence,
                ))
            },
            AudioEncoding::Mp3 => decode_mp3(&audio.data, sequence),
        }
    }

    /// Encode a 48kHz mono frame into length-prefixed opus packets
    ///
    /// Trailing samples shorter than one 20ms frame are returned as the
    /// residual for the caller to carry into the next call.
    pub fn encode_opus(
        &self,
        frame: &AudioFrame,
    ) -> Result<(Vec<Vec<u8>>, Vec<f32>), PipelineError> {
        let frame = if frame.sample_rate != SampleRate::Hz48000 {
            frame.resample(SampleRate::Hz48000)
        } else {
            frame.clone()
        };
        let frame = frame.to_mono();

        let frame_samples = SampleRate::Hz48000.frame_size_20ms();
        let pcm = frame.to_i16();

        let mut packets = Vec::new();
        let mut offset = 0usize;
        while offset + frame_samples <= pcm.len() {
            packets.push(
                self.opus_encoder
                    .encode_frame(&pcm[offset..offset + frame_samples])?,
            );
            offset += frame_samples;
        }

        let residual = frame.samples[offset..].to_vec();
        Ok((packets, residual))
    }

    /// Encode a final partial frame, padding with silence up to 20ms
    pub fn encode_opus_padded(&self, residual: &[f32]) -> Result<Option<Vec<u8>>, PipelineError> {
        if residual.is_empty() {
            return Ok(None);
        }
        let frame_samples = SampleRate::Hz48000.frame_size_20ms();
        let mut pcm: Vec<i16> = residual
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();
        pcm.resize(frame_samples, 0);
        Ok(Some(self.opus_encoder.encode_frame(&pcm)?))
    }
}

/// Decode an mp3 elementary stream into a mono frame
fn decode_mp3(data: &[u8], sequence: u64) -> Result<AudioFrame, PipelineError> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let cursor = Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| PipelineError::Codec(e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| PipelineError::Codec("no audio track".into()))?;

    let src_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| PipelineError::Codec("unknown sample rate".into()))?;
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| PipelineError::Codec(e.to_string()))?;

    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(PipelineError::Codec(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let sb = sample_buf.get_or_insert_with(|| {
                    SampleBuffer::new(decoded.capacity() as u64, *decoded.spec())
                });
                sb.copy_interleaved_ref(decoded);
                samples.extend_from_slice(sb.samples());
            },
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(PipelineError::Codec(e.to_string())),
        }
    }

    // Interleaved to mono
    let mono: Vec<f32> = if channels >= 2 {
        samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        samples
    };

    // Snap to a supported rate for downstream processing
    let (rate, mono) = match SampleRate::from_u32(src_rate) {
        Some(rate) => (rate, mono),
        None => {
            let target = SampleRate::Hz48000;
            let resampled = linear_resample(&mono, src_rate, target.as_u32());
            (target, resampled)
        },
    };

    Ok(AudioFrame::new(mono, rate, Channels::Mono, sequence))
}

fn linear_resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    let mut out = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx_floor = src_idx.floor() as usize;
        let idx_ceil = (idx_floor + 1).min(samples.len().saturating_sub(1));
        let frac = (src_idx - idx_floor as f64) as f32;
        out.push(samples[idx_floor] * (1.0 - frac) + samples[idx_ceil] * frac);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_opus_packet_framing_roundtrip() {
        let packets = vec![vec![1u8, 2, 3], vec![4u8, 5], vec![6u8]];
        let chunk = frame_opus_packets(&packets);
        let back = unframe_opus_packets(&chunk).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back[0], &[1, 2, 3]);
        assert_eq!(back[2], &[6]);
    }

    #[test]
    fn test_unframe_rejects_truncation() {
        let packets = vec![vec![1u8, 2, 3]];
        let mut chunk = frame_opus_packets(&packets);
        chunk.truncate(chunk.len() - 1);
        assert!(unframe_opus_packets(&chunk).is_err());
    }

    #[test]
    fn test_opus_encode_decode_roundtrip() {
        let transcoder = Transcoder::new().unwrap();
        // 40ms of a loud tone at 48kHz
        let samples: Vec<f32> = (0..1920)
            .map(|i| (std::f32::consts::TAU * 440.0 * i as f32 / 48000.0).sin() * 0.6)
            .collect();
        let frame = AudioFrame::new(samples, SampleRate::Hz48000, Channels::Mono, 0);

        let (packets, residual) = transcoder.encode_opus(&frame).unwrap();
        assert_eq!(packets.len(), 2);
        assert!(residual.is_empty());

        let chunk = frame_opus_packets(&packets);
        let encoded = EncodedAudio::new(AudioEncoding::Opus, 48000, 1, Bytes::from(chunk));
        let decoded = transcoder.decode(&encoded, 0).unwrap();
        assert_eq!(decoded.samples.len(), 1920);
        assert!(decoded.rms() > 0.2);
    }

    #[test]
    fn test_encode_leaves_residual() {
        let transcoder = Transcoder::new().unwrap();
        // 25ms: one full frame plus 5ms residual
        let frame = AudioFrame::new(vec![0.3; 1200], SampleRate::Hz48000, Channels::Mono, 0);
        let (packets, residual) = transcoder.encode_opus(&frame).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(residual.len(), 240);

        let padded = transcoder.encode_opus_padded(&residual).unwrap();
        assert!(padded.is_some());
    }

    #[test]
    fn test_pcm_decode_downmixes() {
        let transcoder = Transcoder::new().unwrap();
        let frame = AudioFrame::new(
            vec![0.5, -0.5, 0.5, -0.5],
            SampleRate::Hz16000,
            Channels::Stereo,
            0,
        );
        let bytes = frame.to_pcm16();
        let encoded = EncodedAudio::pcm16(16000, 2, Bytes::from(bytes));
        let decoded = transcoder.decode(&encoded, 0).unwrap();
        assert_eq!(decoded.channels, Channels::Mono);
        assert_eq!(decoded.samples.len(), 2);
    }
}
