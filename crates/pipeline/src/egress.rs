//! Egress pipeline: synthesized audio toward the media producer
//!
//! Accepts synthesized audio (mp3 or pcm), converts to the media codec
//! (opus, 48kHz mono) and emits length-prefixed packet chunks sized by the
//! egress buffer threshold. One input sink, one output source.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chorus_core::{AudioFrame, Channels, EncodedAudio, SampleRate};

use crate::codec::{frame_opus_packets, Transcoder};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::PipelineError;

/// Egress pipeline knobs
#[derive(Debug, Clone)]
pub struct EgressConfig {
    /// Emit a chunk once its framed size reaches this threshold
    pub buffer_bytes: usize,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { buffer_bytes: 4096 }
    }
}

/// TTS-to-media pipeline
pub struct EgressPipeline {
    input: Option<mpsc::Sender<EncodedAudio>>,
    output: Option<mpsc::Receiver<Bytes>>,
    stats: Arc<PipelineStats>,
    worker: JoinHandle<()>,
}

impl EgressPipeline {
    pub fn new(config: EgressConfig) -> Result<Self, PipelineError> {
        let transcoder = Transcoder::new()?;
        let stats = Arc::new(PipelineStats::new());
        let (in_tx, mut in_rx) = mpsc::channel::<EncodedAudio>(16);
        let (out_tx, out_rx) = mpsc::channel::<Bytes>(32);

        let worker_stats = Arc::clone(&stats);
        let worker = tokio::spawn(async move {
            // Residual 48kHz samples shorter than one opus frame, carried
            // between pushes; reused staging avoids per-push allocation.
            let mut residual: Vec<f32> = Vec::new();
            let mut pending: Vec<Vec<u8>> = Vec::new();
            let mut pending_len = 0usize;
            let mut seq = 0u64;

            while let Some(audio) = in_rx.recv().await {
                let started = Instant::now();
                worker_stats.add_bytes_in(audio.len());

                let frame = match transcoder.decode(&audio, seq) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "egress decode failed, dropping input");
                        worker_stats.add_error();
                        continue;
                    },
                };
                seq += 1;

                let frame48 = frame.resample(SampleRate::Hz48000).to_mono();
                let mut combined = std::mem::take(&mut residual);
                combined.extend_from_slice(&frame48.samples);
                let combined =
                    AudioFrame::new(combined, SampleRate::Hz48000, Channels::Mono, frame48.sequence);

                match transcoder.encode_opus(&combined) {
                    Ok((packets, rem)) => {
                        residual = rem;
                        for packet in packets {
                            pending_len += packet.len() + 2;
                            pending.push(packet);
                            if pending_len >= config.buffer_bytes {
                                let chunk = frame_opus_packets(&pending);
                                pending.clear();
                                pending_len = 0;
                                worker_stats.add_bytes_out(chunk.len());
                                worker_stats.add_chunk();
                                if out_tx.send(Bytes::from(chunk)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "egress encode failed");
                        worker_stats.add_error();
                    },
                }

                worker_stats.record_latency(started.elapsed());
            }

            // Input closed: flush the padded residual and any pending packets
            match transcoder.encode_opus_padded(&residual) {
                Ok(Some(packet)) => pending.push(packet),
                Ok(None) => {},
                Err(e) => {
                    tracing::warn!(error = %e, "egress flush encode failed");
                    worker_stats.add_error();
                },
            }
            if !pending.is_empty() {
                let chunk = frame_opus_packets(&pending);
                worker_stats.add_bytes_out(chunk.len());
                worker_stats.add_chunk();
                let _ = out_tx.send(Bytes::from(chunk)).await;
            }
        });

        Ok(Self {
            input: Some(in_tx),
            output: Some(out_rx),
            stats,
            worker,
        })
    }

    /// Sink for synthesized audio
    pub fn input(&self) -> Result<mpsc::Sender<EncodedAudio>, PipelineError> {
        self.input.clone().ok_or(PipelineError::Closed)
    }

    /// Take the chunk source; the media wiring owns it from here
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.output.take()
    }

    /// Close the input; the worker flushes a final partial chunk and exits
    pub fn close(&mut self) {
        self.input = None;
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for EgressPipeline {
    fn drop(&mut self) {
        // Destruction cancels in-flight conversion
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::unframe_opus_packets;

    fn tone_pcm(ms: u64) -> EncodedAudio {
        let total = (24_000 * ms / 1000) as usize;
        let mut data = Vec::with_capacity(total * 2);
        for i in 0..total {
            let sample = (std::f32::consts::TAU * 440.0 * i as f32 / 24_000.0).sin() * 0.6;
            data.extend_from_slice(&((sample * 32767.0) as i16).to_le_bytes());
        }
        EncodedAudio::pcm16(24_000, 1, Bytes::from(data))
    }

    #[tokio::test]
    async fn test_egress_emits_opus_chunks() {
        let mut pipeline = EgressPipeline::new(EgressConfig { buffer_bytes: 256 }).unwrap();
        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();

        input.send(tone_pcm(200)).await.unwrap();
        drop(input);
        pipeline.close();

        let mut chunks = Vec::new();
        while let Some(chunk) = output.recv().await {
            chunks.push(chunk);
        }
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(unframe_opus_packets(chunk).is_ok());
        }

        let snap = pipeline.stats();
        assert!(snap.bytes_in > 0);
        assert!(snap.chunks_emitted as usize >= chunks.len());
    }

    #[tokio::test]
    async fn test_close_flushes_partial() {
        // 30ms: one full opus frame plus a 10ms residual that only the
        // close-flush can emit
        let mut pipeline = EgressPipeline::new(EgressConfig::default()).unwrap();
        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();

        input.send(tone_pcm(30)).await.unwrap();
        drop(input);
        pipeline.close();

        let chunk = output.recv().await.expect("flush chunk");
        let packets = unframe_opus_packets(&chunk).unwrap();
        assert_eq!(packets.len(), 2);
        assert!(output.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_bytes_out_matches_chunks() {
        let mut pipeline = EgressPipeline::new(EgressConfig { buffer_bytes: 128 }).unwrap();
        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();

        input.send(tone_pcm(500)).await.unwrap();
        drop(input);
        pipeline.close();

        let mut total = 0usize;
        while let Some(chunk) = output.recv().await {
            total += chunk.len();
        }
        assert_eq!(pipeline.stats().bytes_out as usize, total);
    }
}
