//! Ingress pipeline: consumed room audio toward speech recognition
//!
//! Accepts media chunks (opus or pcm), converts to 16kHz mono PCM, slices
//! into fixed-duration buckets and labels each with the energy VAD. The
//! bucket buffer holds about one second of audio; when a slow consumer lets
//! it overflow, the oldest bucket is dropped first.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chorus_core::{AudioFrame, Channels, EncodedAudio, SampleRate};

use crate::codec::Transcoder;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::vad::EnergyVad;
use crate::PipelineError;

/// Ingress pipeline knobs
#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// Bucket duration
    pub bucket_ms: u64,
    /// Voice-activity RMS threshold
    pub vad_threshold: f32,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            bucket_ms: 1_000,
            vad_threshold: 0.5,
        }
    }
}

/// One bucket of speech-ready audio with its voice label
#[derive(Debug, Clone)]
pub struct VoiceBucket {
    pub frame: AudioFrame,
    pub is_voice: bool,
    pub ts: DateTime<Utc>,
}

/// Media-to-STT pipeline
pub struct IngressPipeline {
    input: Option<mpsc::Sender<EncodedAudio>>,
    output: Option<mpsc::Receiver<VoiceBucket>>,
    stats: Arc<PipelineStats>,
    worker: JoinHandle<()>,
}

impl IngressPipeline {
    pub fn new(config: IngressConfig) -> Result<Self, PipelineError> {
        let transcoder = Transcoder::new()?;
        let vad = EnergyVad::new(config.vad_threshold);
        let stats = Arc::new(PipelineStats::new());

        let bucket_samples =
            ((SampleRate::Hz16000.as_u32() as u64 * config.bucket_ms) / 1000).max(1) as usize;
        // Buffer about one second of audio before dropping oldest
        let buffer_buckets = ((1000 / config.bucket_ms.max(1)).max(1)) as usize;

        let (in_tx, mut in_rx) = mpsc::channel::<EncodedAudio>(16);
        let (out_tx, out_rx) = mpsc::channel::<VoiceBucket>(buffer_buckets.max(4));

        let worker_stats = Arc::clone(&stats);
        let worker = tokio::spawn(async move {
            let mut accumulator: Vec<f32> = Vec::with_capacity(bucket_samples * 2);
            let mut staged: VecDeque<VoiceBucket> = VecDeque::new();
            let mut seq = 0u64;

            let emit =
                |bucket: AudioFrame, staged: &mut VecDeque<VoiceBucket>, stats: &PipelineStats| {
                    let is_voice = vad.is_voice(&bucket);
                    if is_voice {
                        stats.add_voice_segment();
                    } else {
                        stats.add_silence_segment();
                    }
                    staged.push_back(VoiceBucket {
                        frame: bucket,
                        is_voice,
                        ts: Utc::now(),
                    });
                    if staged.len() > buffer_buckets {
                        staged.pop_front();
                        stats.add_error();
                        tracing::debug!("ingress buffer overflow, dropped oldest bucket");
                    }
                };

            while let Some(chunk) = in_rx.recv().await {
                let started = Instant::now();
                worker_stats.add_bytes_in(chunk.len());

                let frame = match transcoder.decode(&chunk, seq) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "ingress decode failed, dropping chunk");
                        worker_stats.add_error();
                        continue;
                    },
                };
                let frame16 = frame.resample(SampleRate::Hz16000).to_mono();
                accumulator.extend_from_slice(&frame16.samples);

                while accumulator.len() >= bucket_samples {
                    let rest = accumulator.split_off(bucket_samples);
                    let bucket = AudioFrame::new(
                        std::mem::replace(&mut accumulator, rest),
                        SampleRate::Hz16000,
                        Channels::Mono,
                        seq,
                    );
                    seq += 1;
                    emit(bucket, &mut staged, &worker_stats);
                }

                // Drain what the consumer will take right now
                while let Some(front) = staged.front() {
                    match out_tx.try_send(front.clone()) {
                        Ok(()) => {
                            let bucket = staged.pop_front();
                            if let Some(b) = bucket {
                                worker_stats.add_bytes_out(b.frame.samples.len() * 2);
                                worker_stats.add_chunk();
                            }
                        },
                        Err(mpsc::error::TrySendError::Full(_)) => break,
                        Err(mpsc::error::TrySendError::Closed(_)) => return,
                    }
                }

                worker_stats.record_latency(started.elapsed());
            }

            // Input closed: flush the partial bucket and whatever is staged
            if !accumulator.is_empty() {
                let bucket = AudioFrame::new(
                    std::mem::take(&mut accumulator),
                    SampleRate::Hz16000,
                    Channels::Mono,
                    seq,
                );
                emit(bucket, &mut staged, &worker_stats);
            }
            for bucket in staged {
                worker_stats.add_bytes_out(bucket.frame.samples.len() * 2);
                worker_stats.add_chunk();
                if out_tx.send(bucket).await.is_err() {
                    return;
                }
            }
        });

        Ok(Self {
            input: Some(in_tx),
            output: Some(out_rx),
            stats,
            worker,
        })
    }

    /// Sink for consumed media chunks
    pub fn input(&self) -> Result<mpsc::Sender<EncodedAudio>, PipelineError> {
        self.input.clone().ok_or(PipelineError::Closed)
    }

    /// Take the bucket source; the STT wiring owns it from here
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<VoiceBucket>> {
        self.output.take()
    }

    /// Close the input; the worker flushes the partial bucket and exits
    pub fn close(&mut self) {
        self.input = None;
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for IngressPipeline {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn pcm16_chunk(level: f32, ms: u64, rate: u32) -> EncodedAudio {
        let total = (rate as u64 * ms / 1000) as usize;
        let mut data = Vec::with_capacity(total * 2);
        for _ in 0..total {
            data.extend_from_slice(&((level * 32767.0) as i16).to_le_bytes());
        }
        EncodedAudio::pcm16(rate, 1, Bytes::from(data))
    }

    #[tokio::test]
    async fn test_buckets_labeled_by_energy() {
        let mut pipeline = IngressPipeline::new(IngressConfig {
            bucket_ms: 100,
            vad_threshold: 0.5,
        })
        .unwrap();
        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();

        input.send(pcm16_chunk(0.9, 100, 16_000)).await.unwrap();
        input.send(pcm16_chunk(0.0, 100, 16_000)).await.unwrap();
        drop(input);
        pipeline.close();

        let voiced = output.recv().await.unwrap();
        assert!(voiced.is_voice);
        let silent = output.recv().await.unwrap();
        assert!(!silent.is_voice);
        assert!(output.recv().await.is_none());

        let snap = pipeline.stats();
        assert_eq!(snap.voice_segments, 1);
        assert_eq!(snap.silence_segments, 1);
    }

    #[tokio::test]
    async fn test_bucket_duration() {
        let mut pipeline = IngressPipeline::new(IngressConfig {
            bucket_ms: 250,
            vad_threshold: 0.5,
        })
        .unwrap();
        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();

        // 500ms at 48kHz resamples into two 250ms buckets at 16kHz
        input.send(pcm16_chunk(0.7, 500, 48_000)).await.unwrap();
        drop(input);
        pipeline.close();

        let first = output.recv().await.unwrap();
        assert_eq!(first.frame.samples.len(), 4000);
        let second = output.recv().await.unwrap();
        assert_eq!(second.frame.samples.len(), 4000);
    }

    #[tokio::test]
    async fn test_close_flushes_partial_bucket() {
        let mut pipeline = IngressPipeline::new(IngressConfig {
            bucket_ms: 1_000,
            vad_threshold: 0.5,
        })
        .unwrap();
        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();

        input.send(pcm16_chunk(0.9, 300, 16_000)).await.unwrap();
        drop(input);
        pipeline.close();

        let partial = output.recv().await.unwrap();
        assert_eq!(partial.frame.samples.len(), 4800);
        assert!(partial.is_voice);
    }
}
