//! Pipeline observability counters
//!
//! Every pipeline keeps byte/chunk/segment counters plus a rolling window of
//! per-stage conversion latencies (last 100 samples).

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Rolling window size for latency samples
const LATENCY_WINDOW: usize = 100;

#[derive(Debug, Default)]
struct LatencyWindowInner {
    samples_us: VecDeque<u64>,
}

impl LatencyWindowInner {
    fn record(&mut self, latency: Duration) {
        if self.samples_us.len() == LATENCY_WINDOW {
            self.samples_us.pop_front();
        }
        self.samples_us.push_back(latency.as_micros() as u64);
    }

    fn snapshot(&self) -> LatencySnapshot {
        if self.samples_us.is_empty() {
            return LatencySnapshot::default();
        }
        let mut sorted: Vec<u64> = self.samples_us.iter().copied().collect();
        sorted.sort_unstable();
        let sum: u64 = sorted.iter().sum();
        let p95_idx = (sorted.len() as f64 * 0.95).ceil() as usize - 1;
        LatencySnapshot {
            samples: sorted.len(),
            min_us: sorted[0],
            mean_us: sum / sorted.len() as u64,
            p95_us: sorted[p95_idx.min(sorted.len() - 1)],
            max_us: sorted[sorted.len() - 1],
        }
    }
}

/// Summary of the rolling latency window
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LatencySnapshot {
    pub samples: usize,
    pub min_us: u64,
    pub mean_us: u64,
    pub p95_us: u64,
    pub max_us: u64,
}

/// Counters for one pipeline
#[derive(Debug, Default)]
pub struct PipelineStats {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    chunks_emitted: AtomicU64,
    voice_segments: AtomicU64,
    silence_segments: AtomicU64,
    errors: AtomicU64,
    latency: Mutex<LatencyWindowInner>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes_in(&self, n: usize) {
        self.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_bytes_out(&self, n: usize) {
        self.bytes_out.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_chunk(&self) {
        self.chunks_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_voice_segment(&self) {
        self.voice_segments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_silence_segment(&self) {
        self.silence_segments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency: Duration) {
        self.latency.lock().record(latency);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
            voice_segments: self.voice_segments.load(Ordering::Relaxed),
            silence_segments: self.silence_segments.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            latency: self.latency.lock().snapshot(),
        }
    }
}

/// Point-in-time view of a pipeline's counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub chunks_emitted: u64,
    pub voice_segments: u64,
    pub silence_segments: u64,
    pub errors: u64,
    pub latency: LatencySnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = PipelineStats::new();
        stats.add_bytes_in(100);
        stats.add_bytes_in(50);
        stats.add_chunk();
        stats.add_voice_segment();

        let snap = stats.snapshot();
        assert_eq!(snap.bytes_in, 150);
        assert_eq!(snap.chunks_emitted, 1);
        assert_eq!(snap.voice_segments, 1);
        assert_eq!(snap.silence_segments, 0);
    }

    #[test]
    fn test_latency_window_bounded() {
        let stats = PipelineStats::new();
        for i in 0..250 {
            stats.record_latency(Duration::from_micros(i));
        }
        let snap = stats.snapshot();
        assert_eq!(snap.latency.samples, 100);
        // Only the last 100 samples (150..250) remain
        assert_eq!(snap.latency.min_us, 150);
        assert_eq!(snap.latency.max_us, 249);
    }

    #[test]
    fn test_latency_percentiles_ordered() {
        let stats = PipelineStats::new();
        for i in 1..=100 {
            stats.record_latency(Duration::from_micros(i));
        }
        let snap = stats.snapshot().latency;
        assert!(snap.min_us <= snap.mean_us);
        assert!(snap.mean_us <= snap.p95_us);
        assert!(snap.p95_us <= snap.max_us);
        assert_eq!(snap.p95_us, 95);
    }
}
