//! Audio pipelines
//!
//! Two unidirectional pipelines per agent-room binding:
//!
//! - [`EgressPipeline`]: synthesized audio (mp3/pcm) in, media-codec opus
//!   chunks out, sized for the media client
//! - [`IngressPipeline`]: consumed room audio (opus/pcm) in, 16kHz mono
//!   buckets with a voice-activity label out, sized for the STT stream
//!
//! Each pipeline is one input sink and one output source. Closing the input
//! flushes a final partial chunk; dropping the pipeline cancels any in-flight
//! conversion. Counters and a rolling latency window are kept per pipeline.

pub mod codec;
pub mod egress;
pub mod ingress;
pub mod stats;
pub mod vad;

pub use codec::Transcoder;
pub use egress::{EgressConfig, EgressPipeline};
pub use ingress::{IngressConfig, IngressPipeline, VoiceBucket};
pub use stats::{LatencySnapshot, PipelineStats, StatsSnapshot};
pub use vad::EnergyVad;

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("pipeline closed")]
    Closed,
}

impl From<audiopus::Error> for PipelineError {
    fn from(err: audiopus::Error) -> Self {
        PipelineError::Codec(err.to_string())
    }
}

impl From<PipelineError> for chorus_core::Error {
    fn from(err: PipelineError) -> Self {
        chorus_core::Error::provider(err.to_string())
    }
}
