//! Provider adapters
//!
//! Thin façades over external language-model, text-to-speech, and
//! speech-to-text vendors. Each adapter is a process-wide service handle
//! created at startup: adapters missing credentials come up `unavailable`
//! and report it through `available()` instead of blocking the rest of the
//! core.
//!
//! - [`llm::LlmService`] - reply generation with a per-agent rate gate and
//!   per-model token accounting
//! - [`tts::TtsService`] - synthesis with an LRU reuse cache
//! - [`stt::SttService`] - batch and streaming transcription with a
//!   confidence floor
//! - [`local`] - deterministic built-in backends for development and tests

pub mod http;
pub mod llm;
pub mod local;
pub mod stt;
pub mod tts;

pub use http::{HttpStt, HttpSttConfig, HttpTts, HttpTtsConfig};
pub use llm::{ChatCompletion, ChatRequest, ChatTurn, HttpLlm, HttpLlmConfig, LanguageModel, LlmService};
pub use local::{EchoLlm, ScriptedStt, ToneTts};
pub use stt::{SpeechToText, SttService, SttStream, Transcript};
pub use tts::{TextToSpeech, TtsService};

use thiserror::Error;

/// Provider adapter errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("credentials missing: {0}")]
    AuthMissing(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("unsupported voice: {0}")]
    UnsupportedVoice(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<ProviderError> for chorus_core::Error {
    fn from(err: ProviderError) -> Self {
        match &err {
            ProviderError::AuthMissing(_) | ProviderError::Unavailable(_) => {
                chorus_core::Error::provider_unavailable(err.to_string())
            },
            ProviderError::RateLimited(_) => chorus_core::Error::rate_limited(err.to_string()),
            ProviderError::UnsupportedVoice(_) => {
                chorus_core::Error::invalid_argument(err.to_string())
            },
            ProviderError::Upstream(_)
            | ProviderError::Timeout(_)
            | ProviderError::InvalidResponse(_) => chorus_core::Error::provider(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(std::time::Duration::from_secs(0))
        } else {
            ProviderError::Upstream(err.to_string())
        }
    }
}
