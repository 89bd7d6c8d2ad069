//! Speech-to-text adapter
//!
//! Two modes: batch transcription of a captured buffer, and a streaming
//! session fed audio frames that emits partial and final transcripts.
//! [`SttService`] applies the STT timeout and drops results below the
//! confidence floor - they are never surfaced to callers.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use chorus_core::{AudioFrame, EncodedAudio};

use crate::ProviderError;

/// Transcription result
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    /// 0.0 - 1.0
    pub confidence: f32,
    pub is_final: bool,
}

impl Transcript {
    pub fn final_text(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            is_final: true,
        }
    }

    pub fn partial(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            is_final: false,
        }
    }
}

/// Streaming transcription session
///
/// Push frames into `audio`, read transcripts from `events`. Dropping the
/// sender closes the session; the backend flushes a final transcript first.
pub struct SttStream {
    pub audio: mpsc::Sender<AudioFrame>,
    pub events: mpsc::Receiver<Transcript>,
}

/// Speech-to-text backend
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Batch transcription of a captured buffer
    async fn transcribe(
        &self,
        audio: &EncodedAudio,
        language: &str,
    ) -> Result<Transcript, ProviderError>;

    /// Open a streaming session
    fn open_stream(&self, session_id: &str, language: &str) -> SttStream;

    /// False when credentials are missing or the backend is not ready
    fn available(&self) -> bool {
        true
    }
}

/// Process-wide transcription service
pub struct SttService {
    backend: Arc<dyn SpeechToText>,
    timeout: Duration,
    confidence_floor: f32,
}

impl SttService {
    pub fn new(backend: Arc<dyn SpeechToText>, timeout: Duration, confidence_floor: f32) -> Self {
        Self {
            backend,
            timeout,
            confidence_floor,
        }
    }

    pub fn available(&self) -> bool {
        self.backend.available()
    }

    pub fn confidence_floor(&self) -> f32 {
        self.confidence_floor
    }

    /// Batch transcription; `None` when the result fell below the floor
    pub async fn transcribe(
        &self,
        audio: &EncodedAudio,
        language: &str,
    ) -> Result<Option<Transcript>, ProviderError> {
        if !self.backend.available() {
            return Err(ProviderError::Unavailable("speech recognition not ready".into()));
        }

        let transcript = tokio::time::timeout(self.timeout, self.backend.transcribe(audio, language))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))??;

        if transcript.confidence < self.confidence_floor {
            tracing::debug!(
                confidence = transcript.confidence,
                floor = self.confidence_floor,
                "dropping low-confidence transcript"
            );
            return Ok(None);
        }
        Ok(Some(transcript))
    }

    /// Open a streaming session with the floor applied to emitted events
    pub fn open_stream(&self, session_id: &str, language: &str) -> SttStream {
        let inner = self.backend.open_stream(session_id, language);
        let floor = self.confidence_floor;

        let (events_tx, events_rx) = mpsc::channel(32);
        let mut inner_events = inner.events;
        tokio::spawn(async move {
            while let Some(transcript) = inner_events.recv().await {
                if transcript.confidence < floor {
                    tracing::debug!(
                        confidence = transcript.confidence,
                        "dropping low-confidence stream transcript"
                    );
                    continue;
                }
                if events_tx.send(transcript).await.is_err() {
                    break;
                }
            }
        });

        SttStream {
            audio: inner.audio,
            events: events_rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::ScriptedStt;
    use bytes::Bytes;

    fn pcm_audio() -> EncodedAudio {
        EncodedAudio::pcm16(16000, 1, Bytes::from(vec![0u8; 3200]))
    }

    #[tokio::test]
    async fn test_floor_drops_batch_result() {
        let backend = Arc::new(ScriptedStt::with_responses(vec![Transcript::final_text(
            "mumble", 0.4,
        )]));
        let svc = SttService::new(backend, Duration::from_secs(5), 0.7);
        let out = svc.transcribe(&pcm_audio(), "en").await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_confident_batch_result_passes() {
        let backend = Arc::new(ScriptedStt::with_responses(vec![Transcript::final_text(
            "hello agent",
            0.95,
        )]));
        let svc = SttService::new(backend, Duration::from_secs(5), 0.7);
        let out = svc.transcribe(&pcm_audio(), "en").await.unwrap().unwrap();
        assert_eq!(out.text, "hello agent");
    }

    #[tokio::test]
    async fn test_stream_filters_below_floor() {
        let backend = Arc::new(ScriptedStt::with_responses(vec![
            Transcript::final_text("low", 0.2),
            Transcript::final_text("high", 0.9),
        ]));
        let svc = SttService::new(backend, Duration::from_secs(5), 0.7);
        let mut stream = svc.open_stream("room-a1", "en");

        // Two voiced frames trigger the two scripted responses
        let frame = AudioFrame::new(
            vec![0.9; 160],
            chorus_core::SampleRate::Hz16000,
            chorus_core::Channels::Mono,
            0,
        );
        stream.audio.send(frame.clone()).await.unwrap();
        stream.audio.send(frame).await.unwrap();
        drop(stream.audio);

        let got = stream.events.recv().await.unwrap();
        assert_eq!(got.text, "high");
        assert!(stream.events.recv().await.is_none());
    }
}
