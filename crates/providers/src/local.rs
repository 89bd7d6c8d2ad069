//! Deterministic built-in backends
//!
//! Used when a provider endpoint is not configured and throughout the test
//! suites. All three are fully offline and produce stable output for a given
//! input, so assertions on pipeline behavior stay exact.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::f32::consts::TAU;
use tokio::sync::mpsc;

use chorus_core::{AudioEncoding, AudioFrame, EncodedAudio, VoiceProfile};

use crate::llm::{ChatCompletion, ChatRequest, LanguageModel};
use crate::stt::{SpeechToText, SttStream, Transcript};
use crate::tts::TextToSpeech;
use crate::ProviderError;

/// Echoing language model
///
/// Replies restate the newest turn, so conversation flow is observable end
/// to end without a vendor account.
pub struct EchoLlm {
    model_tag: String,
}

impl EchoLlm {
    pub fn new() -> Self {
        Self {
            model_tag: "local-echo".to_string(),
        }
    }
}

impl Default for EchoLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for EchoLlm {
    async fn generate(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
        let reply = match request.turns.last() {
            Some(turn) => format!("I hear you, {}: {}", turn.speaker, turn.text),
            None => "Hello, I am listening.".to_string(),
        };
        let reply = if reply.len() > request.max_tokens * 4 {
            // Rough character budget so max_tokens still means something
            reply.chars().take(request.max_tokens * 4).collect()
        } else {
            reply
        };
        let tokens = reply.split_whitespace().count().max(1);
        Ok(ChatCompletion {
            reply,
            model_tag: self.model_tag.clone(),
            tokens,
        })
    }

    fn model_name(&self) -> &str {
        &self.model_tag
    }
}

/// Tone-generating speech synthesis
///
/// Renders each utterance as a sine tone whose duration scales with word
/// count and whose frequency is the voice. Output is PCM16 at 24kHz mono,
/// the shape a real TTS vendor returns after decode.
pub struct ToneTts;

const TONE_SAMPLE_RATE: u32 = 24_000;
const TONE_AMPLITUDE: f32 = 0.6;
/// Base utterance length plus per-word extension
const TONE_BASE_MS: u64 = 200;
const TONE_PER_WORD_MS: u64 = 80;

impl ToneTts {
    pub fn new() -> Self {
        Self
    }

    fn frequency(voice: &str) -> Option<f32> {
        match voice {
            "neutral" => Some(220.0),
            "alto" => Some(330.0),
            "bass" => Some(110.0),
            _ => None,
        }
    }
}

impl Default for ToneTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextToSpeech for ToneTts {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceProfile,
    ) -> Result<EncodedAudio, ProviderError> {
        let freq = Self::frequency(&voice.voice)
            .ok_or_else(|| ProviderError::UnsupportedVoice(voice.voice.clone()))?
            * voice.pitch.clamp(0.5, 2.0);

        let words = text.split_whitespace().count().max(1) as u64;
        let rate = voice.rate.clamp(0.5, 2.0);
        let duration_ms = ((TONE_BASE_MS + TONE_PER_WORD_MS * words) as f32 / rate) as u64;

        let total = (TONE_SAMPLE_RATE as u64 * duration_ms / 1000) as usize;
        let mut data = Vec::with_capacity(total * 2);
        for i in 0..total {
            let t = i as f32 / TONE_SAMPLE_RATE as f32;
            let sample = (TAU * freq * t).sin() * TONE_AMPLITUDE;
            let pcm = (sample * 32767.0) as i16;
            data.extend_from_slice(&pcm.to_le_bytes());
        }

        Ok(EncodedAudio::new(
            AudioEncoding::Pcm16,
            TONE_SAMPLE_RATE,
            1,
            Bytes::from(data),
        ))
    }

    fn voices(&self) -> Vec<String> {
        vec!["neutral".to_string(), "alto".to_string(), "bass".to_string()]
    }
}

/// Scripted speech recognition
///
/// Pops pre-seeded transcripts: one per batch call, one per sufficiently
/// voiced frame on a stream. Exhausted scripts yield silence-confidence
/// results, which the service floor then drops.
pub struct ScriptedStt {
    responses: Mutex<VecDeque<Transcript>>,
    /// Minimum frame RMS that consumes a scripted response
    voice_rms: f32,
}

impl ScriptedStt {
    pub fn new() -> Self {
        Self::with_responses(Vec::new())
    }

    pub fn with_responses(responses: Vec<Transcript>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            voice_rms: 0.3,
        }
    }

    pub fn push_response(&self, transcript: Transcript) {
        self.responses.lock().push_back(transcript);
    }

    fn pop(&self) -> Transcript {
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Transcript::final_text("", 0.0))
    }
}

impl Default for ScriptedStt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    async fn transcribe(
        &self,
        _audio: &EncodedAudio,
        _language: &str,
    ) -> Result<Transcript, ProviderError> {
        Ok(self.pop())
    }

    fn open_stream(&self, session_id: &str, _language: &str) -> SttStream {
        let (audio_tx, mut audio_rx) = mpsc::channel::<AudioFrame>(32);
        let (events_tx, events_rx) = mpsc::channel::<Transcript>(32);

        // Drain pending scripted responses into a task-owned queue; frames
        // arriving after exhaustion produce nothing.
        let mut queued: VecDeque<Transcript> = self.responses.lock().drain(..).collect();
        let voice_rms = self.voice_rms;
        let session = session_id.to_string();

        tokio::spawn(async move {
            while let Some(frame) = audio_rx.recv().await {
                if frame.rms() < voice_rms {
                    continue;
                }
                let Some(transcript) = queued.pop_front() else {
                    continue;
                };
                tracing::trace!(session = %session, text = %transcript.text, "scripted transcript");
                if events_tx.send(transcript).await.is_err() {
                    break;
                }
            }
        });

        SttStream {
            audio: audio_tx,
            events: events_rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_duration_scales_with_words() {
        let tts = ToneTts::new();
        let voice = VoiceProfile::default();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let short = rt.block_on(tts.synthesize("hi", &voice)).unwrap();
        let long = rt
            .block_on(tts.synthesize("one two three four five six", &voice))
            .unwrap();
        assert!(long.len() > short.len());
        assert_eq!(short.encoding, AudioEncoding::Pcm16);
        assert_eq!(short.sample_rate, TONE_SAMPLE_RATE);
    }

    #[tokio::test]
    async fn test_echo_llm_mentions_last_turn() {
        let llm = EchoLlm::new();
        let done = llm
            .generate(&ChatRequest {
                system: "persona".into(),
                turns: vec![crate::llm::ChatTurn {
                    speaker: "peer".into(),
                    text: "what is the weather".into(),
                }],
                model: String::new(),
                temperature: 0.7,
                max_tokens: 64,
            })
            .await
            .unwrap();
        assert!(done.reply.contains("what is the weather"));
    }

    #[tokio::test]
    async fn test_scripted_stream_consumes_in_order() {
        let stt = ScriptedStt::with_responses(vec![
            Transcript::final_text("first", 0.9),
            Transcript::final_text("second", 0.9),
        ]);
        let mut stream = stt.open_stream("s", "en");
        let frame = AudioFrame::new(
            vec![0.9; 160],
            chorus_core::SampleRate::Hz16000,
            chorus_core::Channels::Mono,
            0,
        );
        stream.audio.send(frame.clone()).await.unwrap();
        stream.audio.send(frame).await.unwrap();
        drop(stream.audio);

        assert_eq!(stream.events.recv().await.unwrap().text, "first");
        assert_eq!(stream.events.recv().await.unwrap().text, "second");
    }
}
