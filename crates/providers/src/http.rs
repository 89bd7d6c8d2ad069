//! HTTP sidecar backends for speech synthesis and recognition
//!
//! Vendors (or local sidecar services) are reached over a small JSON
//! surface: `POST /synthesize` and `POST /transcribe`, audio carried as
//! base64. The STT backend is not a true streaming protocol: frames
//! accumulate client-side and transcription happens when the stream
//! closes, which is what sidecar inference services typically offer.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use chorus_core::{AudioEncoding, AudioFrame, EncodedAudio, VoiceProfile};

use crate::stt::{SpeechToText, SttStream, Transcript};
use crate::tts::TextToSpeech;
use crate::ProviderError;

/// HTTP TTS configuration
#[derive(Debug, Clone)]
pub struct HttpTtsConfig {
    /// Base URL of the synthesis service
    pub endpoint: String,
    /// Environment variable holding the API key; empty means keyless
    pub api_key_env: String,
    /// Voices the service can render
    pub voices: Vec<String>,
    pub timeout: Duration,
}

impl Default for HttpTtsConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8091".to_string(),
            api_key_env: String::new(),
            voices: vec!["neutral".to_string()],
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice: &'a str,
    rate: f32,
    pitch: f32,
}

#[derive(Deserialize)]
struct SynthesizeResponse {
    audio_b64: String,
    #[serde(default = "default_format")]
    format: String,
    #[serde(default = "default_tts_rate")]
    sample_rate: u32,
    #[serde(default = "default_channels")]
    channels: u16,
}

fn default_format() -> String {
    "mp3".to_string()
}
fn default_tts_rate() -> u32 {
    24_000
}
fn default_channels() -> u16 {
    1
}

/// HTTP-backed speech synthesis
pub struct HttpTts {
    config: HttpTtsConfig,
    client: Client,
    api_key: Option<String>,
    keyless: bool,
}

impl HttpTts {
    pub fn new(config: HttpTtsConfig) -> Self {
        let keyless = config.api_key_env.is_empty();
        let api_key = if keyless {
            None
        } else {
            std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty())
        };
        if !keyless && api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "TTS API key not set; synthesis backend unavailable"
            );
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            config,
            client,
            api_key,
            keyless,
        }
    }
}

#[async_trait]
impl TextToSpeech for HttpTts {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceProfile,
    ) -> Result<EncodedAudio, ProviderError> {
        if !self.available() {
            return Err(ProviderError::AuthMissing(self.config.api_key_env.clone()));
        }

        let mut request = self
            .client
            .post(format!("{}/synthesize", self.config.endpoint))
            .json(&SynthesizeRequest {
                text,
                voice: &voice.voice,
                rate: voice.rate,
                pitch: voice.pitch,
            });
        if let Some(key) = self.api_key.as_deref() {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream(format!("HTTP {}: {}", status, body)));
        }

        let parsed: SynthesizeResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let data = STANDARD
            .decode(parsed.audio_b64.trim_end())
            .map_err(|e| ProviderError::InvalidResponse(format!("audio not base64: {}", e)))?;

        let encoding = match parsed.format.as_str() {
            "mp3" => AudioEncoding::Mp3,
            "pcm16" => AudioEncoding::Pcm16,
            other => {
                return Err(ProviderError::InvalidResponse(format!(
                    "unknown audio format {}",
                    other
                )))
            },
        };

        Ok(EncodedAudio::new(
            encoding,
            parsed.sample_rate,
            parsed.channels,
            Bytes::from(data),
        ))
    }

    fn voices(&self) -> Vec<String> {
        self.config.voices.clone()
    }

    fn available(&self) -> bool {
        self.keyless || self.api_key.is_some()
    }
}

/// HTTP STT configuration
#[derive(Debug, Clone)]
pub struct HttpSttConfig {
    /// Base URL of the transcription service
    pub endpoint: String,
    /// Environment variable holding the API key; empty means keyless
    pub api_key_env: String,
    pub timeout: Duration,
    /// Audio shorter than this is reported as empty, not sent upstream
    pub min_audio_ms: u64,
}

impl Default for HttpSttConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8090".to_string(),
            api_key_env: String::new(),
            timeout: Duration::from_secs(30),
            min_audio_ms: 100,
        }
    }
}

#[derive(Serialize)]
struct TranscribeRequest<'a> {
    audio_b64: String,
    sample_rate: u32,
    language: &'a str,
}

#[derive(Deserialize)]
struct TranscribeResponse {
    text: String,
    confidence: f32,
}

/// HTTP-backed speech recognition
pub struct HttpStt {
    config: HttpSttConfig,
    client: Client,
    api_key: Option<String>,
    keyless: bool,
}

impl HttpStt {
    pub fn new(config: HttpSttConfig) -> Self {
        let keyless = config.api_key_env.is_empty();
        let api_key = if keyless {
            None
        } else {
            std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty())
        };
        if !keyless && api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "STT API key not set; recognition backend unavailable"
            );
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            config,
            client,
            api_key,
            keyless,
        }
    }

    async fn transcribe_pcm(
        &self,
        pcm: &[u8],
        sample_rate: u32,
        language: &str,
    ) -> Result<Transcript, ProviderError> {
        let min_bytes = (sample_rate as u64 * self.config.min_audio_ms / 1000) as usize * 2;
        if pcm.len() < min_bytes {
            return Ok(Transcript::final_text("", 0.0));
        }

        let mut request = self
            .client
            .post(format!("{}/transcribe", self.config.endpoint))
            .json(&TranscribeRequest {
                audio_b64: STANDARD.encode(pcm),
                sample_rate,
                language,
            });
        if let Some(key) = self.api_key.as_deref() {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream(format!("HTTP {}: {}", status, body)));
        }

        let parsed: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(Transcript::final_text(parsed.text, parsed.confidence))
    }
}

#[async_trait]
impl SpeechToText for HttpStt {
    async fn transcribe(
        &self,
        audio: &EncodedAudio,
        language: &str,
    ) -> Result<Transcript, ProviderError> {
        if !self.available() {
            return Err(ProviderError::AuthMissing(self.config.api_key_env.clone()));
        }
        if audio.encoding != AudioEncoding::Pcm16 {
            return Err(ProviderError::InvalidResponse(
                "http stt takes pcm16 input".into(),
            ));
        }
        self.transcribe_pcm(&audio.data, audio.sample_rate, language).await
    }

    /// Accumulate-and-finalize: frames buffer here and one transcription
    /// request goes out when the audio side closes
    fn open_stream(&self, session_id: &str, language: &str) -> SttStream {
        let (audio_tx, mut audio_rx) = mpsc::channel::<AudioFrame>(32);
        let (events_tx, events_rx) = mpsc::channel::<Transcript>(8);

        let backend = HttpStt {
            config: self.config.clone(),
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            keyless: self.keyless,
        };
        let language = language.to_string();
        let session = session_id.to_string();

        tokio::spawn(async move {
            let mut pcm: Vec<u8> = Vec::new();
            let mut sample_rate = 16_000u32;
            while let Some(frame) = audio_rx.recv().await {
                sample_rate = frame.sample_rate.as_u32();
                pcm.extend(frame.to_pcm16());
            }

            if !backend.available() {
                return;
            }
            match backend.transcribe_pcm(&pcm, sample_rate, &language).await {
                Ok(transcript) => {
                    let _ = events_tx.send(transcript).await;
                },
                Err(e) => {
                    tracing::warn!(session = %session, error = %e, "stream transcription failed");
                },
            }
        });

        SttStream {
            audio: audio_tx,
            events: events_rx,
        }
    }

    fn available(&self) -> bool {
        self.keyless || self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_short_audio_not_sent_upstream() {
        // 10ms at 16kHz is below the floor; no request leaves the process
        let stt = HttpStt::new(HttpSttConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        });
        let audio = EncodedAudio::pcm16(16_000, 1, Bytes::from(vec![0u8; 320]));
        let out = stt.transcribe(&audio, "en").await.unwrap();
        assert!(out.text.is_empty());
        assert_eq!(out.confidence, 0.0);
    }

    #[test]
    fn test_missing_key_is_unavailable() {
        let tts = HttpTts::new(HttpTtsConfig {
            api_key_env: "CHORUS_TEST_UNSET_TTS_KEY".to_string(),
            ..Default::default()
        });
        assert!(!tts.available());

        let keyless = HttpTts::new(HttpTtsConfig::default());
        assert!(keyless.available());
    }
}
