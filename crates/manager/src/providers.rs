//! Provider service wiring
//!
//! The three adapter services are process-wide singletons built once at
//! startup from settings. Unconfigured providers fall back to the local
//! deterministic backends so the core always starts; HTTP-backed adapters
//! missing credentials come up unavailable without blocking anything else.

use std::sync::Arc;

use chorus_config::Settings;
use chorus_providers::{
    EchoLlm, HttpLlm, HttpLlmConfig, HttpStt, HttpSttConfig, HttpTts, HttpTtsConfig,
    LanguageModel, LlmService, ScriptedStt, SpeechToText, SttService, TextToSpeech, ToneTts,
    TtsService,
};

/// The process-wide provider services
#[derive(Clone)]
pub struct ProviderSet {
    pub llm: Arc<LlmService>,
    pub tts: Arc<TtsService>,
    pub stt: Arc<SttService>,
}

impl ProviderSet {
    /// Build from settings; unknown provider names fall back to local
    pub fn from_settings(settings: &Settings) -> Self {
        let llm_backend: Arc<dyn LanguageModel> = match settings.providers.llm.provider.as_str() {
            "http" => Arc::new(HttpLlm::new(HttpLlmConfig {
                endpoint: settings.providers.llm.endpoint.clone(),
                api_key_env: settings.providers.llm.api_key_env.clone(),
                model: settings.providers.llm.model.clone(),
                timeout: settings.timing.llm_timeout(),
            })),
            other => {
                if other != "local" {
                    tracing::warn!(provider = other, "unknown LLM provider, using local echo");
                }
                Arc::new(EchoLlm::new())
            },
        };

        let tts_backend: Arc<dyn TextToSpeech> = match settings.providers.tts.provider.as_str() {
            "http" => Arc::new(HttpTts::new(HttpTtsConfig {
                endpoint: settings.providers.tts.endpoint.clone(),
                api_key_env: settings.providers.tts.api_key_env.clone(),
                timeout: settings.timing.tts_timeout(),
                ..Default::default()
            })),
            other => {
                if other != "local" {
                    tracing::warn!(provider = other, "unknown TTS provider, using local tones");
                }
                Arc::new(ToneTts::new())
            },
        };

        let stt_backend: Arc<dyn SpeechToText> = match settings.providers.stt.provider.as_str() {
            "http" => Arc::new(HttpStt::new(HttpSttConfig {
                endpoint: settings.providers.stt.endpoint.clone(),
                api_key_env: settings.providers.stt.api_key_env.clone(),
                timeout: settings.timing.stt_timeout(),
                ..Default::default()
            })),
            other => {
                if other != "local" {
                    tracing::warn!(provider = other, "unknown STT provider, using local scripted");
                }
                Arc::new(ScriptedStt::new())
            },
        };

        Self::from_backends(settings, llm_backend, tts_backend, stt_backend)
    }

    /// Wire explicit backends (tests inject scripted ones here)
    pub fn from_backends(
        settings: &Settings,
        llm: Arc<dyn LanguageModel>,
        tts: Arc<dyn TextToSpeech>,
        stt: Arc<dyn SpeechToText>,
    ) -> Self {
        Self {
            llm: Arc::new(LlmService::new(
                llm,
                settings.timing.llm_min_interval(),
                settings.timing.llm_timeout(),
            )),
            tts: Arc::new(TtsService::new(
                tts,
                settings.timing.tts_timeout(),
                settings.providers.tts_cache_entries,
            )),
            stt: Arc::new(SttService::new(
                stt,
                settings.timing.stt_timeout(),
                settings.stt.confidence_floor,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_defaults_are_available() {
        let set = ProviderSet::from_settings(&Settings::default());
        assert!(set.llm.available());
        assert!(set.tts.available());
        assert!(set.stt.available());
    }
}
