//! Text-to-speech adapter
//!
//! [`TtsService`] wraps a [`TextToSpeech`] backend with voice validation, the
//! TTS timeout, and an LRU cache keyed on (text, voice profile) so repeated
//! utterances reuse synthesized audio.

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chorus_core::{EncodedAudio, VoiceProfile};

use crate::ProviderError;

/// Text-to-speech backend
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceProfile,
    ) -> Result<EncodedAudio, ProviderError>;

    /// Names of voices this backend can render
    fn voices(&self) -> Vec<String>;

    /// False when credentials are missing or the backend is not ready
    fn available(&self) -> bool {
        true
    }
}

/// Process-wide synthesis service
pub struct TtsService {
    backend: Arc<dyn TextToSpeech>,
    timeout: Duration,
    cache: Mutex<LruCache<u64, EncodedAudio>>,
}

impl TtsService {
    pub fn new(backend: Arc<dyn TextToSpeech>, timeout: Duration, cache_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            timeout,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn available(&self) -> bool {
        self.backend.available()
    }

    /// Reject profiles naming a voice the backend cannot render
    pub fn validate_voice(&self, voice: &VoiceProfile) -> Result<(), ProviderError> {
        if self.backend.voices().iter().any(|v| v == &voice.voice) {
            Ok(())
        } else {
            Err(ProviderError::UnsupportedVoice(voice.voice.clone()))
        }
    }

    pub async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceProfile,
    ) -> Result<EncodedAudio, ProviderError> {
        if !self.backend.available() {
            return Err(ProviderError::Unavailable("speech synthesis not ready".into()));
        }
        self.validate_voice(voice)?;

        let key = Self::cache_key(text, voice);
        if let Some(hit) = self.cache.lock().get(&key).cloned() {
            tracing::trace!(voice = %voice.voice, "synthesis cache hit");
            return Ok(hit);
        }

        let audio = tokio::time::timeout(self.timeout, self.backend.synthesize(text, voice))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))??;

        self.cache.lock().put(key, audio.clone());
        Ok(audio)
    }

    fn cache_key(text: &str, voice: &VoiceProfile) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        voice.cache_tag().hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::ToneTts;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTts {
        inner: ToneTts,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextToSpeech for CountingTts {
        async fn synthesize(
            &self,
            text: &str,
            voice: &VoiceProfile,
        ) -> Result<EncodedAudio, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.synthesize(text, voice).await
        }

        fn voices(&self) -> Vec<String> {
            self.inner.voices()
        }
    }

    #[tokio::test]
    async fn test_cache_reuses_synthesis() {
        let backend = Arc::new(CountingTts {
            inner: ToneTts::new(),
            calls: AtomicUsize::new(0),
        });
        let svc = TtsService::new(backend.clone(), Duration::from_secs(5), 16);
        let voice = VoiceProfile::default();

        let a = svc.synthesize("hello room", &voice).await.unwrap();
        let b = svc.synthesize("hello room", &voice).await.unwrap();
        assert_eq!(a.data, b.data);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_voice_misses_cache() {
        let backend = Arc::new(CountingTts {
            inner: ToneTts::new(),
            calls: AtomicUsize::new(0),
        });
        let svc = TtsService::new(backend.clone(), Duration::from_secs(5), 16);

        let neutral = VoiceProfile::default();
        let alto = VoiceProfile {
            voice: "alto".into(),
            ..Default::default()
        };
        svc.synthesize("hello", &neutral).await.unwrap();
        svc.synthesize("hello", &alto).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_voice_rejected() {
        let svc = TtsService::new(Arc::new(ToneTts::new()), Duration::from_secs(5), 16);
        let voice = VoiceProfile {
            voice: "gravel".into(),
            ..Default::default()
        };
        let err = svc.synthesize("hi", &voice).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedVoice(_)));
    }
}
