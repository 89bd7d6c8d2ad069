//! Language-model adapter
//!
//! [`LanguageModel`] is the backend trait; [`LlmService`] is the
//! process-wide façade the rest of the core talks to. The service enforces a
//! per-agent minimum inter-request interval (excess requests are rejected,
//! never queued), applies the LLM timeout, and accumulates token counts per
//! model tag.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::ProviderError;

/// One prior exchange, attributed to its origin
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub speaker: String,
    pub text: String,
}

/// Request for a single completion
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// System directive (the agent's persona)
    pub system: String,
    /// Prior exchanges, oldest first
    pub turns: Vec<ChatTurn>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Completion result
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub reply: String,
    pub model_tag: String,
    pub tokens: usize,
}

/// Language-model backend
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError>;

    /// Model name for logging
    fn model_name(&self) -> &str;

    /// False when credentials are missing or the backend is not ready
    fn available(&self) -> bool {
        true
    }
}

/// HTTP backend configuration (chat-completions style API)
#[derive(Debug, Clone)]
pub struct HttpLlmConfig {
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for HttpLlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/v1/chat/completions".to_string(),
            api_key_env: "CHORUS_LLM_API_KEY".to_string(),
            model: "default".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    completion_tokens: usize,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: WireUsage,
    #[serde(default)]
    model: String,
}

/// Chat-completions HTTP backend
pub struct HttpLlm {
    config: HttpLlmConfig,
    client: Client,
    api_key: Option<String>,
}

impl HttpLlm {
    /// Missing credentials leave the backend constructed but unavailable
    pub fn new(config: HttpLlmConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "LLM API key not set; language model backend unavailable"
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
        }
    }
}

#[async_trait]
impl LanguageModel for HttpLlm {
    async fn generate(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::AuthMissing(self.config.api_key_env.clone()));
        };

        let mut messages = vec![WireMessage {
            role: "system",
            content: request.system.clone(),
        }];
        for turn in &request.turns {
            messages.push(WireMessage {
                role: "user",
                content: format!("{}: {}", turn.speaker, turn.text),
            });
        }

        let model = if request.model.is_empty() {
            self.config.model.as_str()
        } else {
            request.model.as_str()
        };

        let wire = WireRequest {
            model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&wire)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited("upstream 429".into()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream(format!("HTTP {}: {}", status, body)));
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let reply = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("no choices".into()))?;

        let model_tag = if parsed.model.is_empty() {
            model.to_string()
        } else {
            parsed.model
        };

        Ok(ChatCompletion {
            reply,
            model_tag,
            tokens: parsed.usage.completion_tokens,
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn available(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Process-wide language-model service
///
/// Internally thread-safe; shared across agents via `Arc`.
pub struct LlmService {
    backend: Arc<dyn LanguageModel>,
    min_interval: Duration,
    timeout: Duration,
    last_request: DashMap<String, Instant>,
    token_usage: DashMap<String, u64>,
}

impl LlmService {
    pub fn new(backend: Arc<dyn LanguageModel>, min_interval: Duration, timeout: Duration) -> Self {
        Self {
            backend,
            min_interval,
            timeout,
            last_request: DashMap::new(),
            token_usage: DashMap::new(),
        }
    }

    pub fn available(&self) -> bool {
        self.backend.available()
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Generate a reply on behalf of `agent_id`
    ///
    /// Requests arriving within the minimum interval of the agent's previous
    /// accepted request are rejected with `RateLimited`.
    pub async fn generate_for(
        &self,
        agent_id: &str,
        request: &ChatRequest,
    ) -> Result<ChatCompletion, ProviderError> {
        if !self.backend.available() {
            return Err(ProviderError::Unavailable(format!(
                "language model {} not ready",
                self.backend.model_name()
            )));
        }

        // Rate gate: reject, never queue. The entry is updated only when the
        // gate admits the request, so rejected calls do not extend the window.
        {
            use dashmap::mapref::entry::Entry;

            let now = Instant::now();
            match self.last_request.entry(agent_id.to_string()) {
                Entry::Occupied(mut prev) => {
                    if now.duration_since(*prev.get()) < self.min_interval {
                        return Err(ProviderError::RateLimited(format!(
                            "agent {} below minimum request interval",
                            agent_id
                        )));
                    }
                    prev.insert(now);
                },
                Entry::Vacant(slot) => {
                    slot.insert(now);
                },
            }
        }

        let started = Instant::now();
        let completion = tokio::time::timeout(self.timeout, self.backend.generate(request))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))??;

        *self
            .token_usage
            .entry(completion.model_tag.clone())
            .or_insert(0) += completion.tokens as u64;

        tracing::debug!(
            agent_id = %agent_id,
            model = %completion.model_tag,
            tokens = completion.tokens,
            latency_ms = started.elapsed().as_millis() as u64,
            "language model reply"
        );

        Ok(completion)
    }

    /// Accumulated completion tokens per model tag
    pub fn token_usage(&self) -> HashMap<String, u64> {
        self.token_usage
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Drop the rate-gate entry for a deleted agent
    pub fn forget_agent(&self, agent_id: &str) {
        self.last_request.remove(agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::EchoLlm;

    fn service(min_interval_ms: u64) -> LlmService {
        LlmService::new(
            Arc::new(EchoLlm::new()),
            Duration::from_millis(min_interval_ms),
            Duration::from_secs(5),
        )
    }

    fn request(text: &str) -> ChatRequest {
        ChatRequest {
            system: "a test persona".into(),
            turns: vec![ChatTurn {
                speaker: "user".into(),
                text: text.into(),
            }],
            model: String::new(),
            temperature: 0.7,
            max_tokens: 64,
        }
    }

    #[tokio::test]
    async fn test_generate_accumulates_tokens() {
        let svc = service(0);
        let done = svc.generate_for("a1", &request("hello")).await.unwrap();
        assert!(!done.reply.is_empty());
        let usage = svc.token_usage();
        assert!(*usage.get(&done.model_tag).unwrap() > 0);
    }

    #[tokio::test]
    async fn test_rate_gate_rejects_burst() {
        let svc = service(60_000);
        svc.generate_for("a1", &request("one")).await.unwrap();
        let err = svc.generate_for("a1", &request("two")).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_rate_gate_is_per_agent() {
        let svc = service(60_000);
        svc.generate_for("a1", &request("one")).await.unwrap();
        assert!(svc.generate_for("a2", &request("two")).await.is_ok());
    }

    #[tokio::test]
    async fn test_forget_agent_resets_gate() {
        let svc = service(60_000);
        svc.generate_for("a1", &request("one")).await.unwrap();
        svc.forget_agent("a1");
        assert!(svc.generate_for("a1", &request("two")).await.is_ok());
    }
}
