//! Agent configuration profiles
//!
//! Named option structs for the per-agent knobs that cross the bus and
//! manager boundaries: which language model answers for the agent and which
//! voice speaks for it.

use serde::{Deserialize, Serialize};

/// Language-model parameters for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmParams {
    /// Provider name ("local", "http")
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model tag passed through to the provider
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Hard cap on reply length in characters
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_model() -> String {
    "default".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_reply_chars() -> usize {
    400
}

impl Default for LlmParams {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            max_reply_chars: default_max_reply_chars(),
        }
    }
}

/// Voice parameters for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    /// Provider name ("local", "http")
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Voice name, validated against the TTS adapter on bind
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Speaking rate multiplier
    #[serde(default = "default_rate")]
    pub rate: f32,
    /// Pitch multiplier
    #[serde(default = "default_rate")]
    pub pitch: f32,
}

fn default_voice() -> String {
    "neutral".to_string()
}
fn default_rate() -> f32 {
    1.0
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            voice: default_voice(),
            rate: default_rate(),
            pitch: default_rate(),
        }
    }
}

impl VoiceProfile {
    /// Stable cache key for synthesized audio reuse
    pub fn cache_tag(&self) -> String {
        format!(
            "{}:{}:{:.2}:{:.2}",
            self.provider, self.voice, self.rate, self.pitch
        )
    }
}

/// Complete per-agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    #[serde(default)]
    pub llm: LlmParams,
    #[serde(default)]
    pub voice: VoiceProfile,
}
