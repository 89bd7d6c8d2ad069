//! Main settings module
//!
//! Loads configuration from `config/default.toml`, an optional
//! environment-named file, and `CHORUS_*` environment variables, in that
//! order of precedence.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ConfigError;

/// Capacity limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Process-wide agent cap
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    /// Per-room agent cap
    #[serde(default = "default_max_agents_per_room")]
    pub max_agents_per_room: usize,
    /// Rolling history entries kept per agent
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    /// Queued speak requests per room
    #[serde(default = "default_turn_queue_cap")]
    pub turn_queue_cap: usize,
    /// Queued utterances per agent
    #[serde(default = "default_speech_queue_cap")]
    pub speech_queue_cap: usize,
    /// Transcript-and-utterance log entries per room
    #[serde(default = "default_conversation_log_cap")]
    pub conversation_log_cap: usize,
}

fn default_max_agents() -> usize {
    10
}
fn default_max_agents_per_room() -> usize {
    5
}
fn default_history_cap() -> usize {
    100
}
fn default_turn_queue_cap() -> usize {
    16
}
fn default_speech_queue_cap() -> usize {
    8
}
fn default_conversation_log_cap() -> usize {
    1000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            max_agents_per_room: default_max_agents_per_room(),
            history_cap: default_history_cap(),
            turn_queue_cap: default_turn_queue_cap(),
            speech_queue_cap: default_speech_queue_cap(),
            conversation_log_cap: default_conversation_log_cap(),
        }
    }
}

/// Timeouts and timers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Upper bound on a single speaking turn
    #[serde(default = "default_speaking_time_limit_ms")]
    pub speaking_time_limit_ms: u64,
    /// Minimum interval between LLM requests per agent
    #[serde(default = "default_llm_min_interval_ms")]
    pub llm_min_interval_ms: u64,
    #[serde(default = "default_llm_timeout_ms")]
    pub llm_timeout_ms: u64,
    #[serde(default = "default_tts_timeout_ms")]
    pub tts_timeout_ms: u64,
    #[serde(default = "default_stt_timeout_ms")]
    pub stt_timeout_ms: u64,
    #[serde(default = "default_media_timeout_ms")]
    pub media_timeout_ms: u64,
}

fn default_speaking_time_limit_ms() -> u64 {
    30_000
}
fn default_llm_min_interval_ms() -> u64 {
    2_000
}
fn default_llm_timeout_ms() -> u64 {
    30_000
}
fn default_tts_timeout_ms() -> u64 {
    15_000
}
fn default_stt_timeout_ms() -> u64 {
    30_000
}
fn default_media_timeout_ms() -> u64 {
    10_000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            speaking_time_limit_ms: default_speaking_time_limit_ms(),
            llm_min_interval_ms: default_llm_min_interval_ms(),
            llm_timeout_ms: default_llm_timeout_ms(),
            tts_timeout_ms: default_tts_timeout_ms(),
            stt_timeout_ms: default_stt_timeout_ms(),
            media_timeout_ms: default_media_timeout_ms(),
        }
    }
}

impl TimingConfig {
    pub fn speaking_time_limit(&self) -> Duration {
        Duration::from_millis(self.speaking_time_limit_ms)
    }

    pub fn llm_min_interval(&self) -> Duration {
        Duration::from_millis(self.llm_min_interval_ms)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_timeout_ms)
    }

    pub fn tts_timeout(&self) -> Duration {
        Duration::from_millis(self.tts_timeout_ms)
    }

    pub fn stt_timeout(&self) -> Duration {
        Duration::from_millis(self.stt_timeout_ms)
    }

    pub fn media_timeout(&self) -> Duration {
        Duration::from_millis(self.media_timeout_ms)
    }
}

/// Audio pipeline knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Egress chunking threshold in bytes
    #[serde(default = "default_egress_buffer_bytes")]
    pub egress_buffer_bytes: usize,
    /// Ingress bucket duration
    #[serde(default = "default_ingress_bucket_ms")]
    pub ingress_bucket_ms: u64,
    /// Voice-activity RMS threshold as a fraction of full scale
    #[serde(default = "default_vad_rms_threshold")]
    pub vad_rms_threshold: f32,
    /// Default consumer capture duration
    #[serde(default = "default_capture_duration_ms")]
    pub capture_duration_ms: u64,
}

fn default_egress_buffer_bytes() -> usize {
    4096
}
fn default_ingress_bucket_ms() -> u64 {
    1_000
}
fn default_vad_rms_threshold() -> f32 {
    0.5
}
fn default_capture_duration_ms() -> u64 {
    5_000
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            egress_buffer_bytes: default_egress_buffer_bytes(),
            ingress_bucket_ms: default_ingress_bucket_ms(),
            vad_rms_threshold: default_vad_rms_threshold(),
            capture_duration_ms: default_capture_duration_ms(),
        }
    }
}

/// Media client knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Bounded reconnect attempts before the binding is torn down
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    /// Linear backoff step between attempts
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

fn default_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_backoff_ms() -> u64 {
    500
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

/// Speech-to-text knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Transcripts below this confidence are logged but never trigger replies
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,
    /// Default language hint
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_confidence_floor() -> f32 {
    0.7
}
fn default_language() -> String {
    "en".to_string()
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            language: default_language(),
        }
    }
}

/// One provider endpoint
///
/// `provider = "local"` selects the built-in deterministic backend; any HTTP
/// backend reads its key from the environment variable named in `api_key_env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default)]
    pub model: String,
}

fn default_provider() -> String {
    "local".to_string()
}

impl Default for ProviderEndpoint {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            endpoint: String::new(),
            api_key_env: String::new(),
            model: String::new(),
        }
    }
}

/// Provider adapter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub llm: ProviderEndpoint,
    #[serde(default)]
    pub tts: ProviderEndpoint,
    #[serde(default)]
    pub stt: ProviderEndpoint,
    /// TTS synthesis cache entries
    #[serde(default = "default_tts_cache_entries")]
    pub tts_cache_entries: usize,
}

fn default_tts_cache_entries() -> usize {
    128
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing filter directive, e.g. "info,chorus_room=debug"
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON-formatted logs
    #[serde(default)]
    pub json_logs: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate knob ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_agents == 0 {
            return Err(ConfigError::InvalidValue {
                field: "limits.max_agents".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.limits.max_agents_per_room == 0 {
            return Err(ConfigError::InvalidValue {
                field: "limits.max_agents_per_room".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.limits.history_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "limits.history_cap".into(),
                message: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.stt.confidence_floor) {
            return Err(ConfigError::InvalidValue {
                field: "stt.confidence_floor".into(),
                message: "must be within [0.0, 1.0]".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.audio.vad_rms_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "audio.vad_rms_threshold".into(),
                message: "must be within [0.0, 1.0]".into(),
            });
        }
        if self.audio.egress_buffer_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.egress_buffer_bytes".into(),
                message: "must be non-zero".into(),
            });
        }
        if self.audio.ingress_bucket_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.ingress_bucket_ms".into(),
                message: "must be non-zero".into(),
            });
        }
        if self.timing.speaking_time_limit_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timing.speaking_time_limit_ms".into(),
                message: "must be non-zero".into(),
            });
        }
        Ok(())
    }
}

/// Load settings, layering files and environment
///
/// Order of precedence, lowest first: `config/default.toml`, then
/// `config/{env}.toml` when `env` is given, then `CHORUS_*` environment
/// variables (`CHORUS_LIMITS__MAX_AGENTS=3`).
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder().add_source(File::with_name("config/default").required(false));

    if let Some(env) = env {
        builder = builder.add_source(File::with_name(&format!("config/{}", env)).required(false));
    }

    let raw = builder
        .add_source(Environment::with_prefix("CHORUS").separator("__"))
        .build()?;

    let settings: Settings = raw.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec() {
        let s = Settings::default();
        assert_eq!(s.limits.max_agents, 10);
        assert_eq!(s.limits.max_agents_per_room, 5);
        assert_eq!(s.limits.history_cap, 100);
        assert_eq!(s.limits.turn_queue_cap, 16);
        assert_eq!(s.limits.speech_queue_cap, 8);
        assert_eq!(s.limits.conversation_log_cap, 1000);
        assert_eq!(s.timing.speaking_time_limit_ms, 30_000);
        assert_eq!(s.timing.llm_min_interval_ms, 2_000);
        assert_eq!(s.timing.llm_timeout_ms, 30_000);
        assert_eq!(s.timing.tts_timeout_ms, 15_000);
        assert_eq!(s.timing.stt_timeout_ms, 30_000);
        assert_eq!(s.timing.media_timeout_ms, 10_000);
        assert_eq!(s.media.reconnect_attempts, 5);
        assert_eq!(s.audio.egress_buffer_bytes, 4096);
        assert_eq!(s.audio.ingress_bucket_ms, 1_000);
        assert_eq!(s.audio.vad_rms_threshold, 0.5);
        assert_eq!(s.stt.confidence_floor, 0.7);
    }

    #[test]
    fn test_defaults_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_caps() {
        let mut s = Settings::default();
        s.limits.max_agents = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_floor() {
        let mut s = Settings::default();
        s.stt.confidence_floor = 1.5;
        assert!(s.validate().is_err());
    }
}
