//! Configuration management for the chorus orchestrator
//!
//! Supports loading configuration from:
//! - TOML files under `config/`
//! - Environment variables (`CHORUS_` prefix, `__` section separator)
//!
//! Every knob the orchestrator honors is enumerated in [`Settings`]; no
//! open-ended dictionaries cross the crate boundary.

pub mod settings;

pub use settings::{
    load_settings, AudioConfig, LimitsConfig, MediaConfig, ObservabilityConfig, ProviderEndpoint,
    ProvidersConfig, Settings, SttConfig, TimingConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for chorus_core::Error {
    fn from(err: ConfigError) -> Self {
        chorus_core::Error::invalid_argument(err.to_string())
    }
}

/// Initialize tracing for the embedding process
///
/// Intended for binaries and integration harnesses; library code only uses
/// the `tracing` macros. Safe to call once per process.
pub fn init_tracing(config: &ObservabilityConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
