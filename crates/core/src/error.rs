//! Error taxonomy shared across the orchestrator
//!
//! Every fallible public operation reports one of the closed set of
//! [`ErrorKind`]s plus a human-readable message. Crate-local error enums
//! convert into [`Error`] at the boundary where they become caller-visible.

use serde::{Deserialize, Serialize};

/// Closed set of failure kinds surfaced by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Target agent or room does not exist
    NotFound,
    /// Duplicate id on create, or re-attach to the same room
    AlreadyExists,
    /// Missing persona, empty text, ill-formed payload
    InvalidArgument,
    /// Global or per-room cap reached
    CapacityExceeded,
    /// Queue full or operation already in progress
    Busy,
    /// Provider adapter has no credentials or is not ready
    ProviderUnavailable,
    /// Upstream vendor returned an error or timed out
    ProviderError,
    /// Provider-local rate gate tripped
    RateLimited,
    /// Bus or media transport down
    TransportUnavailable,
    /// Media reconnect budget exhausted; binding torn down
    MediaUnrecoverable,
    /// An explicit cancel/stop interrupted the operation
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::Busy => "busy",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::ProviderError => "provider_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::TransportUnavailable => "transport_unavailable",
            ErrorKind::MediaUnrecoverable => "media_unrecoverable",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator error: a taxonomy kind plus a human-readable message
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn capacity_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CapacityExceeded, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Busy, message)
    }

    pub fn provider_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderUnavailable, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderError, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn transport_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportUnavailable, message)
    }

    pub fn media_unrecoverable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MediaUnrecoverable, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Check the kind without destructuring
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

pub type Result<T> = std::result::Result<T, Error>;
