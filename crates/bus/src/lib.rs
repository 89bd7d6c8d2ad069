//! Message bus: topic-addressed pub/sub for control and event fan-out
//!
//! The bus is the cross-process surface of the orchestrator: lifecycle
//! commands arrive on the control topics and committed state changes are
//! mirrored out on the event topics. Delivery is at-least-once with no
//! ordering guarantee across topics; the core never relies on it for
//! intra-process communication.
//!
//! [`MessageBus`] is the collaborator contract; [`InProcessBus`] is the
//! built-in implementation used by tests and single-process deployments.

pub mod envelope;
pub mod memory;

pub use envelope::{
    CreateAgentRequest, DeleteAgentRequest, JoinRoomRequest, LeaveRoomRequest, SpeakRequest,
    StopSpeakRequest, TranscriptionFinal,
};
pub use memory::InProcessBus;

use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

/// Well-known topic names
pub mod topics {
    // Control topics consumed by the manager
    pub const AGENT_CREATE: &str = "agent.create";
    pub const AGENT_DELETE: &str = "agent.delete";
    pub const AGENT_JOIN_ROOM: &str = "agent.join-room";
    pub const AGENT_LEAVE_ROOM: &str = "agent.leave-room";
    pub const AGENT_SPEAK: &str = "agent.speak";
    pub const AGENT_STOP_SPEAK: &str = "agent.stop-speak";
    pub const TRANSCRIPTION_FINAL: &str = "transcription.final";

    /// All control topics, in dispatch registration order
    pub const CONTROL: &[&str] = &[
        AGENT_CREATE,
        AGENT_DELETE,
        AGENT_JOIN_ROOM,
        AGENT_LEAVE_ROOM,
        AGENT_SPEAK,
        AGENT_STOP_SPEAK,
        TRANSCRIPTION_FINAL,
    ];
}

/// Bus errors
#[derive(Error, Debug)]
pub enum BusError {
    #[error("bus transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("publish backpressure on topic {0}")]
    Backpressure(String),

    #[error("payload codec error: {0}")]
    Codec(String),

    #[error("unknown subscription handle")]
    UnknownSubscription,
}

impl From<BusError> for chorus_core::Error {
    fn from(err: BusError) -> Self {
        match err {
            BusError::TransportUnavailable(_) => {
                chorus_core::Error::transport_unavailable(err.to_string())
            },
            BusError::Backpressure(_) => chorus_core::Error::busy(err.to_string()),
            BusError::Codec(_) => chorus_core::Error::invalid_argument(err.to_string()),
            BusError::UnknownSubscription => chorus_core::Error::not_found(err.to_string()),
        }
    }
}

/// Handler invoked on the bus's delivery context
///
/// Handlers must not block or hold long locks; hand work off to an owned
/// task or channel instead.
pub type BusHandler = Arc<dyn Fn(&str, Bytes) + Send + Sync>;

/// Opaque subscription handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// Topic-addressed publish/subscribe service
#[async_trait::async_trait]
pub trait MessageBus: Send + Sync {
    async fn connect(&self) -> Result<(), BusError>;

    async fn disconnect(&self) -> Result<(), BusError>;

    fn is_connected(&self) -> bool;

    /// Non-blocking publish; buffers up to a small per-subscriber queue and
    /// reports `Backpressure` once that queue is full
    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError>;

    fn subscribe(&self, topic: &str, handler: BusHandler) -> Result<SubscriptionId, BusError>;

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError>;
}

/// Encode a JSON envelope for publishing
pub fn encode<T: serde::Serialize>(value: &T) -> Result<Bytes, BusError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| BusError::Codec(e.to_string()))
}

/// Decode a JSON envelope from a delivered payload
pub fn decode<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T, BusError> {
    serde_json::from_slice(payload).map_err(|e| BusError::Codec(e.to_string()))
}
