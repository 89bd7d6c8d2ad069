//! Media transport contract
//!
//! The host's remote-procedure conventions, reduced to what the client
//! needs: join, produce, consume, leave, list-participants. Audio payloads
//! are raw byte buffers; transports that can only carry text frames say so
//! via `requires_text_frames` and the client base64-wraps transparently.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::MediaError;

/// Transport connection state, observed by the client's supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Up,
    Down,
}

/// A room participant as reported by the media server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub kind: ParticipantKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantKind {
    /// An orchestrated agent peer
    Agent,
    /// Any other peer
    Human,
}

/// RPC boundary to the media server
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn join(&self, room_id: &str, peer_id: &str) -> Result<(), MediaError>;

    async fn leave(&self, room_id: &str, peer_id: &str) -> Result<(), MediaError>;

    /// Open an audio producer for a joined peer
    async fn create_producer(&self, room_id: &str, peer_id: &str) -> Result<String, MediaError>;

    /// Push one audio chunk into a producer
    async fn produce_chunk(&self, producer_id: &str, chunk: Bytes) -> Result<(), MediaError>;

    async fn stop_producer(&self, producer_id: &str) -> Result<(), MediaError>;

    /// Open a consumer of the room mix (everyone except `peer_id`)
    async fn create_consumer(
        &self,
        room_id: &str,
        peer_id: &str,
    ) -> Result<(String, mpsc::Receiver<Bytes>), MediaError>;

    async fn stop_consumer(&self, consumer_id: &str) -> Result<(), MediaError>;

    async fn list_participants(&self, room_id: &str) -> Result<Vec<Participant>, MediaError>;

    /// True when the RPC layer needs text-safe payloads (base64)
    fn requires_text_frames(&self) -> bool {
        false
    }

    /// Connection-state watch for reconnect supervision
    fn connection_state(&self) -> watch::Receiver<TransportState>;
}
