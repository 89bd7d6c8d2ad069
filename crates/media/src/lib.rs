//! Media-room client
//!
//! A per-binding handle that joins a room on the media server, produces the
//! agent's voice and consumes the room mix. The media server itself is a
//! collaborator reached through the [`MediaTransport`] RPC contract;
//! [`LoopbackTransport`] is the in-process implementation used by tests and
//! single-process runs.
//!
//! Transport drops move the client to `DisconnectedTransient` and a
//! supervised reconnect task with a bounded budget takes over; exhaustion
//! closes the client and the owning binding is torn down.

pub mod client;
pub mod loopback;
pub mod rpc;
pub mod wire;

pub use client::{ClientState, MediaClientConfig, MediaRoomClient};
pub use loopback::LoopbackTransport;
pub use rpc::{MediaTransport, Participant, ParticipantKind, TransportState};

use std::time::Duration;
use thiserror::Error;

/// Media client errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("media transport error: {0}")]
    Transport(String),

    #[error("media rpc timed out after {0:?}")]
    Timeout(Duration),

    #[error("client is not active")]
    NotActive,

    #[error("reconnect budget exhausted")]
    Unrecoverable,

    #[error("unknown room: {0}")]
    UnknownRoom(String),

    #[error("unknown producer: {0}")]
    UnknownProducer(String),

    #[error("unknown consumer: {0}")]
    UnknownConsumer(String),

    #[error("payload framing error: {0}")]
    Framing(String),
}

impl From<MediaError> for chorus_core::Error {
    fn from(err: MediaError) -> Self {
        match &err {
            MediaError::Transport(_) | MediaError::Timeout(_) | MediaError::NotActive => {
                chorus_core::Error::transport_unavailable(err.to_string())
            },
            MediaError::Unrecoverable => chorus_core::Error::media_unrecoverable(err.to_string()),
            MediaError::UnknownRoom(_)
            | MediaError::UnknownProducer(_)
            | MediaError::UnknownConsumer(_) => chorus_core::Error::not_found(err.to_string()),
            MediaError::Framing(_) => chorus_core::Error::invalid_argument(err.to_string()),
        }
    }
}
