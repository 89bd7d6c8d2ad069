//! Core types for the chorus room orchestrator
//!
//! This crate provides the foundational types shared by all other crates:
//! - The error taxonomy every public operation reports against
//! - Conversation messages and agent status
//! - Lifecycle events and their bus-topic mapping
//! - Audio frame types and format conversions

pub mod audio;
pub mod error;
pub mod event;
pub mod message;
pub mod profile;
pub mod status;

pub use audio::{AudioEncoding, AudioFrame, Channels, EncodedAudio, SampleRate};
pub use error::{Error, ErrorKind, Result};
pub use event::{CoreEvent, SpeakEndReason};
pub use message::{Destination, Message, MessageKind, MessageMeta};
pub use profile::{AgentProfile, LlmParams, VoiceProfile};
pub use status::AgentStatus;
