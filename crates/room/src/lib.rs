//! Room arbiter: serialized turn-taking per room
//!
//! The arbiter owns who may speak, the FIFO turn queue, the speaking-time
//! limit, the bounded conversation log, and response triggering from final
//! transcripts. Everything mutating a room's state runs on that room's
//! single actor task.

pub mod arbiter;
pub mod log;
pub mod strategy;

pub use arbiter::{ArbiterConfig, EventSink, RoomArbiter, RoomSnapshot, TurnSink};
pub use log::{ConversationLog, LogEntry};
pub use strategy::{FirstEligible, ResponderStrategy, UniformRandom};
