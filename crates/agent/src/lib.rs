//! Agent: persona, rolling context, per-agent voice state
//!
//! An [`Agent`] owns its persona text, a bounded FIFO history, its current
//! [`chorus_core::AgentStatus`], and the provider parameters it answers
//! with. Agents are created and destroyed by the manager; their status is
//! driven by their own processing paths and the room arbiter.

pub mod agent;
pub mod prompt;

pub use agent::{Agent, AgentLimits, AgentMetrics, AgentMetricsSnapshot, AgentSnapshot};
