//! Agent status

use serde::{Deserialize, Serialize};

/// Agent processing state
///
/// Transitions are driven by the agent's own processing paths and by the
/// room arbiter; at most one agent per room is `Speaking` at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Not attached to a room, nothing in flight
    #[default]
    Idle,
    /// Attached to a room, eligible to respond
    Listening,
    /// Waiting on a language-model reply
    Thinking,
    /// Holding the room's speaking turn
    Speaking,
    /// Handling a direct text exchange
    Processing,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Listening => "listening",
            AgentStatus::Thinking => "thinking",
            AgentStatus::Speaking => "speaking",
            AgentStatus::Processing => "processing",
        }
    }

    /// Whether the agent currently has work in flight
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            AgentStatus::Thinking | AgentStatus::Speaking | AgentStatus::Processing
        )
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
