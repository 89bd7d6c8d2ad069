//! Lifecycle and status events
//!
//! Every state change the orchestrator commits is announced as a
//! [`CoreEvent`], fanned out to in-process observers and mirrored onto the
//! message bus under the topic returned by [`CoreEvent::topic`]. Events are
//! emitted after the change they describe is committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentStatus, Message};

/// Why a speaking turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakEndReason {
    /// Audio ran to completion
    Completed,
    /// Stopped by an explicit cancel
    Cancelled,
    /// Arbiter hit the speaking time limit
    ForcedStop,
    /// Synthesis or media production failed mid-turn
    Error,
}

impl SpeakEndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakEndReason::Completed => "completed",
            SpeakEndReason::Cancelled => "cancelled",
            SpeakEndReason::ForcedStop => "forced-stop",
            SpeakEndReason::Error => "error",
        }
    }
}

/// Orchestrator event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum CoreEvent {
    AgentCreated {
        agent_id: String,
        ts: DateTime<Utc>,
    },
    AgentDeleted {
        agent_id: String,
        ts: DateTime<Utc>,
    },
    AgentStatusChanged {
        agent_id: String,
        old: AgentStatus,
        new: AgentStatus,
        ts: DateTime<Utc>,
    },
    AgentUpdated {
        agent_id: String,
        ts: DateTime<Utc>,
    },
    SpeakingStart {
        agent_id: String,
        room_id: String,
        text: String,
        /// Per-room monotonic turn sequence
        seq: u64,
        ts: DateTime<Utc>,
    },
    SpeakingEnd {
        agent_id: String,
        room_id: String,
        reason: SpeakEndReason,
        seq: u64,
        ts: DateTime<Utc>,
    },
    RoomJoined {
        agent_id: String,
        room_id: String,
        ts: DateTime<Utc>,
    },
    RoomLeft {
        agent_id: String,
        room_id: String,
        ts: DateTime<Utc>,
    },
    ConversationMessage {
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        message: Message,
        ts: DateTime<Utc>,
    },
    TranscriptionUpdate {
        room_id: String,
        origin: String,
        text: String,
        confidence: f32,
        is_final: bool,
        ts: DateTime<Utc>,
    },
}

impl CoreEvent {
    /// Bus topic this event is mirrored to
    pub fn topic(&self) -> &'static str {
        match self {
            CoreEvent::AgentCreated { .. } => "agent.created",
            CoreEvent::AgentDeleted { .. } => "agent.deleted",
            CoreEvent::AgentStatusChanged { .. } => "agent.status-changed",
            CoreEvent::AgentUpdated { .. } => "agent.updated",
            CoreEvent::SpeakingStart { .. } => "agent.speaking.start",
            CoreEvent::SpeakingEnd { .. } => "agent.speaking.end",
            CoreEvent::RoomJoined { .. } => "room.joined",
            CoreEvent::RoomLeft { .. } => "room.left",
            CoreEvent::ConversationMessage { .. } => "conversation.message",
            CoreEvent::TranscriptionUpdate { .. } => "transcription.update",
        }
    }

    /// Agent the event refers to, when it has one
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            CoreEvent::AgentCreated { agent_id, .. }
            | CoreEvent::AgentDeleted { agent_id, .. }
            | CoreEvent::AgentStatusChanged { agent_id, .. }
            | CoreEvent::AgentUpdated { agent_id, .. }
            | CoreEvent::SpeakingStart { agent_id, .. }
            | CoreEvent::SpeakingEnd { agent_id, .. }
            | CoreEvent::RoomJoined { agent_id, .. }
            | CoreEvent::RoomLeft { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }

    pub fn ts(&self) -> DateTime<Utc> {
        match self {
            CoreEvent::AgentCreated { ts, .. }
            | CoreEvent::AgentDeleted { ts, .. }
            | CoreEvent::AgentStatusChanged { ts, .. }
            | CoreEvent::AgentUpdated { ts, .. }
            | CoreEvent::SpeakingStart { ts, .. }
            | CoreEvent::SpeakingEnd { ts, .. }
            | CoreEvent::RoomJoined { ts, .. }
            | CoreEvent::RoomLeft { ts, .. }
            | CoreEvent::ConversationMessage { ts, .. }
            | CoreEvent::TranscriptionUpdate { ts, .. } => *ts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        let ev = CoreEvent::SpeakingStart {
            agent_id: "a1".into(),
            room_id: "r1".into(),
            text: "hello".into(),
            seq: 1,
            ts: Utc::now(),
        };
        assert_eq!(ev.topic(), "agent.speaking.start");
        assert_eq!(ev.agent_id(), Some("a1"));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let ev = CoreEvent::AgentCreated {
            agent_id: "a1".into(),
            ts: Utc::now(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "agent-created");
        assert_eq!(json["agent_id"], "a1");
    }
}
