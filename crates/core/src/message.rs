//! Conversation message types
//!
//! A [`Message`] is one entry in an agent's rolling history: a text or voice
//! exchange, or a system note. History is FIFO-trimmed at the configured cap
//! by the owning agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Text addressed to an agent
    InboundText,
    /// Text produced by an agent
    OutboundText,
    /// Transcribed room audio attributed to a speaker
    InboundVoice,
    /// Text an agent spoke into a room
    OutboundVoice,
    /// Orchestrator-originated note (greeting, forced stop, ...)
    System,
}

impl MessageKind {
    /// Text exchanges feed the LLM prompt; voice and system entries do not
    pub fn is_text(&self) -> bool {
        matches!(self, MessageKind::InboundText | MessageKind::OutboundText)
    }
}

/// Message destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// A specific agent id
    Agent(String),
    /// Everyone in the room
    Broadcast,
}

/// Optional per-message annotations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Transcript confidence (0.0 - 1.0), voice messages only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// End-to-end response latency
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Provider/model that produced the content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_tag: Option<String>,
}

/// One entry in an agent's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique id
    pub id: Uuid,
    /// Kind of exchange
    pub kind: MessageKind,
    /// UTF-8 content
    pub content: String,
    /// Origin id (agent id, room participant id, or "system")
    pub from: String,
    /// Destination
    pub to: Destination,
    /// Wall-clock timestamp
    pub ts: DateTime<Utc>,
    /// Annotations
    #[serde(default)]
    pub meta: MessageMeta,
}

impl Message {
    pub fn new(
        kind: MessageKind,
        from: impl Into<String>,
        to: Destination,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            content: content.into(),
            from: from.into(),
            to,
            ts: Utc::now(),
            meta: MessageMeta::default(),
        }
    }

    /// Text addressed to `to`
    pub fn inbound_text(
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            MessageKind::InboundText,
            from,
            Destination::Agent(to.into()),
            content,
        )
    }

    /// Agent reply text
    pub fn outbound_text(
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            MessageKind::OutboundText,
            from,
            Destination::Agent(to.into()),
            content,
        )
    }

    /// Transcribed room audio
    pub fn inbound_voice(
        from: impl Into<String>,
        content: impl Into<String>,
        confidence: f32,
    ) -> Self {
        let mut msg = Self::new(
            MessageKind::InboundVoice,
            from,
            Destination::Broadcast,
            content,
        );
        msg.meta.confidence = Some(confidence);
        msg
    }

    /// Utterance an agent spoke into its room
    pub fn outbound_voice(from: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            MessageKind::OutboundVoice,
            from,
            Destination::Broadcast,
            content,
        )
    }

    /// Orchestrator note
    pub fn system(to: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            MessageKind::System,
            "system",
            Destination::Agent(to.into()),
            content,
        )
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.meta.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_model_tag(mut self, tag: impl Into<String>) -> Self {
        self.meta.model_tag = Some(tag.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_filter() {
        assert!(MessageKind::InboundText.is_text());
        assert!(MessageKind::OutboundText.is_text());
        assert!(!MessageKind::InboundVoice.is_text());
        assert!(!MessageKind::System.is_text());
    }

    #[test]
    fn test_voice_message_carries_confidence() {
        let msg = Message::inbound_voice("peer-1", "hello there", 0.92);
        assert_eq!(msg.kind, MessageKind::InboundVoice);
        assert_eq!(msg.meta.confidence, Some(0.92));
        assert_eq!(msg.to, Destination::Broadcast);
    }

    #[test]
    fn test_builder_meta() {
        let msg = Message::outbound_text("a", "b", "hi")
            .with_latency(120)
            .with_model_tag("small-8b");
        assert_eq!(msg.meta.latency_ms, Some(120));
        assert_eq!(msg.meta.model_tag.as_deref(), Some("small-8b"));
    }
}
