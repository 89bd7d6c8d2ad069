//! JSON envelopes for the control topics
//!
//! Payload shapes are stable: unknown fields are ignored on decode, optional
//! fields are omitted on encode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chorus_core::AgentProfile;

/// `agent.create`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAgentRequest {
    pub persona: String,
    /// Caller-chosen id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<AgentProfile>,
    /// Optional system note seeded into history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
}

/// `agent.delete`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteAgentRequest {
    pub id: String,
}

/// Join options for `agent.join-room`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinOptions {
    /// Consume room audio and feed the ingress pipeline
    #[serde(default = "default_true")]
    pub listen: bool,
    /// Allow the agent to produce audio into the room
    #[serde(default = "default_true")]
    pub speak: bool,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            listen: true,
            speak: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// `agent.join-room`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRoomRequest {
    pub id: String,
    pub room: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<JoinOptions>,
}

/// `agent.leave-room`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRoomRequest {
    pub id: String,
}

/// `agent.speak`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakRequest {
    pub id: String,
    pub text: String,
}

/// `agent.stop-speak`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopSpeakRequest {
    pub id: String,
}

/// `transcription.final`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionFinal {
    /// STT session id; by convention "<room>-<origin>"
    pub session: String,
    pub text: String,
    pub confidence: f32,
    #[serde(default = "Utc::now")]
    pub ts: DateTime<Utc>,
}

impl TranscriptionFinal {
    /// Room and origin parts of the session id
    pub fn split_session(&self) -> (&str, &str) {
        match self.session.split_once('-') {
            Some((room, origin)) => (room, origin),
            None => (self.session.as_str(), "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_decode_minimal() {
        let req: CreateAgentRequest =
            serde_json::from_str(r#"{"persona":"a helpful guide"}"#).unwrap();
        assert_eq!(req.persona, "a helpful guide");
        assert!(req.id.is_none());
        assert!(req.config.is_none());
    }

    #[test]
    fn test_join_options_default_on() {
        let req: JoinRoomRequest =
            serde_json::from_str(r#"{"id":"a1","room":"lobby","options":{}}"#).unwrap();
        let opts = req.options.unwrap();
        assert!(opts.listen);
        assert!(opts.speak);
    }

    #[test]
    fn test_transcription_session_split() {
        let t = TranscriptionFinal {
            session: "lobby-peer7".into(),
            text: "hello".into(),
            confidence: 0.9,
            ts: Utc::now(),
        };
        assert_eq!(t.split_session(), ("lobby", "peer7"));
    }
}
