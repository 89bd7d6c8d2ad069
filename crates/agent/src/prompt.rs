//! Prompt assembly
//!
//! The persona is the system directive; the last ten text exchanges from
//! history become chat turns attributed by origin id. Voice and system
//! entries never enter the prompt - a live transcript is passed explicitly
//! as the closing turn instead.

use chorus_core::{LlmParams, Message};
use chorus_providers::{ChatRequest, ChatTurn};

/// History entries included in a prompt
const PROMPT_HISTORY_TURNS: usize = 10;

/// Build a request from persona, history, and an optional live transcript
pub fn build_request(
    persona: &str,
    history: &[Message],
    live_turn: Option<ChatTurn>,
    params: &LlmParams,
) -> ChatRequest {
    let mut turns: Vec<ChatTurn> = history
        .iter()
        .filter(|m| m.kind.is_text())
        .rev()
        .take(PROMPT_HISTORY_TURNS)
        .map(|m| ChatTurn {
            speaker: m.from.clone(),
            text: m.content.clone(),
        })
        .collect();
    turns.reverse();

    if let Some(turn) = live_turn {
        turns.push(turn);
    }

    ChatRequest {
        system: persona.to_string(),
        turns,
        model: params.model.clone(),
        temperature: params.temperature,
        // Character budget to a coarse token budget
        max_tokens: (params.max_reply_chars / 4).max(16),
    }
}

/// Trim a reply to the configured character budget on a char boundary
pub fn clip_reply(reply: &str, max_chars: usize) -> String {
    if reply.chars().count() <= max_chars {
        reply.to_string()
    } else {
        reply.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::LlmParams;

    #[test]
    fn test_prompt_filters_voice_and_system() {
        let history = vec![
            Message::inbound_text("peer", "a1", "first"),
            Message::inbound_voice("peer", "spoken words", 0.9),
            Message::system("a1", "note"),
            Message::outbound_text("a1", "peer", "second"),
        ];
        let req = build_request("persona", &history, None, &LlmParams::default());
        assert_eq!(req.turns.len(), 2);
        assert_eq!(req.turns[0].text, "first");
        assert_eq!(req.turns[1].speaker, "a1");
    }

    #[test]
    fn test_prompt_keeps_last_ten() {
        let history: Vec<Message> = (0..25)
            .map(|i| Message::inbound_text("peer", "a1", format!("m{}", i)))
            .collect();
        let req = build_request("persona", &history, None, &LlmParams::default());
        assert_eq!(req.turns.len(), 10);
        assert_eq!(req.turns[0].text, "m15");
        assert_eq!(req.turns[9].text, "m24");
    }

    #[test]
    fn test_live_turn_is_last() {
        let history = vec![Message::inbound_text("peer", "a1", "old")];
        let req = build_request(
            "persona",
            &history,
            Some(ChatTurn {
                speaker: "peer7".into(),
                text: "just now".into(),
            }),
            &LlmParams::default(),
        );
        assert_eq!(req.turns.last().unwrap().text, "just now");
    }

    #[test]
    fn test_clip_reply_respects_boundary() {
        assert_eq!(clip_reply("hello", 10), "hello");
        assert_eq!(clip_reply("hello", 3), "hel");
        // Multi-byte chars are never split
        assert_eq!(clip_reply("héllo", 2), "hé");
    }
}
