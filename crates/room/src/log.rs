//! Room conversation log
//!
//! Every transcription and every utterance lands here in arrival order as
//! observed by the arbiter, bounded per room with oldest-first eviction.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// One conversation-log entry
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum LogEntry {
    /// Heard in the room
    Transcript {
        origin: String,
        text: String,
        confidence: f32,
        ts: DateTime<Utc>,
    },
    /// Spoken by an agent
    Utterance {
        speaker: String,
        text: String,
        ts: DateTime<Utc>,
    },
    /// The arbiter cut a speaker off at the time limit
    ForcedStop { speaker: String, ts: DateTime<Utc> },
}

/// Bounded transcript-and-utterance log
#[derive(Debug)]
pub struct ConversationLog {
    entries: VecDeque<LogEntry>,
    cap: usize,
}

impl ConversationLog {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn transcript(&mut self, origin: impl Into<String>, text: impl Into<String>, confidence: f32) {
        self.push(LogEntry::Transcript {
            origin: origin.into(),
            text: text.into(),
            confidence,
            ts: Utc::now(),
        });
    }

    pub fn utterance(&mut self, speaker: impl Into<String>, text: impl Into<String>) {
        self.push(LogEntry::Utterance {
            speaker: speaker.into(),
            text: text.into(),
            ts: Utc::now(),
        });
    }

    pub fn forced_stop(&mut self, speaker: impl Into<String>) {
        self.push(LogEntry::ForcedStop {
            speaker: speaker.into(),
            ts: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_evicts_oldest() {
        let mut log = ConversationLog::new(3);
        for i in 0..5 {
            log.transcript("peer", format!("t{}", i), 0.9);
        }
        assert_eq!(log.len(), 3);
        let entries: Vec<_> = log.entries().collect();
        match entries[0] {
            LogEntry::Transcript { text, .. } => assert_eq!(text, "t2"),
            other => panic!("unexpected entry: {:?}", other),
        }
    }

    #[test]
    fn test_mixed_entries_in_order() {
        let mut log = ConversationLog::new(10);
        log.transcript("peer", "hello", 0.8);
        log.utterance("a1", "hi there");
        log.forced_stop("a1");
        let kinds: Vec<&'static str> = log
            .entries()
            .map(|e| match e {
                LogEntry::Transcript { .. } => "t",
                LogEntry::Utterance { .. } => "u",
                LogEntry::ForcedStop { .. } => "f",
            })
            .collect();
        assert_eq!(kinds, vec!["t", "u", "f"]);
    }
}
