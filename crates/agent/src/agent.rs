//! The agent: a persona-bound participant with history and a voice
//!
//! Mutated only by its own processing paths and the arbiter's status
//! transitions. History is FIFO-bounded; the speech queue is bounded and
//! rejects with `Busy` when full.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use chorus_core::{AgentProfile, AgentStatus, EncodedAudio, Error, Message, Result};
use chorus_providers::{ChatTurn, LlmService, TtsService};

use crate::prompt;

/// Reply used when the language model fails mid-exchange
const FALLBACK_REPLY: &str = "I'm sorry, I lost my train of thought. Could you say that again?";

/// Per-agent activity counters
#[derive(Debug, Default)]
pub struct AgentMetrics {
    messages: AtomicU64,
    llm_invocations: AtomicU64,
    tts_invocations: AtomicU64,
    voice_turns: AtomicU64,
}

impl AgentMetrics {
    pub fn snapshot(&self) -> AgentMetricsSnapshot {
        AgentMetricsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            llm_invocations: self.llm_invocations.load(Ordering::Relaxed),
            tts_invocations: self.tts_invocations.load(Ordering::Relaxed),
            voice_turns: self.voice_turns.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time metrics view
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AgentMetricsSnapshot {
    pub messages: u64,
    pub llm_invocations: u64,
    pub tts_invocations: u64,
    pub voice_turns: u64,
}

/// Point-in-time agent view, as returned by `get_agent`/`list_agents`
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub persona: String,
    pub status: AgentStatus,
    pub history_len: usize,
    pub profile: AgentProfile,
    pub metrics: AgentMetricsSnapshot,
    pub last_activity: DateTime<Utc>,
}

/// Agent caps, sourced from settings by the manager
#[derive(Debug, Clone)]
pub struct AgentLimits {
    pub history_cap: usize,
    pub speech_queue_cap: usize,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            history_cap: 100,
            speech_queue_cap: 8,
        }
    }
}

/// A persona-bound logical participant
pub struct Agent {
    id: String,
    persona: String,
    profile: RwLock<AgentProfile>,
    limits: AgentLimits,
    history: Mutex<VecDeque<Message>>,
    speech_queue: Mutex<VecDeque<String>>,
    status_tx: watch::Sender<AgentStatus>,
    last_activity: Mutex<Instant>,
    last_activity_wall: Mutex<DateTime<Utc>>,
    metrics: AgentMetrics,
    llm: Arc<LlmService>,
    tts: Arc<TtsService>,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        persona: impl Into<String>,
        profile: AgentProfile,
        limits: AgentLimits,
        llm: Arc<LlmService>,
        tts: Arc<TtsService>,
    ) -> Self {
        let (status_tx, _) = watch::channel(AgentStatus::Idle);
        Self {
            id: id.into(),
            persona: persona.into(),
            profile: RwLock::new(profile),
            limits,
            history: Mutex::new(VecDeque::new()),
            speech_queue: Mutex::new(VecDeque::new()),
            status_tx,
            last_activity: Mutex::new(Instant::now()),
            last_activity_wall: Mutex::new(Utc::now()),
            metrics: AgentMetrics::default(),
            llm,
            tts,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn persona(&self) -> &str {
        &self.persona
    }

    pub fn profile(&self) -> AgentProfile {
        self.profile.read().clone()
    }

    pub fn status(&self) -> AgentStatus {
        *self.status_tx.borrow()
    }

    /// Observe status transitions; the manager bridges these to events
    pub fn watch_status(&self) -> watch::Receiver<AgentStatus> {
        self.status_tx.subscribe()
    }

    /// Status transitions come from the agent's own paths and the arbiter
    pub fn set_status(&self, status: AgentStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    /// Counted by the arbiter at each speaking-turn start
    pub fn note_voice_turn(&self) {
        self.metrics.voice_turns.fetch_add(1, Ordering::Relaxed);
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
        *self.last_activity_wall.lock() = Utc::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.lock().elapsed()
    }

    /// Append to history, trimming FIFO at the cap
    pub fn append_history(&self, message: Message) {
        let mut history = self.history.lock();
        history.push_back(message);
        while history.len() > self.limits.history_cap {
            history.pop_front();
        }
        self.metrics.messages.fetch_add(1, Ordering::Relaxed);
        drop(history);
        self.touch();
    }

    pub fn history(&self) -> Vec<Message> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Handle a direct text exchange
    ///
    /// Appends the inbound message, asks the language model, appends and
    /// returns the reply. A provider failure yields the fixed fallback
    /// reply; status always returns to idle.
    pub async fn process_text(&self, message: Message) -> Message {
        let started = Instant::now();
        self.set_status(AgentStatus::Processing);
        let reply_to = message.from.clone();
        self.append_history(message);

        let request = {
            let profile = self.profile.read();
            let history = self.history();
            prompt::build_request(&self.persona, &history, None, &profile.llm)
        };

        self.metrics.llm_invocations.fetch_add(1, Ordering::Relaxed);
        let reply = match self.llm.generate_for(&self.id, &request).await {
            Ok(completion) => {
                let max_chars = self.profile.read().llm.max_reply_chars;
                Message::outbound_text(&self.id, &reply_to, prompt::clip_reply(&completion.reply, max_chars))
                    .with_model_tag(completion.model_tag)
                    .with_latency(started.elapsed().as_millis() as u64)
            },
            Err(e) => {
                tracing::warn!(agent_id = %self.id, error = %e, "text exchange fell back");
                Message::outbound_text(&self.id, &reply_to, FALLBACK_REPLY)
                    .with_latency(started.elapsed().as_millis() as u64)
            },
        };

        self.append_history(reply.clone());
        self.set_status(AgentStatus::Idle);
        reply
    }

    /// Produce a reply to a room transcript, on the arbiter's behalf
    ///
    /// Returns `Ok(None)` when the model had nothing to say. Errors mean
    /// the responder declined; the arbiter logs and stays idle.
    pub async fn process_voice(
        &self,
        origin: &str,
        transcript: &str,
        confidence: f32,
    ) -> Result<Option<String>> {
        self.set_status(AgentStatus::Thinking);
        self.append_history(Message::inbound_voice(origin, transcript, confidence));

        let request = {
            let profile = self.profile.read();
            let history = self.history();
            prompt::build_request(
                &self.persona,
                &history,
                Some(ChatTurn {
                    speaker: origin.to_string(),
                    text: transcript.to_string(),
                }),
                &profile.llm,
            )
        };

        self.metrics.llm_invocations.fetch_add(1, Ordering::Relaxed);
        let result = self.llm.generate_for(&self.id, &request).await;
        self.set_status(AgentStatus::Listening);

        match result {
            Ok(completion) => {
                let reply = completion.reply.trim().to_string();
                if reply.is_empty() {
                    Ok(None)
                } else {
                    let max_chars = self.profile.read().llm.max_reply_chars;
                    Ok(Some(prompt::clip_reply(&reply, max_chars)))
                }
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Synthesize without touching status; the arbiter owns turn state
    pub async fn synthesize(&self, text: &str) -> Result<EncodedAudio> {
        let voice = self.profile.read().voice.clone();
        self.metrics.tts_invocations.fetch_add(1, Ordering::Relaxed);
        let audio = self.tts.synthesize(text, &voice).await?;
        self.touch();
        Ok(audio)
    }

    /// Direct speak contract: status speaking during synthesis, idle after
    pub async fn speak(&self, text: &str) -> Result<EncodedAudio> {
        self.set_status(AgentStatus::Speaking);
        let result = self.synthesize(text).await;
        self.set_status(AgentStatus::Idle);
        result
    }

    /// Queue an utterance for when the current turn completes
    pub fn queue_speech(&self, text: impl Into<String>) -> Result<()> {
        let mut queue = self.speech_queue.lock();
        if queue.len() >= self.limits.speech_queue_cap {
            return Err(Error::busy(format!(
                "speech queue full for agent {}",
                self.id
            )));
        }
        queue.push_back(text.into());
        Ok(())
    }

    pub fn pop_speech(&self) -> Option<String> {
        self.speech_queue.lock().pop_front()
    }

    pub fn speech_queue_len(&self) -> usize {
        self.speech_queue.lock().len()
    }

    /// Replace configuration and re-bind the voice with the TTS adapter
    ///
    /// History is never touched; an unknown voice rejects the whole update.
    pub fn update_config(&self, new: AgentProfile) -> Result<()> {
        self.tts.validate_voice(&new.voice)?;
        *self.profile.write() = new;
        self.touch();
        tracing::info!(agent_id = %self.id, "agent configuration updated");
        Ok(())
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id.clone(),
            persona: self.persona.clone(),
            status: self.status(),
            history_len: self.history_len(),
            profile: self.profile(),
            metrics: self.metrics.snapshot(),
            last_activity: *self.last_activity_wall.lock(),
        }
    }
}
