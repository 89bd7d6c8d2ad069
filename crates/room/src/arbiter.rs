//! Room arbiter
//!
//! One actor task per room; every mutation of room state happens on that
//! task, which is the serialization contract the rest of the core relies
//! on. Provider calls never run on the actor: turns execute on spawned
//! tasks whose completions come back as commands.
//!
//! ```text
//! idle ──request-to-speak──▶ speaking(agent, t0)
//!                                │ (request while speaking) → enqueue FIFO
//!                                ▼
//!                        [speaking-time-limit]
//!                                ├── finished/cancelled ──▶ idle, drain queue
//!                                └── timer expired ──▶ force-stop, idle, drain
//! ```

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use chorus_agent::Agent;
use chorus_core::{AgentStatus, CoreEvent, Error, Message, Result, SpeakEndReason};

use crate::log::{ConversationLog, LogEntry};
use crate::strategy::ResponderStrategy;

/// Observer callback for committed room events
pub type EventSink = Arc<dyn Fn(CoreEvent) + Send + Sync>;

/// Where a turn's audio goes
///
/// Implemented by the manager over the binding's synthesis and egress
/// plumbing. `begin_utterance` returns the expected playback duration;
/// the arbiter closes the turn when it elapses or the limit hits first.
#[async_trait]
pub trait TurnSink: Send + Sync {
    async fn begin_utterance(&self, agent_id: &str, text: &str) -> Result<Duration>;

    /// Stop production early (forced stop or cancel)
    async fn stop_utterance(&self, agent_id: &str);
}

/// Arbiter knobs, sourced from settings by the manager
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    pub speaking_time_limit: Duration,
    pub turn_queue_cap: usize,
    pub log_cap: usize,
    pub confidence_floor: f32,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            speaking_time_limit: Duration::from_secs(30),
            turn_queue_cap: 16,
            log_cap: 1000,
            confidence_floor: 0.7,
        }
    }
}

/// Point-in-time room view
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub agents: Vec<String>,
    pub current_speaker: Option<String>,
    pub queue_len: usize,
    pub log: Vec<LogEntry>,
}

enum RoomCommand {
    RequestSpeak {
        agent_id: String,
        text: String,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    CancelSpeak {
        agent_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    TurnFinished {
        seq: u64,
        reason: SpeakEndReason,
    },
    TranscriptFinal {
        origin: String,
        text: String,
        confidence: f32,
    },
    AgentAttached {
        agent: Arc<Agent>,
    },
    AgentDetached {
        agent_id: String,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
    Shutdown,
}

struct QueuedTurn {
    agent_id: String,
    text: String,
}

struct ActiveTurn {
    agent_id: String,
    seq: u64,
    deadline: Instant,
    executor: JoinHandle<()>,
}

struct RoomState {
    room_id: String,
    config: ArbiterConfig,
    sink: Arc<dyn TurnSink>,
    events: EventSink,
    strategy: Arc<dyn ResponderStrategy>,
    cmd_tx: mpsc::Sender<RoomCommand>,
    attached: HashMap<String, Arc<Agent>>,
    queue: VecDeque<QueuedTurn>,
    current: Option<ActiveTurn>,
    log: ConversationLog,
    next_seq: u64,
}

impl RoomState {
    fn emit(&self, event: CoreEvent) {
        (self.events.as_ref())(event);
    }

    fn handle_request_speak(&mut self, agent_id: String, text: String) -> Result<()> {
        if text.trim().is_empty() {
            return Err(Error::invalid_argument("speak text is empty"));
        }
        if !self.attached.contains_key(&agent_id) {
            return Err(Error::not_found(format!(
                "agent {} is not in room {}",
                agent_id, self.room_id
            )));
        }

        if self.current.is_none() {
            self.start_turn(agent_id, text);
            return Ok(());
        }

        if self.queue.len() >= self.config.turn_queue_cap {
            return Err(Error::busy(format!(
                "turn queue full in room {}",
                self.room_id
            )));
        }
        self.queue.push_back(QueuedTurn { agent_id, text });
        Ok(())
    }

    fn start_turn(&mut self, agent_id: String, text: String) {
        let Some(agent) = self.attached.get(&agent_id) else {
            return;
        };

        let seq = self.next_seq;
        self.next_seq += 1;

        agent.set_status(AgentStatus::Speaking);
        agent.note_voice_turn();
        agent.append_history(Message::outbound_voice(&agent_id, &text));
        self.log.utterance(&agent_id, &text);

        self.emit(CoreEvent::SpeakingStart {
            agent_id: agent_id.clone(),
            room_id: self.room_id.clone(),
            text: text.clone(),
            seq,
            ts: Utc::now(),
        });

        let sink = Arc::clone(&self.sink);
        let cmd_tx = self.cmd_tx.clone();
        let executor_agent = agent_id.clone();
        let executor = tokio::spawn(async move {
            let outcome = sink.begin_utterance(&executor_agent, &text).await;
            let reason = match outcome {
                Ok(playback) => {
                    tokio::time::sleep(playback).await;
                    SpeakEndReason::Completed
                },
                Err(e) => {
                    tracing::warn!(
                        agent_id = %executor_agent,
                        error = %e,
                        "utterance production failed"
                    );
                    SpeakEndReason::Error
                },
            };
            let _ = cmd_tx.send(RoomCommand::TurnFinished { seq, reason }).await;
        });

        self.current = Some(ActiveTurn {
            agent_id,
            seq,
            deadline: Instant::now() + self.config.speaking_time_limit,
            executor,
        });
    }

    fn handle_turn_finished(&mut self, seq: u64, reason: SpeakEndReason) {
        match &self.current {
            Some(turn) if turn.seq == seq => self.end_turn(reason),
            _ => {}, // stale completion from an already-ended turn
        }
    }

    fn end_turn(&mut self, reason: SpeakEndReason) {
        let Some(turn) = self.current.take() else {
            return;
        };
        turn.executor.abort();

        if reason != SpeakEndReason::Completed {
            let sink = Arc::clone(&self.sink);
            let agent_id = turn.agent_id.clone();
            tokio::spawn(async move {
                sink.stop_utterance(&agent_id).await;
            });
        }
        if reason == SpeakEndReason::ForcedStop {
            self.log.forced_stop(&turn.agent_id);
            tracing::warn!(
                room_id = %self.room_id,
                agent_id = %turn.agent_id,
                "speaking time limit hit, forced stop"
            );
        }

        if let Some(agent) = self.attached.get(&turn.agent_id) {
            agent.set_status(AgentStatus::Listening);
        }

        self.emit(CoreEvent::SpeakingEnd {
            agent_id: turn.agent_id.clone(),
            room_id: self.room_id.clone(),
            reason,
            seq: turn.seq,
            ts: Utc::now(),
        });

        // Head of the queue speaks next; entries for detached agents drop
        while self.current.is_none() {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            if !self.attached.contains_key(&next.agent_id) {
                continue;
            }
            self.start_turn(next.agent_id, next.text);
        }

        // The finished speaker's own queued speech re-enters the room queue
        let queued = self
            .attached
            .get(&turn.agent_id)
            .and_then(|agent| agent.pop_speech());
        if let Some(queued) = queued {
            if let Err(e) = self.handle_request_speak(turn.agent_id.clone(), queued) {
                tracing::debug!(agent_id = %turn.agent_id, error = %e, "queued speech dropped");
            }
        }
    }

    fn handle_cancel(&mut self, agent_id: &str) -> Result<()> {
        if self
            .current
            .as_ref()
            .map(|t| t.agent_id == agent_id)
            .unwrap_or(false)
        {
            self.end_turn(SpeakEndReason::Cancelled);
            return Ok(());
        }

        let before = self.queue.len();
        self.queue.retain(|q| q.agent_id != agent_id);
        if self.queue.len() != before {
            Ok(())
        } else {
            Err(Error::not_found(format!(
                "agent {} has no active or queued speak",
                agent_id
            )))
        }
    }

    fn handle_transcript(&mut self, origin: String, text: String, confidence: f32) {
        self.log.transcript(&origin, &text, confidence);
        self.emit(CoreEvent::TranscriptionUpdate {
            room_id: self.room_id.clone(),
            origin: origin.clone(),
            text: text.clone(),
            confidence,
            is_final: true,
            ts: Utc::now(),
        });

        if confidence < self.config.confidence_floor {
            return; // logged, never answered
        }
        if self.current.is_some() {
            return; // someone is speaking; logged only
        }

        let eligible: Vec<String> = self
            .attached
            .values()
            .filter(|a| a.id() != origin && a.status() == AgentStatus::Listening)
            .map(|a| a.id().to_string())
            .collect();

        let Some(pick) = self.strategy.select(&eligible) else {
            return;
        };
        let Some(agent) = self.attached.get(&pick).cloned() else {
            return;
        };

        let cmd_tx = self.cmd_tx.clone();
        let events = Arc::clone(&self.events);
        let room_id = self.room_id.clone();
        tokio::spawn(async move {
            match agent.process_voice(&origin, &text, confidence).await {
                Ok(Some(reply)) => {
                    (events.as_ref())(CoreEvent::ConversationMessage {
                        room_id: Some(room_id),
                        message: Message::outbound_voice(agent.id(), &reply),
                        ts: Utc::now(),
                    });
                    let _ = cmd_tx
                        .send(RoomCommand::RequestSpeak {
                            agent_id: agent.id().to_string(),
                            text: reply,
                            reply: None,
                        })
                        .await;
                },
                Ok(None) => {},
                Err(e) => {
                    tracing::warn!(
                        agent_id = %agent.id(),
                        error = %e,
                        "responder declined"
                    );
                },
            }
        });
    }

    fn handle_detached(&mut self, agent_id: &str) {
        self.attached.remove(agent_id);
        self.queue.retain(|q| q.agent_id != agent_id);
        if self
            .current
            .as_ref()
            .map(|t| t.agent_id == agent_id)
            .unwrap_or(false)
        {
            self.end_turn(SpeakEndReason::Cancelled);
        }
    }

    fn snapshot(&self) -> RoomSnapshot {
        let mut agents: Vec<String> = self.attached.keys().cloned().collect();
        agents.sort();
        RoomSnapshot {
            room_id: self.room_id.clone(),
            agents,
            current_speaker: self.current.as_ref().map(|t| t.agent_id.clone()),
            queue_len: self.queue.len(),
            log: self.log.to_vec(),
        }
    }
}

async fn run(mut state: RoomState, mut rx: mpsc::Receiver<RoomCommand>) {
    loop {
        let deadline = state.current.as_ref().map(|t| t.deadline);

        tokio::select! {
            maybe_cmd = rx.recv() => {
                let Some(cmd) = maybe_cmd else { break };
                match cmd {
                    RoomCommand::RequestSpeak { agent_id, text, reply } => {
                        let result = state.handle_request_speak(agent_id, text);
                        match reply {
                            Some(tx) => {
                                let _ = tx.send(result);
                            },
                            None => {
                                if let Err(e) = result {
                                    tracing::debug!(room_id = %state.room_id, error = %e, "deferred speak rejected");
                                }
                            },
                        }
                    },
                    RoomCommand::CancelSpeak { agent_id, reply } => {
                        let _ = reply.send(state.handle_cancel(&agent_id));
                    },
                    RoomCommand::TurnFinished { seq, reason } => {
                        state.handle_turn_finished(seq, reason);
                    },
                    RoomCommand::TranscriptFinal { origin, text, confidence } => {
                        state.handle_transcript(origin, text, confidence);
                    },
                    RoomCommand::AgentAttached { agent } => {
                        state.attached.insert(agent.id().to_string(), agent);
                    },
                    RoomCommand::AgentDetached { agent_id, reply } => {
                        state.handle_detached(&agent_id);
                        let _ = reply.send(());
                    },
                    RoomCommand::Snapshot { reply } => {
                        let _ = reply.send(state.snapshot());
                    },
                    RoomCommand::Shutdown => break,
                }
            }
            _ = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                state.end_turn(SpeakEndReason::ForcedStop);
            }
        }
    }

    if let Some(turn) = state.current.take() {
        turn.executor.abort();
    }
    tracing::debug!(room_id = %state.room_id, "room arbiter stopped");
}

/// Handle onto one room's arbiter actor
pub struct RoomArbiter {
    room_id: String,
    cmd_tx: mpsc::Sender<RoomCommand>,
    task: JoinHandle<()>,
}

impl RoomArbiter {
    pub fn spawn(
        room_id: impl Into<String>,
        config: ArbiterConfig,
        sink: Arc<dyn TurnSink>,
        events: EventSink,
        strategy: Arc<dyn ResponderStrategy>,
    ) -> Self {
        let room_id = room_id.into();
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let state = RoomState {
            room_id: room_id.clone(),
            log: ConversationLog::new(config.log_cap),
            config,
            sink,
            events,
            strategy,
            cmd_tx: cmd_tx.clone(),
            attached: HashMap::new(),
            queue: VecDeque::new(),
            current: None,
            next_seq: 0,
        };
        let task = tokio::spawn(run(state, cmd_rx));
        Self {
            room_id,
            cmd_tx,
            task,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Ask to speak; starts now or queues FIFO behind the current speaker
    pub async fn request_speak(&self, agent_id: &str, text: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(RoomCommand::RequestSpeak {
                agent_id: agent_id.to_string(),
                text: text.to_string(),
                reply: Some(tx),
            })
            .await
            .map_err(|_| Error::not_found(format!("room {} is closed", self.room_id)))?;
        rx.await
            .map_err(|_| Error::cancelled("room arbiter stopped"))?
    }

    /// Cancel the agent's current turn or drop its queued requests
    pub async fn cancel_speak(&self, agent_id: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(RoomCommand::CancelSpeak {
                agent_id: agent_id.to_string(),
                reply: tx,
            })
            .await
            .map_err(|_| Error::not_found(format!("room {} is closed", self.room_id)))?;
        rx.await
            .map_err(|_| Error::cancelled("room arbiter stopped"))?
    }

    /// Feed a finalized transcript into the room
    pub async fn transcript_final(&self, origin: &str, text: &str, confidence: f32) {
        let sent = self
            .cmd_tx
            .send(RoomCommand::TranscriptFinal {
                origin: origin.to_string(),
                text: text.to_string(),
                confidence,
            })
            .await;
        if sent.is_err() {
            tracing::debug!(room_id = %self.room_id, "transcript for closed room dropped");
        }
    }

    pub async fn agent_attached(&self, agent: Arc<Agent>) {
        let _ = self.cmd_tx.send(RoomCommand::AgentAttached { agent }).await;
    }

    /// Detach and wait until the arbiter has purged the agent
    pub async fn agent_detached(&self, agent_id: &str) {
        let (tx, rx) = oneshot::channel();
        let sent = self
            .cmd_tx
            .send(RoomCommand::AgentDetached {
                agent_id: agent_id.to_string(),
                reply: tx,
            })
            .await;
        if sent.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn snapshot(&self) -> Option<RoomSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(RoomCommand::Snapshot { reply: tx })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(RoomCommand::Shutdown).await;
    }
}

impl Drop for RoomArbiter {
    fn drop(&mut self) {
        self.task.abort();
    }
}
