//! Agent manager
//!
//! The front of the core: agent registry, agent-room bindings, caps, and
//! the operations external callers see. Lifecycle mutations (create,
//! delete, attach, detach) serialize on one async lock so the agent-room
//! maps stay mutual inverses at every observable point; reads go through
//! snapshots.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use uuid::Uuid;

use chorus_agent::{Agent, AgentLimits, AgentSnapshot};
use chorus_bus::envelope::JoinOptions;
use chorus_config::Settings;
use chorus_core::{
    AgentProfile, AgentStatus, CoreEvent, Error, Message, Result,
};
use chorus_media::{ClientState, MediaClientConfig, MediaTransport, Participant};
use chorus_pipeline::{EgressConfig, IngressConfig, StatsSnapshot};
use chorus_room::{ArbiterConfig, LogEntry, RoomArbiter, TurnSink, UniformRandom};

use crate::binding::{estimate_playback, Binding, BindingOptions};
use crate::events::EventHub;
use crate::providers::ProviderSet;

struct RoomEntry {
    arbiter: Arc<RoomArbiter>,
    members: HashSet<String>,
}

pub(crate) struct ManagerInner {
    settings: Settings,
    providers: ProviderSet,
    transport: Arc<dyn MediaTransport>,
    events: EventHub,
    agents: DashMap<String, Arc<Agent>>,
    agent_watchers: DashMap<String, tokio::task::JoinHandle<()>>,
    bindings: Mutex<HashMap<String, Arc<Binding>>>,
    rooms: Mutex<HashMap<String, RoomEntry>>,
    binding_watchers: DashMap<String, tokio::task::JoinHandle<()>>,
    /// Serializes lifecycle mutations; room-internal state serializes on
    /// each room's own actor
    op_lock: tokio::sync::Mutex<()>,
    started_at: Instant,
}

/// Room view returned by `get_room`
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: String,
    pub agents: Vec<String>,
    pub current_speaker: Option<String>,
    pub queue_len: usize,
    pub log: Vec<LogEntry>,
    pub participants: Vec<Participant>,
}

/// Pipeline counters for one binding
#[derive(Debug, Clone, Serialize)]
pub struct BindingStats {
    pub egress: Option<StatsSnapshot>,
    pub ingress: Option<StatsSnapshot>,
}

/// Process-wide orchestrator stats
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub agent_count: usize,
    pub room_count: usize,
    pub uptime_ms: u64,
    pub llm_available: bool,
    pub tts_available: bool,
    pub stt_available: bool,
    pub token_usage: HashMap<String, u64>,
    pub agents: Vec<AgentSnapshot>,
    pub pipelines: HashMap<String, BindingStats>,
}

/// The orchestrator's front door
#[derive(Clone)]
pub struct AgentManager {
    inner: Arc<ManagerInner>,
}

struct ManagerTurnSink {
    inner: Weak<ManagerInner>,
}

#[async_trait]
impl TurnSink for ManagerTurnSink {
    async fn begin_utterance(&self, agent_id: &str, text: &str) -> Result<Duration> {
        let inner = self
            .inner
            .upgrade()
            .ok_or_else(|| Error::cancelled("manager stopped"))?;
        let agent = inner
            .agents
            .get(agent_id)
            .map(|a| Arc::clone(&a))
            .ok_or_else(|| Error::not_found(format!("agent {} gone", agent_id)))?;
        let binding = inner
            .bindings
            .lock()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("agent {} has no binding", agent_id)))?;

        let audio = agent.synthesize(text).await?;
        let playback = estimate_playback(&audio);

        let sink = binding
            .egress_input()
            .ok_or_else(|| Error::transport_unavailable("voice path resetting"))?;
        sink.send(audio)
            .await
            .map_err(|_| Error::transport_unavailable("egress pipeline closed"))?;
        Ok(playback)
    }

    async fn stop_utterance(&self, agent_id: &str) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let binding = inner.bindings.lock().get(agent_id).cloned();
        if let Some(binding) = binding {
            Binding::reset_voice_path(&binding).await;
        }
    }
}

impl AgentManager {
    pub fn new(
        settings: Settings,
        providers: ProviderSet,
        transport: Arc<dyn MediaTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                settings,
                providers,
                transport,
                events: EventHub::default(),
                agents: DashMap::new(),
                agent_watchers: DashMap::new(),
                bindings: Mutex::new(HashMap::new()),
                rooms: Mutex::new(HashMap::new()),
                binding_watchers: DashMap::new(),
                op_lock: tokio::sync::Mutex::new(()),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.inner.events
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<CoreEvent> {
        self.inner.events.subscribe()
    }

    /// Create an agent; fails the same way whether called directly or via
    /// the bus
    pub async fn create_agent(
        &self,
        persona: &str,
        id: Option<String>,
        profile: Option<AgentProfile>,
        greeting: Option<String>,
    ) -> Result<AgentSnapshot> {
        let _guard = self.inner.op_lock.lock().await;

        if persona.trim().is_empty() {
            return Err(Error::invalid_argument("persona must not be empty"));
        }
        let id = match id {
            Some(id) if id.trim().is_empty() => {
                return Err(Error::invalid_argument("agent id must not be empty"))
            },
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };
        if self.inner.agents.contains_key(&id) {
            return Err(Error::already_exists(format!("agent {} already exists", id)));
        }
        if self.inner.agents.len() >= self.inner.settings.limits.max_agents {
            return Err(Error::capacity_exceeded(format!(
                "agent cap {} reached",
                self.inner.settings.limits.max_agents
            )));
        }

        let profile = profile.unwrap_or_default();
        self.inner.providers.tts.validate_voice(&profile.voice)?;

        let agent = Arc::new(Agent::new(
            &id,
            persona,
            profile,
            AgentLimits {
                history_cap: self.inner.settings.limits.history_cap,
                speech_queue_cap: self.inner.settings.limits.speech_queue_cap,
            },
            Arc::clone(&self.inner.providers.llm),
            Arc::clone(&self.inner.providers.tts),
        ));
        if let Some(greeting) = greeting {
            agent.append_history(Message::system(&id, greeting));
        }

        self.inner.agents.insert(id.clone(), Arc::clone(&agent));
        self.spawn_status_watcher(&id, &agent);

        tracing::info!(agent_id = %id, "agent created");
        self.inner.events.emit(CoreEvent::AgentCreated {
            agent_id: id,
            ts: Utc::now(),
        });
        Ok(agent.snapshot())
    }

    fn spawn_status_watcher(&self, id: &str, agent: &Arc<Agent>) {
        let mut rx = agent.watch_status();
        let events = self.inner.events.clone();
        let agent_id = id.to_string();
        let watcher = tokio::spawn(async move {
            let mut old = *rx.borrow();
            while rx.changed().await.is_ok() {
                let new = *rx.borrow();
                events.emit(CoreEvent::AgentStatusChanged {
                    agent_id: agent_id.clone(),
                    old,
                    new,
                    ts: Utc::now(),
                });
                old = new;
            }
        });
        self.inner.agent_watchers.insert(id.to_string(), watcher);
    }

    pub async fn delete_agent(&self, id: &str) -> Result<()> {
        let _guard = self.inner.op_lock.lock().await;

        if !self.inner.agents.contains_key(id) {
            return Err(Error::not_found(format!("agent {} does not exist", id)));
        }
        if self.inner.bindings.lock().contains_key(id) {
            Self::detach_locked(&self.inner, id).await?;
        }

        self.inner.agents.remove(id);
        if let Some((_, watcher)) = self.inner.agent_watchers.remove(id) {
            watcher.abort();
        }
        self.inner.providers.llm.forget_agent(id);

        tracing::info!(agent_id = %id, "agent deleted");
        self.inner.events.emit(CoreEvent::AgentDeleted {
            agent_id: id.to_string(),
            ts: Utc::now(),
        });
        Ok(())
    }

    /// Attach an agent to a room, building its media client and both
    /// pipelines; the room is created lazily on first attachment
    pub async fn attach_agent_to_room(
        &self,
        id: &str,
        room: &str,
        options: Option<JoinOptions>,
    ) -> Result<()> {
        let _guard = self.inner.op_lock.lock().await;

        if room.trim().is_empty() {
            return Err(Error::invalid_argument("room id must not be empty"));
        }
        let agent = self
            .inner
            .agents
            .get(id)
            .map(|a| Arc::clone(&a))
            .ok_or_else(|| Error::not_found(format!("agent {} does not exist", id)))?;

        if let Some(existing) = self.inner.bindings.lock().get(id) {
            return Err(Error::already_exists(format!(
                "agent {} is already attached to room {}",
                id,
                existing.room_id()
            )));
        }
        {
            let rooms = self.inner.rooms.lock();
            if let Some(entry) = rooms.get(room) {
                if entry.members.len() >= self.inner.settings.limits.max_agents_per_room {
                    return Err(Error::capacity_exceeded(format!(
                        "room {} cap {} reached",
                        room, self.inner.settings.limits.max_agents_per_room
                    )));
                }
            }
        }

        let (arbiter, created_room) = self.room_arbiter_or_create(room);

        let options = options.unwrap_or_default();
        let binding_options = BindingOptions {
            listen: options.listen,
            speak: options.speak,
            language: self.inner.settings.stt.language.clone(),
            egress: EgressConfig {
                buffer_bytes: self.inner.settings.audio.egress_buffer_bytes,
            },
            ingress: IngressConfig {
                bucket_ms: self.inner.settings.audio.ingress_bucket_ms,
                vad_threshold: self.inner.settings.audio.vad_rms_threshold,
            },
        };
        let media_config = MediaClientConfig {
            reconnect_attempts: self.inner.settings.media.reconnect_attempts,
            reconnect_backoff: Duration::from_millis(self.inner.settings.media.reconnect_backoff_ms),
            rpc_timeout: self.inner.settings.timing.media_timeout(),
            capture_duration: Duration::from_millis(self.inner.settings.audio.capture_duration_ms),
        };

        let established = Binding::establish(
            id,
            room,
            Arc::clone(&self.inner.transport),
            media_config,
            binding_options,
            Arc::clone(&self.inner.providers.stt),
            Arc::clone(&arbiter),
            self.inner.events.clone(),
        )
        .await;

        let binding = match established {
            Ok(binding) => binding,
            Err(e) => {
                if created_room {
                    self.drop_room_if_empty(room).await;
                }
                return Err(e);
            },
        };

        self.inner
            .bindings
            .lock()
            .insert(id.to_string(), Arc::clone(&binding));
        if let Some(entry) = self.inner.rooms.lock().get_mut(room) {
            entry.members.insert(id.to_string());
        }

        arbiter.agent_attached(Arc::clone(&agent)).await;
        agent.set_status(AgentStatus::Listening);
        self.spawn_media_watcher(id, &binding);

        tracing::info!(agent_id = %id, room_id = %room, "agent attached");
        self.inner.events.emit(CoreEvent::RoomJoined {
            agent_id: id.to_string(),
            room_id: room.to_string(),
            ts: Utc::now(),
        });
        Ok(())
    }

    fn room_arbiter_or_create(&self, room: &str) -> (Arc<RoomArbiter>, bool) {
        let mut rooms = self.inner.rooms.lock();
        if let Some(entry) = rooms.get(room) {
            return (Arc::clone(&entry.arbiter), false);
        }
        let config = ArbiterConfig {
            speaking_time_limit: self.inner.settings.timing.speaking_time_limit(),
            turn_queue_cap: self.inner.settings.limits.turn_queue_cap,
            log_cap: self.inner.settings.limits.conversation_log_cap,
            confidence_floor: self.inner.settings.stt.confidence_floor,
        };
        let arbiter = Arc::new(RoomArbiter::spawn(
            room,
            config,
            Arc::new(ManagerTurnSink {
                inner: Arc::downgrade(&self.inner),
            }),
            self.inner.events.sink(),
            Arc::new(UniformRandom),
        ));
        rooms.insert(
            room.to_string(),
            RoomEntry {
                arbiter: Arc::clone(&arbiter),
                members: HashSet::new(),
            },
        );
        tracing::debug!(room_id = %room, "room created");
        (arbiter, true)
    }

    async fn drop_room_if_empty(&self, room: &str) {
        let removed = {
            let mut rooms = self.inner.rooms.lock();
            match rooms.get(room) {
                Some(entry) if entry.members.is_empty() => rooms.remove(room),
                _ => None,
            }
        };
        if let Some(entry) = removed {
            entry.arbiter.shutdown().await;
            tracing::debug!(room_id = %room, "room destroyed");
        }
    }

    fn spawn_media_watcher(&self, id: &str, binding: &Arc<Binding>) {
        let weak = Arc::downgrade(&self.inner);
        let mut state_rx = binding.client().watch_state();
        let agent_id = id.to_string();
        let watcher = tokio::spawn(async move {
            loop {
                if state_rx.changed().await.is_err() {
                    break;
                }
                if *state_rx.borrow() == ClientState::Closed {
                    if let Some(inner) = weak.upgrade() {
                        // Detach on its own task: the teardown aborts this
                        // watcher, which must not cancel the teardown itself
                        tokio::spawn(async move {
                            ManagerInner::force_detach(&inner, &agent_id).await;
                        });
                    }
                    break;
                }
            }
        });
        self.inner.binding_watchers.insert(id.to_string(), watcher);
    }

    pub async fn detach_agent_from_room(&self, id: &str) -> Result<()> {
        let _guard = self.inner.op_lock.lock().await;
        Self::detach_locked(&self.inner, id).await
    }

    async fn detach_locked(inner: &Arc<ManagerInner>, id: &str) -> Result<()> {
        let binding = inner
            .bindings
            .lock()
            .remove(id)
            .ok_or_else(|| Error::not_found(format!("agent {} is not in a room", id)))?;
        if let Some((_, watcher)) = inner.binding_watchers.remove(id) {
            watcher.abort();
        }
        let room_id = binding.room_id().to_string();

        // End any live turn before the media goes away
        let arbiter = inner.rooms.lock().get(&room_id).map(|e| Arc::clone(&e.arbiter));
        if let Some(arbiter) = &arbiter {
            arbiter.agent_detached(id).await;
        }

        binding.teardown().await;

        let removed_room = {
            let mut rooms = inner.rooms.lock();
            if let Some(entry) = rooms.get_mut(&room_id) {
                entry.members.remove(id);
                if entry.members.is_empty() {
                    rooms.remove(&room_id)
                } else {
                    None
                }
            } else {
                None
            }
        };
        if let Some(entry) = removed_room {
            entry.arbiter.shutdown().await;
            tracing::debug!(room_id = %room_id, "room destroyed");
        }

        if let Some(agent) = inner.agents.get(id) {
            agent.set_status(AgentStatus::Idle);
        }

        tracing::info!(agent_id = %id, room_id = %room_id, "agent detached");
        inner.events.emit(CoreEvent::RoomLeft {
            agent_id: id.to_string(),
            room_id,
            ts: Utc::now(),
        });
        Ok(())
    }

    /// Replace an agent's configuration; history survives untouched
    pub async fn update_agent_config(&self, id: &str, profile: AgentProfile) -> Result<()> {
        let agent = self
            .inner
            .agents
            .get(id)
            .map(|a| Arc::clone(&a))
            .ok_or_else(|| Error::not_found(format!("agent {} does not exist", id)))?;
        agent.update_config(profile)?;
        self.inner.events.emit(CoreEvent::AgentUpdated {
            agent_id: id.to_string(),
            ts: Utc::now(),
        });
        Ok(())
    }

    pub async fn request_speak(&self, id: &str, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(Error::invalid_argument("speak text is empty"));
        }
        if !self.inner.agents.contains_key(id) {
            return Err(Error::not_found(format!("agent {} does not exist", id)));
        }
        let arbiter = self.arbiter_for_agent(id)?;
        arbiter.request_speak(id, text).await
    }

    pub async fn cancel_speak(&self, id: &str) -> Result<()> {
        if !self.inner.agents.contains_key(id) {
            return Err(Error::not_found(format!("agent {} does not exist", id)));
        }
        let arbiter = self.arbiter_for_agent(id)?;
        arbiter.cancel_speak(id).await
    }

    /// Feed an externally produced final transcript into a room
    pub async fn room_transcript(
        &self,
        room: &str,
        origin: &str,
        text: &str,
        confidence: f32,
    ) -> Result<()> {
        let arbiter = self
            .inner
            .rooms
            .lock()
            .get(room)
            .map(|e| Arc::clone(&e.arbiter))
            .ok_or_else(|| Error::not_found(format!("room {} does not exist", room)))?;
        arbiter.transcript_final(origin, text, confidence).await;
        Ok(())
    }

    fn arbiter_for_agent(&self, id: &str) -> Result<Arc<RoomArbiter>> {
        let room = self
            .inner
            .bindings
            .lock()
            .get(id)
            .map(|b| b.room_id().to_string())
            .ok_or_else(|| Error::invalid_argument(format!("agent {} is not in a room", id)))?;
        self.inner
            .rooms
            .lock()
            .get(&room)
            .map(|e| Arc::clone(&e.arbiter))
            .ok_or_else(|| Error::not_found(format!("room {} does not exist", room)))
    }

    pub fn list_agents(&self) -> Vec<AgentSnapshot> {
        let mut agents: Vec<AgentSnapshot> =
            self.inner.agents.iter().map(|a| a.snapshot()).collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub fn get_agent(&self, id: &str) -> Result<AgentSnapshot> {
        self.inner
            .agents
            .get(id)
            .map(|a| a.snapshot())
            .ok_or_else(|| Error::not_found(format!("agent {} does not exist", id)))
    }

    /// Room the agent is attached to, if any
    pub fn agent_room(&self, id: &str) -> Option<String> {
        self.inner
            .bindings
            .lock()
            .get(id)
            .map(|b| b.room_id().to_string())
    }

    pub async fn get_room(&self, room: &str) -> Result<RoomInfo> {
        let arbiter = self
            .inner
            .rooms
            .lock()
            .get(room)
            .map(|e| Arc::clone(&e.arbiter))
            .ok_or_else(|| Error::not_found(format!("room {} does not exist", room)))?;
        let snapshot = arbiter
            .snapshot()
            .await
            .ok_or_else(|| Error::not_found(format!("room {} is closed", room)))?;

        // Media participants, best effort through any member's client
        let member_binding = {
            let bindings = self.inner.bindings.lock();
            snapshot
                .agents
                .iter()
                .find_map(|id| bindings.get(id).cloned())
        };
        let participants = match member_binding {
            Some(binding) => binding.client().list_participants().await.unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(RoomInfo {
            room_id: snapshot.room_id,
            agents: snapshot.agents,
            current_speaker: snapshot.current_speaker,
            queue_len: snapshot.queue_len,
            log: snapshot.log,
            participants,
        })
    }

    pub fn stats(&self) -> ManagerStats {
        let pipelines = self
            .inner
            .bindings
            .lock()
            .iter()
            .map(|(id, binding)| {
                let (egress, ingress) = binding.pipeline_stats();
                (id.clone(), BindingStats { egress, ingress })
            })
            .collect();

        ManagerStats {
            agent_count: self.inner.agents.len(),
            room_count: self.inner.rooms.lock().len(),
            uptime_ms: self.inner.started_at.elapsed().as_millis() as u64,
            llm_available: self.inner.providers.llm.available(),
            tts_available: self.inner.providers.tts.available(),
            stt_available: self.inner.providers.stt.available(),
            token_usage: self.inner.providers.llm.token_usage(),
            agents: self.list_agents(),
            pipelines,
        }
    }

    /// Detach everything and stop every room actor
    pub async fn shutdown(&self) {
        let _guard = self.inner.op_lock.lock().await;
        let ids: Vec<String> = self.inner.bindings.lock().keys().cloned().collect();
        for id in ids {
            if let Err(e) = Self::detach_locked(&self.inner, &id).await {
                tracing::warn!(agent_id = %id, error = %e, "detach during shutdown");
            }
        }
        tracing::info!("manager shut down");
    }
}

impl ManagerInner {
    /// Media-unrecoverable path: the binding is torn down and observers
    /// see `room.left`; later calls for this agent report not-in-a-room
    async fn force_detach(inner: &Arc<ManagerInner>, agent_id: &str) {
        let _guard = inner.op_lock.lock().await;
        if !inner.bindings.lock().contains_key(agent_id) {
            return; // already detached normally
        }
        tracing::error!(
            agent_id = %agent_id,
            "media reconnect budget exhausted, tearing binding down"
        );
        if let Err(e) = AgentManager::detach_locked(inner, agent_id).await {
            tracing::warn!(agent_id = %agent_id, error = %e, "forced detach failed");
        }
    }
}
