//! In-process media server
//!
//! Routes producer chunks to every other peer's consumers within a room.
//! Used by the test suites and single-process deployments; also the
//! reference behavior a real transport adapter must match. A pair of test
//! hooks flips the connection state to exercise reconnect supervision.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashSet;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::rpc::{MediaTransport, Participant, ParticipantKind, TransportState};
use crate::MediaError;

/// Per-consumer queue depth; chunks beyond this are dropped for that consumer
const CONSUMER_QUEUE_DEPTH: usize = 64;

#[derive(Default)]
struct RoomPeers {
    peers: HashSet<String>,
}

struct ProducerEntry {
    room_id: String,
    peer_id: String,
}

struct ConsumerEntry {
    room_id: String,
    peer_id: String,
    tx: mpsc::Sender<Bytes>,
}

/// Loopback media transport
pub struct LoopbackTransport {
    rooms: DashMap<String, RoomPeers>,
    producers: DashMap<String, ProducerEntry>,
    consumers: DashMap<String, ConsumerEntry>,
    state_tx: watch::Sender<TransportState>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(TransportState::Up);
        Self {
            rooms: DashMap::new(),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            state_tx,
        }
    }

    fn check_up(&self) -> Result<(), MediaError> {
        if *self.state_tx.borrow() == TransportState::Down {
            return Err(MediaError::Transport("link down".into()));
        }
        Ok(())
    }

    /// Test hook: drop the transport link
    pub fn set_down(&self) {
        let _ = self.state_tx.send(TransportState::Down);
    }

    /// Test hook: restore the transport link
    pub fn set_up(&self) {
        let _ = self.state_tx.send(TransportState::Up);
    }

    /// Peers currently joined to a room
    pub fn peer_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|r| r.peers.len()).unwrap_or(0)
    }
}

#[async_trait]
impl MediaTransport for LoopbackTransport {
    async fn join(&self, room_id: &str, peer_id: &str) -> Result<(), MediaError> {
        self.check_up()?;
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .peers
            .insert(peer_id.to_string());
        tracing::debug!(room = %room_id, peer = %peer_id, "loopback join");
        Ok(())
    }

    async fn leave(&self, room_id: &str, peer_id: &str) -> Result<(), MediaError> {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.peers.remove(peer_id);
            let empty = room.peers.is_empty();
            drop(room);
            if empty {
                self.rooms.remove(room_id);
            }
        }
        self.producers
            .retain(|_, p| !(p.room_id == room_id && p.peer_id == peer_id));
        self.consumers
            .retain(|_, c| !(c.room_id == room_id && c.peer_id == peer_id));
        Ok(())
    }

    async fn create_producer(&self, room_id: &str, peer_id: &str) -> Result<String, MediaError> {
        self.check_up()?;
        if !self
            .rooms
            .get(room_id)
            .map(|r| r.peers.contains(peer_id))
            .unwrap_or(false)
        {
            return Err(MediaError::UnknownRoom(room_id.to_string()));
        }
        let id = Uuid::new_v4().to_string();
        self.producers.insert(
            id.clone(),
            ProducerEntry {
                room_id: room_id.to_string(),
                peer_id: peer_id.to_string(),
            },
        );
        Ok(id)
    }

    async fn produce_chunk(&self, producer_id: &str, chunk: Bytes) -> Result<(), MediaError> {
        self.check_up()?;
        let (room_id, peer_id) = {
            let entry = self
                .producers
                .get(producer_id)
                .ok_or_else(|| MediaError::UnknownProducer(producer_id.to_string()))?;
            (entry.room_id.clone(), entry.peer_id.clone())
        };

        for consumer in self.consumers.iter() {
            if consumer.room_id == room_id && consumer.peer_id != peer_id {
                // Slow consumers lose chunks; the room does not stall
                let _ = consumer.tx.try_send(chunk.clone());
            }
        }
        Ok(())
    }

    async fn stop_producer(&self, producer_id: &str) -> Result<(), MediaError> {
        self.producers.remove(producer_id);
        Ok(())
    }

    async fn create_consumer(
        &self,
        room_id: &str,
        peer_id: &str,
    ) -> Result<(String, mpsc::Receiver<Bytes>), MediaError> {
        self.check_up()?;
        if !self
            .rooms
            .get(room_id)
            .map(|r| r.peers.contains(peer_id))
            .unwrap_or(false)
        {
            return Err(MediaError::UnknownRoom(room_id.to_string()));
        }
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(CONSUMER_QUEUE_DEPTH);
        self.consumers.insert(
            id.clone(),
            ConsumerEntry {
                room_id: room_id.to_string(),
                peer_id: peer_id.to_string(),
                tx,
            },
        );
        Ok((id, rx))
    }

    async fn stop_consumer(&self, consumer_id: &str) -> Result<(), MediaError> {
        self.consumers.remove(consumer_id);
        Ok(())
    }

    async fn list_participants(&self, room_id: &str) -> Result<Vec<Participant>, MediaError> {
        self.check_up()?;
        let room = self
            .rooms
            .get(room_id)
            .ok_or_else(|| MediaError::UnknownRoom(room_id.to_string()))?;
        let mut participants: Vec<Participant> = room
            .peers
            .iter()
            .map(|id| Participant {
                id: id.clone(),
                kind: ParticipantKind::Agent,
            })
            .collect();
        participants.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(participants)
    }

    fn connection_state(&self) -> watch::Receiver<TransportState> {
        self.state_tx.subscribe()
    }
}
