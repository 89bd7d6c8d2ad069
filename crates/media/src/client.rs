//! Per-binding media-room client
//!
//! Lifecycle: `connect -> active -> {disconnected-transient, closed}`.
//! A supervised reconnect task watches the transport link; transient drops
//! are retried with a bounded budget and linear backoff, re-running `join`
//! and re-advertising active producers. Budget exhaustion closes the client;
//! every later call reports `Unrecoverable` and the owning binding tears
//! down.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::rpc::{MediaTransport, Participant, TransportState};
use crate::{wire, MediaError};

/// Client lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Active,
    DisconnectedTransient,
    Closed,
}

/// Media client knobs
#[derive(Debug, Clone)]
pub struct MediaClientConfig {
    pub reconnect_attempts: u32,
    /// Linear backoff step: attempt n sleeps n * this
    pub reconnect_backoff: Duration,
    pub rpc_timeout: Duration,
    /// Capture length when `capture` is called without one
    pub capture_duration: Duration,
}

impl Default for MediaClientConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: 5,
            reconnect_backoff: Duration::from_millis(500),
            rpc_timeout: Duration::from_secs(10),
            capture_duration: Duration::from_secs(5),
        }
    }
}

struct ClientInner {
    transport: Arc<dyn MediaTransport>,
    room_id: String,
    peer_id: String,
    config: MediaClientConfig,
    state_tx: watch::Sender<ClientState>,
    /// Producer ids as handed to callers
    producers: Mutex<HashSet<String>>,
    consumers: Mutex<HashSet<String>>,
    /// Original producer id -> current transport id after reconnects
    alias: DashMap<String, String>,
}

impl ClientInner {
    fn state(&self) -> ClientState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ClientState) {
        let _ = self.state_tx.send(state);
    }

    fn resolve(&self, producer_id: &str) -> String {
        self.alias
            .get(producer_id)
            .map(|cur| cur.clone())
            .unwrap_or_else(|| producer_id.to_string())
    }

    fn ensure_active(&self) -> Result<(), MediaError> {
        match self.state() {
            ClientState::Active => Ok(()),
            ClientState::DisconnectedTransient => {
                Err(MediaError::Transport("reconnect in progress".into()))
            },
            ClientState::Closed => Err(MediaError::Unrecoverable),
            ClientState::Idle => Err(MediaError::NotActive),
        }
    }

    /// Re-open every tracked producer under its original id
    async fn readvertise(&self) -> Result<(), MediaError> {
        let originals: Vec<String> = self.producers.lock().iter().cloned().collect();
        for original in originals {
            let current = timeout(
                self.config.rpc_timeout,
                self.transport.create_producer(&self.room_id, &self.peer_id),
            )
            .await
            .map_err(|_| MediaError::Timeout(self.config.rpc_timeout))??;
            self.alias.insert(original, current);
        }
        Ok(())
    }
}

async fn supervise(inner: Arc<ClientInner>) {
    let mut conn = inner.transport.connection_state();
    loop {
        while *conn.borrow() == TransportState::Up {
            if conn.changed().await.is_err() {
                return;
            }
        }
        if inner.state() == ClientState::Closed {
            return;
        }

        inner.set_state(ClientState::DisconnectedTransient);
        tracing::warn!(
            room = %inner.room_id,
            peer = %inner.peer_id,
            "media transport dropped, reconnecting"
        );

        let mut restored = false;
        for attempt in 1..=inner.config.reconnect_attempts {
            tokio::time::sleep(inner.config.reconnect_backoff * attempt).await;
            if inner.state() == ClientState::Closed {
                return;
            }

            let joined = timeout(
                inner.config.rpc_timeout,
                inner.transport.join(&inner.room_id, &inner.peer_id),
            )
            .await;

            match joined {
                Ok(Ok(())) => match inner.readvertise().await {
                    Ok(()) => {
                        restored = true;
                        break;
                    },
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "producer re-advertise failed");
                    },
                },
                Ok(Err(e)) => {
                    tracing::debug!(attempt, error = %e, "reconnect attempt failed");
                },
                Err(_) => {
                    tracing::debug!(attempt, "reconnect attempt timed out");
                },
            }
        }

        if restored {
            inner.set_state(ClientState::Active);
            tracing::info!(room = %inner.room_id, peer = %inner.peer_id, "media reconnected");
        } else {
            inner.set_state(ClientState::Closed);
            tracing::error!(
                room = %inner.room_id,
                peer = %inner.peer_id,
                "media reconnect budget exhausted, closing client"
            );
            return;
        }
    }
}

/// Handle onto one room membership
pub struct MediaRoomClient {
    inner: Arc<ClientInner>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl MediaRoomClient {
    /// Join the room and start reconnect supervision
    pub async fn connect(
        transport: Arc<dyn MediaTransport>,
        room_id: impl Into<String>,
        peer_id: impl Into<String>,
        config: MediaClientConfig,
    ) -> Result<Self, MediaError> {
        let room_id = room_id.into();
        let peer_id = peer_id.into();
        let (state_tx, _) = watch::channel(ClientState::Idle);

        let inner = Arc::new(ClientInner {
            transport,
            room_id,
            peer_id,
            config,
            state_tx,
            producers: Mutex::new(HashSet::new()),
            consumers: Mutex::new(HashSet::new()),
            alias: DashMap::new(),
        });

        timeout(
            inner.config.rpc_timeout,
            inner.transport.join(&inner.room_id, &inner.peer_id),
        )
        .await
        .map_err(|_| MediaError::Timeout(inner.config.rpc_timeout))??;
        inner.set_state(ClientState::Active);

        let supervisor = tokio::spawn(supervise(Arc::clone(&inner)));

        Ok(Self {
            inner,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    pub fn state(&self) -> ClientState {
        self.inner.state()
    }

    /// Observe state transitions (the binding watches for `Closed`)
    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.inner.state_tx.subscribe()
    }

    pub fn room_id(&self) -> &str {
        &self.inner.room_id
    }

    pub fn peer_id(&self) -> &str {
        &self.inner.peer_id
    }

    /// Open an audio producer; the returned id stays valid across reconnects
    pub async fn produce(&self) -> Result<String, MediaError> {
        self.inner.ensure_active()?;
        let id = timeout(
            self.inner.config.rpc_timeout,
            self.inner
                .transport
                .create_producer(&self.inner.room_id, &self.inner.peer_id),
        )
        .await
        .map_err(|_| MediaError::Timeout(self.inner.config.rpc_timeout))??;
        self.inner.producers.lock().insert(id.clone());
        Ok(id)
    }

    /// Push one audio chunk into a producer
    pub async fn send_chunk(&self, producer_id: &str, chunk: Bytes) -> Result<(), MediaError> {
        self.inner.ensure_active()?;
        let resolved = self.inner.resolve(producer_id);
        let payload = if self.inner.transport.requires_text_frames() {
            wire::encode_payload(&chunk)
        } else {
            chunk
        };
        timeout(
            self.inner.config.rpc_timeout,
            self.inner.transport.produce_chunk(&resolved, payload),
        )
        .await
        .map_err(|_| MediaError::Timeout(self.inner.config.rpc_timeout))?
    }

    pub async fn stop_produce(&self, producer_id: &str) -> Result<(), MediaError> {
        self.inner.producers.lock().remove(producer_id);
        let resolved = self.inner.resolve(producer_id);
        self.inner.alias.remove(producer_id);
        timeout(
            self.inner.config.rpc_timeout,
            self.inner.transport.stop_producer(&resolved),
        )
        .await
        .map_err(|_| MediaError::Timeout(self.inner.config.rpc_timeout))?
    }

    /// Open a consumer of the room mix
    pub async fn consume(&self) -> Result<(String, mpsc::Receiver<Bytes>), MediaError> {
        self.inner.ensure_active()?;
        let (id, rx) = timeout(
            self.inner.config.rpc_timeout,
            self.inner
                .transport
                .create_consumer(&self.inner.room_id, &self.inner.peer_id),
        )
        .await
        .map_err(|_| MediaError::Timeout(self.inner.config.rpc_timeout))??;
        self.inner.consumers.lock().insert(id.clone());

        let rx = if self.inner.transport.requires_text_frames() {
            let (decoded_tx, decoded_rx) = mpsc::channel(64);
            let mut raw_rx = rx;
            tokio::spawn(async move {
                while let Some(payload) = raw_rx.recv().await {
                    match wire::decode_payload(&payload) {
                        Ok(chunk) => {
                            if decoded_tx.send(chunk).await.is_err() {
                                break;
                            }
                        },
                        Err(e) => tracing::warn!(error = %e, "dropping unframeable chunk"),
                    }
                }
            });
            decoded_rx
        } else {
            rx
        };

        Ok((id, rx))
    }

    /// Consume the room mix for a bounded window and return the bytes
    ///
    /// A convenience over `consume`/`stop_consume` for callers that want a
    /// single buffer rather than a stream; the window defaults to the
    /// configured capture duration.
    pub async fn capture(&self, duration: Option<Duration>) -> Result<Bytes, MediaError> {
        let window = duration.unwrap_or(self.inner.config.capture_duration);
        let (consumer_id, mut rx) = self.consume().await?;

        let mut collected = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(chunk)) => collected.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(_) => break, // window elapsed
            }
        }

        self.stop_consume(&consumer_id).await?;
        Ok(Bytes::from(collected))
    }

    pub async fn stop_consume(&self, consumer_id: &str) -> Result<(), MediaError> {
        self.inner.consumers.lock().remove(consumer_id);
        timeout(
            self.inner.config.rpc_timeout,
            self.inner.transport.stop_consumer(consumer_id),
        )
        .await
        .map_err(|_| MediaError::Timeout(self.inner.config.rpc_timeout))?
    }

    pub async fn list_participants(&self) -> Result<Vec<Participant>, MediaError> {
        self.inner.ensure_active()?;
        timeout(
            self.inner.config.rpc_timeout,
            self.inner.transport.list_participants(&self.inner.room_id),
        )
        .await
        .map_err(|_| MediaError::Timeout(self.inner.config.rpc_timeout))?
    }

    /// Leave the room, closing any still-open producers and consumers
    pub async fn leave(&self) -> Result<(), MediaError> {
        self.inner.set_state(ClientState::Closed);
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }

        let producers: Vec<String> = self.inner.producers.lock().drain().collect();
        for id in producers {
            let resolved = self.inner.resolve(&id);
            if let Err(e) = self.inner.transport.stop_producer(&resolved).await {
                tracing::debug!(error = %e, "stop_producer during leave");
            }
        }
        let consumers: Vec<String> = self.inner.consumers.lock().drain().collect();
        for id in consumers {
            if let Err(e) = self.inner.transport.stop_consumer(&id).await {
                tracing::debug!(error = %e, "stop_consumer during leave");
            }
        }
        self.inner.alias.clear();

        self.inner
            .transport
            .leave(&self.inner.room_id, &self.inner.peer_id)
            .await
    }
}

impl Drop for MediaRoomClient {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
    }
}
