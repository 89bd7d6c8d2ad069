//! Bus control-topic dispatch
//!
//! Subscribes the §control topics and translates envelopes into manager
//! operations. Handlers run on the bus delivery context, so each command
//! is handed straight to a spawned task; rejections are logged, never
//! retried - callers watching the event topics see what actually
//! happened.

use std::sync::Arc;

use chorus_bus::{
    decode, topics, BusError, BusHandler, CreateAgentRequest, DeleteAgentRequest, JoinRoomRequest,
    LeaveRoomRequest, MessageBus, SpeakRequest, StopSpeakRequest, SubscriptionId,
    TranscriptionFinal,
};
use chorus_core::Result;

use crate::manager::AgentManager;

/// Control-topic subscriber bound to one manager
pub struct BusDispatcher {
    bus: Arc<dyn MessageBus>,
    subscriptions: Vec<SubscriptionId>,
}

impl BusDispatcher {
    /// Subscribe every control topic on the given bus
    pub fn start(manager: AgentManager, bus: Arc<dyn MessageBus>) -> Result<Self> {
        let mut subscriptions = Vec::with_capacity(topics::CONTROL.len());
        for topic in topics::CONTROL {
            let manager = manager.clone();
            let handler: BusHandler = Arc::new(move |topic, payload| {
                let manager = manager.clone();
                let topic = topic.to_string();
                tokio::spawn(async move {
                    if let Err(e) = dispatch(&manager, &topic, &payload).await {
                        tracing::warn!(topic = %topic, error = %e, "control command rejected");
                    }
                });
            });
            let id = bus.subscribe(topic, handler).map_err(chorus_core::Error::from)?;
            subscriptions.push(id);
        }
        tracing::info!(topics = topics::CONTROL.len(), "bus dispatcher started");
        Ok(Self {
            bus,
            subscriptions,
        })
    }

    /// Drop every control-topic subscription
    pub fn stop(&self) {
        for id in &self.subscriptions {
            if let Err(e) = self.bus.unsubscribe(*id) {
                tracing::debug!(error = %e, "unsubscribe during dispatcher stop");
            }
        }
    }
}

async fn dispatch(manager: &AgentManager, topic: &str, payload: &[u8]) -> Result<()> {
    match topic {
        topics::AGENT_CREATE => {
            let req: CreateAgentRequest = decode(payload)?;
            manager
                .create_agent(&req.persona, req.id, req.config, req.greeting)
                .await?;
        },
        topics::AGENT_DELETE => {
            let req: DeleteAgentRequest = decode(payload)?;
            manager.delete_agent(&req.id).await?;
        },
        topics::AGENT_JOIN_ROOM => {
            let req: JoinRoomRequest = decode(payload)?;
            manager
                .attach_agent_to_room(&req.id, &req.room, req.options)
                .await?;
        },
        topics::AGENT_LEAVE_ROOM => {
            let req: LeaveRoomRequest = decode(payload)?;
            manager.detach_agent_from_room(&req.id).await?;
        },
        topics::AGENT_SPEAK => {
            let req: SpeakRequest = decode(payload)?;
            manager.request_speak(&req.id, &req.text).await?;
        },
        topics::AGENT_STOP_SPEAK => {
            let req: StopSpeakRequest = decode(payload)?;
            manager.cancel_speak(&req.id).await?;
        },
        topics::TRANSCRIPTION_FINAL => {
            let req: TranscriptionFinal = decode(payload)?;
            let (room, origin) = req.split_session();
            manager
                .room_transcript(room, origin, &req.text, req.confidence)
                .await?;
        },
        other => {
            return Err(BusError::Codec(format!("unknown control topic {}", other)).into());
        },
    }
    Ok(())
}
