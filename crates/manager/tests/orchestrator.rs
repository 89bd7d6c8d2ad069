//! End-to-end orchestrator behavior
//!
//! Runs the full stack - manager, room arbiters, media loopback, audio
//! pipelines, local providers - under paused time and drives the seed
//! scenarios: sequential and overlapping turns, transcript-triggered
//! replies, caps, and forced stops.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use chorus_bus::{encode, topics, InProcessBus, MessageBus, TranscriptionFinal};
use chorus_config::Settings;
use chorus_core::{CoreEvent, ErrorKind, SpeakEndReason};
use chorus_manager::{AgentManager, BusDispatcher, ProviderSet};
use chorus_media::LoopbackTransport;

type Events = Arc<Mutex<Vec<CoreEvent>>>;

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.timing.llm_min_interval_ms = 0;
    settings.media.reconnect_backoff_ms = 10;
    settings
}

fn build_manager(settings: Settings) -> AgentManager {
    build_manager_with_transport(settings).0
}

fn build_manager_with_transport(settings: Settings) -> (AgentManager, Arc<LoopbackTransport>) {
    let providers = ProviderSet::from_settings(&settings);
    let transport = Arc::new(LoopbackTransport::new());
    (
        AgentManager::new(settings, providers, transport.clone()),
        transport,
    )
}

fn collect_events(manager: &AgentManager) -> Events {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let mut rx = manager.subscribe_events();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => sink.lock().push(event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    events
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..4000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}

fn speak_sequence(events: &Events) -> Vec<(String, String)> {
    events
        .lock()
        .iter()
        .filter_map(|e| match e {
            CoreEvent::SpeakingStart { agent_id, .. } => {
                Some(("start".to_string(), agent_id.clone()))
            },
            CoreEvent::SpeakingEnd { agent_id, .. } => Some(("end".to_string(), agent_id.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_two_agents_speak_sequentially() {
    let manager = build_manager(test_settings());
    let events = collect_events(&manager);

    manager
        .create_agent("P1", Some("A".into()), None, None)
        .await
        .unwrap();
    manager
        .create_agent("P2", Some("B".into()), None, None)
        .await
        .unwrap();
    manager.attach_agent_to_room("A", "R", None).await.unwrap();
    manager.attach_agent_to_room("B", "R", None).await.unwrap();

    manager.request_speak("A", "Hello").await.unwrap();
    wait_until(|| speak_sequence(&events).len() == 2).await;

    manager.request_speak("B", "Hi").await.unwrap();
    wait_until(|| speak_sequence(&events).len() == 4).await;

    assert_eq!(
        speak_sequence(&events),
        vec![
            ("start".to_string(), "A".to_string()),
            ("end".to_string(), "A".to_string()),
            ("start".to_string(), "B".to_string()),
            ("end".to_string(), "B".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_speak_queues_then_drains() {
    let manager = build_manager(test_settings());
    let events = collect_events(&manager);

    manager
        .create_agent("P1", Some("A".into()), None, None)
        .await
        .unwrap();
    manager
        .create_agent("P2", Some("B".into()), None, None)
        .await
        .unwrap();
    manager.attach_agent_to_room("A", "R", None).await.unwrap();
    manager.attach_agent_to_room("B", "R", None).await.unwrap();

    manager
        .request_speak("A", "one two three four five")
        .await
        .unwrap();
    manager.request_speak("B", "two").await.unwrap();

    let room = manager.get_room("R").await.unwrap();
    assert_eq!(room.current_speaker.as_deref(), Some("A"));
    assert_eq!(room.queue_len, 1);

    wait_until(|| speak_sequence(&events).len() == 4).await;
    let sequence = speak_sequence(&events);
    assert_eq!(sequence[0].1, "A");
    assert_eq!(sequence[2], ("start".to_string(), "B".to_string()));

    let room = manager.get_room("R").await.unwrap();
    assert_eq!(room.queue_len, 0);
    assert_eq!(room.current_speaker, None);
}

#[tokio::test(start_paused = true)]
async fn test_transcript_triggers_reply() {
    let manager = build_manager(test_settings());
    let events = collect_events(&manager);

    manager
        .create_agent("P1", Some("A".into()), None, None)
        .await
        .unwrap();
    manager.attach_agent_to_room("A", "R", None).await.unwrap();

    manager
        .room_transcript("R", "s1", "hello agent", 0.95)
        .await
        .unwrap();

    wait_until(|| {
        events
            .lock()
            .iter()
            .any(|e| matches!(e, CoreEvent::SpeakingStart { .. }))
    })
    .await;

    let order: Vec<&'static str> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            CoreEvent::ConversationMessage { .. } => Some("message"),
            CoreEvent::SpeakingStart { .. } => Some("start"),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec!["message", "start"]);
}

#[tokio::test(start_paused = true)]
async fn test_low_confidence_transcript_never_triggers() {
    let manager = build_manager(test_settings());
    let events = collect_events(&manager);

    manager
        .create_agent("P1", Some("A".into()), None, None)
        .await
        .unwrap();
    manager.attach_agent_to_room("A", "R", None).await.unwrap();

    manager
        .room_transcript("R", "s1", "mumble", 0.4)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    // Logged in the room, but no reply and no speech
    let room = manager.get_room("R").await.unwrap();
    assert_eq!(room.log.len(), 1);
    let locked = events.lock();
    assert!(!locked
        .iter()
        .any(|e| matches!(e, CoreEvent::ConversationMessage { .. })));
    assert!(!locked
        .iter()
        .any(|e| matches!(e, CoreEvent::SpeakingStart { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_global_cap_exceeded() {
    let mut settings = test_settings();
    settings.limits.max_agents = 2;
    let manager = build_manager(settings);

    manager.create_agent("P1", None, None, None).await.unwrap();
    manager.create_agent("P2", None, None, None).await.unwrap();
    let err = manager
        .create_agent("P3", None, None, None)
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::CapacityExceeded));
    assert_eq!(manager.list_agents().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_room_cap_exceeded() {
    let mut settings = test_settings();
    settings.limits.max_agents_per_room = 2;
    let manager = build_manager(settings);

    for id in ["A", "B", "C"] {
        manager
            .create_agent("persona", Some(id.into()), None, None)
            .await
            .unwrap();
    }
    manager.attach_agent_to_room("A", "R", None).await.unwrap();
    manager.attach_agent_to_room("B", "R", None).await.unwrap();
    let err = manager
        .attach_agent_to_room("C", "R", None)
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::CapacityExceeded));

    let room = manager.get_room("R").await.unwrap();
    assert_eq!(room.agents.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_forced_stop_at_limit() {
    let mut settings = test_settings();
    settings.timing.speaking_time_limit_ms = 500;
    let manager = build_manager(settings);
    let events = collect_events(&manager);

    manager
        .create_agent("P1", Some("A".into()), None, None)
        .await
        .unwrap();
    manager.attach_agent_to_room("A", "R", None).await.unwrap();

    // Enough words that playback far exceeds the 500ms limit
    let long_text = "word ".repeat(40);
    manager.request_speak("A", long_text.trim()).await.unwrap();

    wait_until(|| {
        events
            .lock()
            .iter()
            .any(|e| matches!(e, CoreEvent::SpeakingEnd { .. }))
    })
    .await;

    let reason = events
        .lock()
        .iter()
        .find_map(|e| match e {
            CoreEvent::SpeakingEnd { reason, .. } => Some(*reason),
            _ => None,
        })
        .unwrap();
    assert_eq!(reason, SpeakEndReason::ForcedStop);
}

#[tokio::test(start_paused = true)]
async fn test_create_delete_round_trip() {
    let manager = build_manager(test_settings());
    let events = collect_events(&manager);

    let before = manager.list_agents().len();
    manager
        .create_agent("P1", Some("A".into()), None, None)
        .await
        .unwrap();
    manager.delete_agent("A").await.unwrap();
    assert_eq!(manager.list_agents().len(), before);

    wait_until(|| {
        let locked = events.lock();
        locked
            .iter()
            .any(|e| matches!(e, CoreEvent::AgentDeleted { .. }))
    })
    .await;
    let order: Vec<&'static str> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            CoreEvent::AgentCreated { .. } => Some("created"),
            CoreEvent::AgentDeleted { .. } => Some("deleted"),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec!["created", "deleted"]);
}

#[tokio::test(start_paused = true)]
async fn test_attach_detach_round_trip() {
    let manager = build_manager(test_settings());
    let events = collect_events(&manager);

    manager
        .create_agent("P1", Some("A".into()), None, None)
        .await
        .unwrap();
    manager.attach_agent_to_room("A", "R", None).await.unwrap();
    assert_eq!(manager.agent_room("A").as_deref(), Some("R"));

    manager.detach_agent_from_room("A").await.unwrap();
    assert_eq!(manager.agent_room("A"), None);
    // Last agent out destroys the room
    assert!(manager.get_room("R").await.is_err());

    wait_until(|| {
        events
            .lock()
            .iter()
            .any(|e| matches!(e, CoreEvent::RoomLeft { .. }))
    })
    .await;
    let order: Vec<&'static str> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            CoreEvent::RoomJoined { .. } => Some("joined"),
            CoreEvent::RoomLeft { .. } => Some("left"),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec!["joined", "left"]);
}

#[tokio::test(start_paused = true)]
async fn test_reattach_same_room_rejected() {
    let manager = build_manager(test_settings());
    manager
        .create_agent("P1", Some("A".into()), None, None)
        .await
        .unwrap();
    manager.attach_agent_to_room("A", "R", None).await.unwrap();

    let err = manager
        .attach_agent_to_room("A", "R", None)
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::AlreadyExists));

    let err = manager
        .attach_agent_to_room("A", "S", None)
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::AlreadyExists));
}

#[tokio::test(start_paused = true)]
async fn test_empty_speak_text_rejected() {
    let manager = build_manager(test_settings());
    manager
        .create_agent("P1", Some("A".into()), None, None)
        .await
        .unwrap();
    manager.attach_agent_to_room("A", "R", None).await.unwrap();

    let err = manager.request_speak("A", "  ").await.unwrap_err();
    assert!(err.is(ErrorKind::InvalidArgument));
}

#[tokio::test(start_paused = true)]
async fn test_speak_requires_room() {
    let manager = build_manager(test_settings());
    manager
        .create_agent("P1", Some("A".into()), None, None)
        .await
        .unwrap();
    let err = manager.request_speak("A", "hello").await.unwrap_err();
    assert!(err.is(ErrorKind::InvalidArgument));

    let err = manager.request_speak("ghost", "hello").await.unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
}

#[tokio::test(start_paused = true)]
async fn test_delete_attached_agent_detaches_first() {
    let manager = build_manager(test_settings());
    let events = collect_events(&manager);

    manager
        .create_agent("P1", Some("A".into()), None, None)
        .await
        .unwrap();
    manager.attach_agent_to_room("A", "R", None).await.unwrap();
    manager.delete_agent("A").await.unwrap();

    assert!(manager.get_room("R").await.is_err());
    wait_until(|| {
        events
            .lock()
            .iter()
            .any(|e| matches!(e, CoreEvent::AgentDeleted { .. }))
    })
    .await;
    let locked = events.lock();
    assert!(locked
        .iter()
        .any(|e| matches!(e, CoreEvent::RoomLeft { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_update_config_keeps_history() {
    let manager = build_manager(test_settings());
    let events = collect_events(&manager);

    manager
        .create_agent("P1", Some("A".into()), None, Some("welcome".into()))
        .await
        .unwrap();
    let before = manager.get_agent("A").unwrap();
    assert_eq!(before.history_len, 1);

    let mut profile = before.profile.clone();
    profile.voice.voice = "alto".into();
    profile.llm.temperature = 0.2;
    manager.update_agent_config("A", profile).await.unwrap();

    let after = manager.get_agent("A").unwrap();
    assert_eq!(after.profile.voice.voice, "alto");
    assert_eq!(after.history_len, 1);

    wait_until(|| {
        events
            .lock()
            .iter()
            .any(|e| matches!(e, CoreEvent::AgentUpdated { .. }))
    })
    .await;

    // An unknown voice rejects the whole update
    let mut bad = after.profile.clone();
    bad.voice.voice = "growl".into();
    let err = manager.update_agent_config("A", bad).await.unwrap_err();
    assert!(err.is(ErrorKind::InvalidArgument));
}

#[tokio::test(start_paused = true)]
async fn test_stats_reflect_state() {
    let manager = build_manager(test_settings());
    manager
        .create_agent("P1", Some("A".into()), None, None)
        .await
        .unwrap();
    manager.attach_agent_to_room("A", "R", None).await.unwrap();

    let stats = manager.stats();
    assert_eq!(stats.agent_count, 1);
    assert_eq!(stats.room_count, 1);
    assert!(stats.llm_available);
    assert!(stats.pipelines.contains_key("A"));
}

#[tokio::test(start_paused = true)]
async fn test_media_loss_tears_binding_down() {
    let (manager, transport) = build_manager_with_transport(test_settings());
    let events = collect_events(&manager);

    manager
        .create_agent("P1", Some("A".into()), None, None)
        .await
        .unwrap();
    manager.attach_agent_to_room("A", "R", None).await.unwrap();

    // Kill the link for good; the reconnect budget runs out and the
    // binding is torn down with room.left announced
    transport.set_down();

    wait_until(|| {
        events
            .lock()
            .iter()
            .any(|e| matches!(e, CoreEvent::RoomLeft { .. }))
    })
    .await;

    assert_eq!(manager.agent_room("A"), None);
    assert!(manager.get_room("R").await.is_err());
    // The agent itself survives; only the binding is gone
    assert!(manager.get_agent("A").is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_bus_control_and_event_mirror() {
    let manager = build_manager(test_settings());
    let bus = InProcessBus::connected();
    let dispatcher = BusDispatcher::start(manager.clone(), bus.clone()).unwrap();
    let _bridge = manager.events().bridge_to_bus(bus.clone());

    // Observe mirrored lifecycle events on the bus itself
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_handler = Arc::clone(&seen);
    bus.subscribe(
        "agent.created",
        Arc::new(move |_topic, payload| {
            let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
            seen_handler
                .lock()
                .push(value["agent_id"].as_str().unwrap_or_default().to_string());
        }),
    )
    .unwrap();

    let payload = encode(&chorus_bus::CreateAgentRequest {
        persona: "bus persona".into(),
        id: Some("A".into()),
        config: None,
        greeting: None,
    })
    .unwrap();
    bus.publish(topics::AGENT_CREATE, payload).unwrap();

    wait_until(|| !seen.lock().is_empty()).await;
    assert_eq!(seen.lock().as_slice(), &["A".to_string()]);
    assert!(manager.get_agent("A").is_ok());

    // Full voice turn driven over the bus
    let join = encode(&chorus_bus::JoinRoomRequest {
        id: "A".into(),
        room: "R".into(),
        options: None,
    })
    .unwrap();
    bus.publish(topics::AGENT_JOIN_ROOM, join).unwrap();
    wait_until(|| manager.agent_room("A").is_some()).await;

    let events = collect_events(&manager);
    let transcript = encode(&TranscriptionFinal {
        session: "R-s1".into(),
        text: "hello agent".into(),
        confidence: 0.95,
        ts: chrono::Utc::now(),
    })
    .unwrap();
    bus.publish(topics::TRANSCRIPTION_FINAL, transcript).unwrap();

    wait_until(|| {
        events
            .lock()
            .iter()
            .any(|e| matches!(e, CoreEvent::SpeakingStart { .. }))
    })
    .await;

    dispatcher.stop();
}
