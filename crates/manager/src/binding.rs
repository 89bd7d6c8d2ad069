//! Agent-room binding
//!
//! The resource triple that exists while an agent is attached to a room:
//! one media client, one egress pipeline (voice out), one ingress pipeline
//! (room audio in, through STT, into the arbiter). Built atomically on
//! attach and torn down in reverse on detach; nothing here outlives the
//! binding.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chorus_core::{AudioEncoding, CoreEvent, EncodedAudio, Error, Result};
use chorus_media::{MediaClientConfig, MediaError, MediaRoomClient, MediaTransport};
use chorus_pipeline::{EgressConfig, EgressPipeline, IngressConfig, IngressPipeline, StatsSnapshot};
use chorus_providers::SttService;
use chorus_room::RoomArbiter;

use crate::events::EventHub;

/// Per-binding options resolved from join options and settings
#[derive(Debug, Clone)]
pub(crate) struct BindingOptions {
    pub listen: bool,
    pub speak: bool,
    pub language: String,
    pub egress: EgressConfig,
    pub ingress: IngressConfig,
}

/// Estimate playback duration of encoded audio for turn pacing
pub(crate) fn estimate_playback(audio: &EncodedAudio) -> Duration {
    let bytes = audio.len() as u64;
    let ms = match audio.encoding {
        AudioEncoding::Pcm16 => {
            let rate = audio.sample_rate.max(1) as u64 * audio.channels.max(1) as u64 * 2;
            bytes * 1000 / rate
        },
        // Bitrate heuristics for compressed formats
        AudioEncoding::Opus => bytes * 8 * 1000 / 64_000,
        AudioEncoding::Mp3 => bytes * 8 * 1000 / 128_000,
    };
    Duration::from_millis(ms)
}

/// Media + pipeline resources for one attached agent
pub(crate) struct Binding {
    agent_id: String,
    room_id: String,
    client: Arc<MediaRoomClient>,
    options: BindingOptions,
    producer_id: Mutex<String>,
    egress: Mutex<Option<EgressPipeline>>,
    egress_input: Mutex<Option<mpsc::Sender<EncodedAudio>>>,
    egress_pump: Mutex<Option<JoinHandle<()>>>,
    ingress: Mutex<Option<IngressPipeline>>,
    consumer_id: Mutex<Option<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Binding {
    /// Join the media room and wire both pipelines
    ///
    /// Any failure mid-setup leaves the room again before returning; a
    /// binding either exists completely or not at all.
    pub(crate) async fn establish(
        agent_id: &str,
        room_id: &str,
        transport: Arc<dyn MediaTransport>,
        media_config: MediaClientConfig,
        options: BindingOptions,
        stt: Arc<SttService>,
        arbiter: Arc<RoomArbiter>,
        events: EventHub,
    ) -> Result<Arc<Self>> {
        let client = Arc::new(
            MediaRoomClient::connect(transport, room_id, agent_id, media_config).await?,
        );

        let binding = Arc::new(Self {
            agent_id: agent_id.to_string(),
            room_id: room_id.to_string(),
            client,
            options: options.clone(),
            producer_id: Mutex::new(String::new()),
            egress: Mutex::new(None),
            egress_input: Mutex::new(None),
            egress_pump: Mutex::new(None),
            ingress: Mutex::new(None),
            consumer_id: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });

        let wired = Self::wire(&binding, stt, arbiter, events).await;
        if let Err(e) = wired {
            binding.teardown().await;
            return Err(e);
        }
        Ok(binding)
    }

    async fn wire(
        binding: &Arc<Self>,
        stt: Arc<SttService>,
        arbiter: Arc<RoomArbiter>,
        events: EventHub,
    ) -> Result<()> {
        if binding.options.speak {
            let producer = binding.client.produce().await?;
            *binding.producer_id.lock() = producer;
            Self::start_egress(binding)?;
        }
        if binding.options.listen {
            Self::start_ingress(binding, stt, arbiter, events).await?;
        }
        Ok(())
    }

    pub(crate) fn room_id(&self) -> &str {
        &self.room_id
    }

    pub(crate) fn client(&self) -> &MediaRoomClient {
        &self.client
    }

    /// Sink for synthesized turn audio; `None` while the voice path resets
    pub(crate) fn egress_input(&self) -> Option<mpsc::Sender<EncodedAudio>> {
        self.egress_input.lock().clone()
    }

    pub(crate) fn pipeline_stats(&self) -> (Option<StatsSnapshot>, Option<StatsSnapshot>) {
        let egress = self.egress.lock().as_ref().map(|p| p.stats());
        let ingress = self.ingress.lock().as_ref().map(|p| p.stats());
        (egress, ingress)
    }

    fn start_egress(this: &Arc<Self>) -> Result<()> {
        let mut pipeline = EgressPipeline::new(this.options.egress.clone())?;
        let input = pipeline.input()?;
        let rx = pipeline
            .take_output()
            .ok_or_else(|| Error::provider("egress pipeline had no output"))?;

        *this.egress.lock() = Some(pipeline);
        *this.egress_input.lock() = Some(input);

        let binding = Arc::clone(this);
        let pump = tokio::spawn(async move {
            let mut rx = rx;
            while let Some(chunk) = rx.recv().await {
                let producer = binding.producer_id.lock().clone();
                if producer.is_empty() {
                    continue;
                }
                match binding.client.send_chunk(&producer, chunk).await {
                    Ok(()) => {},
                    Err(MediaError::Unrecoverable) => {
                        tracing::warn!(
                            agent_id = %binding.agent_id,
                            "media unrecoverable, egress pump stopping"
                        );
                        break;
                    },
                    Err(e) => {
                        tracing::debug!(agent_id = %binding.agent_id, error = %e, "chunk dropped");
                    },
                }
            }
        });
        *this.egress_pump.lock() = Some(pump);
        Ok(())
    }

    async fn start_ingress(
        this: &Arc<Self>,
        stt: Arc<SttService>,
        arbiter: Arc<RoomArbiter>,
        events: EventHub,
    ) -> Result<()> {
        let (consumer_id, mut consumer_rx) = this.client.consume().await?;
        *this.consumer_id.lock() = Some(consumer_id);

        let mut pipeline = IngressPipeline::new(this.options.ingress.clone())?;
        let input = pipeline.input()?;
        let mut buckets = pipeline
            .take_output()
            .ok_or_else(|| Error::provider("ingress pipeline had no output"))?;
        *this.ingress.lock() = Some(pipeline);

        // Consumed media chunks into the ingress pipeline
        let consumer_task = tokio::spawn(async move {
            while let Some(chunk) = consumer_rx.recv().await {
                let audio = EncodedAudio::new(AudioEncoding::Opus, 48_000, 1, chunk);
                if input.send(audio).await.is_err() {
                    break;
                }
            }
        });

        // Labeled buckets into a streaming STT session
        let session = format!("{}-{}", this.room_id, this.agent_id);
        let stream = stt.open_stream(&session, &this.options.language);
        let audio_tx = stream.audio;
        let mut transcripts = stream.events;

        let feed_task = tokio::spawn(async move {
            while let Some(bucket) = buckets.recv().await {
                if audio_tx.send(bucket.frame).await.is_err() {
                    break;
                }
            }
        });

        // Transcripts into the arbiter (finals) and observers (partials)
        let room_id = this.room_id.clone();
        let transcript_task = tokio::spawn(async move {
            while let Some(transcript) = transcripts.recv().await {
                if transcript.is_final {
                    arbiter
                        .transcript_final(&session, &transcript.text, transcript.confidence)
                        .await;
                } else {
                    events.emit(CoreEvent::TranscriptionUpdate {
                        room_id: room_id.clone(),
                        origin: session.clone(),
                        text: transcript.text,
                        confidence: transcript.confidence,
                        is_final: false,
                        ts: chrono::Utc::now(),
                    });
                }
            }
        });

        this.tasks
            .lock()
            .extend([consumer_task, feed_task, transcript_task]);
        Ok(())
    }

    /// Cut current production and rebuild the voice path
    ///
    /// Used on forced stop and cancel: the producer is closed so the room
    /// stops hearing the utterance, in-flight conversion is discarded, and
    /// a fresh producer plus egress pipeline serve the next turn.
    pub(crate) async fn reset_voice_path(this: &Arc<Self>) {
        if !this.options.speak {
            return;
        }
        if let Some(pump) = this.egress_pump.lock().take() {
            pump.abort();
        }
        this.egress.lock().take();
        this.egress_input.lock().take();

        let old_producer = std::mem::take(&mut *this.producer_id.lock());
        if !old_producer.is_empty() {
            if let Err(e) = this.client.stop_produce(&old_producer).await {
                tracing::debug!(agent_id = %this.agent_id, error = %e, "stop_produce on reset");
            }
        }

        match this.client.produce().await {
            Ok(producer) => {
                *this.producer_id.lock() = producer;
                if let Err(e) = Self::start_egress(this) {
                    tracing::warn!(agent_id = %this.agent_id, error = %e, "egress rebuild failed");
                }
            },
            Err(e) => {
                tracing::warn!(agent_id = %this.agent_id, error = %e, "producer rebuild failed");
            },
        }
    }

    /// Release every resource; safe to call more than once
    pub(crate) async fn teardown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(pump) = self.egress_pump.lock().take() {
            pump.abort();
        }
        self.egress.lock().take();
        self.egress_input.lock().take();
        self.ingress.lock().take();
        self.consumer_id.lock().take();

        if let Err(e) = self.client.leave().await {
            tracing::debug!(agent_id = %self.agent_id, error = %e, "media leave during teardown");
        }
    }
}
