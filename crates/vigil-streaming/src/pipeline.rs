//! Vigil Ingestion Pipeline
//!
//! Long-lived subscriber task that turns published readings into stored
//! observations: parse, resolve, insert. One message is handled at a time
//! and no failure ever ends the loop; each is classified, counted and
//! logged with its topic and raw payload.
//!
//! Connection lifecycle:
//! `Disconnected -> Connecting -> Subscribed`, back to `Connecting` with
//! exponential backoff on transport loss, and `Stopped` after shutdown.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::backoff::Backoff;
use crate::broker::Message;
use crate::payload::ReadingPayload;
use crate::topic::TopicAddress;
use crate::transport::{Transport, TransportError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use vigil_catalog::{DatastreamResolver, ReadingAddress, ReadingSink};
use vigil_common::{IngestConfig, VigilError};
use vigil_timeseries::NewObservation;

// =============================================================================
// Pipeline State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Disconnected,
    Connecting,
    Subscribed,
    Stopped,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Pipeline Health
// =============================================================================

/// Point-in-time view of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineHealth {
    pub state: PipelineState,
    pub received: u64,
    pub stored: u64,
    pub malformed: u64,
    pub unresolved: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub retries: u64,
    pub reconnects: u64,
    /// Readings the transport skipped because the subscriber fell behind.
    pub lagged: u64,
    pub last_stored_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    stored: AtomicU64,
    malformed: AtomicU64,
    unresolved: AtomicU64,
    duplicates: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    reconnects: AtomicU64,
    lagged: AtomicU64,
}

struct Shared {
    state: RwLock<PipelineState>,
    last_stored_at: RwLock<Option<DateTime<Utc>>>,
    counters: Counters,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: RwLock::new(PipelineState::Disconnected),
            last_stored_at: RwLock::new(None),
            counters: Counters::default(),
        }
    }

    fn set_state(&self, state: PipelineState) {
        *self.state.write() = state;
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn health(&self) -> PipelineHealth {
        let c = &self.counters;
        PipelineHealth {
            state: *self.state.read(),
            received: c.received.load(Ordering::Relaxed),
            stored: c.stored.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            unresolved: c.unresolved.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
            lagged: c.lagged.load(Ordering::Relaxed),
            last_stored_at: *self.last_stored_at.read(),
        }
    }
}

// =============================================================================
// Ingestion Pipeline
// =============================================================================

pub struct IngestionPipeline<T: Transport> {
    transport: T,
    ingestor: Ingestor,
}

/// Per-message half of the pipeline, shared by reference across awaits.
struct Ingestor {
    resolver: DatastreamResolver,
    sink: Arc<dyn ReadingSink>,
    config: IngestConfig,
    shared: Arc<Shared>,
}

impl<T: Transport + 'static> IngestionPipeline<T> {
    pub fn new(
        transport: T,
        resolver: DatastreamResolver,
        sink: Arc<dyn ReadingSink>,
        config: IngestConfig,
    ) -> Self {
        Self {
            transport,
            ingestor: Ingestor {
                resolver,
                sink,
                config,
                shared: Arc::new(Shared::new()),
            },
        }
    }

    /// Spawn the subscriber loop on the current runtime.
    pub fn start(self) -> PipelineHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = self.ingestor.shared.clone();
        let task = tokio::spawn(self.run(shutdown_rx));
        PipelineHandle {
            shutdown: shutdown_tx,
            shared,
            task: Some(task),
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let config = &self.ingestor.config;
        let filter = config.subscription();
        let mut reconnect = Backoff::from_millis(config.reconnect_base_ms, config.reconnect_max_ms);
        let shared = self.ingestor.shared.clone();

        'session: loop {
            if *shutdown.borrow() {
                break;
            }

            shared.set_state(PipelineState::Connecting);
            let established = tokio::select! {
                result = self.establish(&filter) => result,
                _ = shutdown.changed() => break 'session,
            };

            if let Err(e) = established {
                shared.set_state(PipelineState::Disconnected);
                if !e.needs_reconnect() {
                    tracing::error!(error = %e, filter = %filter, "Ingestion subscription rejected; pipeline idle");
                    let _ = shutdown.changed().await;
                    break;
                }
                let delay = reconnect.next_delay();
                Shared::bump(&shared.counters.reconnects);
                tracing::warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Ingestion transport connect failed");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue 'session,
                    _ = shutdown.changed() => break 'session,
                }
            }

            reconnect.reset();
            shared.set_state(PipelineState::Subscribed);
            tracing::info!(filter = %filter, "Ingestion pipeline subscribed");

            loop {
                let received = tokio::select! {
                    biased;
                    _ = shutdown.changed() => break 'session,
                    received = self.transport.recv() => received,
                };

                match received {
                    // Not raced against shutdown: the in-flight insert finishes.
                    Ok(message) => self.ingestor.handle(message).await,
                    Err(TransportError::Lagged(skipped)) => {
                        shared.counters.lagged.fetch_add(skipped, Ordering::Relaxed);
                        tracing::warn!(skipped, "Ingestion subscriber lagged; readings were dropped");
                    }
                    Err(e) => {
                        shared.set_state(PipelineState::Disconnected);
                        let delay = reconnect.next_delay();
                        Shared::bump(&shared.counters.reconnects);
                        tracing::warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Ingestion transport lost");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => continue 'session,
                            _ = shutdown.changed() => break 'session,
                        }
                    }
                }
            }
        }

        self.transport.disconnect().await;
        shared.set_state(PipelineState::Stopped);
        tracing::info!(health = ?shared.health(), "Ingestion pipeline stopped");
    }

    async fn establish(&mut self, filter: &str) -> Result<(), TransportError> {
        self.transport.connect().await?;
        self.transport.subscribe(filter).await
    }
}

// =============================================================================
// Message Handling
// =============================================================================

impl Ingestor {
    async fn handle(&self, message: Message) {
        let counters = &self.shared.counters;
        Shared::bump(&counters.received);

        let address = match TopicAddress::parse(&message.topic, &self.config.topic_namespace) {
            Ok(address) => address,
            Err(e) => {
                Shared::bump(&counters.malformed);
                tracing::warn!(topic = %message.topic, payload = %message.payload_text(), reason = %e, "Dropped malformed reading");
                return;
            }
        };

        let payload = match ReadingPayload::parse(&message.payload) {
            Ok(payload) => payload,
            Err(e) => {
                Shared::bump(&counters.malformed);
                tracing::warn!(topic = %message.topic, payload = %message.payload_text(), reason = %e, "Dropped malformed reading");
                return;
            }
        };

        let address: ReadingAddress = address.into();
        let datastream_id = match self.resolver.resolve(&address) {
            Ok(id) => id,
            Err(miss) => {
                Shared::bump(&counters.unresolved);
                tracing::warn!(
                    topic = %message.topic,
                    payload = %message.payload_text(),
                    reason = miss.reason(),
                    detail = %miss,
                    "Dropped unresolved reading"
                );
                return;
            }
        };

        let now = Utc::now();
        let mut observation = NewObservation::new(datastream_id, payload.phenomenon_time.unwrap_or(now), payload.result)
            .with_parameters(payload.parameters)
            .with_raw(payload.raw)
            .received_at(now);
        if let Some(result_time) = payload.result_time {
            observation = observation.with_result_time(result_time);
        }

        self.insert(&message, &address, observation).await;
    }

    async fn insert(&self, message: &Message, address: &ReadingAddress, observation: NewObservation) {
        let counters = &self.shared.counters;
        let max_attempts = self.config.max_insert_attempts.max(1);
        let mut backoff = Backoff::from_millis(self.config.retry_base_ms, self.config.retry_max_ms);

        loop {
            let attempt = backoff.attempts() + 1;
            match self.sink.write(address, observation.clone()).await {
                Ok(stored) => {
                    Shared::bump(&counters.stored);
                    *self.shared.last_stored_at.write() = Some(stored.received_at);
                    tracing::debug!(
                        topic = %message.topic,
                        id = %stored.id,
                        datastream = %stored.datastream_id,
                        "Stored reading"
                    );
                    return;
                }
                Err(e) if e.is_conflict() => {
                    Shared::bump(&counters.duplicates);
                    tracing::info!(topic = %message.topic, payload = %message.payload_text(), "Dropped duplicate reading");
                    return;
                }
                Err(VigilError::ResolutionMiss(detail)) => {
                    Shared::bump(&counters.unresolved);
                    tracing::warn!(
                        topic = %message.topic,
                        payload = %message.payload_text(),
                        reason = "reattributed",
                        detail = %detail,
                        "Dropped unresolved reading"
                    );
                    return;
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    Shared::bump(&counters.retries);
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        topic = %message.topic,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying reading insert"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    Shared::bump(&counters.failed);
                    tracing::error!(
                        topic = %message.topic,
                        payload = %message.payload_text(),
                        kind = e.kind(),
                        attempts = attempt,
                        error = %e,
                        "Dropped reading after failed insert"
                    );
                    return;
                }
            }
        }
    }
}

// =============================================================================
// Pipeline Handle
// =============================================================================

/// Control handle of a running pipeline.
pub struct PipelineHandle {
    shutdown: watch::Sender<bool>,
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn health(&self) -> PipelineHealth {
        self.shared.health()
    }

    /// A cheap, cloneable reader for the pipeline health.
    pub fn monitor(&self) -> PipelineMonitor {
        PipelineMonitor {
            shared: self.shared.clone(),
        }
    }

    /// Stop accepting messages, let the in-flight insert finish and release
    /// the transport.
    pub async fn stop(mut self) -> PipelineHealth {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Ingestion pipeline task failed");
                self.shared.set_state(PipelineState::Stopped);
            }
        }
        self.shared.health()
    }
}

#[derive(Clone)]
pub struct PipelineMonitor {
    shared: Arc<Shared>,
}

impl PipelineMonitor {
    pub fn health(&self) -> PipelineHealth {
        self.shared.health()
    }
}

// =============================================================================
// Tests
// =============================================================================
