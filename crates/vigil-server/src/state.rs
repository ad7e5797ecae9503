//! Vigil Server State
//!
//! Application state shared across request handlers: the observation store,
//! the entity catalog over it, the query engine, the in-process message
//! broker and a reader for the ingestion pipeline health.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::config::ServerConfig;
use crate::snapshot::{Snapshot, SnapshotFile};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use vigil_catalog::{Catalog, DatastreamResolver, QueryEngine, ReadingSink};
use vigil_common::{Result, VigilError};
use vigil_streaming::{
    BrokerTransport, IngestionPipeline, MessageBroker, PipelineHandle, PipelineHealth, PipelineMonitor,
};
use vigil_timeseries::TimeSeriesStore;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<TimeSeriesStore>,
    pub catalog: Arc<Catalog>,
    pub queries: QueryEngine,
    pub broker: Arc<MessageBroker>,
    pub started_at: DateTime<Utc>,
    pipeline: Arc<RwLock<Option<PipelineMonitor>>>,
    snapshots: Option<SnapshotFile>,
}

impl AppState {
    /// Open the store (running schema migrations) and load the snapshot
    /// from the data directory when one is configured.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(TimeSeriesStore::open(&config.store)?);
        let catalog = Arc::new(Catalog::new(Arc::clone(&store)));
        let queries = QueryEngine::new(Arc::clone(&catalog), config.query.clone());
        let broker = Arc::new(MessageBroker::new(config.ingest.broker_buffer_size));

        let snapshots = config.data_dir.as_ref().map(SnapshotFile::in_dir);
        if let Some(ref file) = snapshots {
            if let Some(snapshot) = file.load()? {
                let saved_at = snapshot.saved_at;
                let rows = snapshot.restore_into(&catalog)?;
                let stats = catalog.stats();
                tracing::info!(
                    path = %file.path().display(),
                    %saved_at,
                    datastreams = stats.datastreams,
                    observations = rows,
                    "Loaded snapshot"
                );
            }
        }

        Ok(Self {
            config: Arc::new(config),
            store,
            catalog,
            queries,
            broker,
            started_at: Utc::now(),
            pipeline: Arc::new(RwLock::new(None)),
            snapshots,
        })
    }

    /// Subscribe the ingestion pipeline to the broker. Returns `None` when
    /// ingestion is disabled. Must be called inside a tokio runtime.
    pub fn start_ingestion(&self) -> Option<PipelineHandle> {
        if !self.config.ingest.enabled {
            return None;
        }

        let sink: Arc<dyn ReadingSink> = self.catalog.clone();
        let pipeline = IngestionPipeline::new(
            BrokerTransport::new(Arc::clone(&self.broker)),
            DatastreamResolver::new(Arc::clone(&self.catalog)),
            sink,
            self.config.ingest.clone(),
        );
        let handle = pipeline.start();
        *self.pipeline.write() = Some(handle.monitor());

        tracing::info!(subscription = %self.config.ingest.subscription(), "Ingestion pipeline started");
        Some(handle)
    }

    pub fn pipeline_health(&self) -> Option<PipelineHealth> {
        self.pipeline.read().as_ref().map(|m| m.health())
    }

    pub fn persistence_enabled(&self) -> bool {
        self.snapshots.is_some()
    }

    /// Write the snapshot (if data_dir is configured).
    pub fn save_to_disk(&self) -> Result<()> {
        let Some(ref file) = self.snapshots else {
            return Ok(());
        };

        let snapshot = Snapshot::capture(&self.catalog)?;
        let rows = snapshot.observations.len();
        file.save(&snapshot)?;
        tracing::debug!(path = %file.path().display(), observations = rows, "Saved snapshot");
        Ok(())
    }

    /// Save on a blocking thread so large snapshots do not stall the runtime.
    pub async fn save_in_background(&self) -> Result<()> {
        let state = self.clone();
        tokio::task::spawn_blocking(move || state.save_to_disk())
            .await
            .map_err(|e| VigilError::Internal(format!("snapshot task failed: {}", e)))?
    }
}

// =============================================================================
// Tests
// =============================================================================
