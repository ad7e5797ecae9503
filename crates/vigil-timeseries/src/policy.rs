//! Vigil Time Series Compression Policy
//!
//! Compression settings, the age-based compression policy and the background
//! job that applies it.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::store::TimeSeriesStore;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use vigil_common::format_size;

// =============================================================================
// Compression Settings
// =============================================================================

/// Column used to split a chunk into segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentBy {
    DatastreamId,
}

/// Row order inside a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentOrder {
    PhenomenonTimeDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionSettings {
    pub segment_by: SegmentBy,
    pub order_by: SegmentOrder,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            segment_by: SegmentBy::DatastreamId,
            order_by: SegmentOrder::PhenomenonTimeDesc,
        }
    }
}

// =============================================================================
// Compression Policy
// =============================================================================

/// Compress chunks whose time range ended more than `compress_after_days`
/// ago.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionPolicy {
    pub compress_after_days: u32,
}

impl CompressionPolicy {
    pub fn new(compress_after_days: u32) -> Self {
        Self { compress_after_days }
    }

    pub fn compress_after(&self) -> Duration {
        Duration::days(self.compress_after_days as i64)
    }
}

/// Outcome of one compression pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionReport {
    pub chunks_compressed: usize,
    /// Eligible chunks that had nothing new to compress.
    pub chunks_skipped: usize,
    pub rows_compressed: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

impl CompressionReport {
    pub fn ratio(&self) -> f64 {
        if self.bytes_after == 0 {
            return 1.0;
        }
        self.bytes_before as f64 / self.bytes_after as f64
    }

    /// Size change of the pass, e.g. `1.50 MiB -> 312 B`.
    pub fn size_change(&self) -> String {
        format!(
            "{} -> {}",
            format_size(self.bytes_before as u64),
            format_size(self.bytes_after as u64)
        )
    }
}

// =============================================================================
// Compression Job
// =============================================================================

/// Periodically runs the compression policy until shutdown is signalled.
pub struct CompressionJob {
    store: Arc<TimeSeriesStore>,
    interval: std::time::Duration,
}

impl CompressionJob {
    pub fn new(store: Arc<TimeSeriesStore>, interval: std::time::Duration) -> Self {
        Self { store, interval }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let store = Arc::clone(&self.store);
                        let outcome = tokio::task::spawn_blocking(move || store.compress_eligible(Utc::now())).await;
                        match outcome {
                            Ok(Ok(report)) if report.chunks_compressed > 0 => {
                                tracing::info!(
                                    chunks = report.chunks_compressed,
                                    rows = report.rows_compressed,
                                    ratio = report.ratio(),
                                    size = %report.size_change(),
                                    "Compressed cold chunks"
                                );
                            }
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => tracing::warn!(error = %e, "Compression pass failed"),
                            Err(e) => tracing::error!(error = %e, "Compression task panicked"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("Compression job stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
