//! Vigil Time Series Partitioning
//!
//! Hypertable chunking for the observation table. Rows are bucketed by
//! phenomenon time (fixed-width, epoch aligned) and by a stable hash of the
//! datastream id. A table that has not been converted yet is "plain": one
//! unbounded chunk holding everything.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::compression::CompressedSegment;
use crate::policy::CompressionReport;
use crate::query::ScanFilter;
use crate::types::{Observation, RowKey};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use vigil_common::utils::space_partition;
use vigil_common::{Result, VigilError};

// =============================================================================
// Dimensions
// =============================================================================

/// Partitioning layout of the hypertable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Time bucket width; `None` means the table is not chunked by time.
    pub chunk_interval_secs: Option<u64>,
    pub space_partitions: u32,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::plain()
    }
}

impl Dimensions {
    pub fn plain() -> Self {
        Self {
            chunk_interval_secs: None,
            space_partitions: 1,
        }
    }

    pub fn is_hypertable(&self) -> bool {
        self.chunk_interval_secs.is_some()
    }

    /// Bucket `[start, end)` holding the timestamp.
    pub fn bucket(&self, timestamp: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let width = match self.chunk_interval_secs {
            Some(secs) if secs > 0 => (secs as i64).saturating_mul(1_000_000),
            _ => return (DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC),
        };

        let start_micros = timestamp.timestamp_micros().div_euclid(width) * width;
        let start = DateTime::<Utc>::from_timestamp_micros(start_micros).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = start
            .checked_add_signed(Duration::microseconds(width))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (start, end)
    }

    pub fn space_of(&self, datastream_id: &str) -> u32 {
        space_partition(datastream_id, self.space_partitions)
    }

    pub fn chunk_key(&self, datastream_id: &str, timestamp: DateTime<Utc>) -> ChunkKey {
        ChunkKey {
            range_start: self.bucket(timestamp).0,
            space: self.space_of(datastream_id),
        }
    }
}

/// Chunk coordinates: time bucket start and space partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkKey {
    pub range_start: DateTime<Utc>,
    pub space: u32,
}

// =============================================================================
// Chunk
// =============================================================================

/// One `(time bucket, space partition)` cell of the hypertable.
///
/// Hot rows live in `rows`, keyed by `(datastream, phenomenon time DESC)`.
/// After compression every datastream's rows move into a single segment.
/// A late insert lands in `rows` and is folded into the segment the next
/// time the chunk is compressed.
#[derive(Debug)]
pub struct Chunk {
    pub key: ChunkKey,
    pub range_end: DateTime<Utc>,
    rows: BTreeMap<RowKey, Observation>,
    segments: BTreeMap<String, CompressedSegment>,
    compressed_at: Option<DateTime<Utc>>,
}

impl Chunk {
    pub fn new(key: ChunkKey, range_end: DateTime<Utc>) -> Self {
        Self {
            key,
            range_end,
            rows: BTreeMap::new(),
            segments: BTreeMap::new(),
            compressed_at: None,
        }
    }

    pub fn range_start(&self) -> DateTime<Utc> {
        self.key.range_start
    }

    /// Uniqueness check across hot rows and compressed segments.
    pub fn contains_key(&self, key: &RowKey) -> Result<bool> {
        if self.rows.contains_key(key) {
            return Ok(true);
        }
        match self.segments.get(&key.datastream_id) {
            Some(segment) if segment.may_contain(&key.phenomenon_time) => Ok(segment
                .decode()?
                .iter()
                .any(|o| o.phenomenon_time == key.phenomenon_time)),
            _ => Ok(false),
        }
    }

    pub fn insert(&mut self, observation: Observation) -> Result<()> {
        let key = observation.key();
        if self.contains_key(&key)? {
            return Err(VigilError::conflict(format!(
                "observation already exists for datastream {} at {}",
                key.datastream_id,
                key.phenomenon_time.to_rfc3339()
            )));
        }
        self.rows.insert(key, observation);
        Ok(())
    }

    pub fn get(&self, key: &RowKey) -> Result<Option<Observation>> {
        if let Some(row) = self.rows.get(key) {
            return Ok(Some(row.clone()));
        }
        match self.segments.get(&key.datastream_id) {
            Some(segment) if segment.may_contain(&key.phenomenon_time) => Ok(segment
                .decode()?
                .into_iter()
                .find(|o| o.phenomenon_time == key.phenomenon_time)),
            _ => Ok(None),
        }
    }

    /// Mutate a row in place. A row held in a segment is first moved back
    /// to the hot rows, decompressing only its datastream.
    pub fn update<F>(&mut self, key: &RowKey, apply: F) -> Result<Option<Observation>>
    where
        F: FnOnce(&mut Observation),
    {
        if !self.rows.contains_key(key) {
            let in_segment = self
                .segments
                .get(&key.datastream_id)
                .map_or(false, |s| s.may_contain(&key.phenomenon_time));
            if in_segment {
                self.decompress_segment(&key.datastream_id)?;
            }
        }

        Ok(self.rows.get_mut(key).map(|row| {
            apply(row);
            row.clone()
        }))
    }

    fn decompress_segment(&mut self, datastream_id: &str) -> Result<usize> {
        let Some(segment) = self.segments.remove(datastream_id) else {
            return Ok(0);
        };
        let rows = match segment.decode() {
            Ok(rows) => rows,
            Err(e) => {
                self.segments.insert(datastream_id.to_string(), segment);
                return Err(e);
            }
        };
        let count = rows.len();
        for row in rows {
            self.rows.insert(row.key(), row);
        }
        Ok(count)
    }

    /// Append every matching row to `out`. With `indexed` set and a
    /// datastream filter, hot rows are read through a key range instead of
    /// a full pass.
    pub fn collect(&self, filter: &ScanFilter, indexed: bool, out: &mut Vec<Observation>) -> Result<()> {
        match (&filter.datastream_id, indexed) {
            (Some(ds), true) => {
                let upper = RowKey::new(
                    ds.clone(),
                    filter.time_range.end.unwrap_or(DateTime::<Utc>::MAX_UTC),
                );
                let lower = RowKey::new(
                    ds.clone(),
                    filter.time_range.start.unwrap_or(DateTime::<Utc>::MIN_UTC),
                );
                if upper <= lower {
                    out.extend(
                        self.rows
                            .range((Bound::Included(upper), Bound::Included(lower)))
                            .map(|(_, row)| row)
                            .filter(|row| filter.matches(row))
                            .cloned(),
                    );
                }
            }
            _ => out.extend(self.rows.values().filter(|row| filter.matches(row)).cloned()),
        }

        for (ds, segment) in &self.segments {
            if filter.datastream_id.as_ref().map_or(false, |f| f != ds) {
                continue;
            }
            if !segment.overlaps(&filter.time_range) {
                continue;
            }
            out.extend(segment.decode()?.into_iter().filter(|row| filter.matches(row)));
        }
        Ok(())
    }

    /// Remove every row of a datastream, hot or compressed.
    pub fn remove_datastream(&mut self, datastream_id: &str) -> Result<Vec<Observation>> {
        let segment_rows = self.segment_rows(datastream_id)?;
        Ok(self.purge_datastream(datastream_id, segment_rows))
    }

    /// Decode the datastream's segment without touching the chunk.
    fn segment_rows(&self, datastream_id: &str) -> Result<Vec<Observation>> {
        match self.segments.get(datastream_id) {
            Some(segment) => segment.decode(),
            None => Ok(Vec::new()),
        }
    }

    /// Drop the datastream's segment and hot rows. `segment_rows` must come
    /// from `segment_rows` under the same write lock.
    fn purge_datastream(&mut self, datastream_id: &str, mut removed: Vec<Observation>) -> Vec<Observation> {
        self.segments.remove(datastream_id);

        let keys: Vec<RowKey> = self
            .rows
            .range(RowKey::new(datastream_id, DateTime::<Utc>::MAX_UTC)..)
            .take_while(|(k, _)| k.datastream_id == datastream_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            if let Some(row) = self.rows.remove(&key) {
                removed.push(row);
            }
        }
        removed
    }

    /// Fold hot rows into per-datastream segments. Returns `None` when the
    /// chunk holds no hot rows.
    pub fn compress(&mut self, now: DateTime<Utc>) -> Result<Option<(usize, usize, usize)>> {
        if self.rows.is_empty() {
            return Ok(None);
        }

        let bytes_before = self.size_bytes();
        let hot = std::mem::take(&mut self.rows);
        let rows_compressed = hot.len();

        let mut groups: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
        for (key, row) in hot {
            groups.entry(key.datastream_id).or_default().push(row);
        }

        for (ds, mut group) in groups {
            if let Some(existing) = self.segments.get(&ds) {
                group.extend(existing.decode()?);
            }
            let segment = CompressedSegment::encode(group)?;
            self.segments.insert(ds, segment);
        }

        self.compressed_at = Some(now);
        Ok(Some((rows_compressed, bytes_before, self.size_bytes())))
    }

    pub fn export(&self) -> Result<Vec<Observation>> {
        let mut out: Vec<Observation> = self.rows.values().cloned().collect();
        for segment in self.segments.values() {
            out.extend(segment.decode()?);
        }
        Ok(out)
    }

    pub fn hot_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn compressed_rows(&self) -> usize {
        self.segments.values().map(|s| s.count).sum()
    }

    pub fn row_count(&self) -> usize {
        self.hot_rows() + self.compressed_rows()
    }

    pub fn is_compressed(&self) -> bool {
        !self.segments.is_empty()
    }

    pub fn compressed_at(&self) -> Option<DateTime<Utc>> {
        self.compressed_at
    }

    pub fn size_bytes(&self) -> usize {
        self.rows
            .values()
            .map(|r| r.estimated_size())
            .sum::<usize>()
            + self.segments.values().map(|s| s.size_bytes()).sum::<usize>()
    }
}

// =============================================================================
// Hypertable
// =============================================================================

type ChunkRef = Arc<RwLock<Chunk>>;

/// The chunk map plus the layout that addresses it.
///
/// Lock order is `dimensions` then `chunks` then an individual chunk.
/// Writers that change the layout hold `dimensions` exclusively, so every
/// row operation holds it shared for its whole duration.
pub struct Hypertable {
    dimensions: RwLock<Dimensions>,
    chunks: RwLock<BTreeMap<ChunkKey, ChunkRef>>,
}

impl Default for Hypertable {
    fn default() -> Self {
        Self::new()
    }
}

impl Hypertable {
    pub fn new() -> Self {
        Self {
            dimensions: RwLock::new(Dimensions::plain()),
            chunks: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        *self.dimensions.read()
    }

    fn chunk_for_write(&self, dims: &Dimensions, datastream_id: &str, timestamp: DateTime<Utc>) -> ChunkRef {
        let key = dims.chunk_key(datastream_id, timestamp);

        {
            let chunks = self.chunks.read();
            if let Some(chunk) = chunks.get(&key) {
                return Arc::clone(chunk);
            }
        }

        let mut chunks = self.chunks.write();
        if let Some(chunk) = chunks.get(&key) {
            return Arc::clone(chunk);
        }

        let (_, range_end) = dims.bucket(timestamp);
        let chunk = Arc::new(RwLock::new(Chunk::new(key, range_end)));
        chunks.insert(key, Arc::clone(&chunk));
        chunk
    }

    fn chunk_for_read(&self, dims: &Dimensions, key: &RowKey) -> Option<ChunkRef> {
        let chunk_key = dims.chunk_key(&key.datastream_id, key.phenomenon_time);
        self.chunks.read().get(&chunk_key).cloned()
    }

    /// Insert a row. The uniqueness check and the write happen under the
    /// same chunk lock.
    pub fn insert(&self, observation: Observation) -> Result<()> {
        let dims = self.dimensions.read();
        let chunk = self.chunk_for_write(&dims, &observation.datastream_id, observation.phenomenon_time);
        let mut chunk = chunk.write();
        chunk.insert(observation)
    }

    pub fn get(&self, key: &RowKey) -> Result<Option<Observation>> {
        let dims = self.dimensions.read();
        match self.chunk_for_read(&dims, key) {
            Some(chunk) => {
                let chunk = chunk.read();
                chunk.get(key)
            }
            None => Ok(None),
        }
    }

    pub fn update<F>(&self, key: &RowKey, apply: F) -> Result<Option<Observation>>
    where
        F: FnOnce(&mut Observation),
    {
        let dims = self.dimensions.read();
        match self.chunk_for_read(&dims, key) {
            Some(chunk) => {
                let mut chunk = chunk.write();
                chunk.update(key, apply)
            }
            None => Ok(None),
        }
    }

    /// Chunks that can hold rows matching the filter.
    fn candidates(&self, dims: &Dimensions, filter: &ScanFilter) -> Vec<ChunkRef> {
        let space = filter.datastream_id.as_deref().map(|ds| dims.space_of(ds));
        let chunks = self.chunks.read();
        chunks
            .iter()
            .filter(|(key, _)| space.map_or(true, |s| key.space == s))
            .map(|(_, chunk)| chunk)
            .filter(|chunk| {
                let c = chunk.read();
                filter.time_range.overlaps(c.range_start(), c.range_end)
            })
            .cloned()
            .collect()
    }

    /// Collect every row matching the filter, unordered.
    pub fn scan(&self, filter: &ScanFilter, indexed: bool) -> Result<Vec<Observation>> {
        if filter.time_range.is_empty() {
            return Ok(Vec::new());
        }
        let dims = self.dimensions.read();
        let mut out = Vec::new();
        for chunk in self.candidates(&dims, filter) {
            chunk.read().collect(filter, indexed, &mut out)?;
        }
        Ok(out)
    }

    pub fn remove_datastream(&self, datastream_id: &str) -> Result<Vec<Observation>> {
        let dims = self.dimensions.read();
        let filter = ScanFilter::for_datastream(datastream_id);
        let candidates = self.candidates(&dims, &filter);

        // All-or-nothing: every segment decodes before any chunk changes.
        let mut guards: Vec<_> = candidates.iter().map(|chunk| chunk.write()).collect();
        let decoded = guards
            .iter()
            .map(|chunk| chunk.segment_rows(datastream_id))
            .collect::<Result<Vec<_>>>()?;

        let mut removed = Vec::new();
        for (chunk, segment_rows) in guards.iter_mut().zip(decoded) {
            removed.extend(chunk.purge_datastream(datastream_id, segment_rows));
        }
        Ok(removed)
    }

    /// Compress every chunk whose range ended at or before `cutoff`. Each
    /// chunk is locked on its own, so inserts into other chunks proceed.
    pub fn compress_before(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<CompressionReport> {
        let _dims = self.dimensions.read();
        let eligible: Vec<ChunkRef> = {
            let chunks = self.chunks.read();
            chunks
                .values()
                .filter(|c| c.read().range_end <= cutoff)
                .cloned()
                .collect()
        };

        let mut report = CompressionReport::default();
        for chunk in eligible {
            let mut chunk = chunk.write();
            match chunk.compress(now)? {
                Some((rows, before, after)) => {
                    report.chunks_compressed += 1;
                    report.rows_compressed += rows;
                    report.bytes_before += before;
                    report.bytes_after += after;
                }
                None => report.chunks_skipped += 1,
            }
        }
        Ok(report)
    }

    /// Re-bucket every row under a new layout.
    pub fn repartition(&self, layout: Dimensions) -> Result<usize> {
        if layout.chunk_interval_secs == Some(0) || layout.space_partitions == 0 {
            return Err(VigilError::Configuration(
                "chunk interval and space partitions must be positive".into(),
            ));
        }

        let mut dims = self.dimensions.write();
        if *dims == layout {
            return Ok(0);
        }

        let mut chunks = self.chunks.write();
        let mut rows = Vec::new();
        for chunk in chunks.values() {
            rows.extend(chunk.read().export()?);
        }

        let mut rebuilt: BTreeMap<ChunkKey, Chunk> = BTreeMap::new();
        for row in &rows {
            let key = layout.chunk_key(&row.datastream_id, row.phenomenon_time);
            let chunk = rebuilt
                .entry(key)
                .or_insert_with(|| Chunk::new(key, layout.bucket(row.phenomenon_time).1));
            chunk.insert(row.clone())?;
        }

        *chunks = rebuilt
            .into_iter()
            .map(|(k, c)| (k, Arc::new(RwLock::new(c))))
            .collect();
        *dims = layout;
        Ok(rows.len())
    }

    pub fn export(&self) -> Result<Vec<Observation>> {
        let _dims = self.dimensions.read();
        let chunks: Vec<ChunkRef> = self.chunks.read().values().cloned().collect();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(chunk.read().export()?);
        }
        Ok(out)
    }

    pub fn stats(&self) -> PartitionStats {
        let chunks = self.chunks.read();
        let mut stats = PartitionStats {
            chunk_count: chunks.len(),
            ..Default::default()
        };
        for chunk in chunks.values() {
            let c = chunk.read();
            if c.is_compressed() {
                stats.compressed_chunks += 1;
            }
            stats.hot_rows += c.hot_rows();
            stats.compressed_rows += c.compressed_rows();
            stats.total_bytes += c.size_bytes();
        }
        stats
    }
}

/// Chunk statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionStats {
    pub chunk_count: usize,
    pub compressed_chunks: usize,
    pub hot_rows: usize,
    pub compressed_rows: usize,
    pub total_bytes: usize,
}

#[cfg(test)]
impl Hypertable {
    /// Corrupt every compressed segment of a datastream.
    pub(crate) fn damage_segments(&self, datastream_id: &str) {
        for chunk in self.chunks.read().values() {
            if let Some(segment) = chunk.write().segments.get_mut(datastream_id) {
                segment.damage();
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
