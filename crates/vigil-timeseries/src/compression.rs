//! Vigil Time Series Compression
//!
//! Columnar compression for cold chunks. Each datastream inside a chunk
//! becomes one segment ordered by phenomenon time descending. The
//! `(phenomenon time, result)` pair is Gorilla encoded (delta-of-delta
//! timestamps, XOR values) and the remaining fields are stored as side
//! columns.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::types::Observation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vigil_common::{ObservationId, Result, TimeRange, VigilError};

// =============================================================================
// Bit Writer
// =============================================================================

struct BitWriter {
    buffer: Vec<u8>,
    current_byte: u8,
    bit_position: u8,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            current_byte: 0,
            bit_position: 0,
        }
    }

    fn write_bit(&mut self, bit: bool) {
        if bit {
            self.current_byte |= 1 << (7 - self.bit_position);
        }
        self.bit_position += 1;

        if self.bit_position == 8 {
            self.buffer.push(self.current_byte);
            self.current_byte = 0;
            self.bit_position = 0;
        }
    }

    fn write_bits(&mut self, value: u64, num_bits: u8) {
        for i in (0..num_bits).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.bit_position > 0 {
            self.buffer.push(self.current_byte);
        }
        self.buffer
    }
}

// =============================================================================
// Bit Reader
// =============================================================================

struct BitReader<'a> {
    data: &'a [u8],
    byte_position: usize,
    bit_position: u8,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_position: 0,
            bit_position: 0,
        }
    }

    fn read_bit(&mut self) -> Option<bool> {
        let byte = *self.data.get(self.byte_position)?;
        let bit = (byte >> (7 - self.bit_position)) & 1 == 1;
        self.bit_position += 1;

        if self.bit_position == 8 {
            self.byte_position += 1;
            self.bit_position = 0;
        }

        Some(bit)
    }

    fn read_bits(&mut self, num_bits: u8) -> Option<u64> {
        let mut value = 0u64;
        for _ in 0..num_bits {
            value = (value << 1) | (self.read_bit()? as u64);
        }
        Some(value)
    }
}

// =============================================================================
// Gorilla Encoder
// =============================================================================

/// Encodes `(microsecond timestamp, f64)` pairs.
pub struct GorillaEncoder {
    writer: BitWriter,
    first_timestamp: Option<i64>,
    prev_timestamp: i64,
    prev_delta: i64,
    prev_value_bits: u64,
    prev_leading_zeros: u8,
    prev_trailing_zeros: u8,
    count: usize,
}

impl GorillaEncoder {
    pub fn new() -> Self {
        Self {
            writer: BitWriter::new(),
            first_timestamp: None,
            prev_timestamp: 0,
            prev_delta: 0,
            prev_value_bits: 0,
            prev_leading_zeros: u8::MAX,
            prev_trailing_zeros: u8::MAX,
            count: 0,
        }
    }

    pub fn push(&mut self, timestamp_micros: i64, value: f64) {
        let value_bits = value.to_bits();

        if self.first_timestamp.is_none() {
            self.first_timestamp = Some(timestamp_micros);
            self.writer.write_bits(timestamp_micros as u64, 64);
            self.writer.write_bits(value_bits, 64);
            self.prev_timestamp = timestamp_micros;
            self.prev_value_bits = value_bits;
            self.count = 1;
            return;
        }

        self.encode_timestamp(timestamp_micros);
        self.encode_value(value_bits);

        self.prev_timestamp = timestamp_micros;
        self.prev_value_bits = value_bits;
        self.count += 1;
    }

    fn encode_timestamp(&mut self, timestamp: i64) {
        let delta = timestamp.wrapping_sub(self.prev_timestamp);
        let dod = delta.wrapping_sub(self.prev_delta);

        if dod == 0 {
            self.writer.write_bit(false);
        } else if (-63..=64).contains(&dod) {
            self.writer.write_bits(0b10, 2);
            self.writer.write_bits((dod + 63) as u64, 7);
        } else if (-255..=256).contains(&dod) {
            self.writer.write_bits(0b110, 3);
            self.writer.write_bits((dod + 255) as u64, 9);
        } else if (-2047..=2048).contains(&dod) {
            self.writer.write_bits(0b1110, 4);
            self.writer.write_bits((dod + 2047) as u64, 12);
        } else {
            self.writer.write_bits(0b1111, 4);
            self.writer.write_bits(dod as u64, 64);
        }

        self.prev_delta = delta;
    }

    fn encode_value(&mut self, value_bits: u64) {
        let xor = self.prev_value_bits ^ value_bits;

        if xor == 0 {
            self.writer.write_bit(false);
            return;
        }

        self.writer.write_bit(true);

        let leading_zeros = (xor.leading_zeros() as u8).min(63);
        let trailing_zeros = xor.trailing_zeros() as u8;

        if self.prev_leading_zeros != u8::MAX
            && leading_zeros >= self.prev_leading_zeros
            && trailing_zeros >= self.prev_trailing_zeros
        {
            self.writer.write_bit(false);
            let meaningful_bits = 64 - self.prev_leading_zeros - self.prev_trailing_zeros;
            self.writer
                .write_bits(xor >> self.prev_trailing_zeros, meaningful_bits);
        } else {
            self.writer.write_bit(true);
            self.writer.write_bits(leading_zeros as u64, 6);

            // 1..=64 meaningful bits stored as 0..=63 in six bits.
            let meaningful_bits = 64 - leading_zeros - trailing_zeros;
            self.writer.write_bits((meaningful_bits - 1) as u64, 6);
            self.writer.write_bits(xor >> trailing_zeros, meaningful_bits);

            self.prev_leading_zeros = leading_zeros;
            self.prev_trailing_zeros = trailing_zeros;
        }
    }

    pub fn finish(self) -> GorillaBlock {
        GorillaBlock {
            data: self.writer.finish(),
            count: self.count,
        }
    }
}

impl Default for GorillaEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoded `(timestamp, value)` column pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GorillaBlock {
    pub data: Vec<u8>,
    pub count: usize,
}

impl GorillaBlock {
    pub fn decode(&self) -> Option<Vec<(i64, f64)>> {
        let mut decoder = GorillaDecoder::new(self);
        let mut out = Vec::with_capacity(self.count);
        while decoder.remaining > 0 {
            out.push(decoder.next_pair()?);
        }
        Some(out)
    }
}

// =============================================================================
// Gorilla Decoder
// =============================================================================

struct GorillaDecoder<'a> {
    reader: BitReader<'a>,
    prev_timestamp: i64,
    prev_delta: i64,
    prev_value_bits: u64,
    prev_leading_zeros: u8,
    prev_trailing_zeros: u8,
    remaining: usize,
    first_read: bool,
}

impl<'a> GorillaDecoder<'a> {
    fn new(block: &'a GorillaBlock) -> Self {
        Self {
            reader: BitReader::new(&block.data),
            prev_timestamp: 0,
            prev_delta: 0,
            prev_value_bits: 0,
            prev_leading_zeros: 0,
            prev_trailing_zeros: 0,
            remaining: block.count,
            first_read: true,
        }
    }

    fn next_pair(&mut self) -> Option<(i64, f64)> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        if self.first_read {
            self.first_read = false;
            self.prev_timestamp = self.reader.read_bits(64)? as i64;
            self.prev_value_bits = self.reader.read_bits(64)?;
            return Some((self.prev_timestamp, f64::from_bits(self.prev_value_bits)));
        }

        let timestamp = self.decode_timestamp()?;
        let value_bits = self.decode_value()?;
        self.prev_timestamp = timestamp;
        self.prev_value_bits = value_bits;

        Some((timestamp, f64::from_bits(value_bits)))
    }

    fn decode_timestamp(&mut self) -> Option<i64> {
        let dod = if !self.reader.read_bit()? {
            0i64
        } else if !self.reader.read_bit()? {
            self.reader.read_bits(7)? as i64 - 63
        } else if !self.reader.read_bit()? {
            self.reader.read_bits(9)? as i64 - 255
        } else if !self.reader.read_bit()? {
            self.reader.read_bits(12)? as i64 - 2047
        } else {
            self.reader.read_bits(64)? as i64
        };

        self.prev_delta = self.prev_delta.wrapping_add(dod);
        Some(self.prev_timestamp.wrapping_add(self.prev_delta))
    }

    fn decode_value(&mut self) -> Option<u64> {
        if !self.reader.read_bit()? {
            return Some(self.prev_value_bits);
        }

        let xor = if !self.reader.read_bit()? {
            let meaningful_bits = 64 - self.prev_leading_zeros - self.prev_trailing_zeros;
            self.reader.read_bits(meaningful_bits)? << self.prev_trailing_zeros
        } else {
            let leading_zeros = self.reader.read_bits(6)? as u8;
            let meaningful_bits = self.reader.read_bits(6)? as u8 + 1;
            let trailing_zeros = 64u8.checked_sub(leading_zeros + meaningful_bits)?;

            self.prev_leading_zeros = leading_zeros;
            self.prev_trailing_zeros = trailing_zeros;

            self.reader.read_bits(meaningful_bits)? << trailing_zeros
        };

        Some(self.prev_value_bits ^ xor)
    }
}

// =============================================================================
// Compressed Segment
// =============================================================================

/// Fields of an observation that do not compress numerically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SideFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    foi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    quality: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    raw: Option<Value>,
}

/// All rows of one datastream within one chunk, ordered by phenomenon time
/// descending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedSegment {
    pub datastream_id: String,
    pub count: usize,
    pub min_time: DateTime<Utc>,
    pub max_time: DateTime<Utc>,
    values: GorillaBlock,
    ids: Vec<u64>,
    /// Offsets from phenomenon time, in microseconds.
    result_time_offsets: Vec<i64>,
    received_at_offsets: Vec<i64>,
    side: Vec<u8>,
}

impl CompressedSegment {
    /// Encode rows of a single datastream. Rows are sorted internally.
    pub fn encode(mut rows: Vec<Observation>) -> Result<Self> {
        let first = rows
            .first()
            .ok_or_else(|| VigilError::Internal("cannot compress an empty segment".into()))?;
        let datastream_id = first.datastream_id.clone();

        if rows.iter().any(|r| r.datastream_id != datastream_id) {
            return Err(VigilError::Internal(
                "segment rows span multiple datastreams".into(),
            ));
        }

        rows.sort_by(|a, b| b.phenomenon_time.cmp(&a.phenomenon_time));

        let mut encoder = GorillaEncoder::new();
        let mut ids = Vec::with_capacity(rows.len());
        let mut result_time_offsets = Vec::with_capacity(rows.len());
        let mut received_at_offsets = Vec::with_capacity(rows.len());
        let mut side = Vec::with_capacity(rows.len());

        for row in &rows {
            let t = row.phenomenon_time.timestamp_micros();
            encoder.push(t, row.result);
            ids.push(row.id.0);
            result_time_offsets.push(row.result_time.timestamp_micros() - t);
            received_at_offsets.push(row.received_at.timestamp_micros() - t);
            side.push(SideFields {
                foi: row.feature_of_interest_id.clone(),
                quality: row.result_quality.clone(),
                parameters: row.parameters.clone(),
                raw: row.raw.clone(),
            });
        }

        let side = serde_json::to_vec(&side).map_err(|e| VigilError::Serialization(e.to_string()))?;

        Ok(Self {
            datastream_id,
            count: rows.len(),
            max_time: rows[0].phenomenon_time,
            min_time: rows[rows.len() - 1].phenomenon_time,
            values: encoder.finish(),
            ids,
            result_time_offsets,
            received_at_offsets,
            side,
        })
    }

    /// Decode every row, in phenomenon time descending order.
    pub fn decode(&self) -> Result<Vec<Observation>> {
        let corrupt = || VigilError::Internal(format!("corrupt segment for {}", self.datastream_id));

        let pairs = self.values.decode().ok_or_else(corrupt)?;
        let side: Vec<SideFields> =
            serde_json::from_slice(&self.side).map_err(|e| VigilError::Serialization(e.to_string()))?;

        if pairs.len() != self.count || side.len() != self.count || self.ids.len() != self.count {
            return Err(corrupt());
        }

        let at = |micros: i64| DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(corrupt);

        pairs
            .into_iter()
            .zip(side)
            .enumerate()
            .map(|(i, ((t, result), side))| {
                Ok(Observation {
                    id: ObservationId(self.ids[i]),
                    phenomenon_time: at(t)?,
                    result_time: at(t + self.result_time_offsets[i])?,
                    result,
                    result_quality: side.quality,
                    parameters: side.parameters,
                    raw: side.raw,
                    datastream_id: self.datastream_id.clone(),
                    feature_of_interest_id: side.foi,
                    received_at: at(t + self.received_at_offsets[i])?,
                })
            })
            .collect()
    }

    pub fn may_contain(&self, time: &DateTime<Utc>) -> bool {
        *time >= self.min_time && *time <= self.max_time
    }

    /// Closed-interval overlap with a query range.
    pub fn overlaps(&self, range: &TimeRange) -> bool {
        range.start.map_or(true, |s| s <= self.max_time) && range.end.map_or(true, |e| e >= self.min_time)
    }

    pub fn size_bytes(&self) -> usize {
        self.datastream_id.len()
            + self.values.data.len()
            + self.ids.len() * 8
            + self.result_time_offsets.len() * 8
            + self.received_at_offsets.len() * 8
            + self.side.len()
    }
}

#[cfg(test)]
impl CompressedSegment {
    /// Truncate the annotation block so decoding fails.
    pub(crate) fn damage(&mut self) {
        self.side.truncate(self.side.len() / 2);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewObservation;
    use chrono::Duration;
    use serde_json::json;

    fn rows(n: i64) -> Vec<Observation> {
        let base = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc);
        (0..n)
            .map(|i| {
                NewObservation::new("ds-1", base + Duration::seconds(i * 60), 20.0 + (i % 7) as f64 * 0.25)
                    .received_at(base + Duration::seconds(i * 60 + 2))
                    .into_observation(ObservationId(i as u64 + 1))
            })
            .collect()
    }

    #[test]
    fn test_gorilla_round_trip() {
        let mut encoder = GorillaEncoder::new();
        let points: Vec<(i64, f64)> = (0..200)
            .map(|i| (1_700_000_000_000_000 - i * 1_000_000, 42.0 + i as f64 * 0.1))
            .collect();
        for (t, v) in &points {
            encoder.push(*t, *v);
        }

        let block = encoder.finish();
        assert!(block.data.len() < points.len() * 16);
        assert_eq!(block.decode().expect("decodes"), points);
    }

    #[test]
    fn test_gorilla_full_width_xor() {
        // Sign flip plus low-bit change needs all 64 meaningful bits.
        let values = [1.0f64, -f64::from_bits(1.0f64.to_bits() | 1), 0.0, f64::MAX, f64::MIN_POSITIVE];
        let mut encoder = GorillaEncoder::new();
        for (i, v) in values.iter().enumerate() {
            encoder.push(i as i64, *v);
        }

        let decoded = encoder.finish().decode().expect("decodes");
        let decoded_values: Vec<f64> = decoded.into_iter().map(|(_, v)| v).collect();
        assert_eq!(decoded_values, values);
    }

    #[test]
    fn test_segment_round_trip_preserves_rows() {
        let mut original = rows(50);
        original[3].result_quality = Some(json!({"flag": "suspect"}));
        original[7].feature_of_interest_id = Some("foi-1".to_string());
        original[9].raw = Some(json!({"result": 1.5}));

        let segment = CompressedSegment::encode(original.clone()).expect("encode");
        assert_eq!(segment.count, 50);

        let decoded = segment.decode().expect("decode");
        original.sort_by(|a, b| b.phenomenon_time.cmp(&a.phenomenon_time));
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_segment_is_smaller_than_rows() {
        let original = rows(500);
        let raw: usize = original.iter().map(|r| r.estimated_size()).sum();
        let segment = CompressedSegment::encode(original).expect("encode");
        assert!(segment.size_bytes() < raw);
    }

    #[test]
    fn test_segment_rejects_mixed_datastreams() {
        let mut mixed = rows(2);
        mixed[1].datastream_id = "ds-2".to_string();
        assert!(CompressedSegment::encode(mixed).is_err());
        assert!(CompressedSegment::encode(Vec::new()).is_err());
    }
}
