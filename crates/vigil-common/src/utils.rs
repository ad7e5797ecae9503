//! Vigil Utils - Utility Functions
//!
//! Hashing used for datastream space partitioning and size formatting for
//! storage statistics.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use xxhash_rust::xxh3::xxh3_64;

// =============================================================================
// Hashing Functions
// =============================================================================

/// Compute a 64-bit hash of the given bytes using xxHash3.
#[inline]
pub fn hash64(data: &[u8]) -> u64 {
    xxh3_64(data)
}

/// Stable hash partition for a key; `partitions` of zero is treated as one.
#[inline]
pub fn space_partition(key: &str, partitions: u32) -> u32 {
    let partitions = partitions.max(1) as u64;
    (hash64(key.as_bytes()) % partitions) as u32
}

// =============================================================================
// Size Formatting
// =============================================================================

const SIZE_UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Human-readable byte count for store statistics and compression logs.
pub fn format_size(bytes: u64) -> String {
    let mut scaled = bytes as f64;
    let mut unit = 0;
    while scaled >= 1024.0 && unit + 1 < SIZE_UNITS.len() {
        scaled /= 1024.0;
        unit += 1;
    }
    match unit {
        0 => format!("{} B", bytes),
        _ => format!("{:.2} {}", scaled, SIZE_UNITS[unit]),
    }
}

// =============================================================================
// Tests
// =============================================================================
