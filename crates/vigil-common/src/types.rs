//! Vigil Types - Core Data Types
//!
//! Fundamental types shared across the Vigil crates: observation
//! identifiers, closed time ranges, sort direction and the pagination
//! contract used by every listing.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Identifier Types
// =============================================================================

/// Synthetic identifier assigned to an observation on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationId(pub u64);

impl std::fmt::Display for ObservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Time Range
// =============================================================================

/// Closed time range `[start, end]`; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn until(end: DateTime<Utc>) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    /// Both bounds are inclusive.
    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        let after_start = self.start.map_or(true, |s| *timestamp >= s);
        let before_end = self.end.map_or(true, |e| *timestamp <= e);
        after_start && before_end
    }

    /// True when `[lo, hi)` shares at least one instant with this range.
    pub fn overlaps(&self, lo: DateTime<Utc>, hi: DateTime<Utc>) -> bool {
        let starts_before_hi = self.start.map_or(true, |s| s < hi);
        let ends_after_lo = self.end.map_or(true, |e| e >= lo);
        starts_before_hi && ends_after_lo
    }

    /// An inverted range matches nothing.
    pub fn is_empty(&self) -> bool {
        matches!((self.start, self.end), (Some(s), Some(e)) if s > e)
    }
}

// =============================================================================
// Sort Order
// =============================================================================

/// Direction of the phenomenon-time ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

// =============================================================================
// Pagination
// =============================================================================

/// Offset/limit window over a filtered result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// Clamp the page size to `max_limit`.
    pub fn capped(self, max_limit: usize) -> Self {
        Self {
            offset: self.offset,
            limit: self.limit.min(max_limit),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

/// A page of results together with the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub count: usize,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            count: 0,
            items: Vec::new(),
        }
    }

    /// Slice an already filtered and ordered result set.
    pub fn from_sorted(all: Vec<T>, page: PageRequest) -> Self {
        let count = all.len();
        let items = all
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Self { count, items }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_time_range_is_closed() {
        let start = Utc::now();
        let end = start + Duration::minutes(10);
        let range = TimeRange::new(start, end);

        assert!(range.contains(&start));
        assert!(range.contains(&end));
        assert!(!range.contains(&(end + Duration::microseconds(1))));
        assert!(!range.contains(&(start - Duration::microseconds(1))));
    }

    #[test]
    fn test_time_range_overlaps_half_open_bucket() {
        let lo = Utc::now();
        let hi = lo + Duration::days(1);

        assert!(TimeRange::until(lo).overlaps(lo, hi));
        assert!(!TimeRange::since(hi).overlaps(lo, hi));
        assert!(TimeRange::unbounded().overlaps(lo, hi));
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let now = Utc::now();
        assert!(TimeRange::new(now, now - Duration::seconds(1)).is_empty());
        assert!(!TimeRange::new(now, now).is_empty());
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!("ASC".parse::<SortOrder>(), Ok(SortOrder::Asc));
        assert_eq!("desc".parse::<SortOrder>(), Ok(SortOrder::Desc));
        assert!("sideways".parse::<SortOrder>().is_err());
        assert_eq!(SortOrder::default(), SortOrder::Desc);
    }

    #[test]
    fn test_page_from_sorted() {
        let page = Page::from_sorted((0..10).collect::<Vec<_>>(), PageRequest::new(8, 5));
        assert_eq!(page.count, 10);
        assert_eq!(page.items, vec![8, 9]);

        let capped = PageRequest::new(0, 500).capped(100);
        assert_eq!(capped.limit, 100);
    }
}
