//! Segment model shared by every payload kind
//!
//! A payload (wave, helicorder, RSAM) knows its own time range, memory
//! footprint and merge rules. The cache wraps each payload in a
//! [`CachedSegment`] that carries the last-access stamp used for eviction.

use crate::core::time::TimeRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// The three cached data kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Wave,
    Helicorder,
    Rsam,
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentKind::Wave => "wave",
            SegmentKind::Helicorder => "helicorder",
            SegmentKind::Rsam => "rsam",
        };
        f.write_str(name)
    }
}

/// How an incoming payload relates to one already in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Independent; both may live in the same channel list
    Disjoint,
    /// Combine into a single segment spanning the union
    Merge,
    /// Same instants but incompatible layout; the incoming payload wins
    Replace,
}

/// Behaviour every cached payload kind provides to the cache.
pub trait SegmentPayload: Clone + Send + Sync + fmt::Debug + 'static {
    const KIND: SegmentKind;

    /// Time range covered by this payload.
    fn range(&self) -> TimeRange;

    /// Estimated heap footprint in bytes.
    fn memory_size(&self) -> usize;

    fn is_empty(&self) -> bool;

    /// Classify `self` (incoming) against `existing`.
    ///
    /// `max_bytes` is the single-segment cap; kinds that join adjacent
    /// segments must not do so past it.
    fn relation(&self, existing: &Self, max_bytes: usize) -> Relation;

    /// Combine `existing` (older) with `newer`; where both hold data for the
    /// same instant, `newer` wins.
    fn merge(existing: &Self, newer: &Self) -> Self;

    /// Copy of the part of this payload intersecting `[t1, t2]`.
    fn trim(&self, t1: f64, t2: f64) -> Option<Self>;

    /// Split into two halves at the midpoint. Kinds that never exceed the
    /// single-segment cap keep the default.
    fn split(&self) -> Option<(Self, Self)> {
        None
    }
}

/// A payload plus cache bookkeeping.
#[derive(Debug, Clone)]
pub struct CachedSegment<P> {
    pub payload: P,
    last_access: Instant,
}

impl<P: SegmentPayload> CachedSegment<P> {
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            last_access: Instant::now(),
        }
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    /// Refresh the access stamp. Never moves it backwards.
    pub fn touch(&mut self) {
        let now = Instant::now();
        if now > self.last_access {
            self.last_access = now;
        }
    }

    pub fn range(&self) -> TimeRange {
        self.payload.range()
    }

    pub fn memory_size(&self) -> usize {
        self.payload.memory_size()
    }
}

/// Rows in helicorder and RSAM series share a time column.
pub(crate) trait TimedRow: Clone {
    fn time(&self) -> f64;
}

/// Union of two sorted row series on a fixed grid of `interval` seconds.
/// Rows of `newer` replace rows of `older` that fall in the same slot.
pub(crate) fn merge_rows<R: TimedRow>(older: &[R], newer: &[R], interval: f64) -> Vec<R> {
    let mut slots: BTreeMap<i64, R> = BTreeMap::new();
    for row in older.iter().chain(newer.iter()) {
        let slot = (row.time() / interval).round() as i64;
        slots.insert(slot, row.clone());
    }
    slots.into_values().collect()
}

/// Rows whose `[time, time + interval)` cell intersects `[t1, t2]`. A
/// zero-width range picks the cell holding that instant, including the
/// closing edge of the last cell.
pub(crate) fn trim_rows<R: TimedRow>(rows: &[R], t1: f64, t2: f64, interval: f64) -> Vec<R> {
    if t1 == t2 {
        return rows
            .iter()
            .rev()
            .find(|r| r.time() <= t1 && t1 <= r.time() + interval)
            .cloned()
            .into_iter()
            .collect();
    }
    rows.iter()
        .filter(|r| r.time() + interval > t1 && r.time() <= t2)
        .cloned()
        .collect()
}

/// Time range of a sorted row series whose last row spans one interval.
pub(crate) fn row_range<R: TimedRow>(rows: &[R], interval: f64) -> TimeRange {
    match (rows.first(), rows.last()) {
        (Some(first), Some(last)) => TimeRange {
            start: first.time(),
            end: last.time() + interval,
        },
        _ => TimeRange {
            start: 0.0,
            end: 0.0,
        },
    }
}

pub(crate) fn sort_rows<R: TimedRow>(rows: &mut [R]) {
    rows.sort_by(|a, b| a.time().total_cmp(&b.time()));
}
