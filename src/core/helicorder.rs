//! Helicorder summaries: per-interval (min, max) rows for overview drawing

use crate::core::segment::{
    merge_rows, row_range, sort_rows, trim_rows, Relation, SegmentKind, SegmentPayload, TimedRow,
};
use crate::core::time::TimeRange;
use serde::{Deserialize, Serialize};
use std::mem;

/// One summary row: extremes of the raw samples in `[time, time + interval)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HelicorderRow {
    pub time: f64,
    pub min: f64,
    pub max: f64,
}

impl HelicorderRow {
    pub fn new(time: f64, min: f64, max: f64) -> Self {
        Self { time, min, max }
    }
}

impl TimedRow for HelicorderRow {
    fn time(&self) -> f64 {
        self.time
    }
}

/// A sorted run of helicorder rows on a fixed `row_interval` grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelicorderSegment {
    pub row_interval: f64,
    rows: Vec<HelicorderRow>,
}

impl HelicorderSegment {
    pub fn new(row_interval: f64, mut rows: Vec<HelicorderRow>) -> Self {
        sort_rows(&mut rows);
        Self { row_interval, rows }
    }

    pub fn rows(&self) -> &[HelicorderRow] {
        &self.rows
    }

    fn same_grid(&self, other: &Self) -> bool {
        (self.row_interval - other.row_interval).abs() <= self.row_interval * 1e-9
    }
}

impl SegmentPayload for HelicorderSegment {
    const KIND: SegmentKind = SegmentKind::Helicorder;

    /// The final row's cell is included, so consecutive chunks touch.
    fn range(&self) -> TimeRange {
        row_range(&self.rows, self.row_interval)
    }

    fn memory_size(&self) -> usize {
        self.rows.len() * mem::size_of::<HelicorderRow>() + mem::size_of::<Self>()
    }

    fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Same-grid series join when they touch; a different grid only
    /// displaces a segment it shares instants with.
    fn relation(&self, existing: &Self, _max_bytes: usize) -> Relation {
        let (mine, theirs) = (self.range(), existing.range());
        if self.same_grid(existing) {
            if mine.touches(&theirs) {
                Relation::Merge
            } else {
                Relation::Disjoint
            }
        } else if mine.overlaps(&theirs) {
            Relation::Replace
        } else {
            Relation::Disjoint
        }
    }

    fn merge(existing: &Self, newer: &Self) -> Self {
        Self {
            row_interval: newer.row_interval,
            rows: merge_rows(&existing.rows, &newer.rows, newer.row_interval),
        }
    }

    fn trim(&self, t1: f64, t2: f64) -> Option<Self> {
        let rows = trim_rows(&self.rows, t1, t2, self.row_interval);
        if rows.is_empty() {
            None
        } else {
            Some(Self {
                row_interval: self.row_interval,
                rows,
            })
        }
    }
}
