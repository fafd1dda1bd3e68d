//! RSAM series: one amplitude value per fixed period

use crate::core::segment::{
    merge_rows, row_range, sort_rows, trim_rows, Relation, SegmentKind, SegmentPayload, TimedRow,
};
use crate::core::time::TimeRange;
use serde::{Deserialize, Serialize};
use std::mem;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsamRow {
    pub time: f64,
    pub value: f64,
}

impl RsamRow {
    pub fn new(time: f64, value: f64) -> Self {
        Self { time, value }
    }
}

impl TimedRow for RsamRow {
    fn time(&self) -> f64 {
        self.time
    }
}

/// RSAM values for one period length. Series with different periods are
/// independent and coexist in the same channel list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsamSegment {
    pub period: f64,
    rows: Vec<RsamRow>,
}

impl RsamSegment {
    pub fn new(period: f64, mut rows: Vec<RsamRow>) -> Self {
        sort_rows(&mut rows);
        Self { period, rows }
    }

    pub fn rows(&self) -> &[RsamRow] {
        &self.rows
    }

    pub fn has_period(&self, period: f64) -> bool {
        (self.period - period).abs() <= self.period * 1e-9
    }
}

impl SegmentPayload for RsamSegment {
    const KIND: SegmentKind = SegmentKind::Rsam;

    fn range(&self) -> TimeRange {
        row_range(&self.rows, self.period)
    }

    fn memory_size(&self) -> usize {
        self.rows.len() * mem::size_of::<RsamRow>() + mem::size_of::<Self>()
    }

    fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn relation(&self, existing: &Self, _max_bytes: usize) -> Relation {
        if existing.has_period(self.period) && self.range().touches(&existing.range()) {
            Relation::Merge
        } else {
            Relation::Disjoint
        }
    }

    fn merge(existing: &Self, newer: &Self) -> Self {
        Self {
            period: newer.period,
            rows: merge_rows(&existing.rows, &newer.rows, newer.period),
        }
    }

    fn trim(&self, t1: f64, t2: f64) -> Option<Self> {
        let rows = trim_rows(&self.rows, t1, t2, self.period);
        if rows.is_empty() {
            None
        } else {
            Some(Self {
                period: self.period,
                rows,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_periods_do_not_mix() {
        let a = RsamSegment::new(60.0, vec![RsamRow::new(0.0, 1.0)]);
        let b = RsamSegment::new(600.0, vec![RsamRow::new(0.0, 1.0)]);
        assert_eq!(b.relation(&a, 0), Relation::Disjoint);
    }

    #[test]
    fn test_merge_and_trim() {
        let a = RsamSegment::new(60.0, (0..10).map(|i| RsamRow::new(i as f64 * 60.0, 1.0)).collect());
        let b = RsamSegment::new(60.0, (10..20).map(|i| RsamRow::new(i as f64 * 60.0, 2.0)).collect());
        assert_eq!(b.relation(&a, 0), Relation::Merge);

        let merged = RsamSegment::merge(&a, &b);
        assert_eq!(merged.range(), TimeRange { start: 0.0, end: 1200.0 });

        let trimmed = merged.trim(540.0, 659.0).unwrap();
        assert_eq!(trimmed.rows().len(), 2);
        assert_eq!(trimmed.rows()[1].value, 2.0);
    }
}
