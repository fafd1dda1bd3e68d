//! Raw waveform segments

use crate::core::segment::{Relation, SegmentKind, SegmentPayload};
use crate::core::time::{EpochDisplay, TimeRange};
use serde::{Deserialize, Serialize};
use std::mem;
use tracing::error;

/// Sentinel for samples the upstream source had no data for.
pub const NO_DATA: i32 = i32::MIN;

/// Bytes per stored sample.
pub const SAMPLE_BYTES: usize = mem::size_of::<i32>();

/// A contiguous, uniformly sampled integer buffer.
///
/// `start` is the time of the first sample; the segment ends one sample
/// period after the last sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveSegment {
    pub start: f64,
    pub sample_rate: f64,
    pub samples: Vec<i32>,
}

impl WaveSegment {
    pub fn new(start: f64, sample_rate: f64, samples: Vec<i32>) -> Self {
        Self {
            start,
            sample_rate,
            samples,
        }
    }

    /// A buffer of `len` samples, all [`NO_DATA`].
    pub fn empty_span(start: f64, sample_rate: f64, len: usize) -> Self {
        Self::new(start, sample_rate, vec![NO_DATA; len])
    }

    pub fn end(&self) -> f64 {
        self.start + self.samples.len() as f64 / self.sample_rate
    }

    pub fn sample_period(&self) -> f64 {
        1.0 / self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn duration(&self) -> f64 {
        self.end() - self.start
    }

    /// Number of samples holding real data.
    pub fn data_count(&self) -> usize {
        self.samples.iter().filter(|&&s| s != NO_DATA).count()
    }

    /// True when `other` begins (or ends) within half a sample of this
    /// segment's opposite edge.
    pub fn is_adjacent(&self, other: &WaveSegment) -> bool {
        let tolerance = self.sample_period() / 2.0;
        (self.end() - other.start).abs() < tolerance || (other.end() - self.start).abs() < tolerance
    }

    fn same_rate(&self, other: &WaveSegment) -> bool {
        (self.sample_rate - other.sample_rate).abs() <= self.sample_rate * 1e-9
    }

    /// Sample offset of time `t` relative to `origin`, rounded to the grid.
    fn offset(origin: f64, t: f64, sample_rate: f64) -> i64 {
        ((t - origin) * sample_rate).round() as i64
    }

    /// Combine waves sharing a sample rate into one buffer covering their
    /// union. Later waves in `pieces` overwrite earlier ones wherever they
    /// hold real data; uncovered gaps stay [`NO_DATA`].
    pub fn combine_all(pieces: &[&WaveSegment]) -> Option<WaveSegment> {
        let first = pieces.first()?;
        for piece in pieces {
            assert_merge_contract(first, piece);
        }
        let sample_rate = first.sample_rate;
        let start = pieces
            .iter()
            .map(|p| p.start)
            .fold(f64::INFINITY, f64::min);
        let end = pieces
            .iter()
            .map(|p| p.end())
            .fold(f64::NEG_INFINITY, f64::max);
        let len = Self::offset(start, end, sample_rate).max(0) as usize;

        let mut combined = WaveSegment::empty_span(start, sample_rate, len);
        for piece in pieces {
            let base = Self::offset(start, piece.start, sample_rate);
            for (i, &sample) in piece.samples.iter().enumerate() {
                if sample == NO_DATA {
                    continue;
                }
                let j = base + i as i64;
                if j >= 0 && (j as usize) < len {
                    combined.samples[j as usize] = sample;
                }
            }
        }
        Some(combined)
    }

    /// The later half, used by purge actions to shed old data.
    pub fn recent_half(&self) -> Option<WaveSegment> {
        self.split().map(|(_, recent)| recent)
    }
}

/// Merging waves with a broken time base would corrupt the cache.
fn assert_merge_contract(a: &WaveSegment, b: &WaveSegment) {
    let sane = |w: &WaveSegment| {
        w.start.is_finite() && w.sample_rate.is_finite() && w.sample_rate > 0.0
    };
    if !sane(a) || !sane(b) || !a.same_rate(b) {
        error!(
            a_start = %EpochDisplay(a.start),
            a_rate = a.sample_rate,
            b_start = %EpochDisplay(b.start),
            b_rate = b.sample_rate,
            "refusing to merge waves with inconsistent time base"
        );
        panic!(
            "wave merge contract violated: rates {} vs {}",
            a.sample_rate, b.sample_rate
        );
    }
}

impl SegmentPayload for WaveSegment {
    const KIND: SegmentKind = SegmentKind::Wave;

    fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end(),
        }
    }

    fn memory_size(&self) -> usize {
        self.samples.len() * SAMPLE_BYTES + mem::size_of::<Self>()
    }

    fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn relation(&self, existing: &Self, max_bytes: usize) -> Relation {
        let overlaps = self.range().overlaps(&existing.range());
        if !self.same_rate(existing) {
            return if overlaps {
                Relation::Replace
            } else {
                Relation::Disjoint
            };
        }
        if overlaps {
            return Relation::Merge;
        }
        if self.is_adjacent(existing) && self.memory_size() + existing.memory_size() < max_bytes {
            return Relation::Merge;
        }
        Relation::Disjoint
    }

    fn merge(existing: &Self, newer: &Self) -> Self {
        match Self::combine_all(&[existing, newer]) {
            Some(w) => w,
            None => newer.clone(),
        }
    }

    fn trim(&self, t1: f64, t2: f64) -> Option<Self> {
        let len = self.samples.len() as i64;
        let i1 = ((t1 - self.start) * self.sample_rate).floor().max(0.0) as i64;
        let mut i2 = (((t2 - self.start) * self.sample_rate).ceil() as i64).min(len);
        let mut i1 = i1;
        // an instant inside the segment, end included, yields its sample
        if t1 == t2 && t1 >= self.start && t1 <= self.end() && len > 0 {
            i1 = i1.min(len - 1);
            i2 = i1 + 1;
        }
        if i1 >= i2 {
            return None;
        }
        Some(WaveSegment::new(
            self.start + i1 as f64 / self.sample_rate,
            self.sample_rate,
            self.samples[i1 as usize..i2 as usize].to_vec(),
        ))
    }

    fn split(&self) -> Option<(Self, Self)> {
        if self.samples.len() < 2 {
            return None;
        }
        let mid = self.samples.len() / 2;
        let first = WaveSegment::new(self.start, self.sample_rate, self.samples[..mid].to_vec());
        let second = WaveSegment::new(
            self.start + mid as f64 / self.sample_rate,
            self.sample_rate,
            self.samples[mid..].to_vec(),
        );
        Some((first, second))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: f64, rate: f64, len: usize, base: i32) -> WaveSegment {
        WaveSegment::new(start, rate, (0..len as i32).map(|i| base + i).collect())
    }

    #[test]
    fn test_end_and_duration() {
        let w = ramp(100.0, 50.0, 500, 0);
        assert_eq!(w.end(), 110.0);
        assert_eq!(w.duration(), 10.0);
    }

    #[test]
    fn test_adjacent_merge_has_no_gap() {
        let a = ramp(0.0, 1.0, 60, 0);
        let b = ramp(60.0, 1.0, 60, 1000);
        assert_eq!(b.relation(&a, 1_000_000), Relation::Merge);

        let merged = WaveSegment::merge(&a, &b);
        assert_eq!(merged.start, 0.0);
        assert_eq!(merged.len(), 120);
        assert_eq!(merged.data_count(), 120);
        assert_eq!(merged.samples[59], 59);
        assert_eq!(merged.samples[60], 1000);
    }

    #[test]
    fn test_adjacent_respects_size_cap() {
        let a = ramp(0.0, 1.0, 60, 0);
        let b = ramp(60.0, 1.0, 60, 0);
        let cap = a.memory_size() + b.memory_size();
        assert_eq!(b.relation(&a, cap), Relation::Disjoint);
    }

    #[test]
    fn test_overlap_prefers_newer() {
        let a = WaveSegment::new(0.0, 1.0, vec![1; 100]);
        let mut b = WaveSegment::new(50.0, 1.0, vec![2; 100]);
        b.samples[10] = NO_DATA;

        let merged = WaveSegment::merge(&a, &b);
        assert_eq!(merged.len(), 150);
        assert!(merged.samples[..50].iter().all(|&s| s == 1));
        assert_eq!(merged.samples[55], 2);
        // newer had a hole, older data shows through
        assert_eq!(merged.samples[60], 1);
        assert!(merged.samples[100..].iter().all(|&s| s == 2));
    }

    #[test]
    fn test_gap_is_filled_with_sentinel() {
        let a = ramp(0.0, 1.0, 10, 0);
        let b = ramp(20.0, 1.0, 10, 0);
        let joined = WaveSegment::combine_all(&[&a, &b]).unwrap();
        assert_eq!(joined.len(), 30);
        assert!(joined.samples[10..20].iter().all(|&s| s == NO_DATA));
    }

    #[test]
    fn test_trim() {
        let w = ramp(0.0, 10.0, 100, 0);
        let t = w.trim(2.0, 3.0).unwrap();
        assert_eq!(t.start, 2.0);
        assert_eq!(t.len(), 10);
        assert_eq!(t.samples[0], 20);
        assert!(w.trim(20.0, 30.0).is_none());
    }

    #[test]
    fn test_trim_instant() {
        let w = ramp(0.0, 10.0, 100, 0);
        let at_end = w.trim(10.0, 10.0).unwrap();
        assert_eq!(at_end.samples, vec![99]);
        assert_eq!(w.trim(0.0, 0.0).unwrap().samples, vec![0]);
        assert_eq!(w.trim(2.05, 2.05).unwrap().samples, vec![20]);
        assert!(w.trim(10.5, 10.5).is_none());
        assert!(w.trim(-1.0, -1.0).is_none());
    }

    #[test]
    fn test_split_and_recent_half() {
        let w = ramp(0.0, 2.0, 11, 0);
        let (a, b) = w.split().unwrap();
        assert_eq!(a.len() + b.len(), 11);
        assert_eq!(b.start, a.end());
        assert_eq!(w.recent_half().unwrap(), b);
    }

    #[test]
    fn test_rate_mismatch_replaces() {
        let a = WaveSegment::new(0.0, 1.0, vec![1; 100]);
        let b = WaveSegment::new(50.0, 2.0, vec![2; 100]);
        assert_eq!(b.relation(&a, usize::MAX), Relation::Replace);
    }

    #[test]
    #[should_panic(expected = "wave merge contract violated")]
    fn test_merge_contract_panics() {
        let a = WaveSegment::new(0.0, 1.0, vec![1; 10]);
        let b = WaveSegment::new(5.0, 0.0, vec![2; 10]);
        let _ = WaveSegment::combine_all(&[&a, &b]);
    }
}
