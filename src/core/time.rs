//! Time ranges and epoch helpers
//!
//! All segment times are `f64` seconds in a continuous epoch (UTC Unix
//! seconds). Ranges are half-open `[start, end)` for sample data, but the
//! overlap tests used by the cache are explicit about their boundaries.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current time as epoch seconds.
pub fn now_epoch() -> f64 {
    let now = Utc::now();
    now.timestamp_micros() as f64 / 1_000_000.0
}

/// Display adapter rendering epoch seconds as RFC 3339.
#[derive(Debug, Clone, Copy)]
pub struct EpochDisplay(pub f64);

impl fmt::Display for EpochDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.0.is_finite() {
            return write!(f, "{}", self.0);
        }
        let secs = self.0.floor();
        let nanos = ((self.0 - secs) * 1_000_000_000.0) as u32;
        match DateTime::<Utc>::from_timestamp(secs as i64, nanos) {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}", self.0),
        }
    }
}

/// A closed-open span of epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    /// Create a range, rejecting non-finite bounds and `end < start`.
    pub fn new(start: f64, end: f64) -> Result<Self> {
        if !start.is_finite() || !end.is_finite() {
            return Err(Error::InvalidRange(format!(
                "non-finite bound in [{start}, {end}]"
            )));
        }
        if end < start {
            return Err(Error::InvalidRange(format!(
                "end {} precedes start {}",
                EpochDisplay(end),
                EpochDisplay(start)
            )));
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Inclusive overlap: touching ranges count.
    pub fn touches(&self, other: &TimeRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Strict overlap: the ranges share a span of positive length.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True iff `[t1, t2]` lies entirely inside this range.
    pub fn covers(&self, t1: f64, t2: f64) -> bool {
        self.start <= t1 && t2 <= self.end
    }

    pub fn union(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", EpochDisplay(self.start), EpochDisplay(self.end))
    }
}
