//! Deterministic in-process source
//!
//! Produces a sine wave per channel so the CLI and tests can drive gulpers
//! without a server. Helicorder and RSAM series are derived from the same
//! samples.

use crate::core::helicorder::{HelicorderRow, HelicorderSegment};
use crate::core::rsam::{RsamRow, RsamSegment};
use crate::core::wave::WaveSegment;
use crate::error::{Error, Result};
use crate::upstream::UpstreamSource;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Helicorder rows produced by this source span one second each.
pub const HELICORDER_ROW_SECS: f64 = 1.0;

#[derive(Debug)]
pub struct SyntheticSource {
    sample_rate: f64,
    amplitude: f64,
    cycle_secs: f64,
    latency: Duration,
    live: bool,
    failing: Mutex<Vec<(f64, f64)>>,
    accumulated: Mutex<Option<(f64, f64)>>,
    fetches: AtomicUsize,
    closes: AtomicUsize,
}

impl SyntheticSource {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            amplitude: 1000.0,
            cycle_secs: 10.0,
            latency: Duration::ZERO,
            live: false,
            failing: Mutex::new(Vec::new()),
            accumulated: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every fetch, imitating network time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn live(mut self) -> Self {
        self.live = true;
        self
    }

    /// Make any fetch that overlaps `[t1, t2]` fail.
    pub fn fail_between(&self, t1: f64, t2: f64) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((t1, t2));
    }

    /// Record data arriving on the live stream.
    pub fn push_live(&self, t1: f64, t2: f64) {
        let mut acc = self.accumulated.lock().unwrap_or_else(|e| e.into_inner());
        *acc = Some(match *acc {
            Some((a, b)) => (a.min(t1), b.max(t2)),
            None => (t1, t2),
        });
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn sample_at(&self, t: f64) -> i32 {
        (self.amplitude * (TAU * t / self.cycle_secs).sin()).round() as i32
    }

    fn begin_fetch(&self, t1: f64, t2: f64) -> Result<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        let failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing.iter().any(|&(a, b)| a < t2 && t1 < b) {
            return Err(Error::upstream(format!("synthetic failure for [{t1}, {t2}]")));
        }
        Ok(())
    }

    fn samples(&self, t1: f64, t2: f64) -> Option<WaveSegment> {
        let i1 = (t1 * self.sample_rate).round() as i64;
        let i2 = (t2 * self.sample_rate).round() as i64;
        if i2 <= i1 {
            return None;
        }
        let samples = (i1..i2)
            .map(|i| self.sample_at(i as f64 / self.sample_rate))
            .collect();
        Some(WaveSegment::new(i1 as f64 / self.sample_rate, self.sample_rate, samples))
    }
}

impl UpstreamSource for SyntheticSource {
    fn fetch_wave(&self, _channel: &str, t1: f64, t2: f64) -> Result<Option<WaveSegment>> {
        self.begin_fetch(t1, t2)?;
        Ok(self.samples(t1, t2))
    }

    fn fetch_helicorder(
        &self,
        _channel: &str,
        t1: f64,
        t2: f64,
    ) -> Result<Option<HelicorderSegment>> {
        self.begin_fetch(t1, t2)?;
        let first = (t1 / HELICORDER_ROW_SECS).floor() as i64;
        let last = (t2 / HELICORDER_ROW_SECS).ceil() as i64;
        let rows: Vec<HelicorderRow> = (first..last)
            .filter_map(|slot| {
                let start = slot as f64 * HELICORDER_ROW_SECS;
                let wave = self.samples(start, start + HELICORDER_ROW_SECS)?;
                let min = *wave.samples.iter().min()? as f64;
                let max = *wave.samples.iter().max()? as f64;
                Some(HelicorderRow::new(start, min, max))
            })
            .collect();
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(HelicorderSegment::new(HELICORDER_ROW_SECS, rows)))
    }

    fn fetch_rsam(
        &self,
        _channel: &str,
        t1: f64,
        t2: f64,
        period: f64,
    ) -> Result<Option<RsamSegment>> {
        self.begin_fetch(t1, t2)?;
        if !(period > 0.0) {
            return Err(Error::upstream(format!("invalid RSAM period {period}")));
        }
        let first = (t1 / period).floor() as i64;
        let last = (t2 / period).ceil() as i64;
        let rows: Vec<RsamRow> = (first..last)
            .filter_map(|slot| {
                let start = slot as f64 * period;
                let wave = self.samples(start, start + period)?;
                let sum: f64 = wave.samples.iter().map(|&s| (s as f64).abs()).sum();
                Some(RsamRow::new(start, sum / wave.len() as f64))
            })
            .collect();
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(RsamSegment::new(period, rows)))
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn drain_accumulated_range(&self) -> Option<(f64, f64)> {
        self.accumulated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
