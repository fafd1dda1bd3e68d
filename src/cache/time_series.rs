//! The shared time-series cache
//!
//! One instance is created by the application and handed to every gulper
//! and consumer as an `Arc<TimeSeriesCache>`. A single mutex guards all
//! three stores; `put`, lookups and the purge triggered by `put` all run
//! under it.

use crate::cache::purge::{PurgeEngine, PurgeReport};
use crate::cache::stats::CacheStats;
use crate::cache::store::{InsertOutcome, KindStore};
use crate::config::CacheConfig;
use crate::core::helicorder::HelicorderSegment;
use crate::core::rsam::RsamSegment;
use crate::core::segment::SegmentPayload;
use crate::core::wave::WaveSegment;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Character some callers use in place of spaces inside channel names.
pub const CHANNEL_SPACE_PLACEHOLDER: char = '$';

/// Canonical form of a channel name used as the map key.
pub fn normalize_channel(channel: &str) -> String {
    channel.replace(CHANNEL_SPACE_PLACEHOLDER, " ")
}

/// The three typed stores plus running counters.
#[derive(Debug, Default)]
pub struct Stores {
    pub waves: KindStore<WaveSegment>,
    pub helicorders: KindStore<HelicorderSegment>,
    pub rsam: KindStore<RsamSegment>,
    stats: CacheStats,
}

impl Stores {
    pub fn memory_size(&self) -> usize {
        self.waves.memory_size() + self.helicorders.memory_size() + self.rsam.memory_size()
    }

    pub fn segment_count(&self) -> usize {
        self.waves.segment_count() + self.helicorders.segment_count() + self.rsam.segment_count()
    }
}

/// Payload kinds the cache can hold; maps each kind to its store.
pub trait CacheablePayload: SegmentPayload {
    fn store(stores: &Stores) -> &KindStore<Self>;
    fn store_mut(stores: &mut Stores) -> &mut KindStore<Self>;
}

impl CacheablePayload for WaveSegment {
    fn store(stores: &Stores) -> &KindStore<Self> {
        &stores.waves
    }
    fn store_mut(stores: &mut Stores) -> &mut KindStore<Self> {
        &mut stores.waves
    }
}

impl CacheablePayload for HelicorderSegment {
    fn store(stores: &Stores) -> &KindStore<Self> {
        &stores.helicorders
    }
    fn store_mut(stores: &mut Stores) -> &mut KindStore<Self> {
        &mut stores.helicorders
    }
}

impl CacheablePayload for RsamSegment {
    fn store(stores: &Stores) -> &KindStore<Self> {
        &stores.rsam
    }
    fn store_mut(stores: &mut Stores) -> &mut KindStore<Self> {
        &mut stores.rsam
    }
}

pub struct TimeSeriesCache {
    stores: Mutex<Stores>,
    purge: PurgeEngine,
    budget_bytes: u64,
    max_wave_bytes: usize,
}

impl TimeSeriesCache {
    /// Cache with the standard purge pipeline and default limits.
    pub fn new(budget_bytes: u64) -> Self {
        let config = CacheConfig::default();
        Self::with_engine(
            budget_bytes,
            config.max_wave_bytes,
            PurgeEngine::standard(&config),
        )
    }

    /// Build from configuration. `total_memory_bytes` resolves fractional
    /// budgets.
    pub fn from_config(config: &CacheConfig, total_memory_bytes: u64) -> Self {
        Self::with_engine(
            config.memory_budget.resolve(total_memory_bytes),
            config.max_wave_bytes,
            PurgeEngine::standard(config),
        )
    }

    pub fn with_engine(budget_bytes: u64, max_wave_bytes: usize, purge: PurgeEngine) -> Self {
        Self {
            stores: Mutex::new(Stores::default()),
            purge,
            budget_bytes,
            max_wave_bytes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Stores> {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a segment, merging with what is already cached, then enforce
    /// the memory budget.
    pub fn put<P: CacheablePayload>(&self, channel: &str, payload: P) {
        let channel = normalize_channel(channel);
        let range = payload.range();
        let mut stores = self.lock();

        let outcome: InsertOutcome =
            P::store_mut(&mut stores).insert(&channel, payload, self.max_wave_bytes);
        stores.stats.puts += 1;
        stores.stats.merges += outcome.merged;
        stores.stats.splits += outcome.split;
        stores.stats.replacements += outcome.replaced;
        debug!(
            kind = %P::KIND,
            channel = %channel,
            range = %range,
            merged = outcome.merged,
            split = outcome.split,
            "segment cached"
        );

        self.enforce_locked(&mut stores);
    }

    /// Cached data for `[t1, t2]` if a single segment covers it.
    pub fn get<P: CacheablePayload>(&self, channel: &str, t1: f64, t2: f64) -> Option<P> {
        self.lookup(channel, t1, t2, |_: &P| true)
    }

    /// RSAM lookup restricted to one period length.
    pub fn get_rsam(&self, channel: &str, t1: f64, t2: f64, period: f64) -> Option<RsamSegment> {
        self.lookup(channel, t1, t2, |r: &RsamSegment| r.has_period(period))
    }

    fn lookup<P, F>(&self, channel: &str, t1: f64, t2: f64, filter: F) -> Option<P>
    where
        P: CacheablePayload,
        F: Fn(&P) -> bool,
    {
        let channel = normalize_channel(channel);
        let mut stores = self.lock();
        let found = P::store_mut(&mut stores)
            .find_covering(&channel, t1, t2, filter)
            .and_then(|seg| {
                seg.touch();
                seg.payload.trim(t1, t2)
            });
        stores.stats.record_lookup(found.is_some());
        found
    }

    /// Best-effort wave for `[t1, t2]` assembled from every overlapping
    /// segment; gaps are filled with the no-data sentinel.
    pub fn get_best(&self, channel: &str, t1: f64, t2: f64) -> Option<WaveSegment> {
        let channel = normalize_channel(channel);
        let mut stores = self.lock();
        let mut hits = stores.waves.overlapping(&channel, t1, t2);
        let Some(first_rate) = hits.first().map(|s| s.payload.sample_rate) else {
            drop(hits);
            stores.stats.record_lookup(false);
            return None;
        };

        for seg in hits.iter_mut() {
            seg.touch();
        }
        let pieces: Vec<&WaveSegment> = hits
            .iter()
            .map(|s| &s.payload)
            .filter(|w| {
                let same = (w.sample_rate - first_rate).abs() <= first_rate * 1e-9;
                if !same {
                    debug!(channel = %channel, rate = w.sample_rate, "skipping wave with other sample rate");
                }
                same
            })
            .collect();
        let joined = WaveSegment::combine_all(&pieces).and_then(|w| w.trim(t1, t2));
        drop(hits);
        stores.stats.record_lookup(joined.is_some());
        joined
    }

    /// True iff one cached segment fully covers `[t1, t2]`. Does not count
    /// as an access.
    pub fn contains<P: CacheablePayload>(&self, channel: &str, t1: f64, t2: f64) -> bool {
        let channel = normalize_channel(channel);
        let stores = self.lock();
        P::store(&stores).contains(&channel, t1, t2, |_| true)
    }

    pub fn contains_rsam(&self, channel: &str, t1: f64, t2: f64, period: f64) -> bool {
        let channel = normalize_channel(channel);
        let stores = self.lock();
        stores
            .rsam
            .contains(&channel, t1, t2, |r| r.has_period(period))
    }

    /// Sum of per-segment size estimates across all kinds.
    pub fn estimate_size(&self) -> u64 {
        self.lock().memory_size() as u64
    }

    /// Every channel with at least one cached segment, sorted.
    pub fn channels(&self) -> Vec<String> {
        let stores = self.lock();
        let names: BTreeSet<&String> = stores
            .waves
            .channel_names()
            .chain(stores.helicorders.channel_names())
            .chain(stores.rsam.channel_names())
            .collect();
        names.into_iter().cloned().collect()
    }

    /// Drop every segment of every kind for one channel.
    pub fn remove_channel(&self, channel: &str) -> u64 {
        let channel = normalize_channel(channel);
        let mut stores = self.lock();
        let freed = stores.waves.remove_channel(&channel)
            + stores.helicorders.remove_channel(&channel)
            + stores.rsam.remove_channel(&channel);
        freed as u64
    }

    /// Clear all segments for all channels.
    pub fn flush(&self) {
        let mut stores = self.lock();
        let freed = stores.waves.clear() + stores.helicorders.clear() + stores.rsam.clear();
        debug!(freed, "cache flushed");
    }

    /// Run the purge pipeline now.
    pub fn enforce_size(&self) -> PurgeReport {
        let mut stores = self.lock();
        self.enforce_locked(&mut stores)
    }

    fn enforce_locked(&self, stores: &mut Stores) -> PurgeReport {
        let report = self.purge.enforce(stores, self.budget_bytes);
        if report.deficit > 0 {
            stores.stats.purge_runs += 1;
            stores.stats.bytes_purged += report.total_freed as u64;
        }
        report
    }

    pub fn stats(&self) -> CacheStats {
        let stores = self.lock();
        CacheStats {
            segment_count: stores.segment_count(),
            size_bytes: stores.memory_size(),
            budget_bytes: self.budget_bytes,
            ..stores.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::helicorder::HelicorderRow;
    use crate::core::rsam::RsamRow;
    use crate::core::wave::NO_DATA;
    use std::thread;
    use std::time::Duration;

    fn ramp(start: f64, len: usize, base: i32) -> WaveSegment {
        WaveSegment::new(start, 1.0, (0..len as i32).map(|i| base + i).collect())
    }

    #[test]
    fn test_adjacent_puts_read_back_as_one() {
        let cache = TimeSeriesCache::new(u64::MAX);
        cache.put("AB CH", ramp(60.0, 60, 1000));
        cache.put("AB CH", ramp(0.0, 60, 0));

        let w: WaveSegment = cache.get("AB CH", 0.0, 120.0).unwrap();
        assert_eq!(w.start, 0.0);
        assert_eq!(w.end(), 120.0);
        assert!(w.samples.iter().all(|&s| s != NO_DATA));
        assert_eq!(cache.stats().segment_count, 1);
    }

    #[test]
    fn test_get_requires_single_covering_segment() {
        let cache = TimeSeriesCache::new(u64::MAX);
        cache.put("A", ramp(0.0, 10, 0));
        cache.put("A", ramp(20.0, 10, 0));

        assert!(cache.get::<WaveSegment>("A", 0.0, 30.0).is_none());
        assert!(cache.get::<WaveSegment>("A", 2.0, 8.0).is_some());
        assert!(!cache.contains::<WaveSegment>("A", 0.0, 30.0));
        assert!(cache.contains::<WaveSegment>("A", 20.0, 30.0));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_get_best_fills_gaps() {
        let cache = TimeSeriesCache::new(u64::MAX);
        cache.put("A", ramp(0.0, 10, 0));
        cache.put("A", ramp(20.0, 10, 100));

        let w = cache.get_best("A", 5.0, 25.0).unwrap();
        assert_eq!(w.start, 5.0);
        assert_eq!(w.len(), 20);
        assert_eq!(w.samples[0], 5);
        assert!(w.samples[5..15].iter().all(|&s| s == NO_DATA));
        assert_eq!(w.samples[15], 100);

        assert!(cache.get_best("A", 50.0, 60.0).is_none());
        assert!(cache.get_best("missing", 0.0, 1.0).is_none());
    }

    #[test]
    fn test_channel_placeholder_is_normalized() {
        let cache = TimeSeriesCache::new(u64::MAX);
        cache.put("AB$CH", ramp(0.0, 10, 0));
        assert!(cache.contains::<WaveSegment>("AB CH", 0.0, 10.0));
        assert_eq!(cache.channels(), vec!["AB CH".to_string()]);
    }

    #[test]
    fn test_touching_helicorder_on_other_grid_keeps_cached_hour() {
        let cache = TimeSeriesCache::new(u64::MAX);
        let hour = HelicorderSegment::new(
            60.0,
            (0..60).map(|i| HelicorderRow::new(i as f64 * 60.0, -1.0, 1.0)).collect(),
        );
        let minute = HelicorderSegment::new(
            1.0,
            (0..60).map(|i| HelicorderRow::new(3600.0 + i as f64, -2.0, 2.0)).collect(),
        );
        cache.put("A", hour);
        cache.put("A", minute);

        assert!(cache.contains::<HelicorderSegment>("A", 0.0, 3600.0));
        assert!(cache.contains::<HelicorderSegment>("A", 3600.0, 3660.0));
        let stats = cache.stats();
        assert_eq!(stats.replacements, 0);
        assert_eq!(stats.segment_count, 2);
    }

    #[test]
    fn test_instant_lookup_at_segment_end_is_a_hit() {
        let cache = TimeSeriesCache::new(u64::MAX);
        cache.put("A", ramp(0.0, 10, 0));
        cache.put(
            "A",
            HelicorderSegment::new(1.0, vec![HelicorderRow::new(0.0, -1.0, 1.0)]),
        );

        assert!(cache.contains::<WaveSegment>("A", 10.0, 10.0));
        let w: WaveSegment = cache.get("A", 10.0, 10.0).unwrap();
        assert_eq!(w.samples, vec![9]);
        assert!(cache.get::<HelicorderSegment>("A", 1.0, 1.0).is_some());
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_kinds_are_independent() {
        let cache = TimeSeriesCache::new(u64::MAX);
        cache.put("B", ramp(0.0, 10, 0));
        cache.put(
            "A",
            HelicorderSegment::new(1.0, vec![HelicorderRow::new(0.0, -1.0, 1.0)]),
        );
        cache.put("C", RsamSegment::new(60.0, vec![RsamRow::new(0.0, 3.0)]));

        assert!(cache.get::<HelicorderSegment>("B", 0.0, 1.0).is_none());
        assert!(cache.get::<HelicorderSegment>("A", 0.0, 1.0).is_some());
        assert!(cache.get_rsam("C", 0.0, 60.0, 60.0).is_some());
        assert!(cache.get_rsam("C", 0.0, 60.0, 600.0).is_none());
        assert!(cache.contains_rsam("C", 0.0, 60.0, 60.0));
        assert_eq!(cache.channels(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_put_over_budget_evicts_least_recently_used() {
        let one = ramp(0.0, 1000, 0).memory_size() as u64;
        let cache = TimeSeriesCache::new(one * 2);

        cache.put("old", ramp(0.0, 1000, 0));
        thread::sleep(Duration::from_millis(5));
        cache.put("mid", ramp(0.0, 1000, 0));
        thread::sleep(Duration::from_millis(5));
        // touching "old" makes "mid" the eviction candidate
        assert!(cache.get::<WaveSegment>("old", 0.0, 10.0).is_some());
        thread::sleep(Duration::from_millis(5));
        cache.put("new", ramp(0.0, 1000, 0));

        assert!(cache.estimate_size() <= one * 2);
        assert_eq!(cache.channels(), vec!["new", "old"]);
        let stats = cache.stats();
        assert_eq!(stats.purge_runs, 1);
        assert_eq!(stats.bytes_purged, one);
    }

    #[test]
    fn test_flush_and_remove_channel() {
        let cache = TimeSeriesCache::new(u64::MAX);
        cache.put("A", ramp(0.0, 10, 0));
        cache.put("B", ramp(0.0, 10, 0));

        assert!(cache.remove_channel("A") > 0);
        assert_eq!(cache.channels(), vec!["B"]);

        cache.flush();
        assert!(cache.channels().is_empty());
        assert_eq!(cache.estimate_size(), 0);
    }
}
