//! Purge pipeline that brings the cache back under its memory budget
//!
//! Actions run in order, least destructive first. Each one is handed the
//! bytes still owed and visits segments least-recently-accessed first, so a
//! pass stops as soon as the deficit is covered.

use crate::cache::store::PurgeStep;
use crate::cache::time_series::Stores;
use crate::config::CacheConfig;
use crate::core::segment::{CachedSegment, SegmentKind, SegmentPayload};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One eviction strategy.
pub trait PurgeAction: Send + Sync {
    fn name(&self) -> String;

    /// Free up to (at least) `target` bytes; returns bytes actually freed.
    fn purge(&self, stores: &mut Stores, target: usize) -> usize;
}

fn idle_step<P: SegmentPayload>(
    seg: &CachedSegment<P>,
    now: Instant,
    idle: Duration,
) -> PurgeStep<P> {
    if now.saturating_duration_since(seg.last_access()) >= idle {
        PurgeStep::Remove
    } else {
        PurgeStep::Keep
    }
}

/// Removes every segment nobody has touched within the idle window, in the
/// wave, helicorder and RSAM stores alike.
pub struct TimeLimitPurge {
    idle: Duration,
}

impl TimeLimitPurge {
    pub fn new(idle: Duration) -> Self {
        Self { idle }
    }
}

impl PurgeAction for TimeLimitPurge {
    fn name(&self) -> String {
        format!("time-limit({}s)", self.idle.as_secs_f64())
    }

    /// Sweeps every store completely; `target` only matters to the engine
    /// deciding whether later actions run.
    fn purge(&self, stores: &mut Stores, _target: usize) -> usize {
        let now = Instant::now();
        let idle = self.idle;
        stores
            .waves
            .purge_lru(usize::MAX, |seg| idle_step(seg, now, idle))
            + stores
                .helicorders
                .purge_lru(usize::MAX, |seg| idle_step(seg, now, idle))
            + stores
                .rsam
                .purge_lru(usize::MAX, |seg| idle_step(seg, now, idle))
    }
}

/// Replaces every wave longer than a threshold with its more recent half.
pub struct HalveLongWaves {
    threshold_secs: f64,
}

impl HalveLongWaves {
    pub fn new(threshold_secs: f64) -> Self {
        Self { threshold_secs }
    }
}

impl PurgeAction for HalveLongWaves {
    fn name(&self) -> String {
        format!("halve-waves(>{}s)", self.threshold_secs)
    }

    fn purge(&self, stores: &mut Stores, target: usize) -> usize {
        let threshold = self.threshold_secs;
        stores.waves.purge_lru(target, |seg| {
            if seg.payload.duration() <= threshold {
                return PurgeStep::Keep;
            }
            match seg.payload.recent_half() {
                Some(half) => PurgeStep::Shrink(half),
                None => PurgeStep::Keep,
            }
        })
    }
}

/// Empties one kind's store, oldest segments first.
pub struct ClearKind {
    kind: SegmentKind,
}

impl ClearKind {
    pub fn new(kind: SegmentKind) -> Self {
        Self { kind }
    }
}

impl PurgeAction for ClearKind {
    fn name(&self) -> String {
        format!("clear-{}", self.kind)
    }

    fn purge(&self, stores: &mut Stores, target: usize) -> usize {
        match self.kind {
            SegmentKind::Wave => stores.waves.purge_lru(target, |_| PurgeStep::Remove),
            SegmentKind::Helicorder => stores.helicorders.purge_lru(target, |_| PurgeStep::Remove),
            SegmentKind::Rsam => stores.rsam.purge_lru(target, |_| PurgeStep::Remove),
        }
    }
}

/// Outcome of one enforcement run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub deficit: usize,
    pub freed: Vec<(String, usize)>,
    pub total_freed: usize,
}

impl PurgeReport {
    pub fn satisfied(&self) -> bool {
        self.total_freed >= self.deficit
    }
}

pub struct PurgeEngine {
    actions: Vec<Box<dyn PurgeAction>>,
}

impl PurgeEngine {
    pub fn new(actions: Vec<Box<dyn PurgeAction>>) -> Self {
        Self { actions }
    }

    /// Idle eviction, halving passes for each configured threshold, then
    /// clearing waves and finally helicorders.
    pub fn standard(config: &CacheConfig) -> Self {
        let mut actions: Vec<Box<dyn PurgeAction>> =
            vec![Box::new(TimeLimitPurge::new(config.idle_window()))];
        for &threshold in &config.halve_thresholds_secs {
            actions.push(Box::new(HalveLongWaves::new(threshold)));
        }
        actions.push(Box::new(ClearKind::new(SegmentKind::Wave)));
        actions.push(Box::new(ClearKind::new(SegmentKind::Helicorder)));
        Self::new(actions)
    }

    pub fn action_names(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.name()).collect()
    }

    /// Run actions until `stores` fits in `budget` bytes or the pipeline is
    /// exhausted. Staying over budget is not an error.
    pub fn enforce(&self, stores: &mut Stores, budget: u64) -> PurgeReport {
        let size = stores.memory_size() as u64;
        if size <= budget {
            return PurgeReport::default();
        }

        let deficit = (size - budget) as usize;
        let mut report = PurgeReport {
            deficit,
            ..PurgeReport::default()
        };
        for action in &self.actions {
            if report.satisfied() {
                break;
            }
            let freed = action.purge(stores, deficit - report.total_freed);
            debug!(action = %action.name(), freed, "purge action finished");
            report.total_freed += freed;
            report.freed.push((action.name(), freed));
        }

        info!(
            deficit,
            freed = report.total_freed,
            satisfied = report.satisfied(),
            "cache purge"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::helicorder::{HelicorderRow, HelicorderSegment};
    use crate::core::wave::WaveSegment;
    use std::thread;

    fn wave(start: f64, len: usize) -> WaveSegment {
        WaveSegment::new(start, 1.0, vec![1; len])
    }

    fn heli(len: usize) -> HelicorderSegment {
        HelicorderSegment::new(
            1.0,
            (0..len).map(|i| HelicorderRow::new(i as f64, 0.0, 1.0)).collect(),
        )
    }

    #[test]
    fn test_under_budget_is_noop() {
        let mut stores = Stores::default();
        stores.waves.insert("A", wave(0.0, 10), usize::MAX);
        let engine = PurgeEngine::standard(&CacheConfig::default());
        let report = engine.enforce(&mut stores, u64::MAX);
        assert_eq!(report.deficit, 0);
        assert!(report.freed.is_empty());
        assert_eq!(stores.waves.segment_count(), 1);
    }

    #[test]
    fn test_time_limit_only_takes_idle_segments() {
        let mut stores = Stores::default();
        stores.waves.insert("idle", wave(0.0, 100), usize::MAX);
        thread::sleep(Duration::from_millis(30));
        stores.waves.insert("fresh", wave(0.0, 100), usize::MAX);

        let action = TimeLimitPurge::new(Duration::from_millis(20));
        let freed = action.purge(&mut stores, usize::MAX);
        assert_eq!(freed, wave(0.0, 100).memory_size());
        assert!(stores.waves.segments("idle").is_empty());
        assert_eq!(stores.waves.segments("fresh").len(), 1);
    }

    #[test]
    fn test_time_limit_sweeps_every_store() {
        let mut stores = Stores::default();
        stores.waves.insert("A", wave(0.0, 1000), usize::MAX);
        stores.helicorders.insert("A", heli(10), usize::MAX);
        stores.rsam.insert(
            "A",
            crate::core::rsam::RsamSegment::new(60.0, vec![crate::core::rsam::RsamRow::new(0.0, 1.0)]),
            usize::MAX,
        );
        thread::sleep(Duration::from_millis(30));

        // the idle wave alone covers the target
        let freed = TimeLimitPurge::new(Duration::from_millis(20)).purge(&mut stores, 1);
        assert_eq!(stores.memory_size(), 0);
        assert!(freed > wave(0.0, 1000).memory_size());
    }

    #[test]
    fn test_halve_keeps_recent_half_of_long_waves() {
        let mut stores = Stores::default();
        stores.waves.insert("long", wave(0.0, 7200), usize::MAX);
        stores.waves.insert("short", wave(0.0, 600), usize::MAX);

        let freed = HalveLongWaves::new(3600.0).purge(&mut stores, usize::MAX);
        assert_eq!(freed, 3600 * 4);
        let long = &stores.waves.segments("long")[0];
        assert_eq!(long.range().start, 3600.0);
        assert_eq!(long.range().end, 7200.0);
        assert_eq!(stores.waves.segments("short")[0].payload.len(), 600);
    }

    #[test]
    fn test_pipeline_stops_when_deficit_covered() {
        let mut stores = Stores::default();
        stores.waves.insert("A", wave(0.0, 1000), usize::MAX);
        stores.helicorders.insert("A", heli(100), usize::MAX);

        let engine = PurgeEngine::new(vec![
            Box::new(ClearKind::new(SegmentKind::Wave)),
            Box::new(ClearKind::new(SegmentKind::Helicorder)),
        ]);
        let budget = stores.memory_size() as u64 - 10;
        let report = engine.enforce(&mut stores, budget);

        assert!(report.satisfied());
        assert_eq!(report.freed.len(), 1);
        assert_eq!(stores.waves.segment_count(), 0);
        assert_eq!(stores.helicorders.segment_count(), 1);
    }

    #[test]
    fn test_exhausted_pipeline_is_not_an_error() {
        let mut stores = Stores::default();
        stores.rsam.insert(
            "A",
            crate::core::rsam::RsamSegment::new(60.0, vec![crate::core::rsam::RsamRow::new(0.0, 1.0)]),
            usize::MAX,
        );
        let engine = PurgeEngine::standard(&CacheConfig::default());
        let report = engine.enforce(&mut stores, 0);
        assert!(!report.satisfied());
        assert_eq!(report.freed.len(), engine.action_names().len());
        assert_eq!(stores.rsam.segment_count(), 1);
    }
}
