//! Per-kind segment store: channel name to an unordered segment list
//!
//! Insertion keeps the list free of segments that should have been merged.
//! Incoming payloads are processed from a work list, so a merge that
//! overflows the single-segment cap is split and the halves re-enter the
//! list without recursion.

use crate::core::segment::{CachedSegment, Relation, SegmentPayload};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::debug;

/// Counters describing what one insertion did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub merged: u64,
    pub split: u64,
    pub replaced: u64,
}

/// What a purge pass decides for one segment.
pub enum PurgeStep<P> {
    Keep,
    Remove,
    /// Swap in a smaller payload, keeping the access stamp.
    Shrink(P),
}

#[derive(Debug)]
pub struct KindStore<P> {
    channels: HashMap<String, Vec<CachedSegment<P>>>,
}

impl<P> Default for KindStore<P> {
    fn default() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }
}

impl<P: SegmentPayload> KindStore<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `payload` for `channel`, merging or splitting as needed.
    pub fn insert(&mut self, channel: &str, payload: P, max_bytes: usize) -> InsertOutcome {
        let mut outcome = InsertOutcome::default();
        let mut work = vec![payload];

        while let Some(incoming) = work.pop() {
            if incoming.is_empty() {
                continue;
            }
            if incoming.memory_size() > max_bytes {
                if let Some((first, second)) = incoming.split() {
                    outcome.split += 1;
                    work.push(second);
                    work.push(first);
                    continue;
                }
            }

            let list = self.channels.entry(channel.to_string()).or_default();
            let hit = list.iter().enumerate().find_map(|(i, seg)| {
                match incoming.relation(&seg.payload, max_bytes) {
                    Relation::Disjoint => None,
                    rel => Some((i, rel)),
                }
            });

            match hit {
                Some((i, Relation::Merge)) => {
                    let existing = list.swap_remove(i);
                    outcome.merged += 1;
                    work.push(P::merge(&existing.payload, &incoming));
                }
                Some((i, _)) => {
                    let dropped = list.swap_remove(i);
                    outcome.replaced += 1;
                    debug!(
                        kind = %P::KIND,
                        channel,
                        range = %dropped.range(),
                        "incompatible segment replaced"
                    );
                    work.push(incoming);
                }
                None => list.push(CachedSegment::new(incoming)),
            }
        }
        outcome
    }

    /// The segment fully covering `[t1, t2]` that passes `filter`.
    pub fn find_covering<F>(
        &mut self,
        channel: &str,
        t1: f64,
        t2: f64,
        filter: F,
    ) -> Option<&mut CachedSegment<P>>
    where
        F: Fn(&P) -> bool,
    {
        self.channels
            .get_mut(channel)?
            .iter_mut()
            .find(|seg| filter(&seg.payload) && seg.range().covers(t1, t2))
    }

    pub fn contains<F>(&self, channel: &str, t1: f64, t2: f64, filter: F) -> bool
    where
        F: Fn(&P) -> bool,
    {
        self.channels.get(channel).is_some_and(|list| {
            list.iter()
                .any(|seg| filter(&seg.payload) && seg.range().covers(t1, t2))
        })
    }

    /// Every segment intersecting `[t1, t2]`, in time order.
    pub fn overlapping(&mut self, channel: &str, t1: f64, t2: f64) -> Vec<&mut CachedSegment<P>> {
        let mut hits: Vec<&mut CachedSegment<P>> = match self.channels.get_mut(channel) {
            Some(list) => list
                .iter_mut()
                .filter(|seg| {
                    let r = seg.range();
                    r.start <= t2 && r.end > t1
                })
                .collect(),
            None => Vec::new(),
        };
        hits.sort_by(|a, b| a.range().start.total_cmp(&b.range().start));
        hits
    }

    pub fn segments(&self, channel: &str) -> &[CachedSegment<P>] {
        self.channels.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &String> {
        self.channels
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(name, _)| name)
    }

    pub fn memory_size(&self) -> usize {
        self.channels
            .values()
            .flatten()
            .map(CachedSegment::memory_size)
            .sum()
    }

    pub fn segment_count(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }

    /// Drop one channel; returns bytes freed.
    pub fn remove_channel(&mut self, channel: &str) -> usize {
        self.channels
            .remove(channel)
            .map(|list| list.iter().map(CachedSegment::memory_size).sum())
            .unwrap_or(0)
    }

    /// Drop everything; returns bytes freed.
    pub fn clear(&mut self) -> usize {
        let freed = self.memory_size();
        self.channels.clear();
        freed
    }

    /// Visit segments least-recently-accessed first, applying `step` to each
    /// until at least `target` bytes have been freed. Returns bytes freed.
    pub fn purge_lru<F>(&mut self, target: usize, mut step: F) -> usize
    where
        F: FnMut(&CachedSegment<P>) -> PurgeStep<P>,
    {
        let mut order: Vec<(Instant, String, usize)> = self
            .channels
            .iter()
            .flat_map(|(name, list)| {
                list.iter()
                    .enumerate()
                    .map(move |(i, seg)| (seg.last_access(), name.clone(), i))
            })
            .collect();
        // ties fall back to channel name for a stable order
        order.sort();

        let mut freed = 0usize;
        let mut doomed: HashMap<String, HashSet<usize>> = HashMap::new();
        for (_, name, i) in order {
            if freed >= target {
                break;
            }
            let Some(seg) = self.channels.get_mut(&name).and_then(|l| l.get_mut(i)) else {
                continue;
            };
            match step(seg) {
                PurgeStep::Keep => {}
                PurgeStep::Remove => {
                    freed += seg.memory_size();
                    doomed.entry(name).or_default().insert(i);
                }
                PurgeStep::Shrink(smaller) => {
                    let before = seg.memory_size();
                    seg.payload = smaller;
                    freed += before.saturating_sub(seg.memory_size());
                }
            }
        }

        for (name, indices) in doomed {
            if let Some(list) = self.channels.get_mut(&name) {
                let mut i = 0;
                list.retain(|_| {
                    let keep = !indices.contains(&i);
                    i += 1;
                    keep
                });
                if list.is_empty() {
                    self.channels.remove(&name);
                }
            }
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::helicorder::{HelicorderRow, HelicorderSegment};
    use crate::core::wave::WaveSegment;
    use std::thread;
    use std::time::Duration;

    fn wave(start: f64, len: usize, value: i32) -> WaveSegment {
        WaveSegment::new(start, 1.0, vec![value; len])
    }

    #[test]
    fn test_insert_disjoint_keeps_both() {
        let mut store = KindStore::new();
        store.insert("A", wave(0.0, 10, 1), usize::MAX);
        store.insert("A", wave(100.0, 10, 1), usize::MAX);
        assert_eq!(store.segment_count(), 2);
    }

    #[test]
    fn test_insert_bridging_segment_collapses_list() {
        let mut store = KindStore::new();
        store.insert("A", wave(0.0, 10, 1), usize::MAX);
        store.insert("A", wave(20.0, 10, 1), usize::MAX);
        let outcome = store.insert("A", wave(5.0, 20, 2), usize::MAX);

        assert_eq!(outcome.merged, 2);
        assert_eq!(store.segment_count(), 1);
        let seg = &store.segments("A")[0];
        assert_eq!(seg.range().start, 0.0);
        assert_eq!(seg.range().end, 30.0);
    }

    #[test]
    fn test_oversized_insert_is_split() {
        let mut store = KindStore::new();
        let w = wave(0.0, 1000, 7);
        let cap = w.memory_size() / 3;
        let outcome = store.insert("A", w, cap);

        assert!(outcome.split >= 2);
        assert!(store
            .segments("A")
            .iter()
            .all(|s| s.memory_size() <= cap));
        let total: usize = store.segments("A").iter().map(|s| s.payload.len()).sum();
        assert_eq!(total, 1000);
        assert!(store.contains("A", 0.0, 100.0, |_| true));
    }

    #[test]
    fn test_same_insert_twice_is_idempotent() {
        let mut store = KindStore::new();
        let h = HelicorderSegment::new(
            1.0,
            (0..60).map(|i| HelicorderRow::new(i as f64, -1.0, 1.0)).collect(),
        );
        store.insert("A", h.clone(), usize::MAX);
        let size = store.memory_size();
        store.insert("A", h.clone(), usize::MAX);

        assert_eq!(store.segment_count(), 1);
        assert_eq!(store.memory_size(), size);
        assert_eq!(store.segments("A")[0].payload, h);
    }

    #[test]
    fn test_purge_lru_removes_oldest_first() {
        let mut store = KindStore::new();
        store.insert("old", wave(0.0, 100, 1), usize::MAX);
        thread::sleep(Duration::from_millis(5));
        store.insert("new", wave(0.0, 100, 1), usize::MAX);

        let freed = store.purge_lru(1, |_| PurgeStep::Remove);
        assert!(freed > 0);
        assert!(store.segments("old").is_empty());
        assert_eq!(store.segments("new").len(), 1);
        assert_eq!(store.channel_names().count(), 1);
    }

    #[test]
    fn test_purge_lru_shrink() {
        let mut store = KindStore::new();
        store.insert("A", wave(0.0, 100, 1), usize::MAX);
        let freed = store.purge_lru(usize::MAX, |seg| match seg.payload.recent_half() {
            Some(half) => PurgeStep::Shrink(half),
            None => PurgeStep::Keep,
        });
        assert_eq!(freed, 50 * 4);
        assert_eq!(store.segments("A")[0].range().start, 50.0);
    }
}
