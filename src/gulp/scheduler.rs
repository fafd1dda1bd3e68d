//! Process-wide gulper registry
//!
//! At most one gulper runs per key. A second request for a running key
//! piggybacks on it by extending its goal; spans smaller than one chunk are
//! fetched inline without any worker at all.

use crate::cache::TimeSeriesCache;
use crate::error::Result;
use crate::gulp::gulper::{GulpRequest, Gulper, GulperRegistry};
use crate::gulp::listener::GulperListener;
use crate::upstream::{fetch_into_cache, UpstreamSource};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// What [`GulperScheduler::request`] did.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// Joined an already running gulper and extended its goal.
    Attached(Arc<Gulper>),
    /// Started a new gulper.
    Started(Arc<Gulper>),
    /// Span was below one chunk; fetched synchronously, nothing registered.
    Fetched { success: bool },
}

impl RequestOutcome {
    pub fn gulper(&self) -> Option<&Arc<Gulper>> {
        match self {
            RequestOutcome::Attached(g) | RequestOutcome::Started(g) => Some(g),
            RequestOutcome::Fetched { .. } => None,
        }
    }
}

pub struct GulperScheduler {
    registry: GulperRegistry,
    cache: Arc<TimeSeriesCache>,
}

impl GulperScheduler {
    pub fn new(cache: Arc<TimeSeriesCache>) -> Self {
        Self {
            registry: Arc::new(DashMap::new()),
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<TimeSeriesCache> {
        &self.cache
    }

    /// Attach `listener` to the gulper for `request.key`, starting one if
    /// needed.
    pub fn request(
        &self,
        request: GulpRequest,
        listener: Arc<dyn GulperListener>,
        source: Arc<dyn UpstreamSource>,
    ) -> Result<RequestOutcome> {
        request.validate()?;

        if let Some(gulper) = self.try_attach(&request, &listener) {
            return Ok(RequestOutcome::Attached(gulper));
        }

        if !source.is_live() && request.span() < request.chunk_size {
            debug!(key = %request.key, t1 = request.t1, t2 = request.t2, "direct fetch");
            let success = fetch_into_cache(
                source.as_ref(),
                &self.cache,
                request.kind,
                &request.channel,
                request.t1,
                request.t2,
            );
            return Ok(RequestOutcome::Fetched { success });
        }

        let gulper = match self.registry.entry(request.key.clone()) {
            Entry::Occupied(mut entry) => {
                // another caller won the race, or the old gulper is on its way out
                if entry.get().update(request.t1, request.t2) {
                    entry.get().add_listener(listener);
                    return Ok(RequestOutcome::Attached(Arc::clone(entry.get())));
                }
                let gulper = self.build(&request, listener, source);
                entry.insert(Arc::clone(&gulper));
                gulper
            }
            Entry::Vacant(entry) => {
                let gulper = self.build(&request, listener, source);
                entry.insert(Arc::clone(&gulper));
                gulper
            }
        };

        if let Err(e) = gulper.start(Arc::clone(&self.registry)) {
            self.remove(&gulper);
            return Err(e);
        }
        info!(key = %request.key, t1 = request.t1, t2 = request.t2, "gulper scheduled");
        Ok(RequestOutcome::Started(gulper))
    }

    fn try_attach(
        &self,
        request: &GulpRequest,
        listener: &Arc<dyn GulperListener>,
    ) -> Option<Arc<Gulper>> {
        let existing = self.registry.get(&request.key)?;
        if !existing.update(request.t1, request.t2) {
            return None;
        }
        existing.add_listener(Arc::clone(listener));
        debug!(key = %request.key, listeners = existing.listener_count(), "attached to running gulper");
        Some(Arc::clone(existing.value()))
    }

    fn build(
        &self,
        request: &GulpRequest,
        listener: Arc<dyn GulperListener>,
        source: Arc<dyn UpstreamSource>,
    ) -> Arc<Gulper> {
        let gulper = Arc::new(Gulper::new(request, source, Arc::clone(&self.cache)));
        gulper.add_listener(listener);
        gulper
    }

    /// Detach `listener` from the gulper at `key`, killing it once nobody is
    /// left listening. Returns whether a gulper was killed.
    pub fn kill(&self, key: &str, listener: &Arc<dyn GulperListener>) -> bool {
        let Some(gulper) = self.get(key) else {
            return false;
        };
        gulper.remove_listener(listener);
        let removed = self
            .registry
            .remove_if(key, |_, g| Arc::ptr_eq(g, &gulper) && g.listener_count() == 0);
        match removed {
            Some((_, g)) => {
                g.kill();
                info!(key, "gulper killed");
                true
            }
            None => false,
        }
    }

    /// Deregister `gulper` if it is still the one registered under its key.
    pub fn remove(&self, gulper: &Gulper) -> bool {
        self.registry
            .remove_if(gulper.key(), |_, g| g.id() == gulper.id())
            .is_some()
    }

    /// Kill every running gulper regardless of listeners.
    pub fn kill_all(&self) {
        let keys = self.keys();
        for key in keys {
            if let Some((_, g)) = self.registry.remove(&key) {
                g.kill();
            }
        }
    }

    /// Kill every gulper and wait for their threads to exit.
    pub fn shutdown(&self) {
        let gulpers: Vec<Arc<Gulper>> = self.keys().iter().filter_map(|k| self.get(k)).collect();
        self.kill_all();
        for gulper in gulpers {
            gulper.join();
        }
        info!("gulper scheduler shut down");
    }

    pub fn get(&self, key: &str) -> Option<Arc<Gulper>> {
        self.registry.get(key).map(|g| Arc::clone(g.value()))
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.registry.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

impl Drop for GulperScheduler {
    fn drop(&mut self) {
        self.kill_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::wave::WaveSegment;
    use crate::gulp::gulper::GulperPhase;
    use crate::gulp::listener::FnListener;
    use crate::upstream::{FetchKind, MockUpstreamSource, SyntheticSource};
    use std::time::Duration;

    fn quiet() -> Arc<dyn GulperListener> {
        Arc::new(FnListener(|_: crate::gulp::listener::GulperEvent| {}))
    }

    #[test]
    fn test_small_span_is_fetched_inline() {
        let cache = Arc::new(TimeSeriesCache::new(u64::MAX));
        let scheduler = GulperScheduler::new(cache.clone());
        let mut source = MockUpstreamSource::new();
        source.expect_is_live().return_const(false);
        source
            .expect_fetch_wave()
            .times(1)
            .returning(|_, t1, t2| Ok(Some(WaveSegment::new(t1, 1.0, vec![1; (t2 - t1) as usize]))));

        let request = GulpRequest::new("k", "A", 0.0, 30.0).with_chunking(60.0, Duration::ZERO);
        let outcome = scheduler.request(request, quiet(), Arc::new(source)).unwrap();

        assert!(matches!(outcome, RequestOutcome::Fetched { success: true }));
        assert!(scheduler.is_empty());
        assert!(cache.contains::<WaveSegment>("A", 0.0, 30.0));
    }

    #[test]
    fn test_invalid_request_is_rejected() {
        let scheduler = GulperScheduler::new(Arc::new(TimeSeriesCache::new(u64::MAX)));
        let request = GulpRequest::new("k", "A", 10.0, 0.0);
        let source = Arc::new(SyntheticSource::new(1.0));
        assert!(scheduler.request(request, quiet(), source).is_err());
    }

    #[test]
    fn test_kill_waits_for_last_listener() {
        let scheduler = GulperScheduler::new(Arc::new(TimeSeriesCache::new(u64::MAX)));
        let source = Arc::new(SyntheticSource::new(1.0).with_latency(Duration::from_millis(20)));
        let request = GulpRequest::new("k", "A", 0.0, 100_000.0)
            .with_chunking(10.0, Duration::from_millis(50));

        let a = quiet();
        let b = quiet();
        let first = scheduler.request(request.clone(), a.clone(), source.clone()).unwrap();
        let second = scheduler.request(request, b.clone(), source).unwrap();
        assert!(matches!(first, RequestOutcome::Started(_)));
        assert!(matches!(second, RequestOutcome::Attached(_)));
        assert_eq!(scheduler.len(), 1);

        assert!(!scheduler.kill("k", &a));
        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.kill("k", &b));
        assert!(scheduler.is_empty());

        let gulper = first.gulper().unwrap();
        assert!(gulper.is_killed());
    }

    #[test]
    fn test_rsam_request_uses_kind() {
        let cache = Arc::new(TimeSeriesCache::new(u64::MAX));
        let scheduler = GulperScheduler::new(cache.clone());
        let request = GulpRequest::new("k", "A", 0.0, 60.0)
            .with_chunking(600.0, Duration::ZERO);
        let request = GulpRequest {
            kind: FetchKind::Rsam { period: 10.0 },
            ..request
        };
        let outcome = scheduler
            .request(request, quiet(), Arc::new(SyntheticSource::new(1.0)))
            .unwrap();
        assert!(matches!(outcome, RequestOutcome::Fetched { success: true }));
        assert!(cache.contains_rsam("A", 0.0, 60.0, 10.0));
    }

    #[test]
    fn test_shutdown_joins_workers() {
        let scheduler = GulperScheduler::new(Arc::new(TimeSeriesCache::new(u64::MAX)));
        let request = GulpRequest::new("k", "A", 0.0, 100_000.0)
            .with_chunking(10.0, Duration::from_secs(60));
        let outcome = scheduler
            .request(request, quiet(), Arc::new(SyntheticSource::new(1.0)))
            .unwrap();
        let gulper = outcome.gulper().unwrap().clone();

        scheduler.shutdown();
        assert!(scheduler.is_empty());
        assert_eq!(gulper.phase(), GulperPhase::Killed);
    }

    #[test]
    fn test_kill_unknown_key() {
        let scheduler = GulperScheduler::new(Arc::new(TimeSeriesCache::new(u64::MAX)));
        assert!(!scheduler.kill("missing", &quiet()));
    }
}
