//! Background worker that backfills one channel into the cache
//!
//! A gulper walks backwards from `last_time` towards `goal_time` in
//! chunk-sized steps. Each chunk is fetched from the upstream source,
//! inserted into the shared cache and announced to listeners. Chunks the
//! cache already covers are skipped without a fetch. Live sources never
//! reach a goal; their gulper just republishes the ranges the streaming
//! client reports until it is killed.

use crate::cache::TimeSeriesCache;
use crate::config::GulperConfig;
use crate::core::time::{now_epoch, EpochDisplay, TimeRange};
use crate::error::{Error, Result};
use crate::gulp::kill::KillSwitch;
use crate::gulp::listener::{GulperEvent, GulperListener, ListenerSet};
use crate::upstream::{fetch_into_cache, is_cached, FetchKind, UpstreamSource};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Key to running gulper. Shared by the scheduler and every gulper thread.
pub type GulperRegistry = Arc<DashMap<String, Arc<Gulper>>>;

/// What to gulp, for which channel, and how fast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GulpRequest {
    /// Registry key, typically `sourceType:channel`.
    pub key: String,
    pub channel: String,
    pub kind: FetchKind,
    pub t1: f64,
    pub t2: f64,
    pub chunk_size: f64,
    pub delay: Duration,
}

impl GulpRequest {
    /// Wave request with the default wave chunking.
    pub fn new(key: impl Into<String>, channel: impl Into<String>, t1: f64, t2: f64) -> Self {
        let settings = GulperConfig::default().wave;
        Self {
            key: key.into(),
            channel: channel.into(),
            kind: FetchKind::Wave,
            t1,
            t2,
            chunk_size: settings.chunk_secs,
            delay: settings.delay(),
        }
    }

    /// Switch kind and pick up that kind's chunking from `config`.
    pub fn for_kind(mut self, kind: FetchKind, config: &GulperConfig) -> Self {
        let settings = config.settings(kind.segment_kind());
        self.kind = kind;
        self.chunk_size = settings.chunk_secs;
        self.delay = settings.delay();
        self
    }

    pub fn with_chunking(mut self, chunk_size: f64, delay: Duration) -> Self {
        self.chunk_size = chunk_size;
        self.delay = delay;
        self
    }

    pub fn span(&self) -> f64 {
        self.t2 - self.t1
    }

    pub fn validate(&self) -> Result<()> {
        TimeRange::new(self.t1, self.t2)?;
        if !(self.chunk_size.is_finite() && self.chunk_size > 0.0) {
            return Err(Error::Configuration(format!(
                "chunk size {} for {}",
                self.chunk_size, self.key
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GulperPhase {
    Created,
    Running,
    Stopped,
    Killed,
}

#[derive(Debug)]
struct Progress {
    last_time: f64,
    goal_time: f64,
    /// Set once the loop has decided to exit; no more updates accepted.
    finished: bool,
    phase: GulperPhase,
}

pub struct Gulper {
    id: Uuid,
    key: String,
    channel: String,
    kind: FetchKind,
    chunk_size: f64,
    delay: Duration,
    source: Arc<dyn UpstreamSource>,
    cache: Arc<TimeSeriesCache>,
    progress: Mutex<Progress>,
    listeners: ListenerSet,
    kill: KillSwitch,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Gulper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gulper")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("channel", &self.channel)
            .field("kind", &self.kind)
            .field("progress", &*self.progress())
            .finish()
    }
}

/// How a chunk iteration ended.
enum Chunk {
    Fetched(bool),
    Skipped,
}

impl Gulper {
    pub fn new(
        request: &GulpRequest,
        source: Arc<dyn UpstreamSource>,
        cache: Arc<TimeSeriesCache>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: request.key.clone(),
            channel: request.channel.clone(),
            kind: request.kind,
            chunk_size: request.chunk_size,
            delay: request.delay,
            source,
            cache,
            progress: Mutex::new(Progress {
                last_time: request.t2.min(now_epoch()),
                goal_time: request.t1,
                finished: false,
                phase: GulperPhase::Created,
            }),
            listeners: ListenerSet::new(),
            kill: KillSwitch::new(),
            thread: Mutex::new(None),
        }
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn kind(&self) -> FetchKind {
        self.kind
    }

    pub fn goal_time(&self) -> f64 {
        self.progress().goal_time
    }

    pub fn last_time(&self) -> f64 {
        self.progress().last_time
    }

    pub fn phase(&self) -> GulperPhase {
        self.progress().phase
    }

    pub fn add_listener(&self, listener: Arc<dyn GulperListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn GulperListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Extend the work to also cover `[t1, t2]`.
    ///
    /// Returns `false` if the loop has already decided to exit; the caller
    /// should start a fresh gulper instead.
    pub fn update(&self, t1: f64, t2: f64) -> bool {
        let mut progress = self.progress();
        if progress.finished {
            return false;
        }
        progress.goal_time = progress.goal_time.min(t1);
        if t2 < progress.last_time {
            progress.last_time = t2;
        }
        debug!(
            key = %self.key,
            goal = %EpochDisplay(progress.goal_time),
            last = %EpochDisplay(progress.last_time),
            "gulper extended"
        );
        true
    }

    /// Spawn the worker thread. The gulper deregisters itself from
    /// `registry` when its loop exits.
    pub fn start(self: &Arc<Self>, registry: GulperRegistry) -> Result<()> {
        let gulper = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("gulper-{}", self.key))
            .spawn(move || gulper.run(registry))?;
        *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Ask the worker to stop. Returns immediately; the loop notices at its
    /// next check or wakes early from its delay. An in-flight fetch is
    /// discarded when it completes. The thread handle stays attached so
    /// [`Gulper::join`] can still wait for the exit.
    pub fn kill(&self) {
        self.kill.kill();
    }

    pub fn is_killed(&self) -> bool {
        self.kill.is_killed()
    }

    /// Block until the worker thread exits, if it is still attached. Must not
    /// be called from a listener callback, which runs on that thread.
    pub fn join(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(key = %self.key, "gulper thread panicked");
            }
        }
    }

    fn run(self: Arc<Self>, registry: GulperRegistry) {
        self.progress().phase = GulperPhase::Running;
        info!(
            key = %self.key,
            channel = %self.channel,
            kind = %self.kind.segment_kind(),
            live = self.source.is_live(),
            "gulper started"
        );
        self.listeners.emit(GulperEvent::Started);

        let killed = if self.source.is_live() {
            self.run_live()
        } else {
            self.run_backfill()
        };

        self.source.close();
        registry.remove_if(&self.key, |_, g| g.id == self.id);
        self.progress().phase = if killed {
            GulperPhase::Killed
        } else {
            GulperPhase::Stopped
        };
        info!(key = %self.key, killed, "gulper stopped");
        self.listeners.emit(GulperEvent::Stopped { killed });
    }

    /// Next chunk to work on, or `Err(killed)` when the loop must exit.
    fn next_chunk(&self) -> std::result::Result<(f64, f64), bool> {
        let mut progress = self.progress();
        if self.kill.is_killed() {
            progress.finished = true;
            return Err(true);
        }
        if progress.last_time <= progress.goal_time {
            progress.finished = true;
            return Err(false);
        }
        let end = progress.last_time;
        let start = (end - self.chunk_size).max(progress.goal_time);
        Ok((start, end))
    }

    fn finish_killed(&self) -> bool {
        self.progress().finished = true;
        true
    }

    /// Returns whether the loop was killed.
    fn run_backfill(&self) -> bool {
        let mut failures = 0usize;
        loop {
            let (t1, t2) = match self.next_chunk() {
                Ok(chunk) => chunk,
                Err(killed) => {
                    if failures > 0 {
                        warn!(key = %self.key, failures, "gulper finished with failed chunks");
                    }
                    return killed;
                }
            };

            let chunk = if is_cached(&self.cache, self.kind, &self.channel, t1, t2) {
                debug!(key = %self.key, t1, t2, "chunk already cached");
                Chunk::Skipped
            } else {
                Chunk::Fetched(fetch_into_cache(
                    self.source.as_ref(),
                    &self.cache,
                    self.kind,
                    &self.channel,
                    t1,
                    t2,
                ))
            };

            if self.kill.is_killed() {
                debug!(key = %self.key, t1, t2, "discarding chunk fetched after kill");
                return self.finish_killed();
            }

            let success = match chunk {
                Chunk::Fetched(ok) => ok,
                Chunk::Skipped => true,
            };
            if !success {
                failures += 1;
            }
            self.listeners.emit(GulperEvent::Gulped { t1, t2, success });

            {
                let mut progress = self.progress();
                progress.last_time = progress.last_time.min(t1);
            }

            if matches!(chunk, Chunk::Fetched(_)) && self.kill.sleep(self.delay) {
                return self.finish_killed();
            }
        }
    }

    fn run_live(&self) -> bool {
        loop {
            if self.kill.is_killed() {
                return self.finish_killed();
            }
            if let Some((t1, t2)) = self.source.drain_accumulated_range() {
                self.listeners.emit(GulperEvent::Gulped {
                    t1,
                    t2,
                    success: true,
                });
            }
            if self.kill.sleep(self.delay) {
                return self.finish_killed();
            }
        }
    }
}
