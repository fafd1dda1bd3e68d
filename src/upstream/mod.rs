//! Upstream sources: where gulpers get their chunks from
//!
//! Protocol clients (waveform servers, files) implement [`UpstreamSource`].
//! Fetches block; `Err` and `Ok(None)` both mean "no data for this chunk".

pub mod synthetic;

pub use synthetic::SyntheticSource;

use crate::cache::TimeSeriesCache;
use crate::core::helicorder::HelicorderSegment;
use crate::core::rsam::RsamSegment;
use crate::core::segment::SegmentKind;
use crate::core::wave::WaveSegment;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Blocking data source for one or more channels.
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamSource: Send + Sync {
    fn fetch_wave(&self, channel: &str, t1: f64, t2: f64) -> Result<Option<WaveSegment>>;

    fn fetch_helicorder(&self, channel: &str, t1: f64, t2: f64)
        -> Result<Option<HelicorderSegment>>;

    fn fetch_rsam(&self, channel: &str, t1: f64, t2: f64, period: f64)
        -> Result<Option<RsamSegment>>;

    /// Streaming sources push data on their own; gulpers only republish the
    /// ranges they report.
    fn is_live(&self) -> bool {
        false
    }

    /// Range accumulated by a streaming source since the last call.
    fn drain_accumulated_range(&self) -> Option<(f64, f64)> {
        None
    }

    /// Called once by a gulper when its loop exits.
    fn close(&self) {}
}

/// Which data a gulper (or a direct fetch) pulls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FetchKind {
    Wave,
    Helicorder,
    Rsam { period: f64 },
}

impl FetchKind {
    pub fn segment_kind(&self) -> SegmentKind {
        match self {
            FetchKind::Wave => SegmentKind::Wave,
            FetchKind::Helicorder => SegmentKind::Helicorder,
            FetchKind::Rsam { .. } => SegmentKind::Rsam,
        }
    }
}

/// Whether the cache already fully holds `[t1, t2]` for this kind.
pub fn is_cached(cache: &TimeSeriesCache, kind: FetchKind, channel: &str, t1: f64, t2: f64) -> bool {
    match kind {
        FetchKind::Wave => cache.contains::<WaveSegment>(channel, t1, t2),
        FetchKind::Helicorder => cache.contains::<HelicorderSegment>(channel, t1, t2),
        FetchKind::Rsam { period } => cache.contains_rsam(channel, t1, t2, period),
    }
}

/// Fetch one chunk and insert it into the cache. Returns `true` on success.
pub fn fetch_into_cache(
    source: &dyn UpstreamSource,
    cache: &TimeSeriesCache,
    kind: FetchKind,
    channel: &str,
    t1: f64,
    t2: f64,
) -> bool {
    let fetched = match kind {
        FetchKind::Wave => source
            .fetch_wave(channel, t1, t2)
            .map(|w| w.map(|w| cache.put(channel, w))),
        FetchKind::Helicorder => source
            .fetch_helicorder(channel, t1, t2)
            .map(|h| h.map(|h| cache.put(channel, h))),
        FetchKind::Rsam { period } => source
            .fetch_rsam(channel, t1, t2, period)
            .map(|r| r.map(|r| cache.put(channel, r))),
    };

    match fetched {
        Ok(Some(())) => true,
        Ok(None) => {
            debug!(channel, t1, t2, kind = %kind.segment_kind(), "upstream returned no data");
            false
        }
        Err(e) => {
            debug!(channel, t1, t2, kind = %kind.segment_kind(), error = %e, "upstream fetch failed");
            false
        }
    }
}
