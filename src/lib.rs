//! seisgulp: seismic time-series cache and incremental backfill
//!
//! Caches waveform, helicorder and RSAM segments per channel in a single
//! memory-budgeted store, and fills gaps from an upstream source on
//! background gulper threads.
//!
//! # Core Concepts
//!
//! - **Segments**: contiguous time ranges of one data kind for one channel
//! - **TimeSeriesCache**: merges overlapping and adjacent segments, evicts by purge pipeline
//! - **Gulpers**: per-key workers that fetch chunk by chunk towards a goal time
//! - **GulperScheduler**: keeps at most one gulper per key and shares it between callers
//!
//! # Example
//!
//! ```no_run
//! use seisgulp::prelude::*;
//! use std::sync::Arc;
//!
//! # fn example() -> seisgulp::error::Result<()> {
//! let cache = Arc::new(TimeSeriesCache::new(64 * 1024 * 1024));
//! let scheduler = GulperScheduler::new(cache.clone());
//! let (listener, _events) = ChannelListener::channel();
//!
//! let request = GulpRequest::new("synthetic:AB CH", "AB CH", 0.0, 3600.0);
//! scheduler.request(request, listener, Arc::new(SyntheticSource::new(20.0)))?;
//!
//! let wave: Option<WaveSegment> = cache.get_best("AB CH", 0.0, 3600.0);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod gulp;
pub mod upstream;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::cache::{PurgeEngine, TimeSeriesCache};
    pub use crate::config::{CacheConfig, Config, GulperConfig};
    pub use crate::core::*;
    pub use crate::error::{Error, Result};
    pub use crate::gulp::*;
    pub use crate::upstream::{FetchKind, SyntheticSource, UpstreamSource};
}
