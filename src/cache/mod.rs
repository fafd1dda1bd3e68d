//! In-memory time-series cache with overlap merging and budgeted purging

pub mod purge;
pub mod stats;
pub mod store;
pub mod time_series;

pub use purge::{ClearKind, HalveLongWaves, PurgeAction, PurgeEngine, PurgeReport, TimeLimitPurge};
pub use stats::CacheStats;
pub use store::{InsertOutcome, KindStore, PurgeStep};
pub use time_series::{normalize_channel, CacheablePayload, Stores, TimeSeriesCache};
