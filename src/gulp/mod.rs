//! Background backfill workers and the registry that deduplicates them

pub mod gulper;
pub mod kill;
pub mod listener;
pub mod scheduler;

pub use gulper::{GulpRequest, Gulper, GulperPhase, GulperRegistry};
pub use kill::KillSwitch;
pub use listener::{ChannelListener, FnListener, GulperEvent, GulperListener, ListenerSet};
pub use scheduler::{GulperScheduler, RequestOutcome};
