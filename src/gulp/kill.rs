//! Cooperative cancellation for gulper threads.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// A one-way kill flag with an interruptible sleep.
///
/// Once killed it stays killed; any thread blocked in [`KillSwitch::sleep`]
/// wakes immediately.
#[derive(Debug, Default)]
pub struct KillSwitch {
    killed: Mutex<bool>,
    wake: Condvar,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kill(&self) {
        let mut killed = self.killed.lock().unwrap_or_else(PoisonError::into_inner);
        *killed = true;
        self.wake.notify_all();
    }

    pub fn is_killed(&self) -> bool {
        *self.killed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for up to `timeout`. Returns `true` if the switch was (or
    /// became) killed.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let guard = self.killed.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, timeout, |killed| !*killed)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}
