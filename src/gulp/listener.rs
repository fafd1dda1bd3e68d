//! Listener contract for gulper progress, plus adapters.

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

/// Receives progress from a gulper. Calls for one gulper arrive in order on
/// that gulper's thread.
pub trait GulperListener: Send + Sync {
    fn started(&self) {}

    fn gulped(&self, _t1: f64, _t2: f64, _success: bool) {}

    fn stopped(&self, _killed: bool) {}
}

/// Listener callbacks as a value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum GulperEvent {
    Started,
    Gulped { t1: f64, t2: f64, success: bool },
    Stopped { killed: bool },
}

impl GulperEvent {
    pub fn deliver(self, listener: &dyn GulperListener) {
        match self {
            GulperEvent::Started => listener.started(),
            GulperEvent::Gulped { t1, t2, success } => listener.gulped(t1, t2, success),
            GulperEvent::Stopped { killed } => listener.stopped(killed),
        }
    }
}

/// Forwards events into a tokio channel for async consumers.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<GulperEvent>,
}

impl ChannelListener {
    pub fn new(tx: mpsc::UnboundedSender<GulperEvent>) -> Self {
        Self { tx }
    }

    /// A listener and the receiver its events arrive on.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<GulperEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::new(tx)), rx)
    }

    fn send(&self, event: GulperEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

impl GulperListener for ChannelListener {
    fn started(&self) {
        self.send(GulperEvent::Started);
    }

    fn gulped(&self, t1: f64, t2: f64, success: bool) {
        self.send(GulperEvent::Gulped { t1, t2, success });
    }

    fn stopped(&self, killed: bool) {
        self.send(GulperEvent::Stopped { killed });
    }
}

/// Wraps a closure taking [`GulperEvent`]s.
pub struct FnListener<F>(pub F);

impl<F> GulperListener for FnListener<F>
where
    F: Fn(GulperEvent) + Send + Sync,
{
    fn started(&self) {
        (self.0)(GulperEvent::Started);
    }

    fn gulped(&self, t1: f64, t2: f64, success: bool) {
        (self.0)(GulperEvent::Gulped { t1, t2, success });
    }

    fn stopped(&self, killed: bool) {
        (self.0)(GulperEvent::Stopped { killed });
    }
}

/// Identity comparison for trait-object listeners.
pub fn same_listener(a: &Arc<dyn GulperListener>, b: &Arc<dyn GulperListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Attached listeners. Dispatch works on a snapshot, so attach and detach
/// never wait on a callback in progress.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn GulperListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn GulperListener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Detach; returns whether the listener was attached.
    pub fn remove(&self, listener: &Arc<dyn GulperListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn GulperListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn emit(&self, event: GulperEvent) {
        for listener in self.snapshot() {
            event.deliver(listener.as_ref());
        }
    }
}
