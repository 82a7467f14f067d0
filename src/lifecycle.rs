//! Shared shutdown state between the controller and the accept loop.
//!
//! Both primitives are built on `tokio::sync::watch`, which stores the value
//! and wakes waiters in one step, so a waiter that checks after an update
//! always sees it.

use std::fmt;
use tokio::sync::watch;

/// Process lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Stopping => "stopping",
            Phase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// One-shot "running" to "stopping" flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Move to "stopping". Calling it again has no effect.
    pub fn trigger(&self) {
        self.tx.send_if_modified(|stopping| !std::mem::replace(stopping, true));
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has been triggered.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|stopping| *stopping).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Count of live connection handlers.
#[derive(Debug, Clone)]
pub struct InFlightSet {
    tx: watch::Sender<usize>,
}

impl InFlightSet {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    /// Register a handler. It stays counted until the guard is dropped.
    pub fn track(&self) -> InFlightGuard {
        self.tx.send_modify(|n| *n += 1);
        InFlightGuard {
            tx: self.tx.clone(),
        }
    }

    pub fn len(&self) -> usize {
        *self.tx.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve once no handler is tracked.
    pub async fn wait_idle(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for InFlightSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Membership token held by a running handler.
#[derive(Debug)]
pub struct InFlightGuard {
    tx: watch::Sender<usize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tx.send_modify(|n| *n -= 1);
    }
}
