//! Explicit cancellation handle threaded through every suspending call.
//!
//! Rust has no ambient per-call context the way some languages do, so
//! every operation that can suspend (`provider.generate`, `tool.execute`,
//! retry sleeps, store writes) takes a [`Cancellation`] as an explicit
//! first argument, per the design's context-propagation note. Built on
//! `tokio::sync::watch` rather than pulling in `tokio-util`'s
//! `CancellationToken` — the watch channel already gives us a cheap,
//! cloneable, polls-to-a-bool primitive without a new dependency.

use std::fmt;
use tokio::sync::watch;

/// Returned by a suspending operation when it observed cancellation
/// before or during its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// The read half of a cancellation signal, cloned freely into every task
/// that needs to observe it.
///
/// `Never` is a distinct variant rather than a watch channel whose sender
/// was dropped: a closed channel makes `watch::Receiver::changed` resolve
/// immediately (with an error), which would make `cancelled()` fire right
/// away instead of never — exactly backwards for a handle that is supposed
/// to never cancel.
#[derive(Clone)]
pub struct Cancellation {
    inner: Inner,
}

#[derive(Clone)]
enum Inner {
    Watch(watch::Receiver<bool>),
    Never,
}

impl Cancellation {
    pub fn is_cancelled(&self) -> bool {
        match &self.inner {
            Inner::Watch(rx) => *rx.borrow(),
            Inner::Never => false,
        }
    }

    /// Resolves once cancellation fires; never resolves if it doesn't.
    /// Intended for use in `tokio::select!` alongside the real work.
    pub async fn cancelled(&self) {
        match &self.inner {
            Inner::Watch(rx) => {
                let mut rx = rx.clone();
                if *rx.borrow() {
                    return;
                }
                let _ = rx.changed().await;
            }
            Inner::Never => std::future::pending::<()>().await,
        }
    }

    /// Race an arbitrary future against cancellation; sleeps and
    /// suspending calls in the loop use this to short-circuit immediately
    /// rather than finishing their work after the fact.
    pub async fn race<F, T>(&self, future: F) -> Result<T, Cancelled>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            value = future => Ok(value),
        }
    }

    /// A handle that never cancels, for callers with no cancellation
    /// source of their own.
    pub fn never() -> Self {
        Cancellation { inner: Inner::Never }
    }
}

/// The write half, owned by whoever is driving a run (or a test) and used
/// to fire cancellation.
pub struct CancellationHandle {
    tx: watch::Sender<bool>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn cancellation(&self) -> Cancellation {
        Cancellation {
            inner: Inner::Watch(self.tx.subscribe()),
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}
