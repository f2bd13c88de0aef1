//! Cooperative cancellation for pipeline calls.
//!
//! A [`CancellationToken`] is attached to a call through its
//! [`PipelineContext`](crate::PipelineContext). The transport stage checks it
//! before issuing I/O and again when the I/O completes; in-flight socket
//! operations are not interrupted.

use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

/// Shared, cloneable cancellation flag with an optional timeout.
///
/// Clones observe the same state. A token with a timeout cancels itself once
/// the timeout has elapsed since [`start`](Self::start) was first called.
///
/// # Example
///
/// ```
/// use sdk_pipeline::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handle = token.clone();
/// handle.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Default)]
struct TokenState {
    cancelled: AtomicBool,
    timeout: Mutex<Option<Duration>>,
    started_at: Mutex<Option<Instant>>,
}

impl CancellationToken {
    /// A token that is only cancelled explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also cancels itself `timeout` after it is started.
    pub fn with_timeout(timeout: Duration) -> Self {
        let token = Self::new();
        *token.inner.timeout.lock() = Some(timeout);
        token
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested or the timeout has elapsed.
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        let timeout = *self.inner.timeout.lock();
        let started_at = *self.inner.started_at.lock();
        match (timeout, started_at) {
            (Some(timeout), Some(started)) => started.elapsed() >= timeout,
            _ => false,
        }
    }

    /// Whether the timeout clock is running.
    pub fn is_started(&self) -> bool {
        self.inner.started_at.lock().is_some()
    }

    /// The configured timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        *self.inner.timeout.lock()
    }

    /// Apply `timeout` only when the token does not carry one already.
    pub(crate) fn set_default_timeout(&self, timeout: Duration) {
        let mut current = self.inner.timeout.lock();
        if current.is_none() {
            *current = Some(timeout);
        }
    }

    /// Start the timeout clock. Calling this again while it runs is a no-op.
    pub fn start(&self) {
        if self.timeout().is_none() {
            return;
        }
        let mut started_at = self.inner.started_at.lock();
        if started_at.is_none() {
            *started_at = Some(Instant::now());
        }
    }

    /// Re-arm a timed token so it can guard another request.
    ///
    /// Tokens without a timeout are left untouched: an explicit cancel stays
    /// in effect.
    pub fn reset(&self) {
        if self.timeout().is_none() {
            return;
        }
        *self.inner.started_at.lock() = None;
        self.inner.cancelled.store(false, Ordering::Relaxed);
    }

    /// Whether two handles share the same underlying token.
    pub fn same_token(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("started", &self.is_started())
            .field("timeout", &self.timeout())
            .finish()
    }
}
