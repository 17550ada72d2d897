//! Caller-side cancellation and deadlines for waits on in-flight computations.
//!
//! A [`CallContext`] only ever bounds *waiting*. Work that has started on behalf of a
//! request id keeps running to completion regardless of who gave up on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

/// Something blocked on a condition that must re-check it when a token fires.
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

#[derive(Default)]
struct TokenState {
    cancelled: AtomicBool,
    listeners: Mutex<Vec<Weak<dyn Wake>>>,
}

/// Cloneable cancellation flag. Cancelling wakes every wait registered on it.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenState>,
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let listeners = std::mem::take(
            &mut *self
                .inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for listener in listeners.iter().filter_map(Weak::upgrade) {
            listener.wake();
        }
    }

    /// Register `listener` to be woken on cancel. Callers must re-check
    /// [`is_cancelled`](Self::is_cancelled) after subscribing.
    pub(crate) fn subscribe(&self, listener: Weak<dyn Wake>) {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|l| l.strong_count() > 0);
        listeners.push(listener);
    }
}

/// Per-call cancellation token and optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and never times out.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancelToken::new(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Tighten the deadline to at most `timeout` from now.
    pub(crate) fn bounded_by(&self, timeout: Option<Duration>) -> Self {
        let fallback = timeout.and_then(|t| Instant::now().checked_add(t));
        let deadline = match (self.deadline, fallback) {
            (Some(own), Some(bound)) => Some(own.min(bound)),
            (own, bound) => own.or(bound),
        };
        Self {
            cancel: self.cancel.clone(),
            deadline,
        }
    }
}
