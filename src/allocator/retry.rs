//! Bounded, interruptible retry policy
//!
//! The only place a fast-path caller may sleep. Sleeping happens on a
//! [`CancelToken`], so a cancel wakes every waiter immediately.

use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: Mutex<bool>,
    cond: Condvar,
    /// Tokens cancelled along with this one
    children: Mutex<Vec<Weak<TokenInner>>>,
}

/// Shared cancellation flag with interruptible sleep
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and wake every sleeper, here and on linked tokens
    pub fn cancel(&self) {
        {
            let mut cancelled = self.inner.cancelled.lock();
            *cancelled = true;
            self.inner.cond.notify_all();
        }

        let children = std::mem::take(&mut *self.inner.children.lock());
        for inner in children.iter().filter_map(Weak::upgrade) {
            CancelToken { inner }.cancel();
        }
    }

    /// New token that is cancelled whenever this one is
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        self.link(&child);
        child
    }

    /// Cancel `other` whenever this token is cancelled
    ///
    /// A token may be linked to several parents; it fires with the first.
    pub fn link(&self, other: &CancelToken) {
        {
            let mut children = self.inner.children.lock();
            children.retain(|w| w.strong_count() > 0);
            children.push(Arc::downgrade(&other.inner));
        }
        // The flag is set before children are taken, so a cancel racing
        // this push is seen here if it missed the new entry
        if self.is_cancelled() {
            other.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Sleep for `duration` unless cancelled first
    ///
    /// Returns `false` if the token was (or became) cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            if self.inner.cond.wait_until(&mut cancelled, deadline).timed_out() {
                return !*cancelled;
            }
        }
        false
    }
}

/// Result of running a retry loop
#[derive(Debug, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// An attempt produced a value after `retries` extra attempts
    Ready { value: T, retries: u32 },
    /// Every attempt came up empty
    Exhausted { retries: u32 },
    /// The token was cancelled while waiting
    Cancelled { retries: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn retries(&self) -> u32 {
        match self {
            RetryOutcome::Ready { retries, .. }
            | RetryOutcome::Exhausted { retries }
            | RetryOutcome::Cancelled { retries } => *retries,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            RetryOutcome::Ready { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Fixed attempt count and interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Sleep between attempts
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            interval: Duration::from_millis(2),
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            interval: Duration::ZERO,
        }
    }

    /// Upper bound on time spent sleeping
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_retries
    }

    /// Run `attempt` once, then retry after each interval until it yields a
    /// value, the retry budget runs out, or `cancel` fires.
    pub fn run<T>(
        &self,
        cancel: &CancelToken,
        mut attempt: impl FnMut() -> Option<T>,
    ) -> RetryOutcome<T> {
        if let Some(value) = attempt() {
            return RetryOutcome::Ready { value, retries: 0 };
        }

        let mut retries = 0;
        while retries < self.max_retries {
            if !cancel.sleep(self.interval) {
                return RetryOutcome::Cancelled { retries };
            }
            retries += 1;
            if let Some(value) = attempt() {
                return RetryOutcome::Ready { value, retries };
            }
        }
        RetryOutcome::Exhausted { retries }
    }
}
