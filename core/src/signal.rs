//! One-shot completion signal for asynchronous requests.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A settable wait handle shared between a caller and a worker thread.
///
/// Transitions once from unset to set and never back. Clones observe the
/// same state. The signal carries no value: register a completion callback
/// to see the outcome.
#[derive(Debug, Clone, Default)]
pub struct CompletionSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.done.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the signal as set and wake every waiter. Idempotent.
    pub fn set(&self) {
        let mut done = self.inner.lock();
        if !*done {
            *done = true;
            self.inner.cond.notify_all();
        }
    }

    pub fn is_set(&self) -> bool {
        *self.inner.lock()
    }

    /// Block until the signal is set.
    pub fn wait(&self) {
        let mut done = self.inner.lock();
        while !*done {
            done = self
                .inner
                .cond
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the signal is set or `timeout` elapses. Returns whether
    /// the signal was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            // Too far out to represent: no different from waiting forever.
            self.wait();
            return true;
        };
        let mut done = self.inner.lock();
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(done, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            done = guard;
        }
        true
    }
}
