//! Synchronization primitives for the cross-thread handshakes.
//!
//! [`Notify`] couples a mutex-protected value with a condition variable.
//! The critical section is an RAII guard, so waiting without holding the
//! lock (or leaving a section twice) cannot be expressed.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

/// Outcome of [`NotifyGuard::timed_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Signaled,
    TimedOut,
}

/// Returned by [`Notify::signal_async`] when the lock is held elsewhere.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("notify lock is busy")]
pub struct SignalBusy;

/// A value guarded by a mutex, plus a condition variable to wait on it.
#[derive(Debug, Default)]
pub struct Notify<T> {
    value: Mutex<T>,
    cond: Condvar,
}

impl<T> Notify<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
            cond: Condvar::new(),
        }
    }

    /// Enter the critical section. Dropping the guard leaves it.
    pub fn enter(&self) -> NotifyGuard<'_, T> {
        NotifyGuard {
            guard: self.value.lock(),
            cond: &self.cond,
        }
    }

    /// Wake all waiters without blocking.
    ///
    /// If another thread currently holds the lock this fails immediately.
    /// The waiter is then either running or about to re-check its
    /// predicate, so dropping the wake-up is harmless to it.
    pub fn signal_async(&self) -> Result<(), SignalBusy> {
        match self.value.try_lock() {
            Some(_guard) => {
                self.cond.notify_all();
                Ok(())
            }
            None => Err(SignalBusy),
        }
    }

    /// Wake all waiters, blocking until the lock is available.
    ///
    /// On return every waiter has either been woken or has not yet
    /// evaluated its predicate, so the event cannot be missed.
    pub fn signal_sync(&self) {
        let _guard = self.value.lock();
        self.cond.notify_all();
    }
}

/// An entered critical section of a [`Notify`].
pub struct NotifyGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    cond: &'a Condvar,
}

impl<T> NotifyGuard<'_, T> {
    /// Release the lock and block until signaled.
    pub fn wait(&mut self) {
        self.cond.wait(&mut self.guard);
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout`.
    pub fn timed_wait(&mut self, timeout: Duration) -> WaitResult {
        if self.cond.wait_for(&mut self.guard, timeout).timed_out() {
            WaitResult::TimedOut
        } else {
            WaitResult::Signaled
        }
    }

    /// Wake all waiters while still holding the lock.
    pub fn signal(&self) {
        self.cond.notify_all();
    }

    /// Leave the critical section.
    pub fn leave(self) {}
}

impl<T> Deref for NotifyGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for NotifyGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Coalescing "something happened" flag for observer threads.
#[derive(Debug, Default)]
pub struct WakePipe {
    notify: Notify<bool>,
}

impl WakePipe {
    pub fn new() -> Self {
        Self {
            notify: Notify::new(false),
        }
    }

    /// Set the flag and wake the observer.
    pub fn wake(&self) {
        let mut pending = self.notify.enter();
        *pending = true;
        pending.signal();
    }

    /// Consume the flag without blocking.
    pub fn take(&self) -> bool {
        std::mem::take(&mut *self.notify.enter())
    }

    /// Block until woken, then consume the flag.
    pub fn wait(&self) {
        let mut pending = self.notify.enter();
        while !*pending {
            pending.wait();
        }
        *pending = false;
    }

    /// Block until woken or `timeout` elapses. Returns whether it was woken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.notify.enter();
        while !*pending {
            let now = Instant::now();
            if now >= deadline || pending.timed_wait(deadline - now) == WaitResult::TimedOut {
                break;
            }
        }
        std::mem::take(&mut *pending)
    }
}
