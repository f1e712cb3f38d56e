//! One-shot completion latch.
//!
//! Exactly one writer resolves the latch; any number of readers may wait,
//! either asynchronously or by blocking their thread. Resolving a second
//! time is rejected.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::{Error, Result};

/// Single-assignment value with async and blocking waiters.
#[derive(Debug)]
pub struct CompletionLatch<T> {
    value: Mutex<Option<T>>,
    condvar: Condvar,
    notify: Notify,
}

impl<T: Copy> CompletionLatch<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            condvar: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Store the value and wake every waiter.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the latch was already resolved.
    pub fn resolve(&self, value: T) -> Result<()> {
        {
            let mut slot = self.value.lock();
            if slot.is_some() {
                return Err(Error::invalid_operation("completion latch already resolved"));
            }
            *slot = Some(value);
        }
        self.condvar.notify_all();
        self.notify.notify_waiters();
        Ok(())
    }

    pub fn get(&self) -> Option<T> {
        *self.value.lock()
    }

    pub fn is_resolved(&self) -> bool {
        self.value.lock().is_some()
    }

    /// Suspend until resolved.
    pub async fn wait(&self) -> T {
        loop {
            let notified = self.notify.notified();
            if let Some(value) = self.get() {
                return value;
            }
            notified.await;
        }
    }

    /// Block the calling thread until resolved.
    pub fn wait_blocking(&self) -> T {
        let mut slot = self.value.lock();
        loop {
            if let Some(value) = *slot {
                return value;
            }
            self.condvar.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`; `None` if still unresolved.
    pub fn wait_blocking_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.value.lock();
        loop {
            if let Some(value) = *slot {
                return Some(value);
            }
            if self.condvar.wait_until(&mut slot, deadline).timed_out() {
                return *slot;
            }
        }
    }
}

impl<T: Copy> Default for CompletionLatch<T> {
    fn default() -> Self {
        Self::new()
    }
}
