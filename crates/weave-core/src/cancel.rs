//! Cooperative cancellation signal.
//!
//! Pooled and dedicated-thread bodies cannot be torn down from outside, so
//! a handle cancels them by raising this signal. The body polls
//! [`CancelSignal::is_cancelled`] or awaits [`CancelSignal::cancelled`] and
//! unwinds on its own.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable, one-way cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

impl CancelSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Raise the signal. Returns `false` if it was already raised.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::AcqRel);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// Resolve once the signal has been raised.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_cancel_is_one_way() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());
        assert!(signal.cancel());
        assert!(signal.is_cancelled());
        assert!(!signal.cancel());
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_cancel_visible_from_other_thread() {
        let signal = CancelSignal::new();
        let body_view = signal.clone();
        let worker = std::thread::spawn(move || {
            while !body_view.is_cancelled() {
                std::thread::yield_now();
            }
        });
        signal.cancel();
        assert!(worker.join().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_future_resolves() {
        let signal = CancelSignal::new();
        let body_view = signal.clone();
        let waiter = tokio::spawn(async move { body_view.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.cancel();

        let joined = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }
}
