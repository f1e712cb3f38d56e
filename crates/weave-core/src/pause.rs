//! Pause signal shared between a task handle and its body.
//!
//! The handle only toggles the flag. Suspension is up to the body, which
//! either polls [`PauseSignal::is_paused`] between steps or awaits
//! [`PauseSignal::wait_while_paused`].

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    paused: AtomicBool,
    resumed: Notify,
}

/// Cloneable pause flag; all clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct PauseSignal {
    inner: Arc<Inner>,
}

impl PauseSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Raise the flag. Returns `false` if it was already raised.
    pub fn pause(&self) -> bool {
        !self.inner.paused.swap(true, Ordering::AcqRel)
    }

    /// Clear the flag and wake every body parked in `wait_while_paused`.
    /// Returns `false` if it was not raised.
    pub fn resume(&self) -> bool {
        let was_paused = self.inner.paused.swap(false, Ordering::AcqRel);
        if was_paused {
            self.inner.resumed.notify_waiters();
        }
        was_paused
    }

    /// Suspend until the flag is cleared. Returns immediately when not paused.
    pub async fn wait_while_paused(&self) {
        loop {
            // Register before checking so a concurrent resume is not lost.
            let resumed = self.inner.resumed.notified();
            if !self.is_paused() {
                return;
            }
            resumed.await;
        }
    }

    /// Whether two signals share the same flag.
    pub fn same_signal(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_pause_and_resume_toggle() {
        let signal = PauseSignal::new();
        assert!(!signal.is_paused());

        assert!(signal.pause());
        assert!(signal.is_paused());
        assert!(!signal.pause());

        assert!(signal.resume());
        assert!(!signal.is_paused());
        assert!(!signal.resume());
    }

    #[test]
    fn test_clones_share_state() {
        let signal = PauseSignal::new();
        let body_view = signal.clone();
        signal.pause();
        assert!(body_view.is_paused());
        assert!(signal.same_signal(&body_view));
        assert!(!signal.same_signal(&PauseSignal::new()));
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_running() {
        let signal = PauseSignal::new();
        let waited = tokio::time::timeout(Duration::from_millis(100), signal.wait_while_paused()).await;
        assert!(waited.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wait_wakes_on_resume() {
        let signal = PauseSignal::new();
        signal.pause();

        let body_view = signal.clone();
        let waiter = tokio::spawn(async move { body_view.wait_while_paused().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        signal.resume();
        let joined = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }
}
