//! Lazily created named permits for one lock namespace.
//!
//! Each name maps to a capacity-1 semaphore. Entries appear on the first
//! acquisition attempt and disappear only through [`PermitRegistry::destroy`].
//!
//! # Destruction
//!
//! `destroy` claims the permit and closes it while the map's shard lock is
//! held, so removal and disposal happen as one step. A caller that fetched
//! the permit just before it was destroyed sees it closed and retries
//! against a fresh entry; it never acquires a disposed permit.
//!
//! Forced destruction of a held permit closes it regardless of the holder.
//! The holder keeps running, and the next caller gets a fresh permit
//! immediately, so two callers can end up inside the same named section.
//! Only force-destroy when that is acceptable.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use super::LockNamespace;

/// Units of capacity per named permit.
const PERMIT_CAPACITY: usize = 1;

/// Concurrent map from lock name to its permit.
#[derive(Debug)]
pub struct PermitRegistry {
    namespace: LockNamespace,
    permits: DashMap<String, Arc<Semaphore>>,
}

impl PermitRegistry {
    #[must_use]
    pub fn new(namespace: LockNamespace) -> Self {
        Self {
            namespace,
            permits: DashMap::new(),
        }
    }

    pub const fn namespace(&self) -> LockNamespace {
        self.namespace
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.permits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permits.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.permits.contains_key(name)
    }

    /// Whether `name` could be acquired right now. Unseen names are free.
    ///
    /// The probe takes the permit and gives it straight back; it never
    /// creates an entry and never keeps the permit.
    pub fn probe(&self, name: &str) -> bool {
        let Some(permit) = self.existing(name) else {
            return true;
        };
        // Bound to a local so the borrowed permit is dropped before `permit`.
        let free = match permit.try_acquire() {
            Ok(_released_on_drop) => true,
            Err(TryAcquireError::NoPermits) => false,
            // Destroyed between lookup and probe: the name is unseen again.
            Err(TryAcquireError::Closed) => true,
        };
        free
    }

    /// Zero-timeout acquisition. `None` when another caller holds the permit.
    pub fn try_acquire(&self, name: &str) -> Option<LockGuard> {
        loop {
            match self.permit(name).try_acquire_owned() {
                Ok(permit) => return Some(self.guard(name, permit)),
                Err(TryAcquireError::NoPermits) => return None,
                Err(TryAcquireError::Closed) => {
                    tracing::trace!(lock = name, namespace = %self.namespace, "permit closed, retrying");
                }
            }
        }
    }

    /// Suspend until the permit is free.
    pub async fn acquire(&self, name: &str) -> LockGuard {
        loop {
            match self.permit(name).acquire_owned().await {
                Ok(permit) => return self.guard(name, permit),
                Err(_closed) => {
                    tracing::trace!(lock = name, namespace = %self.namespace, "permit closed while waiting, retrying");
                }
            }
        }
    }

    /// Block the calling thread until the permit is free.
    pub fn acquire_blocking(&self, name: &str) -> LockGuard {
        futures::executor::block_on(self.acquire(name))
    }

    /// Remove and close the entry for `name`.
    ///
    /// Returns `true` when the name is gone afterwards (it was absent, free,
    /// or `force` was set) and `false` when it is held and `force` is unset.
    pub fn destroy(&self, name: &str, force: bool) -> bool {
        let mut held = false;
        let removed = self.permits.remove_if(name, |_, permit| match permit.try_acquire() {
            Ok(claimed) => {
                claimed.forget();
                permit.close();
                true
            }
            Err(_) => {
                held = true;
                if force {
                    permit.close();
                }
                force
            }
        });

        match (removed, held) {
            (Some(_), true) => {
                tracing::warn!(lock = name, namespace = %self.namespace, "held lock destroyed by force");
                true
            }
            (Some(_), false) => {
                tracing::debug!(lock = name, namespace = %self.namespace, "lock destroyed");
                true
            }
            (None, true) => false,
            (None, false) => true,
        }
    }

    fn existing(&self, name: &str) -> Option<Arc<Semaphore>> {
        self.permits.get(name).map(|entry| Arc::clone(entry.value()))
    }

    fn permit(&self, name: &str) -> Arc<Semaphore> {
        if let Some(permit) = self.existing(name) {
            return permit;
        }
        let entry = self.permits.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(lock = name, namespace = %self.namespace, "lock created");
            Arc::new(Semaphore::new(PERMIT_CAPACITY))
        });
        Arc::clone(entry.value())
    }

    fn guard(&self, name: &str, permit: OwnedSemaphorePermit) -> LockGuard {
        tracing::trace!(lock = name, namespace = %self.namespace, "lock acquired");
        LockGuard {
            name: name.to_string(),
            namespace: self.namespace,
            _permit: permit,
        }
    }
}

/// Held permit for a named lock; released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard {
    name: String,
    namespace: LockNamespace,
    _permit: OwnedSemaphorePermit,
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn namespace(&self) -> LockNamespace {
        self.namespace
    }

    /// Release explicitly; equivalent to dropping the guard.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        tracing::trace!(lock = %self.name, namespace = %self.namespace, "lock released");
    }
}
