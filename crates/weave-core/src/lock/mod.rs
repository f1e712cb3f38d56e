//! Named locks in four independent namespaces.
//!
//! A lock is identified by `(namespace, name)`. The same name in two
//! namespaces refers to two unrelated locks, so a synchronous caller and an
//! asynchronous caller never block each other on `"db"`.
//!
//! ```text
//!               blocking                skip-if-held
//!  sync     sync_lock             skip_lock
//!  async    concurrent_sync_lock  concurrent_skip_lock
//! ```
//!
//! Every body runs while a [`LockGuard`] is alive; the permit is released on
//! every exit path, including unwinding out of a panicking body.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

mod registry;

use std::{fmt, future::Future, sync::LazyLock};

pub use registry::{LockGuard, PermitRegistry};

use crate::{Error, Result};

static GLOBAL_LOCKS: LazyLock<LockManager> = LazyLock::new(LockManager::new);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockNamespace {
    SyncBlocking,
    SyncSkip,
    AsyncBlocking,
    AsyncSkip,
}

impl LockNamespace {
    pub const ALL: [Self; 4] = [
        Self::SyncBlocking,
        Self::SyncSkip,
        Self::AsyncBlocking,
        Self::AsyncSkip,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SyncBlocking => "sync-blocking",
            Self::SyncSkip => "sync-skip",
            Self::AsyncBlocking => "async-blocking",
            Self::AsyncSkip => "async-skip",
        }
    }
}

impl fmt::Display for LockNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of the four permit registries.
#[derive(Debug)]
pub struct LockManager {
    sync_blocking: PermitRegistry,
    sync_skip: PermitRegistry,
    async_blocking: PermitRegistry,
    async_skip: PermitRegistry,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_argument("lock name cannot be empty"));
    }
    Ok(())
}

impl LockManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sync_blocking: PermitRegistry::new(LockNamespace::SyncBlocking),
            sync_skip: PermitRegistry::new(LockNamespace::SyncSkip),
            async_blocking: PermitRegistry::new(LockNamespace::AsyncBlocking),
            async_skip: PermitRegistry::new(LockNamespace::AsyncSkip),
        }
    }

    /// Process-wide instance.
    pub fn global() -> &'static Self {
        &GLOBAL_LOCKS
    }

    pub const fn registry(&self, namespace: LockNamespace) -> &PermitRegistry {
        match namespace {
            LockNamespace::SyncBlocking => &self.sync_blocking,
            LockNamespace::SyncSkip => &self.sync_skip,
            LockNamespace::AsyncBlocking => &self.async_blocking,
            LockNamespace::AsyncSkip => &self.async_skip,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PROBE + DESTROY
    // ═══════════════════════════════════════════════════════════════════════

    /// Whether `name` could be acquired in `namespace` right now.
    ///
    /// Unseen names report `true` without creating an entry. The probe
    /// releases whatever it takes, so a `true` answer is advisory: another
    /// caller may win the permit before the caller acts on it.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `name` is empty.
    pub fn check_lock(&self, namespace: LockNamespace, name: &str) -> Result<bool> {
        validate_name(name)?;
        Ok(self.registry(namespace).probe(name))
    }

    /// Remove the entry for `name`.
    ///
    /// Absent or free entries are removed and report `true`. A held entry
    /// reports `false` and stays intact unless `force` is set, in which case
    /// it is closed under the current holder (see [`PermitRegistry`]).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `name` is empty.
    pub fn destroy_lock(&self, namespace: LockNamespace, name: &str, force: bool) -> Result<bool> {
        validate_name(name)?;
        Ok(self.registry(namespace).destroy(name, force))
    }

    pub fn lock_count(&self, namespace: LockNamespace) -> usize {
        self.registry(namespace).len()
    }

    pub fn contains(&self, namespace: LockNamespace, name: &str) -> bool {
        self.registry(namespace).contains(name)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // GUARDED SECTIONS
    // ═══════════════════════════════════════════════════════════════════════

    /// Block the thread until `name` is free, then run `body`.
    ///
    /// `body` returns nothing, so an async block cannot be passed here and
    /// run after the permit is released; use
    /// [`concurrent_sync_lock`](Self::concurrent_sync_lock) instead.
    ///
    /// ```compile_fail
    /// let locks = weave_core::LockManager::new();
    /// let _ = locks.sync_lock("db", || async {});
    /// ```
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `name` is empty.
    pub fn sync_lock(&self, name: &str, body: impl FnOnce()) -> Result<()> {
        validate_name(name)?;
        let _guard = self.sync_blocking.acquire_blocking(name);
        body();
        Ok(())
    }

    /// Run `body` only if `name` is free right now. Returns whether it ran.
    ///
    /// Like [`sync_lock`](Self::sync_lock), `body` cannot be async:
    ///
    /// ```compile_fail
    /// let locks = weave_core::LockManager::new();
    /// let _ = locks.skip_lock("poll", || async {});
    /// ```
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `name` is empty.
    pub fn skip_lock(&self, name: &str, body: impl FnOnce()) -> Result<bool> {
        validate_name(name)?;
        let Some(_guard) = self.sync_skip.try_acquire(name) else {
            tracing::trace!(lock = name, namespace = %LockNamespace::SyncSkip, "lock held, body skipped");
            return Ok(false);
        };
        body();
        Ok(true)
    }

    /// Suspend until `name` is free, then run and await `body`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `name` is empty.
    pub async fn concurrent_sync_lock<F, Fut>(&self, name: &str, body: F) -> Result<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        validate_name(name)?;
        let _guard = self.async_blocking.acquire(name).await;
        Ok(body().await)
    }

    /// Run and await `body` only if `name` is free right now; `Ok(None)`
    /// otherwise.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `name` is empty.
    pub async fn concurrent_skip_lock<F, Fut>(
        &self,
        name: &str,
        body: F,
    ) -> Result<Option<Fut::Output>>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        validate_name(name)?;
        let Some(_guard) = self.async_skip.try_acquire(name) else {
            tracing::trace!(lock = name, namespace = %LockNamespace::AsyncSkip, "lock held, body skipped");
            return Ok(None);
        };
        Ok(Some(body().await))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // EXPLICIT GUARDS
    // ═══════════════════════════════════════════════════════════════════════

    /// # Errors
    ///
    /// `InvalidArgument` if `name` is empty.
    pub async fn acquire(&self, namespace: LockNamespace, name: &str) -> Result<LockGuard> {
        validate_name(name)?;
        Ok(self.registry(namespace).acquire(name).await)
    }

    /// # Errors
    ///
    /// `InvalidArgument` if `name` is empty.
    pub fn acquire_blocking(&self, namespace: LockNamespace, name: &str) -> Result<LockGuard> {
        validate_name(name)?;
        Ok(self.registry(namespace).acquire_blocking(name))
    }

    /// # Errors
    ///
    /// `InvalidArgument` if `name` is empty.
    pub fn try_acquire(&self, namespace: LockNamespace, name: &str) -> Result<Option<LockGuard>> {
        validate_name(name)?;
        Ok(self.registry(namespace).try_acquire(name))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn test_empty_name_rejected_everywhere() {
        let locks = LockManager::new();
        assert!(matches!(
            locks.check_lock(LockNamespace::SyncBlocking, ""),
            Err(Error::InvalidArgument(_))
        ));
        assert!(locks.destroy_lock(LockNamespace::AsyncSkip, "", false).is_err());
        assert!(locks.sync_lock("", || ()).is_err());
        assert!(locks.skip_lock("", || ()).is_err());
        assert!(locks.try_acquire(LockNamespace::SyncSkip, "").is_err());
    }

    #[test]
    fn test_check_lock_unseen_is_true_and_creates_nothing() -> Result<()> {
        let locks = LockManager::new();
        assert!(locks.check_lock(LockNamespace::SyncBlocking, "db")?);
        assert_eq!(locks.lock_count(LockNamespace::SyncBlocking), 0);
        Ok(())
    }

    #[test]
    fn test_check_lock_does_not_retain_permit() -> Result<()> {
        let locks = LockManager::new();
        locks.sync_lock("db", || ())?;
        assert!(locks.check_lock(LockNamespace::SyncBlocking, "db")?);
        assert!(locks.check_lock(LockNamespace::SyncBlocking, "db")?);
        assert!(locks.try_acquire(LockNamespace::SyncBlocking, "db")?.is_some());
        Ok(())
    }

    #[test]
    fn test_check_lock_reports_held() -> Result<()> {
        let locks = LockManager::new();
        let guard = locks.try_acquire(LockNamespace::AsyncBlocking, "db")?;
        assert!(guard.is_some());
        assert!(!locks.check_lock(LockNamespace::AsyncBlocking, "db")?);
        assert!(locks.check_lock(LockNamespace::SyncBlocking, "db")?);
        Ok(())
    }

    #[test]
    fn test_sync_lock_runs_body_while_held() -> Result<()> {
        let locks = LockManager::new();
        let mut free_inside = None;
        locks.sync_lock("db", || {
            free_inside = Some(locks.check_lock(LockNamespace::SyncBlocking, "db"));
        })?;
        assert!(matches!(free_inside, Some(Ok(false))));
        assert!(locks.contains(LockNamespace::SyncBlocking, "db"));
        assert!(locks.check_lock(LockNamespace::SyncBlocking, "db")?);
        Ok(())
    }

    #[test]
    fn test_skip_lock_skips_when_held() -> Result<()> {
        let locks = LockManager::new();
        let runs = AtomicUsize::new(0);

        let mut inner = None;
        let outer = locks.skip_lock("poll", || {
            inner = Some(locks.skip_lock("poll", || {
                runs.fetch_add(1, Ordering::SeqCst);
            }));
        })?;

        assert!(outer);
        assert!(matches!(inner, Some(Ok(false))));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(locks.skip_lock("poll", || ())?);
        Ok(())
    }

    #[test]
    fn test_namespaces_do_not_share_names() -> Result<()> {
        let locks = LockManager::new();
        let mut skipped_ran = None;
        locks.sync_lock("db", || skipped_ran = Some(locks.skip_lock("db", || ())))?;
        assert_eq!(skipped_ran.transpose()?, Some(true));
        Ok(())
    }

    #[test]
    fn test_panicking_body_releases_permit() -> Result<()> {
        let locks = Arc::new(LockManager::new());
        let inner = Arc::clone(&locks);
        let outcome = std::thread::spawn(move || inner.sync_lock("db", || panic!("body failed"))).join();
        assert!(outcome.is_err());

        assert!(locks.check_lock(LockNamespace::SyncBlocking, "db")?);
        let mut ran = false;
        locks.sync_lock("db", || ran = true)?;
        assert!(ran);
        Ok(())
    }

    #[test]
    fn test_destroy_lock_results() -> Result<()> {
        let locks = LockManager::new();
        assert!(locks.destroy_lock(LockNamespace::SyncSkip, "missing", false)?);

        let guard = locks.try_acquire(LockNamespace::SyncSkip, "poll")?;
        assert!(!locks.destroy_lock(LockNamespace::SyncSkip, "poll", false)?);
        assert!(locks.contains(LockNamespace::SyncSkip, "poll"));

        drop(guard);
        assert!(locks.destroy_lock(LockNamespace::SyncSkip, "poll", false)?);
        assert!(!locks.contains(LockNamespace::SyncSkip, "poll"));
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_skip_lock_skips_when_held() -> Result<()> {
        let locks = LockManager::new();
        let guard = locks.acquire(LockNamespace::AsyncSkip, "poll").await?;
        let skipped = locks.concurrent_skip_lock("poll", || async { 1 }).await?;
        assert_eq!(skipped, None);

        guard.release();
        let ran = locks.concurrent_skip_lock("poll", || async { 2 }).await?;
        assert_eq!(ran, Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_sync_lock_runs_body() -> Result<()> {
        let locks = LockManager::new();
        let value = locks
            .concurrent_sync_lock("db", || async {
                tokio::task::yield_now().await;
                42
            })
            .await?;
        assert_eq!(value, 42);
        assert!(locks.check_lock(LockNamespace::AsyncBlocking, "db")?);
        Ok(())
    }

    #[test]
    fn test_global_is_shared() {
        assert!(std::ptr::eq(LockManager::global(), LockManager::global()));
    }

    #[test]
    fn test_namespace_display() {
        let rendered: Vec<String> = LockNamespace::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            ["sync-blocking", "sync-skip", "async-blocking", "async-skip"]
        );
    }
}
