//! Single-threaded action marshalling.
//!
//! A [`Dispatcher`] delivers actions onto one privileged thread. Until a
//! thread calls [`Dispatcher::establish`], posted actions run immediately
//! on the posting thread. Once established, actions are queued and run
//! when the owning thread calls [`Dispatcher::drain`], which a
//! [`HostLoop`](crate::HostLoop) does at the start of every tick.
//!
//! The queue is unbounded. An owner that stops draining without calling
//! [`Dispatcher::relinquish`] leaves every later post queued forever, so a
//! thread that may exit early should bind through
//! [`Dispatcher::establish_scoped`], whose guard relinquishes on drop.

use std::{
    collections::VecDeque,
    marker::PhantomData,
    rc::Rc,
    sync::{Arc, LazyLock},
    thread::{self, ThreadId},
};

use parking_lot::Mutex;

use crate::{Error, Result};

/// Work item delivered by a dispatcher.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

static GLOBAL_DISPATCHER: LazyLock<Arc<Dispatcher>> =
    LazyLock::new(|| Arc::new(Dispatcher::new()));

/// Fire-and-forget queue onto a privileged thread.
#[derive(Default)]
pub struct Dispatcher {
    owner: Mutex<Option<ThreadId>>,
    queue: Mutex<VecDeque<Action>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("owner", &*self.owner.lock())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide dispatcher used when a task is not given its own.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_DISPATCHER)
    }

    /// Bind the calling thread as the privileged context.
    ///
    /// Re-establishing from the same thread is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if another thread already owns the dispatcher.
    pub fn establish(&self) -> Result<()> {
        let current = thread::current().id();
        let mut owner = self.owner.lock();
        match *owner {
            Some(existing) if existing != current => Err(Error::invalid_operation(
                "dispatcher is already bound to another thread",
            )),
            _ => {
                *owner = Some(current);
                Ok(())
            }
        }
    }

    /// Bind the calling thread until the returned guard is dropped.
    ///
    /// The guard cannot leave the thread, so it is dropped there when the
    /// scope ends or the thread unwinds, flushing the queue and unbinding.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if another thread already owns the dispatcher.
    pub fn establish_scoped(self: &Arc<Self>) -> Result<DispatcherOwnership> {
        self.establish()?;
        Ok(DispatcherOwnership {
            dispatcher: Arc::clone(self),
            _owner_thread: PhantomData,
        })
    }

    /// Unbind the privileged context, running anything still queued.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` when called from a thread other than the owner.
    pub fn relinquish(&self) -> Result<usize> {
        self.ensure_owner("relinquish")?;
        let flushed = self.run_queued(usize::MAX);
        *self.owner.lock() = None;
        Ok(flushed)
    }

    pub fn is_established(&self) -> bool {
        self.owner.lock().is_some()
    }

    pub fn is_owner_thread(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    /// Deliver `action` to the privileged context, or run it now if none exists.
    ///
    /// Queued actions accumulate until the owner drains or relinquishes.
    pub fn post<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_established() {
            self.queue.lock().push_back(Box::new(action));
        } else {
            action();
        }
    }

    /// Number of queued actions.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run up to `max_batch` queued actions on the owning thread.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` when called from a thread other than the owner.
    pub fn drain(&self, max_batch: usize) -> Result<usize> {
        self.ensure_owner("drain")?;
        Ok(self.run_queued(max_batch))
    }

    fn ensure_owner(&self, operation: &str) -> Result<()> {
        if self.is_owner_thread() {
            Ok(())
        } else {
            Err(Error::invalid_operation(format!(
                "cannot {operation} dispatcher from a thread that does not own it"
            )))
        }
    }

    fn run_queued(&self, max_batch: usize) -> usize {
        let mut ran = 0;
        while ran < max_batch {
            // Pop under the lock, run outside it so actions may post again.
            let next = self.queue.lock().pop_front();
            match next {
                Some(action) => {
                    action();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }
}

/// Binding of a [`Dispatcher`] to the current thread; relinquished on drop.
#[must_use = "the dispatcher is relinquished as soon as the guard is dropped"]
#[derive(Debug)]
pub struct DispatcherOwnership {
    dispatcher: Arc<Dispatcher>,
    /// Keeps the guard `!Send`.
    _owner_thread: PhantomData<Rc<()>>,
}

impl DispatcherOwnership {
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

impl Drop for DispatcherOwnership {
    fn drop(&mut self) {
        // Already relinquished explicitly.
        if !self.dispatcher.is_owner_thread() {
            return;
        }
        if let Ok(flushed) = self.dispatcher.relinquish() {
            tracing::trace!(flushed, "dispatcher relinquished at end of scope");
        }
    }
}
