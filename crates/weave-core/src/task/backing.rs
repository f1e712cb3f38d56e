//! Strategy-specific launch for the three backing models.
//!
//! Each variant owns its body until launch, then hands it to the executor
//! together with a completion hook back into the shared task state. A body
//! that panics, or a pooled future dropped by its runtime, completes the
//! task instead of leaving waiters hanging.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    thread,
};

use futures::{future::BoxFuture, FutureExt};
use tokio::runtime::Handle;

use super::{ExecutionStrategy, Exit, Shared};
use crate::{Error, HostLoop, Result, Routine, RoutineId, Step};

pub(super) type ThreadBody = Box<dyn FnOnce() + Send + 'static>;

pub(super) enum Backing {
    Cooperative {
        host: Arc<HostLoop>,
        body: Option<Box<dyn Routine>>,
        /// `(body, supervisor)` once launched.
        routines: Option<(RoutineId, RoutineId)>,
    },
    Pooled {
        body: Option<BoxFuture<'static, ()>>,
        runtime: Option<Handle>,
    },
    Thread {
        body: Option<ThreadBody>,
        thread_name: String,
    },
}

fn already_launched() -> Error {
    Error::invalid_operation("task body was already handed to its executor")
}

impl Backing {
    pub(super) const fn strategy(&self) -> ExecutionStrategy {
        match self {
            Self::Cooperative { .. } => ExecutionStrategy::CooperativeHostLoop,
            Self::Pooled { .. } => ExecutionStrategy::PooledAsync,
            Self::Thread { .. } => ExecutionStrategy::DedicatedThread,
        }
    }

    /// Fail before the task is marked running if launch cannot succeed.
    pub(super) fn check_launchable(&self) -> Result<()> {
        match self {
            Self::Pooled { runtime: None, .. } if Handle::try_current().is_err() => {
                Err(Error::invalid_operation(
                    "pooled task has no tokio runtime: set one on the builder or start it from inside a runtime",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Hand the body to its executor.
    pub(super) fn launch(&mut self, task: &Arc<Shared>) -> Result<()> {
        match self {
            Self::Cooperative {
                host,
                body,
                routines,
            } => {
                let body = body.take().ok_or_else(already_launched)?;
                let faulted = Arc::new(AtomicBool::new(false));
                let body_id = host.start_routine(Guarded {
                    inner: body,
                    faulted: Arc::clone(&faulted),
                });
                let supervisor_id = host.start_routine(Supervisor {
                    task: Arc::downgrade(task),
                    host: Arc::downgrade(host),
                    body: body_id,
                    faulted,
                });
                *routines = Some((body_id, supervisor_id));
                Ok(())
            }
            Self::Pooled { body, runtime } => {
                let body = body.take().ok_or_else(already_launched)?;
                let runtime = match runtime {
                    Some(handle) => handle.clone(),
                    None => Handle::try_current()
                        .map_err(|e| Error::invalid_operation(format!("no tokio runtime: {e}")))?,
                };
                // Created outside the future so an unpolled drop still completes.
                let guard = CompleteOnDrop(Some(Arc::clone(task)));
                let _detached = runtime.spawn(async move {
                    let exit = match AssertUnwindSafe(body).catch_unwind().await {
                        Ok(()) => Exit::Returned,
                        Err(_) => Exit::Faulted,
                    };
                    guard.finish(exit);
                });
                Ok(())
            }
            Self::Thread { body, thread_name } => {
                let body = body.take().ok_or_else(already_launched)?;
                let task = Arc::clone(task);
                let _detached = thread::Builder::new()
                    .name(thread_name.clone())
                    .spawn(move || {
                        let exit = match catch_unwind(AssertUnwindSafe(body)) {
                            Ok(()) => Exit::Returned,
                            Err(_) => Exit::Faulted,
                        };
                        task.complete(exit);
                    })?;
                Ok(())
            }
        }
    }

    /// Host loop and routine ids to stop for preemptive cancellation.
    pub(super) fn cooperative_routines(&self) -> Option<(Arc<HostLoop>, RoutineId, RoutineId)> {
        match self {
            Self::Cooperative {
                host,
                routines: Some((body, supervisor)),
                ..
            } => Some((Arc::clone(host), *body, *supervisor)),
            _ => None,
        }
    }
}

/// Completes a pooled task whose future is dropped before it finishes,
/// e.g. when its runtime shuts down.
struct CompleteOnDrop(Option<Arc<Shared>>);

impl CompleteOnDrop {
    fn finish(mut self, exit: Exit) {
        if let Some(task) = self.0.take() {
            task.complete(exit);
        }
    }
}

impl Drop for CompleteOnDrop {
    fn drop(&mut self) {
        if let Some(task) = self.0.take() {
            task.complete(Exit::Abandoned);
        }
    }
}

/// Cooperative body that records a panic instead of letting the host drop
/// it silently.
struct Guarded {
    inner: Box<dyn Routine>,
    faulted: Arc<AtomicBool>,
}

impl Routine for Guarded {
    fn step(&mut self) -> Step {
        catch_unwind(AssertUnwindSafe(|| self.inner.step())).unwrap_or_else(|_| {
            self.faulted.store(true, Ordering::Release);
            Step::Done
        })
    }
}

/// Second routine of a cooperative task: completes the task once the body
/// is no longer running on the host.
struct Supervisor {
    task: Weak<Shared>,
    host: Weak<HostLoop>,
    body: RoutineId,
    faulted: Arc<AtomicBool>,
}

impl Routine for Supervisor {
    fn step(&mut self) -> Step {
        let (Some(task), Some(host)) = (self.task.upgrade(), self.host.upgrade()) else {
            return Step::Done;
        };
        if host.is_running(self.body) {
            return Step::Yield;
        }
        task.complete(if self.faulted.load(Ordering::Acquire) {
            Exit::Faulted
        } else {
            Exit::Returned
        });
        Step::Done
    }
}
