//! Unified task handle over three execution strategies.
//!
//! A [`TaskHandle`] wraps exactly one body:
//!
//! - a [`Routine`](crate::Routine) stepped by a [`HostLoop`](crate::HostLoop)
//!   (cooperative; cancellation is preemptive),
//! - a future spawned on a tokio runtime (pooled),
//! - a closure run on its own OS thread (dedicated).
//!
//! Whatever the strategy, the handle moves through
//!
//! ```text
//! WaitingForExecution ──start──▶ Running ◀──resume/pause──▶ Paused
//!                                   │                          │
//!                                   └──── body ends / cancel ──┴──▶ Completed
//! ```
//!
//! and reaches `Completed` exactly once, waking every waiter and firing the
//! completion callback with a [`CompletionReason`].
//!
//! Pausing is advisory: the handle toggles its [`PauseSignal`] and the body
//! decides when to honour it. Non-cooperative bodies are cancelled the same
//! way, through a [`CancelSignal`] they observe.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

mod backing;
mod builder;

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;

pub use builder::TaskBuilder;

use self::backing::Backing;
use crate::{
    config::LogLevel, CancelSignal, CompletionLatch, Dispatcher, Error, PauseSignal, Result,
};

// ═══════════════════════════════════════════════════════════════════════════
// STATE TYPES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskState {
    WaitingForExecution = 0,
    Running = 1,
    Paused = 2,
    Completed = 3,
}

impl TaskState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::WaitingForExecution,
            1 => Self::Running,
            2 => Self::Paused,
            _ => Self::Completed,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WaitingForExecution => "waiting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStrategy {
    CooperativeHostLoop,
    PooledAsync,
    DedicatedThread,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CooperativeHostLoop => "cooperative",
            Self::PooledAsync => "pooled",
            Self::DedicatedThread => "thread",
        })
    }
}

/// Why a task reached `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionReason {
    RanToComplete,
    Cancelled,
    /// The body panicked, failed to launch, or was dropped unfinished by
    /// its executor.
    Faulted,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RanToComplete => "ran to completion",
            Self::Cancelled => "cancelled",
            Self::Faulted => "faulted",
        })
    }
}

/// Argument of the pause-state callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PauseTransition {
    Paused,
    Resumed,
}

pub(crate) type CompletionCallback = Box<dyn FnOnce(CompletionReason) + Send + 'static>;
pub(crate) type PauseCallback = Arc<dyn Fn(PauseTransition) + Send + Sync + 'static>;

// ═══════════════════════════════════════════════════════════════════════════
// SHARED STATE
// ═══════════════════════════════════════════════════════════════════════════

struct Shared {
    name: String,
    strategy: ExecutionStrategy,
    state: AtomicU8,
    started: AtomicBool,
    cancel_requested: AtomicBool,
    pause_signal: Option<PauseSignal>,
    cancel_signal: Option<CancelSignal>,
    latch: CompletionLatch<CompletionReason>,
    on_complete: Mutex<Option<CompletionCallback>>,
    on_pause_changed: Option<PauseCallback>,
    dispatcher: Arc<Dispatcher>,
    backing: Mutex<Backing>,
    /// Serializes pause, resume, cancel and completion decisions.
    transition: Mutex<()>,
}

/// How a body stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Returned,
    Faulted,
    /// Stopped before finishing: preempted by cancel, or dropped by its executor.
    Abandoned,
}

impl Shared {
    fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `Completed` once; later calls are no-ops.
    ///
    /// The reason is decided under the transition lock, so a `cancel` that
    /// returned `Ok` is always reported as `Cancelled`.
    fn complete(&self, exit: Exit) {
        let reason = {
            let _transition = self.transition.lock();
            if self.state().is_terminal() {
                return;
            }
            let cancelled = self.cancel_requested.load(Ordering::Acquire);
            let reason = match exit {
                Exit::Faulted => CompletionReason::Faulted,
                Exit::Returned | Exit::Abandoned if cancelled => CompletionReason::Cancelled,
                Exit::Returned => CompletionReason::RanToComplete,
                Exit::Abandoned => CompletionReason::Faulted,
            };
            self.state
                .store(TaskState::Completed as u8, Ordering::Release);
            reason
        };

        if let Err(e) = self.latch.resolve(reason) {
            self.emit(LogLevel::Warn, format!("completion dropped: {e}"));
            return;
        }

        match (exit, reason) {
            (Exit::Faulted, _) => self.emit(LogLevel::Error, "task body faulted".to_string()),
            (Exit::Abandoned, CompletionReason::Faulted) => self.emit(
                LogLevel::Warn,
                "task body dropped by its executor before finishing".to_string(),
            ),
            _ => self.emit(LogLevel::Debug, format!("task completed: {reason}")),
        }

        let callback = self.on_complete.lock().take();
        if let Some(callback) = callback {
            callback(reason);
        }
    }

    /// Log through the dispatcher so records surface on the privileged
    /// thread when one is established.
    fn emit(&self, level: LogLevel, message: String) {
        let task = self.name.clone();
        let strategy = self.strategy;
        self.dispatcher.post(move || match level {
            LogLevel::Trace => tracing::trace!(task = %task, %strategy, "{message}"),
            LogLevel::Debug => tracing::debug!(task = %task, %strategy, "{message}"),
            LogLevel::Info => tracing::info!(task = %task, %strategy, "{message}"),
            LogLevel::Warn => tracing::warn!(task = %task, %strategy, "{message}"),
            LogLevel::Error => tracing::error!(task = %task, %strategy, "{message}"),
        });
    }

    fn refuse(&self, operation: &str, reason: impl fmt::Display) -> Error {
        Error::invalid_operation(format!("cannot {operation} task '{}': {reason}", self.name))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TASK HANDLE
// ═══════════════════════════════════════════════════════════════════════════

/// Cloneable handle to one unit of work. Clones control the same task.
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.shared.name)
            .field("strategy", &self.shared.strategy)
            .field("state", &self.state())
            .field("cancel_requested", &self.is_cancellation_requested())
            .finish_non_exhaustive()
    }
}

impl TaskHandle {
    pub fn builder() -> TaskBuilder {
        TaskBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.shared.strategy
    }

    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.shared.cancel_requested.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.shared.latch.is_resolved()
    }

    /// `None` until the task completes.
    pub fn completion_reason(&self) -> Option<CompletionReason> {
        self.shared.latch.get()
    }

    pub fn pause_signal(&self) -> Option<&PauseSignal> {
        self.shared.pause_signal.as_ref()
    }

    pub fn cancel_signal(&self) -> Option<&CancelSignal> {
        self.shared.cancel_signal.as_ref()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Run
    // ───────────────────────────────────────────────────────────────────────

    /// Begin execution without waiting for it.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if the task was already started
    /// - `InvalidOperation` for a pooled task with no runtime available
    /// - `Io` if a dedicated thread cannot be spawned (the task then
    ///   completes as faulted)
    pub fn start(&self) -> Result<()> {
        let shared = &self.shared;
        let mut backing = shared.backing.lock();
        if shared.started.load(Ordering::Acquire) {
            return Err(shared.refuse("start", "already started"));
        }
        backing.check_launchable()?;

        {
            let _transition = shared.transition.lock();
            shared.started.store(true, Ordering::Release);
            shared
                .state
                .store(TaskState::Running as u8, Ordering::Release);
        }
        shared.emit(LogLevel::Debug, "task started".to_string());

        if let Err(e) = backing.launch(shared) {
            drop(backing);
            shared.emit(LogLevel::Error, format!("task failed to launch: {e}"));
            shared.complete(Exit::Faulted);
            return Err(e);
        }
        Ok(())
    }

    /// Start the task and suspend until it completes.
    ///
    /// A cooperative task only progresses while its host loop is ticked, so
    /// the host must be driven elsewhere.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start).
    pub async fn run(&self) -> Result<CompletionReason> {
        self.start()?;
        Ok(self.wait().await)
    }

    /// Suspend until the task completes.
    pub async fn wait(&self) -> CompletionReason {
        self.shared.latch.wait().await
    }

    /// Block the thread until the task completes. Never call this from the
    /// thread driving a cooperative task's host loop.
    pub fn wait_blocking(&self) -> CompletionReason {
        self.shared.latch.wait_blocking()
    }

    /// Block for at most `timeout`; `None` if still incomplete.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CompletionReason> {
        self.shared.latch.wait_blocking_timeout(timeout)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Pause / resume
    // ───────────────────────────────────────────────────────────────────────

    /// Move `Running → Paused` and raise the pause signal.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if not started, cancelled, completed, or not running.
    pub fn pause(&self) -> Result<()> {
        self.toggle(PauseTransition::Paused)
    }

    /// Move `Paused → Running` and clear the pause signal.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if not started, cancelled, completed, or not paused.
    pub fn resume(&self) -> Result<()> {
        self.toggle(PauseTransition::Resumed)
    }

    fn toggle(&self, transition: PauseTransition) -> Result<()> {
        let shared = &self.shared;
        let (operation, from, to) = match transition {
            PauseTransition::Paused => ("pause", TaskState::Running, TaskState::Paused),
            PauseTransition::Resumed => ("resume", TaskState::Paused, TaskState::Running),
        };

        let transition_guard = shared.transition.lock();
        if !shared.started.load(Ordering::Acquire) {
            return Err(shared.refuse(operation, "not started"));
        }
        if shared.cancel_requested.load(Ordering::Acquire) {
            return Err(shared.refuse(operation, "cancelled"));
        }
        let current = shared.state();
        if current != from {
            return Err(shared.refuse(operation, format_args!("task is {current}")));
        }
        shared.state.store(to as u8, Ordering::Release);
        if let Some(signal) = &shared.pause_signal {
            match transition {
                PauseTransition::Paused => {
                    signal.pause();
                }
                PauseTransition::Resumed => {
                    signal.resume();
                }
            }
        }
        drop(transition_guard);

        if shared.pause_signal.is_none() {
            shared.emit(
                LogLevel::Warn,
                format!("{operation} without a pause signal; the body is not notified"),
            );
        }
        shared.emit(LogLevel::Debug, format!("task {to}"));

        if let Some(callback) = &shared.on_pause_changed {
            callback(transition);
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Cancel
    // ───────────────────────────────────────────────────────────────────────

    /// Request cancellation.
    ///
    /// Cooperative tasks stop immediately: both routines leave the host loop
    /// and the task completes as `Cancelled` before this returns. Pooled and
    /// dedicated-thread tasks have their cancel signal raised (and any pause
    /// lifted) and complete once the body observes it.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if not started, already cancelled, completed, or a
    /// non-cooperative task has no cancel signal. State is unchanged on error.
    pub fn cancel(&self) -> Result<()> {
        let shared = &self.shared;
        let backing = shared.backing.lock();
        let transition = shared.transition.lock();

        if !shared.started.load(Ordering::Acquire) {
            return Err(shared.refuse("cancel", "not started"));
        }
        if shared.state().is_terminal() {
            return Err(shared.refuse("cancel", "already completed"));
        }
        let preemptive = backing.cooperative_routines();
        if preemptive.is_none() && shared.cancel_signal.is_none() {
            return Err(shared.refuse("cancel", "no cancel signal attached"));
        }
        if shared.cancel_requested.swap(true, Ordering::AcqRel) {
            return Err(shared.refuse("cancel", "already cancelled"));
        }
        drop(transition);
        drop(backing);
        shared.emit(LogLevel::Debug, "cancellation requested".to_string());

        match preemptive {
            Some((host, body, supervisor)) => {
                host.stop_routine(body);
                host.stop_routine(supervisor);
                shared.complete(Exit::Abandoned);
            }
            None => {
                if let Some(signal) = &shared.cancel_signal {
                    signal.cancel();
                }
                if let Some(pause) = &shared.pause_signal {
                    pause.resume();
                }
            }
        }
        Ok(())
    }
}
