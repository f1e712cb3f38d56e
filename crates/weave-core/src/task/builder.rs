//! Builder shared by the three task constructors.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::runtime::Handle;

use super::{
    backing::Backing, CompletionCallback, CompletionReason, PauseCallback, PauseTransition, Shared,
    TaskHandle, TaskState,
};
use crate::{
    config::TaskConfig, CancelSignal, CompletionLatch, Dispatcher, Error, HostLoop, PauseSignal,
    Result, Routine,
};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Collects the options common to every strategy; the terminal method
/// chosen ([`cooperative`](Self::cooperative), [`pooled`](Self::pooled) or
/// [`dedicated_thread`](Self::dedicated_thread)) fixes the strategy.
#[must_use]
pub struct TaskBuilder {
    name: Option<String>,
    pause_signal: Option<PauseSignal>,
    cancel_signal: Option<CancelSignal>,
    execute_immediately: bool,
    on_complete: Option<CompletionCallback>,
    on_pause_changed: Option<PauseCallback>,
    dispatcher: Option<Arc<Dispatcher>>,
    runtime: Option<Handle>,
    thread_name: Option<String>,
    thread_name_prefix: String,
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::from_config(&TaskConfig::default())
    }
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder seeded with the `[tasks]` configuration section.
    pub fn from_config(config: &TaskConfig) -> Self {
        Self {
            name: None,
            pause_signal: None,
            cancel_signal: None,
            execute_immediately: config.execute_immediately,
            on_complete: None,
            on_pause_changed: None,
            dispatcher: None,
            runtime: None,
            thread_name: None,
            thread_name_prefix: config.thread_name_prefix.clone(),
        }
    }

    /// Name used in log records. Defaults to `task-<n>`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn pause_signal(mut self, signal: PauseSignal) -> Self {
        self.pause_signal = Some(signal);
        self
    }

    /// Not accepted by cooperative tasks.
    pub fn cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.cancel_signal = Some(signal);
        self
    }

    /// Start the task as part of building it.
    pub const fn execute_immediately(mut self, enabled: bool) -> Self {
        self.execute_immediately = enabled;
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(CompletionReason) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn on_pause_changed<F>(mut self, callback: F) -> Self
    where
        F: Fn(PauseTransition) + Send + Sync + 'static,
    {
        self.on_pause_changed = Some(Arc::new(callback));
        self
    }

    /// Dispatcher for log records. Defaults to the host loop's dispatcher for
    /// cooperative tasks and to [`Dispatcher::global`] otherwise.
    pub fn dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Runtime for pooled tasks. Defaults to the runtime current at start.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// OS thread name for dedicated-thread tasks. Defaults to
    /// `<thread_name_prefix>-<name>`.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TERMINAL CONSTRUCTORS
    // ═══════════════════════════════════════════════════════════════════════

    /// Task stepped by `host`, with cancellation that stops it outright.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if a cancel signal was attached or the name is empty
    /// - any error from [`TaskHandle::start`] when executing immediately
    pub fn cooperative<R: Routine>(self, host: Arc<HostLoop>, routine: R) -> Result<TaskHandle> {
        if self.cancel_signal.is_some() {
            return Err(Error::invalid_argument(
                "cooperative tasks are cancelled preemptively and do not take a cancel signal",
            ));
        }
        let fallback = host.dispatcher().cloned();
        self.build(
            Backing::Cooperative {
                host,
                body: Some(Box::new(routine)),
                routines: None,
            },
            fallback,
        )
    }

    /// Task whose body is a future spawned on a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the name is empty
    /// - any error from [`TaskHandle::start`] when executing immediately
    pub fn pooled<F>(mut self, body: F) -> Result<TaskHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = self.runtime.take();
        self.build(
            Backing::Pooled {
                body: Some(Box::pin(body)),
                runtime,
            },
            None,
        )
    }

    /// Task whose body is a closure run on its own OS thread.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the name is empty or the thread name has a NUL byte
    /// - any error from [`TaskHandle::start`] when executing immediately
    pub fn dedicated_thread<F>(mut self, body: F) -> Result<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.resolve_name()?;
        let thread_name = self
            .thread_name
            .take()
            .unwrap_or_else(|| format!("{}-{name}", self.thread_name_prefix));
        if thread_name.contains('\0') {
            return Err(Error::invalid_argument(format!(
                "thread name {thread_name:?} contains a NUL byte"
            )));
        }
        self.build(
            Backing::Thread {
                body: Some(Box::new(body)),
                thread_name,
            },
            None,
        )
    }

    fn resolve_name(&mut self) -> Result<String> {
        let name = self
            .name
            .get_or_insert_with(|| format!("task-{}", NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)));
        if name.trim().is_empty() {
            return Err(Error::invalid_argument("task name cannot be empty"));
        }
        Ok(name.clone())
    }

    fn build(mut self, backing: Backing, fallback: Option<Arc<Dispatcher>>) -> Result<TaskHandle> {
        let name = self.resolve_name()?;
        let strategy = backing.strategy();
        let dispatcher = self
            .dispatcher
            .or(fallback)
            .unwrap_or_else(Dispatcher::global);

        let handle = TaskHandle {
            shared: Arc::new(Shared {
                name,
                strategy,
                state: AtomicU8::new(TaskState::WaitingForExecution as u8),
                started: AtomicBool::new(false),
                cancel_requested: AtomicBool::new(false),
                pause_signal: self.pause_signal,
                cancel_signal: self.cancel_signal,
                latch: CompletionLatch::new(),
                on_complete: Mutex::new(self.on_complete),
                on_pause_changed: self.on_pause_changed,
                dispatcher,
                backing: Mutex::new(backing),
                transition: Mutex::new(()),
            }),
        };
        tracing::trace!(task = handle.name(), %strategy, "task created");

        if self.execute_immediately {
            handle.start()?;
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{task::ExecutionStrategy, Step};

    #[test]
    fn test_empty_name_rejected() {
        let result = TaskBuilder::new().name("  ").dedicated_thread(|| ());
        assert!(result.is_err_and(|e| e.is_invalid_argument()));

        let result = TaskBuilder::new().name("").pooled(async {});
        assert!(result.is_err_and(|e| e.is_invalid_argument()));
    }

    #[test]
    fn test_cooperative_rejects_cancel_signal() {
        let host = Arc::new(HostLoop::new());
        let result = TaskBuilder::new()
            .cancel_signal(CancelSignal::new())
            .cooperative(host, || Step::Done);
        assert!(result.is_err_and(|e| e.is_invalid_argument()));
    }

    #[test]
    fn test_nul_thread_name_rejected() {
        let result = TaskBuilder::new().thread_name("bad\0name").dedicated_thread(|| ());
        assert!(result.is_err_and(|e| e.is_invalid_argument()));

        let result = TaskBuilder::new().name("bad\0task").dedicated_thread(|| ());
        assert!(result.is_err_and(|e| e.is_invalid_argument()));
    }

    #[test]
    fn test_default_names_are_unique() -> Result<()> {
        let first = TaskBuilder::new().pooled(async {})?;
        let second = TaskBuilder::new().pooled(async {})?;
        assert!(first.name().starts_with("task-"));
        assert_ne!(first.name(), second.name());
        Ok(())
    }

    #[test]
    fn test_thread_name_uses_configured_prefix() -> Result<()> {
        let config = TaskConfig {
            thread_name_prefix: "render".to_string(),
            execute_immediately: false,
        };
        let observed = Arc::new(Mutex::new(None::<String>));
        let slot = Arc::clone(&observed);
        let task = TaskBuilder::from_config(&config)
            .name("frame")
            .dedicated_thread(move || {
                *slot.lock() = std::thread::current().name().map(str::to_string);
            })?;
        task.start()?;
        task.wait_timeout(Duration::from_secs(5));
        assert_eq!(observed.lock().as_deref(), Some("render-frame"));
        Ok(())
    }

    #[test]
    fn test_execute_immediately_starts_on_build() -> Result<()> {
        let host = Arc::new(HostLoop::new());
        let task = TaskBuilder::new()
            .execute_immediately(true)
            .cooperative(Arc::clone(&host), || Step::Done)?;
        assert!(task.is_started());
        assert_eq!(task.state(), TaskState::Running);
        assert_eq!(task.strategy(), ExecutionStrategy::CooperativeHostLoop);

        host.settle()?;
        assert_eq!(task.completion_reason(), Some(CompletionReason::RanToComplete));
        Ok(())
    }

    #[test]
    fn test_cooperative_logs_through_host_dispatcher() -> Result<()> {
        let dispatcher = Arc::new(Dispatcher::new());
        dispatcher.establish()?;
        let host = Arc::new(HostLoop::with_dispatcher(Arc::clone(&dispatcher)));

        let task = TaskBuilder::new().cooperative(Arc::clone(&host), || Step::Done)?;
        task.start()?;
        assert!(dispatcher.pending() > 0, "start record should be queued");

        host.settle()?;
        host.tick();
        assert_eq!(dispatcher.pending(), 0);
        Ok(())
    }
}
