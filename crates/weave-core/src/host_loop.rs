//! Tick-driven owner of cooperative routines.
//!
//! A [`HostLoop`] is stepped by one privileged thread. Every [`HostLoop::tick`]
//! first drains the attached [`Dispatcher`] (when called on its owning
//! thread) and then advances each live routine by exactly one step.
//!
//! Routines are stepped outside the registry lock, so a routine may start
//! or stop routines (itself included) from inside its step.

use std::{
    collections::HashSet,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;

use crate::{config::Config, CancelSignal, Dispatcher, Error, Result};

/// Outcome of one routine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More work remains; step again next tick.
    Yield,
    /// The routine is finished and will be dropped.
    Done,
}

/// Cooperative body advanced once per host tick.
pub trait Routine: Send + 'static {
    fn step(&mut self) -> Step;
}

impl<F> Routine for F
where
    F: FnMut() -> Step + Send + 'static,
{
    fn step(&mut self) -> Step {
        self()
    }
}

/// Routine that pulls one item from an iterator per tick and finishes
/// when the iterator is exhausted.
#[derive(Debug)]
pub struct IterRoutine<I> {
    iter: I,
}

impl<I> Routine for IterRoutine<I>
where
    I: Iterator + Send + 'static,
{
    fn step(&mut self) -> Step {
        match self.iter.next() {
            Some(_) => Step::Yield,
            None => Step::Done,
        }
    }
}

/// Adapt any iterator into a [`Routine`].
pub fn iter_routine<I>(iter: I) -> IterRoutine<I::IntoIter>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
{
    IterRoutine {
        iter: iter.into_iter(),
    }
}

/// Identifier of a routine registered on a host loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RoutineId(u64);

static NEXT_ROUTINE_ID: AtomicU64 = AtomicU64::new(1);

impl RoutineId {
    fn next() -> Self {
        Self(NEXT_ROUTINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

struct Slot {
    id: RoutineId,
    routine: Box<dyn Routine>,
}

#[derive(Default)]
struct Routines {
    /// Routines waiting for the next tick.
    queued: Vec<Slot>,
    /// Every routine not yet finished or stopped, including the in-flight batch.
    live: HashSet<RoutineId>,
    /// Routines stopped while their slot was out in the in-flight batch.
    stopped: HashSet<RoutineId>,
}

/// Single-threaded cooperative scheduler.
pub struct HostLoop {
    routines: Mutex<Routines>,
    dispatcher: Option<Arc<Dispatcher>>,
    max_batch: usize,
    max_idle_ticks: u64,
    tick_interval: Duration,
    ticks: AtomicU64,
}

impl std::fmt::Debug for HostLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostLoop")
            .field("live", &self.live_count())
            .field("ticks", &self.ticks())
            .finish_non_exhaustive()
    }
}

impl Default for HostLoop {
    fn default() -> Self {
        Self::from_config(&Config::default(), None)
    }
}

impl HostLoop {
    /// Host loop with default pacing and no dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Host loop that drains `dispatcher` at the start of every tick.
    #[must_use]
    pub fn with_dispatcher(dispatcher: Arc<Dispatcher>) -> Self {
        Self::from_config(&Config::default(), Some(dispatcher))
    }

    #[must_use]
    pub fn from_config(config: &Config, dispatcher: Option<Arc<Dispatcher>>) -> Self {
        Self {
            routines: Mutex::new(Routines::default()),
            dispatcher,
            max_batch: config.dispatcher.max_batch,
            max_idle_ticks: config.host_loop.max_idle_ticks,
            tick_interval: Duration::from_millis(config.host_loop.tick_interval_ms),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn dispatcher(&self) -> Option<&Arc<Dispatcher>> {
        self.dispatcher.as_ref()
    }

    /// Register a routine; it is first stepped on the next tick.
    pub fn start_routine<R: Routine>(&self, routine: R) -> RoutineId {
        let id = RoutineId::next();
        let mut routines = self.routines.lock();
        routines.live.insert(id);
        routines.queued.push(Slot {
            id,
            routine: Box::new(routine),
        });
        drop(routines);
        tracing::trace!(routine = id.as_u64(), "routine started");
        id
    }

    /// Stop a routine before it finishes. Returns `false` if it was not live.
    ///
    /// A routine stopped while it is being stepped completes its current
    /// step and is then dropped without being stepped again.
    pub fn stop_routine(&self, id: RoutineId) -> bool {
        let mut routines = self.routines.lock();
        if !routines.live.remove(&id) {
            return false;
        }
        let removed = routines
            .queued
            .iter()
            .position(|slot| slot.id == id)
            .map(|pos| routines.queued.remove(pos));
        if removed.is_none() {
            routines.stopped.insert(id);
        }
        drop(routines);
        // Drop the routine outside the lock; its destructor may call back in.
        drop(removed);
        tracing::trace!(routine = id.as_u64(), "routine stopped");
        true
    }

    pub fn is_running(&self, id: RoutineId) -> bool {
        self.routines.lock().live.contains(&id)
    }

    pub fn live_count(&self) -> usize {
        self.routines.lock().live.len()
    }

    pub fn is_idle(&self) -> bool {
        self.live_count() == 0
    }

    /// Number of completed ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Advance every live routine by one step. Returns the live count afterwards.
    pub fn tick(&self) -> usize {
        self.drain_dispatcher();

        let batch = std::mem::take(&mut self.routines.lock().queued);
        let mut survivors = Vec::with_capacity(batch.len());

        for mut slot in batch {
            if self.routines.lock().stopped.remove(&slot.id) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| slot.routine.step())) {
                Ok(Step::Yield) => survivors.push(slot),
                Ok(Step::Done) => self.retire(slot.id),
                Err(_) => {
                    tracing::error!(routine = slot.id.as_u64(), "routine panicked; dropping it");
                    self.retire(slot.id);
                }
            }
        }

        let mut routines = self.routines.lock();
        let (mut kept, stopped): (Vec<_>, Vec<_>) = survivors
            .into_iter()
            .partition(|slot| !routines.stopped.remove(&slot.id));
        // Routines started during this tick go after the survivors.
        kept.append(&mut routines.queued);
        routines.queued = kept;
        let live = routines.live.len();
        drop(routines);
        drop(stopped);

        self.ticks.fetch_add(1, Ordering::Relaxed);
        live
    }

    /// Tick until no routine is live.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if routines are still live after `max_ticks`.
    pub fn tick_until_idle(&self, max_ticks: u64) -> Result<u64> {
        let mut ticked = 0;
        while !self.is_idle() {
            if ticked >= max_ticks {
                return Err(Error::invalid_operation(format!(
                    "host loop still has {} live routine(s) after {max_ticks} ticks",
                    self.live_count()
                )));
            }
            self.tick();
            ticked += 1;
        }
        Ok(ticked)
    }

    /// [`tick_until_idle`](Self::tick_until_idle) bounded by the configured `max_idle_ticks`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if routines are still live after the bound.
    pub fn settle(&self) -> Result<u64> {
        self.tick_until_idle(self.max_idle_ticks)
    }

    /// Drive the loop on the calling thread at the configured pace until
    /// `stop` is raised. Returns the number of ticks run.
    pub fn run_until(&self, stop: &CancelSignal) -> u64 {
        let mut ticked = 0;
        while !stop.is_cancelled() {
            self.tick();
            ticked += 1;
            if !self.tick_interval.is_zero() {
                std::thread::sleep(self.tick_interval);
            }
        }
        tracing::debug!(ticks = ticked, "host loop stopped");
        ticked
    }

    fn retire(&self, id: RoutineId) {
        let mut routines = self.routines.lock();
        routines.live.remove(&id);
        routines.stopped.remove(&id);
    }

    fn drain_dispatcher(&self) {
        if let Some(dispatcher) = &self.dispatcher {
            if dispatcher.is_owner_thread() {
                if let Err(e) = dispatcher.drain(self.max_batch) {
                    tracing::warn!("dispatcher drain failed: {e}");
                }
            }
        }
    }
}
