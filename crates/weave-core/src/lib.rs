//! # Weave Core
//!
//! One handle type for units of work, whatever runs them, plus named locks.
//!
//! - [`TaskHandle`]: cooperative (host-loop), pooled (tokio) or
//!   dedicated-thread bodies behind a single state machine with
//!   pause/resume, cancellation and completion notification
//! - [`LockManager`]: named capacity-1 locks in four namespaces
//!   (sync/async × blocking/skip)
//! - [`Dispatcher`]: marshals actions, including task log records, onto one
//!   privileged thread
//! - [`HostLoop`]: tick-driven owner of cooperative routines
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` - returns `Result` instead
//! - No `expect()` - returns `Result` instead
//! - No `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only
//! - No `todo!()` / `unimplemented!()` - complete implementations only
//!
//! ## Error Handling
//!
//! All fallible operations return `Result<T, Error>`. Use:
//! - `?` operator for propagation
//! - `map`, `and_then` combinators for transformation
//! - `match` / `map_or` / `unwrap_or_else` for defaults

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod cancel;
pub mod config;
mod dispatcher;
mod error;
mod host_loop;
mod latch;
pub mod lock;
mod pause;
pub mod task;

pub use cancel::CancelSignal;
pub use config::Config;
pub use dispatcher::{Action, Dispatcher, DispatcherOwnership};
pub use error::{Error, ErrorKind, Result};
pub use host_loop::{iter_routine, HostLoop, IterRoutine, Routine, RoutineId, Step};
pub use latch::CompletionLatch;
pub use lock::{LockGuard, LockManager, LockNamespace};
pub use pause::PauseSignal;
pub use task::{
    CompletionReason, ExecutionStrategy, PauseTransition, TaskBuilder, TaskHandle, TaskState,
};
