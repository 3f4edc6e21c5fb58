//! Stackful coroutines with a cooperative, single-threaded scheduler.
//!
//! Each coroutine runs on its own page-mapped stack. A [`Scheduler`] owns its
//! coroutines and runs them on the thread that calls [`Scheduler::run`], switching
//! only when the running one sleeps, waits for a descriptor, yields or terminates.
//! Waits are multiplexed onto one epoll instance, so a thread can drive many
//! coroutines that block on I/O.
//!
//! Cancellation is cooperative: [`Coroutine::interrupt`] marks a coroutine, and the
//! mark surfaces as `ErrorKind::Interrupted` from its next blocking call or
//! [`this_coroutine::interruption_point`]. A coroutine that fails takes its siblings
//! down the same way before [`Scheduler::run`] reports the failure.
//!
//! Linux only: the implementation relies on epoll, timerfd, eventfd and the glibc
//! `ucontext` functions.

#![cfg(target_os = "linux")]

pub mod config;
mod context;
pub mod coroutine;
mod local;
mod poller;
mod scheduler;
pub mod this_coroutine;

pub use config::SchedulerConfig;
pub use coroutine::{Coroutine, CoroutineId, CoroutineState};
pub use local::CoroutineLocal;
pub use poller::Direction;
pub use scheduler::Scheduler;
pub use vextr_common::{Error, ErrorKind, InterruptionReason, Result};

#[cfg(test)]
mod tests;
