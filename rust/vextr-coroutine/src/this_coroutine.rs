//! Operations on the calling coroutine.
//!
//! Every blocking function here suspends only the calling coroutine. Called outside
//! a coroutine (on a plain thread, or on a thread whose scheduler is not running) they
//! block the thread instead, so code written for coroutines keeps working elsewhere.
//!
//! Blocking calls are interruption points: a pending interruption is delivered as
//! `ErrorKind::Interrupted` before blocking and again after waking up.

use std::{
    os::fd::RawFd,
    time::{Duration, Instant},
};

use vextr_common::{Error, Result};

use crate::{
    coroutine::{Coroutine, CoroutineId},
    poller::{self, Direction},
    scheduler::{Core, Wake},
};

/// Identifier of the calling coroutine, `None` outside one.
pub fn id() -> Option<CoroutineId> {
    Core::current_coroutine().map(|(_, id)| id)
}

/// Handle to the calling coroutine; an empty handle outside one.
pub fn current() -> Coroutine {
    Core::current_coroutine()
        .and_then(|(core, id)| core.handle(id))
        .unwrap_or_default()
}

/// Spawns a coroutine on the scheduler running on this thread.
pub fn spawn<F>(f: F) -> Result<Coroutine>
where
    F: FnOnce() -> Result<()> + 'static,
{
    match Core::current() {
        Some(core) => core.spawn(Box::new(f)),
        None => Err(Error::invalid_operation(
            "this_coroutine::spawn without a running scheduler",
        )),
    }
}

/// Suspends the calling coroutine for at least `duration`.
pub fn sleep_for(duration: Duration) -> Result<()> {
    let Some((core, id)) = Core::current_coroutine() else {
        std::thread::sleep(duration);
        return Ok(());
    };
    let deadline = Instant::now()
        .checked_add(duration)
        .ok_or_else(|| Error::invalid_arg("duration", "deadline out of range"))?;
    core.block(id, None, Some(deadline)).map(|_| ())
}

/// Suspends the calling coroutine until `fd` is ready for `direction`.
///
/// Errors and hang-ups on the descriptor count as ready; the next I/O call reports
/// them. At most one coroutine may wait for each `(fd, direction)` pair.
pub fn wait_fd_ready(fd: RawFd, direction: Direction) -> Result<()> {
    let Some((core, id)) = Core::current_coroutine() else {
        poller::poll_fd(fd, direction, None)?;
        return Ok(());
    };
    core.block(id, Some((fd, direction)), None).map(|_| ())
}

/// Like [`wait_fd_ready`], but gives up with `ErrorKind::Timeout` once `timeout`
/// elapses.
pub fn wait_fd_ready_timeout(fd: RawFd, direction: Direction, timeout: Duration) -> Result<()> {
    let timed_out = || Error::timeout(format!("waiting for {direction} readiness of fd {fd}"));
    let Some((core, id)) = Core::current_coroutine() else {
        return match poller::poll_fd(fd, direction, Some(timeout))? {
            true => Ok(()),
            false => Err(timed_out()),
        };
    };
    let deadline = Instant::now()
        .checked_add(timeout)
        .ok_or_else(|| Error::invalid_arg("timeout", "deadline out of range"))?;
    match core.block(id, Some((fd, direction)), Some(deadline))? {
        Wake::Timer => Err(timed_out()),
        _ => Ok(()),
    }
}

/// Lets every other ready coroutine run before the caller continues.
pub fn yield_now() -> Result<()> {
    let Some((core, id)) = Core::current_coroutine() else {
        std::thread::yield_now();
        return Ok(());
    };
    core.yield_now(id)
}

/// Delivers a pending interruption of the calling coroutine.
pub fn interruption_point() -> Result<()> {
    match Core::current_coroutine() {
        Some((core, id)) => core.interruption_point(id),
        None => Ok(()),
    }
}
