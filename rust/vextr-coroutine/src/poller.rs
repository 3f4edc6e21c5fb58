//! The readiness facility: one epoll instance watching coroutine descriptors, a
//! timerfd armed to the earliest sleep deadline, and the eventfd behind cross-thread
//! interruption.

use std::{
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    time::Instant,
};

use vextr_common::{Error, Result};

/// Event token of the deadline timer.
pub(crate) const TIMER_TOKEN: u64 = u64::MAX;

/// Event token of the interruption eventfd.
pub(crate) const WAKER_TOKEN: u64 = u64::MAX - 1;

/// Direction of a descriptor wait. Reads and writes on the same descriptor are
/// independent wait slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub(crate) fn epoll_flags(self) -> u32 {
        match self {
            Direction::Read => libc::EPOLLIN as u32,
            Direction::Write => libc::EPOLLOUT as u32,
        }
    }

    /// Returns `true` if the reported `events` let a waiter in this direction proceed.
    /// Errors and hang-ups wake both directions so the waiter observes them.
    pub(crate) fn is_ready(self, events: u32) -> bool {
        let failure = (libc::EPOLLERR | libc::EPOLLHUP) as u32;
        let wanted = match self {
            Direction::Read => (libc::EPOLLIN | libc::EPOLLRDHUP) as u32,
            Direction::Write => libc::EPOLLOUT as u32,
        };
        events & (wanted | failure) != 0
    }

    pub(crate) fn poll_flags(self) -> libc::c_short {
        match self {
            Direction::Read => libc::POLLIN,
            Direction::Write => libc::POLLOUT,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

pub(crate) struct Poller {
    epoll: OwnedFd,
    timer: OwnedFd,
}

impl Poller {
    /// Creates the epoll instance and its timer, and registers `waker` (an eventfd)
    /// under [`WAKER_TOKEN`].
    pub fn new(waker: RawFd) -> Result<Poller> {
        let epoll = cvt_fd(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) }, "epoll_create1")?;
        let timer = cvt_fd(
            unsafe {
                libc::timerfd_create(
                    libc::CLOCK_MONOTONIC,
                    libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
                )
            },
            "timerfd_create",
        )?;
        let poller = Poller { epoll, timer };
        poller.control(
            libc::EPOLL_CTL_ADD,
            poller.timer.as_raw_fd(),
            libc::EPOLLIN as u32,
            TIMER_TOKEN,
        )?;
        poller.control(libc::EPOLL_CTL_ADD, waker, libc::EPOLLIN as u32, WAKER_TOKEN)?;
        Ok(poller)
    }

    /// Brings the interest set for `fd` from `old` to `new` epoll flags.
    pub fn update_interest(&self, fd: RawFd, old: u32, new: u32) -> Result<()> {
        match (old, new) {
            (o, n) if o == n => Ok(()),
            (0, n) => self.control(libc::EPOLL_CTL_ADD, fd, n, fd as u64),
            (_, 0) => {
                // A descriptor closed while registered has already left the set.
                match self.control(libc::EPOLL_CTL_DEL, fd, 0, 0) {
                    Err(e) if is_stale_registration(&e) => Ok(()),
                    r => r,
                }
            }
            (_, n) => self.control(libc::EPOLL_CTL_MOD, fd, n, fd as u64),
        }
    }

    /// Arms the timer to fire at `deadline`, or disarms it.
    pub fn arm_timer(&self, deadline: Option<Instant>) -> Result<()> {
        let mut spec: libc::itimerspec = unsafe { std::mem::zeroed() };
        if let Some(deadline) = deadline {
            let delay = deadline.saturating_duration_since(Instant::now());
            spec.it_value.tv_sec = delay.as_secs() as libc::time_t;
            spec.it_value.tv_nsec = delay.subsec_nanos() as libc::c_long;
            // An all-zero value disarms the timer; an expired deadline fires at once.
            if spec.it_value.tv_sec == 0 && spec.it_value.tv_nsec == 0 {
                spec.it_value.tv_nsec = 1;
            }
        }
        let res = unsafe {
            libc::timerfd_settime(self.timer.as_raw_fd(), 0, &spec, std::ptr::null_mut())
        };
        if res < 0 {
            return Err(Error::last_os_error("timerfd_settime"));
        }
        Ok(())
    }

    /// Consumes the timer's expiration count.
    pub fn acknowledge_timer(&self) {
        drain_counter(self.timer.as_raw_fd());
    }

    /// Blocks until at least one registered source is ready and stores the reported
    /// `(token, events)` pairs in `events`. Signal interruptions are retried.
    pub fn wait(
        &self,
        buffer: &mut Vec<libc::epoll_event>,
        events: &mut Vec<(u64, u32)>,
    ) -> Result<()> {
        events.clear();
        let capacity = buffer.capacity().max(1);
        buffer.clear();
        buffer.resize(capacity, libc::epoll_event { events: 0, u64: 0 });
        let count = loop {
            let n = unsafe {
                libc::epoll_wait(
                    self.epoll.as_raw_fd(),
                    buffer.as_mut_ptr(),
                    capacity as libc::c_int,
                    -1,
                )
            };
            if n >= 0 {
                break n as usize;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(Error::os("epoll_wait", err));
            }
        };
        events.extend(buffer[..count].iter().map(|e| {
            let token = e.u64;
            let flags = e.events;
            (token, flags)
        }));
        Ok(())
    }

    fn control(&self, op: libc::c_int, fd: RawFd, flags: u32, token: u64) -> Result<()> {
        let mut event = libc::epoll_event {
            events: flags,
            u64: token,
        };
        let res = unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) };
        if res < 0 {
            return Err(Error::last_os_error(format!("epoll_ctl on fd {fd}")));
        }
        Ok(())
    }
}

/// Creates a non-blocking eventfd.
pub(crate) fn new_eventfd() -> Result<OwnedFd> {
    cvt_fd(
        unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) },
        "eventfd",
    )
}

/// Adds one to an eventfd counter.
pub(crate) fn signal_eventfd(fd: RawFd) -> std::io::Result<()> {
    let one: u64 = 1;
    let res = unsafe { libc::write(fd, &one as *const u64 as *const libc::c_void, 8) };
    if res < 0 {
        let err = std::io::Error::last_os_error();
        // A saturated counter still wakes the reader.
        if err.kind() != std::io::ErrorKind::WouldBlock {
            return Err(err);
        }
    }
    Ok(())
}

/// Resets an eventfd or timerfd counter.
pub(crate) fn drain_counter(fd: RawFd) {
    let mut value: u64 = 0;
    unsafe { libc::read(fd, &mut value as *mut u64 as *mut libc::c_void, 8) };
}

fn cvt_fd(fd: libc::c_int, context: &str) -> Result<OwnedFd> {
    if fd < 0 {
        return Err(Error::last_os_error(context));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn is_stale_registration(e: &Error) -> bool {
    match e.kind() {
        vextr_common::ErrorKind::Os { source, .. } => matches!(
            source.raw_os_error(),
            Some(libc::EBADF) | Some(libc::ENOENT)
        ),
        _ => false,
    }
}

/// Blocks the calling thread on a single descriptor. Used when no coroutine is
/// running. Returns `false` if `timeout` elapsed first.
pub(crate) fn poll_fd(
    fd: RawFd,
    direction: Direction,
    timeout: Option<std::time::Duration>,
) -> Result<bool> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        let timeout_ms = match deadline {
            None => -1,
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                // Round up so a sub-millisecond remainder does not turn into a busy loop.
                let ms = left.as_nanos().div_ceil(1_000_000);
                ms.min(libc::c_int::MAX as u128) as libc::c_int
            }
        };
        let mut pfd = libc::pollfd {
            fd,
            events: direction.poll_flags(),
            revents: 0,
        };
        let n = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if n > 0 {
            if pfd.revents & libc::POLLNVAL != 0 {
                return Err(Error::os(
                    format!("poll on fd {fd}"),
                    std::io::Error::from_raw_os_error(libc::EBADF),
                ));
            }
            return Ok(true);
        }
        if n == 0 {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
            continue;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(Error::os(format!("poll on fd {fd}"), err));
        }
    }
}
