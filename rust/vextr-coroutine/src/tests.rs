use std::{
    cell::{Cell, RefCell},
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    time::{Duration, Instant},
};

use static_assertions::{assert_impl_all, assert_not_impl_any};

use crate::{
    Coroutine, CoroutineLocal, CoroutineState, Direction, Error, ErrorKind, InterruptionReason,
    Scheduler, SchedulerConfig, this_coroutine,
};

assert_impl_all!(Coroutine: Send, Sync, Clone, Default);
assert_not_impl_any!(Scheduler: Send, Sync);

struct Pipe {
    read: OwnedFd,
    write: OwnedFd,
}

fn pipe() -> Pipe {
    let mut fds = [0; 2];
    let res = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
    assert_eq!(res, 0, "pipe2: {}", std::io::Error::last_os_error());
    unsafe {
        Pipe {
            read: OwnedFd::from_raw_fd(fds[0]),
            write: OwnedFd::from_raw_fd(fds[1]),
        }
    }
}

fn write_byte(fd: &OwnedFd, byte: u8) {
    let n = unsafe { libc::write(fd.as_raw_fd(), &byte as *const u8 as *const libc::c_void, 1) };
    assert_eq!(n, 1);
}

fn read_byte(fd: &OwnedFd) -> u8 {
    let mut byte = 0u8;
    let n = unsafe { libc::read(fd.as_raw_fd(), &mut byte as *mut u8 as *mut libc::c_void, 1) };
    assert_eq!(n, 1);
    byte
}

fn small_scheduler() -> Scheduler {
    Scheduler::with_config(SchedulerConfig::default().with_stack_size(128 * 1024)).unwrap()
}

#[test]
fn test_coroutines_run_to_completion() {
    let scheduler = small_scheduler();
    let completed = Rc::new(Cell::new(0));
    let c1 = {
        let completed = completed.clone();
        scheduler
            .spawn(move || {
                completed.set(completed.get() + 1);
                Ok(())
            })
            .unwrap()
    };
    let c2 = {
        let completed = completed.clone();
        scheduler
            .spawn(move || {
                completed.set(completed.get() + 1);
                Ok(())
            })
            .unwrap()
    };
    let empty = Coroutine::new();

    assert_ne!(c1.id(), c2.id());
    assert_ne!(c1.to_string(), c2.to_string());
    assert_eq!(empty.to_string(), "CRID:-");
    assert_eq!(c1.state(), Some(CoroutineState::Ready));
    assert_eq!(scheduler.len(), 2);

    scheduler.run().unwrap();

    assert_eq!(completed.get(), 2);
    assert!(c1.is_terminated());
    assert!(c2.is_terminated());
    assert!(scheduler.is_empty());
}

#[test]
fn test_sleepers_wake_in_deadline_order() {
    let scheduler = small_scheduler();
    let woke = Rc::new(RefCell::new(Vec::new()));
    for (i, ms) in [20u64, 30, 10, 50, 40].into_iter().enumerate() {
        let woke = woke.clone();
        scheduler
            .spawn(move || {
                this_coroutine::sleep_for(Duration::from_millis(ms))?;
                woke.borrow_mut().push(i + 1);
                Ok(())
            })
            .unwrap();
    }
    scheduler.run().unwrap();
    assert_eq!(*woke.borrow(), [3, 1, 2, 5, 4]);
    assert_eq!(scheduler.blocked_len(), 0);
    assert!(scheduler.is_empty());
}

#[test]
fn test_interrupt_blocked_workers() {
    let scheduler = small_scheduler();
    let outcomes = Rc::new(RefCell::new(vec![None; 5]));
    let mut workers = Vec::new();
    for i in 0..5 {
        let outcomes = outcomes.clone();
        let worker = scheduler
            .spawn(move || {
                let outcome = match this_coroutine::sleep_for(Duration::from_millis(150)) {
                    Ok(()) => "completed",
                    Err(e) if e.interruption_reason() == Some(InterruptionReason::Execution) => {
                        "interrupted"
                    }
                    Err(e) => return Err(e),
                };
                outcomes.borrow_mut()[i] = Some(outcome);
                Ok(())
            })
            .unwrap();
        workers.push(worker);
    }

    let controller_done = Rc::new(Cell::new(false));
    {
        let workers = workers.clone();
        let controller_done = controller_done.clone();
        scheduler
            .spawn(move || {
                // Workers were queued first, so they are all asleep by now.
                assert_eq!(workers[1].state(), Some(CoroutineState::Blocked));
                workers[1].interrupt();
                workers[2].interrupt();
                controller_done.set(true);
                Ok(())
            })
            .unwrap();
    }

    scheduler.run().unwrap();

    assert!(controller_done.get());
    assert_eq!(
        *outcomes.borrow(),
        [
            Some("completed"),
            Some("interrupted"),
            Some("interrupted"),
            Some("completed"),
            Some("completed"),
        ]
    );
    assert!(workers.iter().all(Coroutine::is_terminated));
}

#[test]
fn test_failure_interrupts_siblings_and_propagates_once() {
    let scheduler = small_scheduler();
    let reasons = Rc::new(RefCell::new(Vec::new()));
    for _ in 0..3 {
        let reasons = reasons.clone();
        scheduler
            .spawn(move || {
                let res = this_coroutine::sleep_for(Duration::from_secs(10));
                if let Err(e) = &res {
                    reasons.borrow_mut().push(e.interruption_reason());
                }
                res
            })
            .unwrap();
    }
    scheduler
        .spawn(|| {
            this_coroutine::yield_now()?;
            Err(Error::invalid_operation("boom"))
        })
        .unwrap();

    let started = Instant::now();
    let err = scheduler.run().unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(err.kind(), ErrorKind::InvalidOperation { name } if name == "boom"));
    assert_eq!(
        *reasons.borrow(),
        [Some(InterruptionReason::SiblingFailure); 3]
    );
    assert_eq!(scheduler.blocked_len(), 0);

    // The failure was consumed by the first run.
    scheduler.spawn(|| Ok(())).unwrap();
    scheduler.run().unwrap();
}

#[test]
fn test_panic_is_resumed_after_siblings_unwind() {
    let scheduler = small_scheduler();
    let unwound = Rc::new(Cell::new(0));
    for _ in 0..2 {
        let unwound = unwound.clone();
        scheduler
            .spawn(move || {
                struct OnDrop(Rc<Cell<u32>>);
                impl Drop for OnDrop {
                    fn drop(&mut self) {
                        self.0.set(self.0.get() + 1);
                    }
                }
                let _guard = OnDrop(unwound);
                this_coroutine::sleep_for(Duration::from_secs(10))
            })
            .unwrap();
    }
    scheduler
        .spawn(|| -> crate::Result<()> { panic!("coroutine panic") })
        .unwrap();

    let result = panic::catch_unwind(AssertUnwindSafe(|| scheduler.run()));
    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"coroutine panic"));
    assert_eq!(unwound.get(), 2);
    assert!(scheduler.is_empty());
}

#[test]
fn test_pipe_ping_pong() {
    let scheduler = small_scheduler();
    let ping = Rc::new(pipe());
    let pong = Rc::new(pipe());
    let received = Rc::new(RefCell::new(Vec::new()));

    {
        let (ping, pong) = (ping.clone(), pong.clone());
        scheduler
            .spawn(move || {
                for round in 0..5u8 {
                    this_coroutine::wait_fd_ready(ping.read.as_raw_fd(), Direction::Read)?;
                    let byte = read_byte(&ping.read);
                    assert_eq!(byte, round);
                    this_coroutine::wait_fd_ready(pong.write.as_raw_fd(), Direction::Write)?;
                    write_byte(&pong.write, byte + 100);
                }
                Ok(())
            })
            .unwrap();
    }
    {
        let (ping, pong, received) = (ping.clone(), pong.clone(), received.clone());
        scheduler
            .spawn(move || {
                for round in 0..5u8 {
                    this_coroutine::sleep_for(Duration::from_millis(2))?;
                    write_byte(&ping.write, round);
                    this_coroutine::wait_fd_ready(pong.read.as_raw_fd(), Direction::Read)?;
                    received.borrow_mut().push(read_byte(&pong.read));
                }
                Ok(())
            })
            .unwrap();
    }

    scheduler.run().unwrap();
    assert_eq!(*received.borrow(), [100, 101, 102, 103, 104]);
    assert_eq!(scheduler.blocked_len(), 0);
}

#[test]
fn test_fd_wait_times_out() {
    let scheduler = small_scheduler();
    let p = Rc::new(pipe());
    let timed_out = Rc::new(Cell::new(false));
    {
        let (p, timed_out) = (p.clone(), timed_out.clone());
        scheduler
            .spawn(move || {
                let res = this_coroutine::wait_fd_ready_timeout(
                    p.read.as_raw_fd(),
                    Direction::Read,
                    Duration::from_millis(20),
                );
                let err = res.unwrap_err();
                timed_out.set(matches!(err.kind(), ErrorKind::Timeout { .. }));

                // The slot is free again once the wait is over.
                write_byte(&p.write, 7);
                this_coroutine::wait_fd_ready_timeout(
                    p.read.as_raw_fd(),
                    Direction::Read,
                    Duration::from_secs(5),
                )?;
                assert_eq!(read_byte(&p.read), 7);
                Ok(())
            })
            .unwrap();
    }
    scheduler.run().unwrap();
    assert!(timed_out.get());
    assert_eq!(scheduler.blocked_len(), 0);
}

#[test]
fn test_one_waiter_per_fd_direction() {
    let scheduler = small_scheduler();
    let p = Rc::new(pipe());
    let second_failed = Rc::new(Cell::new(false));
    {
        let p = p.clone();
        scheduler
            .spawn(move || {
                this_coroutine::wait_fd_ready(p.read.as_raw_fd(), Direction::Read)?;
                assert_eq!(read_byte(&p.read), 1);
                Ok(())
            })
            .unwrap();
    }
    {
        let (p, second_failed) = (p.clone(), second_failed.clone());
        scheduler
            .spawn(move || {
                let err = this_coroutine::wait_fd_ready(p.read.as_raw_fd(), Direction::Read)
                    .unwrap_err();
                second_failed.set(matches!(err.kind(), ErrorKind::InvalidOperation { .. }));
                // The write side is an independent slot.
                this_coroutine::wait_fd_ready(p.write.as_raw_fd(), Direction::Write)?;
                write_byte(&p.write, 1);
                Ok(())
            })
            .unwrap();
    }
    scheduler.run().unwrap();
    assert!(second_failed.get());
}

#[test]
fn test_interrupt_from_another_thread() {
    let scheduler = small_scheduler();
    let reason = Rc::new(Cell::new(None));
    let sleeper = {
        let reason = reason.clone();
        scheduler
            .spawn(move || {
                let res = this_coroutine::sleep_for(Duration::from_secs(10));
                if let Err(e) = &res {
                    reason.set(e.interruption_reason());
                }
                res
            })
            .unwrap()
    };
    let handle = sleeper.clone();
    let thread = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        handle.interrupt();
    });

    let started = Instant::now();
    scheduler.run().unwrap();
    thread.join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(reason.get(), Some(InterruptionReason::Execution));
    assert!(sleeper.is_terminated());
}

#[test]
fn test_yield_is_fifo() {
    let scheduler = small_scheduler();
    let log = Rc::new(RefCell::new(Vec::new()));
    for name in ["a", "b"] {
        let log = log.clone();
        scheduler
            .spawn(move || {
                for i in 1..=2 {
                    log.borrow_mut().push(format!("{name}{i}"));
                    this_coroutine::yield_now()?;
                }
                Ok(())
            })
            .unwrap();
    }
    scheduler.run().unwrap();
    assert_eq!(*log.borrow(), ["a1", "b1", "a2", "b2"]);
}

#[test]
fn test_spawn_from_coroutine() {
    let scheduler = small_scheduler();
    let order = Rc::new(RefCell::new(Vec::new()));
    {
        let order = order.clone();
        scheduler
            .spawn(move || {
                let parent = this_coroutine::id();
                let inner_order = order.clone();
                let child = this_coroutine::spawn(move || {
                    assert_ne!(this_coroutine::id(), parent);
                    inner_order.borrow_mut().push("child");
                    Ok(())
                })?;
                assert_eq!(child.state(), Some(CoroutineState::Ready));
                assert_eq!(this_coroutine::current().id(), parent);
                order.borrow_mut().push("parent");
                Ok(())
            })
            .unwrap();
    }
    scheduler.run().unwrap();
    assert_eq!(*order.borrow(), ["parent", "child"]);
}

#[test]
fn test_nested_run_is_rejected() {
    let scheduler = small_scheduler();
    let rejected = Rc::new(Cell::new(false));
    {
        let rejected = rejected.clone();
        scheduler
            .spawn(move || {
                let inner = small_scheduler();
                inner.spawn(|| Ok(()))?;
                let err = inner.run().unwrap_err();
                rejected.set(matches!(err.kind(), ErrorKind::InvalidOperation { .. }));
                Ok(())
            })
            .unwrap();
    }
    scheduler.run().unwrap();
    assert!(rejected.get());
}

#[test]
fn test_thread_fallbacks() {
    assert_eq!(this_coroutine::id(), None);
    assert_eq!(this_coroutine::current().id(), None);
    this_coroutine::interruption_point().unwrap();
    this_coroutine::yield_now().unwrap();

    let started = Instant::now();
    this_coroutine::sleep_for(Duration::from_millis(5)).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(5));

    let p = pipe();
    let err = this_coroutine::wait_fd_ready_timeout(
        p.read.as_raw_fd(),
        Direction::Read,
        Duration::from_millis(10),
    )
    .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Timeout { .. }));
    write_byte(&p.write, 3);
    this_coroutine::wait_fd_ready(p.read.as_raw_fd(), Direction::Read).unwrap();

    assert!(this_coroutine::spawn(|| Ok(())).is_err());
}

static COUNTER: CoroutineLocal<Cell<u32>> = CoroutineLocal::new(|| Cell::new(0));

#[test]
fn test_coroutine_locals_are_separate() {
    let scheduler = small_scheduler();
    let totals = Rc::new(RefCell::new(Vec::new()));
    for step in [1, 10] {
        let totals = totals.clone();
        scheduler
            .spawn(move || {
                for _ in 0..3 {
                    COUNTER.with(|c| c.set(c.get() + step));
                    this_coroutine::yield_now()?;
                }
                totals.borrow_mut().push(COUNTER.with(Cell::get));
                Ok(())
            })
            .unwrap();
    }
    COUNTER.with(|c| c.set(99));
    scheduler.run().unwrap();
    assert_eq!(*totals.borrow(), [3, 30]);
    assert_eq!(COUNTER.get().get(), 99);
}

#[test]
fn test_interrupt_all_before_run() {
    let scheduler = small_scheduler();
    let ran = Rc::new(Cell::new(false));
    let coro = {
        let ran = ran.clone();
        scheduler
            .spawn(move || {
                ran.set(true);
                Ok(())
            })
            .unwrap()
    };
    assert_eq!(scheduler.interrupt_all(InterruptionReason::ProcessExit), 1);
    assert_eq!(scheduler.interrupt_all(InterruptionReason::Execution), 0);
    scheduler.run().unwrap();
    assert!(!ran.get());
    assert!(coro.is_terminated());
}

#[test]
fn test_interruption_point_in_busy_loop() {
    let scheduler = small_scheduler();
    let iterations = Rc::new(Cell::new(0u32));
    {
        let iterations = iterations.clone();
        scheduler
            .spawn(move || {
                let me = this_coroutine::current();
                loop {
                    iterations.set(iterations.get() + 1);
                    if iterations.get() == 3 {
                        me.interrupt();
                    }
                    this_coroutine::interruption_point()?;
                }
            })
            .unwrap();
    }
    scheduler.run().unwrap();
    assert_eq!(iterations.get(), 3);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = SchedulerConfig::default().with_max_events(0);
    let err = Scheduler::with_config(config).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
}
