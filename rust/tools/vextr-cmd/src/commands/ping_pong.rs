use std::{
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
    rc::Rc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use vextr_coroutine::{Direction, Error, Scheduler, this_coroutine};

struct Pipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl Pipe {
    fn new() -> Result<Pipe> {
        let mut fds = [0; 2];
        let res = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
        if res < 0 {
            return Err(std::io::Error::last_os_error()).with_context(|| "Failed to create pipe");
        }
        Ok(unsafe {
            Pipe {
                read: OwnedFd::from_raw_fd(fds[0]),
                write: OwnedFd::from_raw_fd(fds[1]),
            }
        })
    }
}

fn send(fd: &OwnedFd, value: u32, timeout: Duration) -> vextr_coroutine::Result<()> {
    this_coroutine::wait_fd_ready_timeout(fd.as_raw_fd(), Direction::Write, timeout)?;
    let bytes = value.to_le_bytes();
    let n = unsafe { libc::write(fd.as_raw_fd(), bytes.as_ptr() as *const libc::c_void, 4) };
    if n != 4 {
        return Err(Error::last_os_error("write"));
    }
    Ok(())
}

fn receive(fd: &OwnedFd, timeout: Duration) -> vextr_coroutine::Result<u32> {
    this_coroutine::wait_fd_ready_timeout(fd.as_raw_fd(), Direction::Read, timeout)?;
    let mut bytes = [0u8; 4];
    let n = unsafe { libc::read(fd.as_raw_fd(), bytes.as_mut_ptr() as *mut libc::c_void, 4) };
    if n != 4 {
        return Err(Error::last_os_error("read"));
    }
    Ok(u32::from_le_bytes(bytes))
}

pub fn run(rounds: u32, timeout_ms: u64) -> Result<()> {
    let scheduler = Scheduler::new().with_context(|| "Failed to create scheduler")?;
    let timeout = Duration::from_millis(timeout_ms);
    let ping = Rc::new(Pipe::new()?);
    let pong = Rc::new(Pipe::new()?);

    let echo = {
        let (ping, pong) = (ping.clone(), pong.clone());
        scheduler.spawn(move || {
            for _ in 0..rounds {
                let value = receive(&ping.read, timeout)?;
                send(&pong.write, value + 1, timeout)?;
            }
            Ok(())
        })?
    };

    let started = Instant::now();
    scheduler.spawn(move || {
        let mut value = 0;
        for round in 0..rounds {
            send(&ping.write, value, timeout)?;
            value = receive(&pong.read, timeout)?;
            log::debug!("round {round}: received {value}");
        }
        println!("{rounds} round trips, final value {value}");
        Ok(())
    })?;

    scheduler.run().with_context(|| "Ping-pong failed")?;
    log::info!("echo coroutine {echo} finished");
    println!(
        "elapsed {:.3} ms",
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}
