use std::{
    cell::RefCell,
    rc::Rc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use vextr_coroutine::{Scheduler, this_coroutine};

pub fn run(millis: Vec<u64>) -> Result<()> {
    let scheduler = Scheduler::new().with_context(|| "Failed to create scheduler")?;
    let woke = Rc::new(RefCell::new(Vec::new()));
    let started = Instant::now();

    for ms in millis {
        let woke = woke.clone();
        scheduler.spawn(move || {
            this_coroutine::sleep_for(Duration::from_millis(ms))?;
            let id = this_coroutine::current();
            log::info!("{id} woke after sleeping {ms} ms");
            woke.borrow_mut().push((id.to_string(), ms, started.elapsed()));
            Ok(())
        })?;
    }

    scheduler.run().with_context(|| "Sleepers failed")?;

    for (id, ms, elapsed) in woke.borrow().iter() {
        println!(
            "{id:<10} slept {ms:>6} ms, woke at {:>9.3} ms",
            elapsed.as_secs_f64() * 1000.0
        );
    }
    Ok(())
}
