//! The coroutine scheduler.
//!
//! A scheduler runs its coroutines on the thread that calls [`Scheduler::run`], one at
//! a time, switching only when the running coroutine blocks, yields or terminates.
//! Coroutines wait in one of three places:
//!
//! * the ready queue, served in FIFO order;
//! * the descriptor map, keyed by `(fd, direction)`;
//! * the deadline index, ordered by wake-up time (ties broken by arrival).
//!
//! A coroutine waiting for a descriptor with a timeout sits in the descriptor map and
//! the deadline index at once; whichever fires first removes both entries.
//!
//! When nothing is ready the thread blocks in `epoll_wait` on the descriptors of the
//! blocked coroutines, a timerfd armed to the earliest deadline and the eventfd used
//! by [`Coroutine::interrupt`].
//!
//! The first coroutine that fails (returns an error other than the interruption it
//! was sent, or panics) turns into a broadcast: every other coroutine is interrupted
//! with [`InterruptionReason::SiblingFailure`] and allowed to unwind, then `run`
//! reports the failure.

use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap, VecDeque},
    os::fd::RawFd,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    sync::Arc,
    time::Instant,
};

use vextr_common::{Error, InterruptionReason, Result};
use vextr_page_alloc::StackPages;

use crate::{
    config::SchedulerConfig,
    context::{self, Context},
    coroutine::{Coroutine, CoroutineId, CoroutineState, Inbox, Shared},
    poller::{Direction, Poller, TIMER_TOKEN, WAKER_TOKEN},
};

thread_local! {
    static CURRENT: RefCell<Option<Rc<Core>>> = const { RefCell::new(None) };
}

type Entry = Box<dyn FnOnce() -> Result<()>>;

/// Why a blocked coroutine was made ready again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// Queued by a yield or never blocked.
    Scheduled,
    Timer,
    Fd,
    Interrupted,
}

/// Where a blocked coroutine is registered.
#[derive(Debug, Clone, Copy)]
struct Blocked {
    fd: Option<(RawFd, Direction)>,
    deadline: Option<(Instant, u64)>,
}

struct Task {
    shared: Arc<Shared>,
    context: Context,
    entry: Option<Entry>,
    blocked: Option<Blocked>,
    wake: Wake,
    /// An interruption was delivered to the coroutine.
    interrupted: bool,
    terminated: bool,
    locals: HashMap<usize, Rc<dyn Any>>,
}

#[derive(Default)]
struct Queues {
    ready: VecDeque<CoroutineId>,
    blocked_by_fd: HashMap<(RawFd, Direction), CoroutineId>,
    blocked_by_timer: BTreeMap<(Instant, u64), CoroutineId>,
    /// epoll flags currently registered per descriptor.
    fd_interest: HashMap<RawFd, u32>,
    next_timer_seq: u64,
    /// Deadline the timerfd is armed to.
    armed: Option<Instant>,
}

enum Failure {
    Error(Error),
    Panic(Box<dyn Any + Send>),
}

pub(crate) struct Core {
    config: SchedulerConfig,
    inbox: Arc<Inbox>,
    poller: Poller,
    tasks: RefCell<HashMap<CoroutineId, Task>>,
    queues: RefCell<Queues>,
    /// Coroutine currently switched in.
    active: Cell<Option<CoroutineId>>,
    /// Where the scheduler loop is parked while a coroutine runs.
    return_context: Context,
    failure: RefCell<Option<Failure>>,
    broadcast: Cell<Option<InterruptionReason>>,
    event_buffer: RefCell<Vec<libc::epoll_event>>,
    events: RefCell<Vec<(u64, u32)>>,
}

/// Runs coroutines cooperatively on the calling thread.
///
/// A scheduler belongs to the thread that created it. Coroutines never migrate;
/// other threads interact with them only through [`Coroutine::interrupt`].
///
/// ```ignore
/// let scheduler = Scheduler::new()?;
/// scheduler.spawn(|| {
///     this_coroutine::sleep_for(Duration::from_millis(10))?;
///     Ok(())
/// })?;
/// scheduler.run()?;
/// ```
pub struct Scheduler {
    core: Rc<Core>,
}

impl Scheduler {
    pub fn new() -> Result<Scheduler> {
        Scheduler::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Result<Scheduler> {
        config
            .validate()
            .map_err(|message| Error::invalid_arg("config", message))?;
        let inbox = Arc::new(Inbox::new()?);
        let poller = Poller::new(inbox.waker_fd())?;
        let max_events = config.max_events;
        Ok(Scheduler {
            core: Rc::new(Core {
                config,
                inbox,
                poller,
                tasks: RefCell::new(HashMap::new()),
                queues: RefCell::new(Queues::default()),
                active: Cell::new(None),
                return_context: Context::for_thread(),
                failure: RefCell::new(None),
                broadcast: Cell::new(None),
                event_buffer: RefCell::new(Vec::with_capacity(max_events)),
                events: RefCell::new(Vec::with_capacity(max_events)),
            }),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.core.config
    }

    /// Creates a coroutine running `f` and queues it.
    ///
    /// Coroutines may be spawned before [`run`](Scheduler::run) or, through
    /// [`this_coroutine::spawn`](crate::this_coroutine::spawn), while it runs.
    pub fn spawn<F>(&self, f: F) -> Result<Coroutine>
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        self.core.spawn(Box::new(f))
    }

    /// Runs coroutines until every one of them has terminated.
    ///
    /// Returns the first failure of a coroutine, after all the others have been
    /// interrupted and have terminated. A panic is resumed on the calling thread
    /// instead. Fails without running anything if a scheduler is already running on
    /// this thread.
    pub fn run(&self) -> Result<()> {
        self.core.run()
    }

    /// Interrupts every coroutine that has not terminated. Returns how many requests
    /// were recorded; coroutines with a pending interruption keep it.
    pub fn interrupt_all(&self, reason: InterruptionReason) -> usize {
        self.core.interrupt_all(reason)
    }

    /// Number of coroutines that have not terminated.
    pub fn len(&self) -> usize {
        self.core.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn blocked_len(&self) -> usize {
        let queues = self.core.queues.borrow();
        queues.blocked_by_fd.len() + queues.blocked_by_timer.len()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.core.config)
            .field("coroutines", &self.len())
            .finish()
    }
}

/// Clears the running scheduler of this thread.
struct CurrentGuard;

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT.with(|current| current.borrow_mut().take());
    }
}

impl Core {
    pub fn current() -> Option<Rc<Core>> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// The running scheduler and the coroutine it has switched in, if this code runs
    /// on a coroutine stack.
    pub fn current_coroutine() -> Option<(Rc<Core>, CoroutineId)> {
        let core = Core::current()?;
        let id = core.active.get()?;
        Some((core, id))
    }

    pub fn spawn(&self, entry: Entry) -> Result<Coroutine> {
        let stack = StackPages::allocate(self.config.stack_size, self.config.guard_page)
            .map_err(|e| Error::os("coroutine stack", e))?;
        let context = Context::for_entry(stack, coroutine_main)?;
        let shared = Arc::new(Shared::new(self.inbox.clone()));
        let id = shared.id();
        if self.failure.borrow().is_some() {
            // Spawned while a failure is being broadcast: it must wind down too.
            shared.request_interruption(InterruptionReason::SiblingFailure);
        }
        if let Some(stack) = context.stack() {
            log::debug!("spawned {id} on a stack of {} bytes", stack.usable_size());
        }
        self.tasks.borrow_mut().insert(
            id,
            Task {
                shared: shared.clone(),
                context,
                entry: Some(entry),
                blocked: None,
                wake: Wake::Scheduled,
                interrupted: false,
                terminated: false,
                locals: HashMap::new(),
            },
        );
        shared.set_state(CoroutineState::Ready);
        self.queues.borrow_mut().ready.push_back(id);
        Ok(Coroutine::from_shared(shared))
    }

    fn run(self: &Rc<Self>) -> Result<()> {
        let installed = CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if current.is_some() {
                return false;
            }
            *current = Some(self.clone());
            true
        });
        if !installed {
            return Err(Error::invalid_operation(
                "Scheduler::run while another scheduler runs on this thread",
            ));
        }
        let guard = CurrentGuard;
        log::debug!(
            "scheduler started with {} coroutines",
            self.tasks.borrow().len()
        );

        loop {
            self.process_interruption_requests();
            if let Some(reason) = self.broadcast.take() {
                let count = self.interrupt_all(reason);
                log::debug!("interrupted {count} coroutines ({reason})");
            }
            let next = self.queues.borrow_mut().ready.pop_front();
            match next {
                Some(id) => self.resume(id),
                None => {
                    if !self.has_blocked() {
                        break;
                    }
                    if let Err(e) = self.wait_for_events() {
                        log::error!("waiting for readiness failed: {e}");
                        self.record_failure(Failure::Error(e));
                        self.interrupt_all(InterruptionReason::SchedulerFailure);
                    }
                }
            }
        }

        log::debug!("scheduler stopped");
        drop(guard);
        let failure = self.failure.borrow_mut().take();
        match failure {
            None => Ok(()),
            Some(Failure::Error(e)) => Err(e),
            Some(Failure::Panic(payload)) => panic::resume_unwind(payload),
        }
    }

    fn has_blocked(&self) -> bool {
        let queues = self.queues.borrow();
        !queues.blocked_by_fd.is_empty() || !queues.blocked_by_timer.is_empty()
    }

    /// Switches to coroutine `id` and returns once it suspends or terminates.
    fn resume(&self, id: CoroutineId) {
        let target = {
            let tasks = self.tasks.borrow();
            match tasks.get(&id) {
                Some(task) if !task.terminated => {
                    task.shared.set_state(CoroutineState::Running);
                    task.context.as_ptr()
                }
                _ => return,
            }
        };
        self.active.set(Some(id));
        log::trace!("switching to {id}");
        let switched = unsafe { context::switch(self.return_context.as_ptr(), target) };
        self.active.set(None);
        log::trace!("back from {id}");

        match switched {
            Ok(()) => {
                let finished = self.tasks.borrow().get(&id).is_some_and(|t| t.terminated);
                if finished {
                    self.retire(id);
                }
            }
            Err(e) => {
                log::error!("failed to switch to {id}: {e}");
                self.record_failure(Failure::Error(e));
                self.retire(id);
            }
        }
    }

    /// Releases the context, stack and coroutine-local values of a coroutine. Runs on
    /// the scheduler stack.
    fn retire(&self, id: CoroutineId) {
        let task = self.tasks.borrow_mut().remove(&id);
        if let Some(task) = task {
            task.shared.set_state(CoroutineState::Terminated);
            drop(task);
        }
    }

    /// Body of every coroutine, called on its own stack by [`coroutine_main`].
    fn execute(&self, id: CoroutineId) {
        let (entry, shared) = {
            let mut tasks = self.tasks.borrow_mut();
            let Some(task) = tasks.get_mut(&id) else {
                return;
            };
            (task.entry.take(), task.shared.clone())
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
            match shared.take_interruption() {
                Some(reason) => {
                    drop(entry);
                    self.mark_interrupted(id);
                    Err(Error::interrupted(reason))
                }
                None => entry.map_or(Ok(()), |entry| entry()),
            }
        }));
        self.finish(id, outcome);
    }

    fn finish(&self, id: CoroutineId, outcome: std::thread::Result<Result<()>>) {
        let interrupted = {
            let mut tasks = self.tasks.borrow_mut();
            let Some(task) = tasks.get_mut(&id) else {
                return;
            };
            task.terminated = true;
            task.shared.set_state(CoroutineState::Terminated);
            task.interrupted
        };
        match outcome {
            Ok(Ok(())) => log::debug!("{id} finished"),
            Ok(Err(e)) if interrupted && e.is_interruption() => {
                log::debug!("{id} finished after interruption: {e}")
            }
            Ok(Err(e)) => {
                log::warn!("{id} terminated with error: {e}");
                self.record_failure(Failure::Error(e));
            }
            Err(payload) => {
                log::warn!("{id} panicked: {}", panic_message(payload.as_ref()));
                self.record_failure(Failure::Panic(payload));
            }
        }
    }

    /// Keeps the first failure and schedules the broadcast; later ones are dropped.
    fn record_failure(&self, failure: Failure) {
        let mut slot = self.failure.borrow_mut();
        if slot.is_none() {
            *slot = Some(failure);
            self.broadcast.set(Some(InterruptionReason::SiblingFailure));
        } else {
            log::debug!("discarding a failure reported after the first one");
        }
    }

    pub fn interrupt_all(&self, reason: InterruptionReason) -> usize {
        let mut ids: Vec<(CoroutineId, Arc<Shared>, bool)> = self
            .tasks
            .borrow()
            .iter()
            .filter(|(_, task)| !task.terminated)
            .map(|(id, task)| (*id, task.shared.clone(), task.blocked.is_some()))
            .collect();
        ids.sort_by_key(|(id, _, _)| *id);
        let mut count = 0;
        for (id, shared, blocked) in ids {
            if shared.request_interruption(reason) {
                count += 1;
            }
            if blocked {
                self.unblock(id, Wake::Interrupted);
            }
        }
        count
    }

    /// Wakes blocked coroutines that other coroutines or threads asked to interrupt.
    fn process_interruption_requests(&self) {
        for id in self.inbox.take() {
            let blocked = self
                .tasks
                .borrow()
                .get(&id)
                .is_some_and(|t| t.blocked.is_some() && t.shared.has_pending_interruption());
            if blocked {
                self.unblock(id, Wake::Interrupted);
            }
        }
    }

    fn wait_for_events(&self) -> Result<()> {
        let mut events = std::mem::take(&mut *self.events.borrow_mut());
        {
            let mut buffer = self.event_buffer.borrow_mut();
            self.poller.wait(&mut buffer, &mut events)?;
        }
        for &(token, flags) in &events {
            match token {
                TIMER_TOKEN => {
                    self.poller.acknowledge_timer();
                    self.queues.borrow_mut().armed = None;
                }
                WAKER_TOKEN => {
                    self.inbox.acknowledge();
                    self.process_interruption_requests();
                }
                fd => self.wake_fd(fd as RawFd, flags),
            }
        }
        *self.events.borrow_mut() = events;
        self.wake_expired_timers();
        self.sync_timer()
    }

    fn wake_fd(&self, fd: RawFd, flags: u32) {
        for direction in [Direction::Read, Direction::Write] {
            if !direction.is_ready(flags) {
                continue;
            }
            let waiter = self
                .queues
                .borrow()
                .blocked_by_fd
                .get(&(fd, direction))
                .copied();
            if let Some(id) = waiter {
                self.unblock(id, Wake::Fd);
            }
        }
        // Drops interest left behind by a waiter that is gone.
        if let Err(e) = self.sync_fd_interest(fd) {
            log::error!("failed to update interest in fd {fd}: {e}");
        }
    }

    fn wake_expired_timers(&self) {
        let now = Instant::now();
        let due: Vec<CoroutineId> = self
            .queues
            .borrow()
            .blocked_by_timer
            .range(..=(now, u64::MAX))
            .map(|(_, id)| *id)
            .collect();
        for id in due {
            self.unblock(id, Wake::Timer);
        }
    }

    /// Moves a blocked coroutine to the back of the ready queue.
    fn unblock(&self, id: CoroutineId, wake: Wake) {
        if !self.detach_block(id) {
            return;
        }
        if let Some(task) = self.tasks.borrow_mut().get_mut(&id) {
            task.wake = wake;
            task.shared.set_state(CoroutineState::Ready);
        }
        self.queues.borrow_mut().ready.push_back(id);
    }

    /// Removes the entries of a blocked coroutine from the descriptor map and the
    /// deadline index, and drops the readiness registrations they needed. Returns
    /// `false` if the coroutine was not blocked.
    fn detach_block(&self, id: CoroutineId) -> bool {
        let blocked = self
            .tasks
            .borrow_mut()
            .get_mut(&id)
            .and_then(|t| t.blocked.take());
        let Some(blocked) = blocked else {
            return false;
        };
        {
            let mut queues = self.queues.borrow_mut();
            if let Some(key) = blocked.fd {
                queues.blocked_by_fd.remove(&key);
            }
            if let Some(key) = blocked.deadline {
                queues.blocked_by_timer.remove(&key);
            }
        }
        if let Some((fd, _)) = blocked.fd {
            if let Err(e) = self.sync_fd_interest(fd) {
                log::error!("failed to update interest in fd {fd}: {e}");
            }
        }
        if blocked.deadline.is_some() {
            if let Err(e) = self.sync_timer() {
                log::error!("failed to rearm the deadline timer: {e}");
            }
        }
        true
    }

    /// Registers exactly the directions that have a waiter on `fd`.
    fn sync_fd_interest(&self, fd: RawFd) -> Result<()> {
        let (old, new) = {
            let queues = self.queues.borrow();
            let new = [Direction::Read, Direction::Write]
                .into_iter()
                .filter(|d| queues.blocked_by_fd.contains_key(&(fd, *d)))
                .fold(0, |flags, d| flags | d.epoll_flags());
            let old = queues.fd_interest.get(&fd).copied().unwrap_or(0);
            (old, new)
        };
        self.poller.update_interest(fd, old, new)?;
        let mut queues = self.queues.borrow_mut();
        if new == 0 {
            queues.fd_interest.remove(&fd);
        } else {
            queues.fd_interest.insert(fd, new);
        }
        Ok(())
    }

    /// Arms the timerfd to the earliest deadline, if that changed.
    fn sync_timer(&self) -> Result<()> {
        let (earliest, armed) = {
            let queues = self.queues.borrow();
            let earliest = queues.blocked_by_timer.keys().next().map(|(d, _)| *d);
            (earliest, queues.armed)
        };
        if earliest == armed {
            return Ok(());
        }
        self.poller.arm_timer(earliest)?;
        self.queues.borrow_mut().armed = earliest;
        Ok(())
    }

    fn mark_interrupted(&self, id: CoroutineId) {
        if let Some(task) = self.tasks.borrow_mut().get_mut(&id) {
            task.interrupted = true;
        }
    }

    pub fn handle(&self, id: CoroutineId) -> Option<Coroutine> {
        self.shared(id).ok().map(Coroutine::from_shared)
    }

    fn shared(&self, id: CoroutineId) -> Result<Arc<Shared>> {
        self.tasks
            .borrow()
            .get(&id)
            .map(|t| t.shared.clone())
            .ok_or_else(|| Error::invalid_operation(format!("unknown coroutine {id}")))
    }

    /// Delivers a pending interruption to the running coroutine `id`.
    pub fn interruption_point(&self, id: CoroutineId) -> Result<()> {
        let shared = self.shared(id)?;
        if let Some(reason) = shared.take_interruption() {
            self.mark_interrupted(id);
            log::debug!("{id} interrupted: {reason}");
            return Err(Error::interrupted(reason));
        }
        Ok(())
    }

    /// Parks the running coroutine `id` and switches to the scheduler loop. Returns
    /// after the scheduler resumes it.
    fn suspend(&self, id: CoroutineId) -> Result<Wake> {
        let from = self
            .tasks
            .borrow()
            .get(&id)
            .map(|t| t.context.as_ptr())
            .ok_or_else(|| Error::invalid_operation(format!("unknown coroutine {id}")))?;
        unsafe { context::switch(from, self.return_context.as_ptr())? };
        let wake = self
            .tasks
            .borrow_mut()
            .get_mut(&id)
            .map(|t| std::mem::replace(&mut t.wake, Wake::Scheduled))
            .unwrap_or(Wake::Scheduled);
        self.interruption_point(id)?;
        Ok(wake)
    }

    /// Blocks the running coroutine `id` until `fd` is ready in the given direction,
    /// `deadline` passes, or it is interrupted. On any error the coroutine is left
    /// registered nowhere.
    pub fn block(
        &self,
        id: CoroutineId,
        fd: Option<(RawFd, Direction)>,
        deadline: Option<Instant>,
    ) -> Result<Wake> {
        self.interruption_point(id)?;
        let blocked = {
            let mut queues = self.queues.borrow_mut();
            if let Some((raw, direction)) = fd {
                if queues.blocked_by_fd.contains_key(&(raw, direction)) {
                    return Err(Error::invalid_operation(format!(
                        "wait for {direction} readiness of fd {raw}: another coroutine is waiting"
                    )));
                }
                queues.blocked_by_fd.insert((raw, direction), id);
            }
            let deadline = deadline.map(|d| {
                let seq = queues.next_timer_seq;
                queues.next_timer_seq += 1;
                queues.blocked_by_timer.insert((d, seq), id);
                (d, seq)
            });
            Blocked { fd, deadline }
        };
        if let Some(task) = self.tasks.borrow_mut().get_mut(&id) {
            task.blocked = Some(blocked);
            task.wake = Wake::Scheduled;
            task.shared.set_state(CoroutineState::Blocked);
        }

        let registered: Result<()> = (|| {
            if let Some((raw, _)) = blocked.fd {
                self.sync_fd_interest(raw)?;
            }
            if blocked.deadline.is_some() {
                self.sync_timer()?;
            }
            Ok(())
        })();
        if let Err(e) = registered {
            self.withdraw(id);
            return Err(e);
        }

        self.suspend(id).inspect_err(|_| self.withdraw(id))
    }

    /// Undoes [`block`](Core::block) for a coroutine that keeps running.
    fn withdraw(&self, id: CoroutineId) {
        if self.detach_block(id) {
            if let Some(task) = self.tasks.borrow().get(&id) {
                task.shared.set_state(CoroutineState::Running);
            }
        }
    }

    /// Moves the running coroutine `id` to the back of the ready queue.
    pub fn yield_now(&self, id: CoroutineId) -> Result<()> {
        self.interruption_point(id)?;
        if let Some(task) = self.tasks.borrow().get(&id) {
            task.shared.set_state(CoroutineState::Ready);
        }
        self.queues.borrow_mut().ready.push_back(id);
        self.suspend(id).map(|_| ()).inspect_err(|_| {
            self.queues.borrow_mut().ready.retain(|queued| *queued != id);
        })
    }

    /// Value of the coroutine-local slot `key` for coroutine `id`, created by `init`
    /// on first access.
    pub fn local(
        &self,
        id: CoroutineId,
        key: usize,
        init: impl FnOnce() -> Rc<dyn Any>,
    ) -> Option<Rc<dyn Any>> {
        let existing = self
            .tasks
            .borrow()
            .get(&id)
            .map(|t| t.locals.get(&key).cloned())?;
        if let Some(value) = existing {
            return Some(value);
        }
        // `init` may itself touch coroutine-local storage.
        let value = init();
        let mut tasks = self.tasks.borrow_mut();
        let task = tasks.get_mut(&id)?;
        Some(task.locals.entry(key).or_insert(value).clone())
    }
}

/// Entry point of every coroutine stack.
extern "C" fn coroutine_main() {
    let Some((core, id)) = Core::current_coroutine() else {
        log::error!("coroutine started without a running scheduler");
        std::process::abort();
    };
    core.execute(id);
    let target = core.return_context.as_ptr();
    // Nothing on this stack is dropped after the final switch.
    drop(core);
    unsafe { context::exit_to(target) }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
