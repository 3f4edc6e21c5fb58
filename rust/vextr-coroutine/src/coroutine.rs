//! Coroutine handles.
//!
//! A [`Coroutine`] does not own the coroutine it refers to: the context and stack
//! belong to the scheduler that runs it. Handles are `Send + Sync` and may be used
//! from any thread to observe the coroutine's state or to interrupt it.

use std::{
    num::NonZeroU64,
    os::fd::{AsRawFd, OwnedFd},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

use vextr_common::InterruptionReason;

use crate::poller;

/// Process-unique identifier of a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoroutineId(NonZeroU64);

impl CoroutineId {
    pub(crate) fn next() -> CoroutineId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        CoroutineId(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN))
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CRID:{}", self.0)
    }
}

/// Lifecycle of a coroutine. Transitions are made only by its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CoroutineState {
    /// Stack allocated and entry configured, not yet queued.
    Constructed = 0,
    /// Queued, waiting for a scheduling slot.
    Ready = 1,
    /// Executing on its scheduler's thread.
    Running = 2,
    /// Waiting for a deadline or a descriptor.
    Blocked = 3,
    /// Entry function returned, failed or panicked.
    Terminated = 4,
}

impl CoroutineState {
    fn from_raw(raw: u8) -> CoroutineState {
        match raw {
            0 => CoroutineState::Constructed,
            1 => CoroutineState::Ready,
            2 => CoroutineState::Running,
            3 => CoroutineState::Blocked,
            _ => CoroutineState::Terminated,
        }
    }
}

/// Interruption requests for one scheduler, posted by handles on any thread.
pub(crate) struct Inbox {
    requests: Mutex<Vec<CoroutineId>>,
    waker: OwnedFd,
}

impl Inbox {
    pub fn new() -> vextr_common::Result<Inbox> {
        Ok(Inbox {
            requests: Mutex::new(Vec::new()),
            waker: poller::new_eventfd()?,
        })
    }

    pub fn waker_fd(&self) -> std::os::fd::RawFd {
        self.waker.as_raw_fd()
    }

    fn post(&self, id: CoroutineId) {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(id);
        if let Err(e) = poller::signal_eventfd(self.waker.as_raw_fd()) {
            log::error!("failed to wake scheduler for {id}: {e}");
        }
    }

    /// Clears the wake-up signal. Requests posted afterwards signal again.
    pub fn acknowledge(&self) {
        poller::drain_counter(self.waker.as_raw_fd());
    }

    pub fn take(&self) -> Vec<CoroutineId> {
        std::mem::take(&mut *self.requests.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// State shared between a coroutine's scheduler and its handles.
pub(crate) struct Shared {
    id: CoroutineId,
    /// Raw [`InterruptionReason`] waiting to be delivered, `0` if none.
    pending: AtomicU8,
    state: AtomicU8,
    inbox: Arc<Inbox>,
}

impl Shared {
    pub fn new(inbox: Arc<Inbox>) -> Shared {
        Shared {
            id: CoroutineId::next(),
            pending: AtomicU8::new(0),
            state: AtomicU8::new(CoroutineState::Constructed as u8),
            inbox,
        }
    }

    pub fn id(&self) -> CoroutineId {
        self.id
    }

    pub fn state(&self) -> CoroutineState {
        CoroutineState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: CoroutineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Records `reason` unless another interruption is already pending. Returns `true`
    /// if this request won.
    pub fn request_interruption(&self, reason: InterruptionReason) -> bool {
        self.pending
            .compare_exchange(0, reason.to_raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Consumes the pending interruption, if any.
    pub fn take_interruption(&self) -> Option<InterruptionReason> {
        InterruptionReason::from_raw(self.pending.swap(0, Ordering::AcqRel))
    }

    pub fn has_pending_interruption(&self) -> bool {
        self.pending.load(Ordering::Acquire) != 0
    }
}

/// Handle to a coroutine.
///
/// The default handle refers to no coroutine; it displays as `CRID:-`.
#[derive(Clone, Default)]
pub struct Coroutine {
    shared: Option<Arc<Shared>>,
}

impl Coroutine {
    pub fn new() -> Coroutine {
        Coroutine::default()
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Coroutine {
        Coroutine {
            shared: Some(shared),
        }
    }

    /// Identifier of the coroutine, `None` for an empty handle.
    pub fn id(&self) -> Option<CoroutineId> {
        self.shared.as_ref().map(|s| s.id())
    }

    /// Current lifecycle state, `None` for an empty handle.
    pub fn state(&self) -> Option<CoroutineState> {
        self.shared.as_ref().map(|s| s.state())
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == Some(CoroutineState::Terminated)
    }

    /// Requests interruption of the coroutine.
    ///
    /// The request is observed at the coroutine's next interruption point, where the
    /// blocking call in progress (or [`interruption_point`]) returns
    /// `ErrorKind::Interrupted`. A blocked coroutine is woken for it. Only the first
    /// request is kept while one is pending; requests to a terminated coroutine are
    /// ignored.
    ///
    /// [`interruption_point`]: crate::this_coroutine::interruption_point
    pub fn interrupt(&self) {
        let Some(shared) = self.shared.as_ref() else {
            return;
        };
        if shared.state() == CoroutineState::Terminated {
            return;
        }
        if shared.request_interruption(InterruptionReason::Execution) {
            log::debug!("interruption requested for {}", shared.id());
            shared.inbox.post(shared.id());
        }
    }
}

impl PartialEq for Coroutine {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Coroutine {}

impl std::fmt::Display for Coroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.id() {
            Some(id) => std::fmt::Display::fmt(&id, f),
            None => f.write_str("CRID:-"),
        }
    }
}

impl std::fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.id().map(CoroutineId::get))
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_displayed() {
        let inbox = Arc::new(Inbox::new().unwrap());
        let a = Coroutine::from_shared(Arc::new(Shared::new(inbox.clone())));
        let b = Coroutine::from_shared(Arc::new(Shared::new(inbox)));
        let empty = Coroutine::new();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.to_string(), b.to_string());
        assert!(a.to_string().starts_with("CRID:"));
        assert_eq!(empty.to_string(), "CRID:-");
        assert_eq!(empty.id(), None);
        assert_eq!(a.state(), Some(CoroutineState::Constructed));
    }

    #[test]
    fn test_first_interruption_wins() {
        let inbox = Arc::new(Inbox::new().unwrap());
        let shared = Shared::new(inbox);
        assert!(shared.request_interruption(InterruptionReason::SiblingFailure));
        assert!(!shared.request_interruption(InterruptionReason::Execution));
        assert_eq!(
            shared.take_interruption(),
            Some(InterruptionReason::SiblingFailure)
        );
        assert_eq!(shared.take_interruption(), None);
    }

    #[test]
    fn test_interrupt_posts_to_inbox_once() {
        let inbox = Arc::new(Inbox::new().unwrap());
        let coro = Coroutine::from_shared(Arc::new(Shared::new(inbox.clone())));
        coro.interrupt();
        coro.interrupt();
        assert_eq!(inbox.take(), vec![coro.id().unwrap()]);
        assert!(inbox.take().is_empty());
    }
}
