//! Saved execution state of a coroutine or of the scheduler loop, switched with the
//! glibc `ucontext` primitives.
//!
//! A `ucontext_t` holds a pointer into itself (the floating point state area), so it
//! is boxed before `getcontext` fills it and never moves afterwards.

use std::cell::UnsafeCell;

use vextr_common::{Error, Result};
use vextr_page_alloc::StackPages;

pub(crate) struct Context {
    state: Box<UnsafeCell<libc::ucontext_t>>,
    /// `None` for the scheduler's own context, which runs on the thread stack.
    stack: Option<StackPages>,
}

impl Context {
    /// Slot the scheduler loop saves itself into while a coroutine runs.
    pub fn for_thread() -> Context {
        Context {
            state: Box::new(UnsafeCell::new(unsafe { std::mem::zeroed() })),
            stack: None,
        }
    }

    /// Prepares a context that starts executing `entry` on `stack` when first
    /// switched to. `entry` must never return.
    pub fn for_entry(stack: StackPages, entry: extern "C" fn()) -> Result<Context> {
        let context = Context {
            state: Box::new(UnsafeCell::new(unsafe { std::mem::zeroed() })),
            stack: Some(stack),
        };
        let ucp = context.as_ptr();
        if unsafe { libc::getcontext(ucp) } != 0 {
            return Err(Error::last_os_error("getcontext"));
        }
        let Some(stack) = context.stack.as_ref() else {
            unreachable!("entry context without a stack");
        };
        unsafe {
            (*ucp).uc_stack.ss_sp = stack.bottom() as *mut libc::c_void;
            (*ucp).uc_stack.ss_size = stack.usable_size();
            (*ucp).uc_stack.ss_flags = 0;
            (*ucp).uc_link = std::ptr::null_mut();
            libc::makecontext(ucp, entry, 0);
        }
        Ok(context)
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut libc::ucontext_t {
        self.state.get()
    }

    pub fn stack(&self) -> Option<&StackPages> {
        self.stack.as_ref()
    }
}

/// Saves the running state into `from` and resumes `to`. Returns once something
/// switches back to `from`.
///
/// # Safety
///
/// Both pointers must come from live [`Context`]s; `to` must hold state saved by a
/// previous switch or prepared by [`Context::for_entry`], and its stack must still be
/// mapped.
pub(crate) unsafe fn switch(from: *mut libc::ucontext_t, to: *const libc::ucontext_t) -> Result<()> {
    if unsafe { libc::swapcontext(from, to) } != 0 {
        return Err(Error::last_os_error("swapcontext"));
    }
    Ok(())
}

/// Resumes `to` without saving the current state. Used by a finished coroutine, whose
/// stack is released once the scheduler is back in control.
///
/// # Safety
///
/// Same as [`switch`]; additionally, nothing owned by the current stack frame chain
/// may still need dropping.
pub(crate) unsafe fn exit_to(to: *const libc::ucontext_t) -> ! {
    unsafe { libc::setcontext(to) };
    // setcontext only returns on failure, and there is no frame left to report to.
    log::error!("setcontext failed: {}", std::io::Error::last_os_error());
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    thread_local! {
        static RETURN_TO: Cell<*const libc::ucontext_t> = const { Cell::new(std::ptr::null()) };
        static ENTERED: Cell<bool> = const { Cell::new(false) };
    }

    extern "C" fn entry() {
        ENTERED.with(|entered| entered.set(true));
        let to = RETURN_TO.with(Cell::get);
        unsafe { exit_to(to) }
    }

    #[test]
    fn test_switch_runs_entry_and_returns() {
        let main = Context::for_thread();
        let stack = StackPages::allocate(64 * 1024, true).unwrap();
        let fresh = Context::for_entry(stack, entry).unwrap();
        RETURN_TO.with(|to| to.set(main.as_ptr()));
        unsafe { switch(main.as_ptr(), fresh.as_ptr()).unwrap() };
        assert!(ENTERED.with(Cell::get));
    }
}
