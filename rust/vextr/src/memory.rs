//! Heap allocation of element arrays.
//!
//! Every owned array of every container is obtained here, so this module is also the
//! place that counts allocations (per thread) and, in unit tests, injects allocation
//! failures.

use std::{alloc::Layout, cell::Cell, ptr::NonNull};

use vextr_common::{Error, Result};

use crate::raw::ItemLayout;

/// Allocation counters for the calling thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    /// Number of element arrays allocated.
    pub allocations: u64,
    /// Number of element arrays released.
    pub frees: u64,
}

impl AllocationStats {
    /// Arrays allocated but not yet released.
    pub fn live(&self) -> u64 {
        self.allocations - self.frees
    }
}

thread_local! {
    static STATS: Cell<AllocationStats> = const {
        Cell::new(AllocationStats {
            allocations: 0,
            frees: 0,
        })
    };
}

/// Returns the allocation counters of the calling thread.
pub fn thread_stats() -> AllocationStats {
    STATS.with(|s| s.get())
}

/// Computes the layout of an array of `count` items, failing with an out-of-memory
/// error when the byte size is not representable.
pub fn array_layout(item: ItemLayout, count: usize) -> Result<Layout> {
    item.size
        .checked_mul(count)
        .and_then(|bytes| Layout::from_size_align(bytes, item.align).ok())
        .ok_or_else(|| Error::out_of_memory(usize::MAX))
}

/// Allocates an uninitialized array with room for `count` items.
pub(crate) fn allocate_array(item: ItemLayout, count: usize) -> Result<NonNull<u8>> {
    debug_assert!(count > 0 && item.size > 0);
    let layout = array_layout(item, count)?;
    #[cfg(test)]
    if fault::should_fail() {
        return Err(Error::out_of_memory(layout.size()));
    }
    let ptr = unsafe { std::alloc::alloc(layout) };
    let ptr = NonNull::new(ptr).ok_or_else(|| Error::out_of_memory(layout.size()))?;
    STATS.with(|s| {
        let mut stats = s.get();
        stats.allocations += 1;
        s.set(stats);
    });
    Ok(ptr)
}

/// Releases an array obtained from [`allocate_array`].
///
/// # Safety
///
/// `ptr` must come from `allocate_array(item, count)` with the same `item` and
/// `count`, and must not be used afterwards.
pub(crate) unsafe fn free_array(ptr: NonNull<u8>, item: ItemLayout, count: usize) {
    let layout = unsafe { Layout::from_size_align_unchecked(item.size * count, item.align) };
    unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    STATS.with(|s| {
        let mut stats = s.get();
        stats.frees += 1;
        s.set(stats);
    });
}

#[cfg(test)]
pub(crate) mod fault {
    use std::cell::Cell;

    thread_local! {
        static FAIL_AFTER: Cell<Option<usize>> = const { Cell::new(None) };
    }

    /// Lets `successes` more allocations through on this thread, then fails every
    /// following one until the guard is dropped.
    pub fn fail_after(successes: usize) -> FaultGuard {
        FAIL_AFTER.with(|f| f.set(Some(successes)));
        FaultGuard(())
    }

    pub(super) fn should_fail() -> bool {
        FAIL_AFTER.with(|f| match f.get() {
            None => false,
            Some(0) => true,
            Some(n) => {
                f.set(Some(n - 1));
                false
            }
        })
    }

    pub struct FaultGuard(());

    impl Drop for FaultGuard {
        fn drop(&mut self) {
            FAIL_AFTER.with(|f| f.set(None));
        }
    }
}
