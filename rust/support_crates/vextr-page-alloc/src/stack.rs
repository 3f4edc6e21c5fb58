//! Fixed-size call stacks for stackful coroutines.
//!
//! A stack is one page-aligned mapping. When a guard page is requested, the lowest
//! page of the mapping is made inaccessible so that a stack overflow (stacks grow
//! downwards on every supported target) faults immediately instead of overwriting
//! whatever memory happens to precede the stack.

use crate::mmap;

/// An owned, page-aligned stack region.
pub struct StackPages {
    /// Start of the whole mapping, guard page included.
    base: *mut u8,
    /// Size of the whole mapping in bytes.
    mapped: usize,
    /// Size of the inaccessible region at `base` (zero without a guard page).
    guard: usize,
}

impl StackPages {
    /// Allocates a stack with at least `usable_size` accessible bytes.
    ///
    /// With `guard_page` set, one additional page is mapped below the usable region
    /// and protected.
    pub fn allocate(usable_size: usize, guard_page: bool) -> std::io::Result<StackPages> {
        let usable = mmap::round_up_to_page(usable_size.max(1))?;
        let guard = if guard_page && mmap::supports_guard_pages() {
            mmap::get_page_size()
        } else {
            0
        };
        let total = usable.checked_add(guard).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "stack size overflow")
        })?;
        let (ptr, mapped) = mmap::allocate(total)?;
        let stack = StackPages {
            base: ptr as *mut u8,
            mapped,
            guard,
        };
        if guard != 0 {
            // On failure `stack` is dropped here and the mapping is released.
            unsafe { mmap::protect_none(ptr, guard)? };
        }
        log::trace!(
            "allocated stack at {:p}: {} usable bytes, {} guard bytes",
            stack.base,
            stack.usable_size(),
            guard
        );
        Ok(stack)
    }

    /// Lowest usable address (just above the guard page).
    pub fn bottom(&self) -> *mut u8 {
        unsafe { self.base.add(self.guard) }
    }

    /// One past the highest usable address; the initial stack pointer.
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.add(self.mapped) }
    }

    pub fn usable_size(&self) -> usize {
        self.mapped - self.guard
    }

    pub fn guard_size(&self) -> usize {
        self.guard
    }
}

impl Drop for StackPages {
    fn drop(&mut self) {
        if let Err(e) = unsafe { mmap::free(self.base as *mut std::ffi::c_void, self.mapped) } {
            log::error!("failed to release stack at {:p}: {e}", self.base);
        }
    }
}

impl std::fmt::Debug for StackPages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackPages")
            .field("bottom", &self.bottom())
            .field("usable_size", &self.usable_size())
            .field("guard_size", &self.guard)
            .finish()
    }
}
