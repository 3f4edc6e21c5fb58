use std::ptr::NonNull;

use vextr_common::{Error, Result};

use crate::memory;

use super::{
    base::{EmbeddedArray, ItemLayout, RawVextr, Storage},
    descriptor::{Descriptor, DescriptorFlags},
    policy,
};

/// How a transaction sizes a freshly allocated array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sizing {
    /// Grow geometrically (amortized O(1) appends).
    Grow,
    /// Exactly the requested capacity.
    Exact,
    /// The smallest array that fits, even if the current one would do.
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkArray {
    /// Keep the live array.
    Current,
    /// No array.
    Empty,
    /// The container's embedded array.
    Embedded,
    /// A heap array allocated by the transaction.
    Allocated(NonNull<u8>),
}

/// A pending change of a buffer's item count and, possibly, of its array.
///
/// The transaction picks the array the buffer will use once the change is done
/// (the "work" array). Callers fill the work array, reading the old items through
/// [`Transaction::old_ptr`], and then [`commit`](Transaction::commit). Dropping the
/// transaction without committing leaves the buffer untouched and releases any array
/// the transaction allocated.
pub(crate) struct Transaction<'a> {
    target: &'a mut RawVextr,
    emb: EmbeddedArray,
    item: ItemLayout,
    work: WorkArray,
    work_capacity: usize,
    new_len: usize,
    committed: bool,
}

impl<'a> Transaction<'a> {
    /// Prepares a change that leaves `new_len` items in an array of at least
    /// `capacity` slots.
    pub(crate) fn new(
        target: &'a mut RawVextr,
        emb: EmbeddedArray,
        item: ItemLayout,
        capacity: usize,
        new_len: usize,
        sizing: Sizing,
    ) -> Result<Transaction<'a>> {
        debug_assert!(new_len <= capacity);
        let (work, work_capacity) = Self::plan(target, emb, item, capacity, sizing)?;
        Ok(Transaction {
            target,
            emb,
            item,
            work,
            work_capacity,
            new_len,
            committed: false,
        })
    }

    fn plan(
        target: &RawVextr,
        emb: EmbeddedArray,
        item: ItemLayout,
        capacity: usize,
        sizing: Sizing,
    ) -> Result<(WorkArray, usize)> {
        let storage = target.storage();
        let live_capacity = if storage.is_writable() {
            target.desc.capacity
        } else {
            0
        };

        if sizing == Sizing::Compact {
            if capacity == 0 {
                return Ok((WorkArray::Empty, 0));
            }
            if capacity <= emb.capacity {
                return Ok(if storage == Storage::Embedded {
                    (WorkArray::Current, emb.capacity)
                } else {
                    (WorkArray::Embedded, emb.capacity)
                });
            }
            if storage == Storage::Dynamic && live_capacity == capacity {
                return Ok((WorkArray::Current, capacity));
            }
            return Self::allocate(item, capacity);
        }

        // Never shrink physically: a writable array that is large enough stays.
        if storage.is_writable() && live_capacity >= capacity {
            return Ok((WorkArray::Current, live_capacity));
        }
        if capacity == 0 {
            return Ok((WorkArray::Empty, 0));
        }
        if capacity <= emb.capacity {
            return Ok((WorkArray::Embedded, emb.capacity));
        }
        let new_capacity = match sizing {
            Sizing::Grow => policy::calculate_increased_capacity(live_capacity, capacity),
            _ => capacity,
        };
        Self::allocate(item, new_capacity)
    }

    fn allocate(item: ItemLayout, capacity: usize) -> Result<(WorkArray, usize)> {
        let ptr = memory::allocate_array(item, capacity)?;
        Ok((WorkArray::Allocated(ptr), capacity))
    }

    /// Returns `true` if committing will switch the buffer to a different array.
    pub(crate) fn will_replace_array(&self) -> bool {
        self.work != WorkArray::Current
    }

    /// The array the buffer will use after the commit.
    pub(crate) fn work_ptr(&self) -> *mut u8 {
        match self.work {
            WorkArray::Current => self.target.data(self.emb),
            WorkArray::Empty => std::ptr::null_mut(),
            WorkArray::Embedded => self.emb.ptr,
            WorkArray::Allocated(ptr) => ptr.as_ptr(),
        }
    }

    /// The array the buffer uses now.
    pub(crate) fn old_ptr(&self) -> *mut u8 {
        self.target.data(self.emb)
    }

    pub(crate) fn old_len(&self) -> usize {
        self.target.len
    }

    pub(crate) fn old_storage(&self) -> Storage {
        self.target.storage()
    }

    /// Applies the change to the buffer.
    ///
    /// The replaced array, if any, is handed back as a [`Retired`] value. Items still
    /// living in it must be destructed by the caller; the array itself is released
    /// when the `Retired` value is dropped.
    pub(crate) fn commit(mut self) -> Retired {
        let mut retired = Retired::none(self.item);
        if self.will_replace_array() {
            let target = &mut *self.target;
            let old_storage = target.storage();
            retired = Retired {
                ptr: target.data(self.emb),
                item: self.item,
                capacity: target.desc.capacity,
                owned: old_storage == Storage::Dynamic,
            };

            let keep = target.desc.flags & DescriptorFlags::HAS_EMBEDDED;
            match self.work {
                WorkArray::Current => unreachable!(),
                WorkArray::Empty => {
                    target.array = std::ptr::null_mut();
                    target.desc = Descriptor::new(0, keep);
                }
                WorkArray::Embedded => {
                    target.array = std::ptr::null_mut();
                    target.desc = Descriptor::new(
                        self.emb.capacity,
                        keep | DescriptorFlags::EMBEDDED_IN_USE,
                    );
                }
                WorkArray::Allocated(ptr) => {
                    target.array = ptr.as_ptr();
                    target.desc =
                        Descriptor::new(self.work_capacity, keep | DescriptorFlags::DYNAMIC);
                }
            }
            log::trace!(
                "vextr array replaced: {:?} ({} slots) -> {:?} ({} slots)",
                old_storage,
                retired.capacity,
                target.storage(),
                target.desc.capacity
            );
        }
        self.target.len = self.new_len;
        self.target.clear_nul_terminated();
        self.committed = true;
        retired
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            if let WorkArray::Allocated(ptr) = self.work {
                unsafe { memory::free_array(ptr, self.item, self.work_capacity) };
            }
        }
    }
}

/// An array a buffer switched away from. Releases it on drop if it was owned.
#[must_use]
pub(crate) struct Retired {
    ptr: *mut u8,
    item: ItemLayout,
    capacity: usize,
    owned: bool,
}

impl Retired {
    fn none(item: ItemLayout) -> Retired {
        Retired {
            ptr: std::ptr::null_mut(),
            item,
            capacity: 0,
            owned: false,
        }
    }

    /// Detaches the live array of `target`, leaving the buffer empty.
    pub(crate) fn detach(target: &mut RawVextr, emb: EmbeddedArray, item: ItemLayout) -> Retired {
        let retired = Retired {
            ptr: target.data(emb),
            item,
            capacity: target.desc.capacity,
            owned: target.storage() == Storage::Dynamic,
        };
        target.reset();
        retired
    }

    pub(crate) fn ptr(&self) -> *mut u8 {
        self.ptr
    }
}

impl Drop for Retired {
    fn drop(&mut self) {
        if self.owned {
            if let Some(ptr) = NonNull::new(self.ptr) {
                unsafe { memory::free_array(ptr, self.item, self.capacity) };
            }
        }
    }
}

/// A temporary heap array, released on drop.
pub(crate) struct ScratchArray {
    ptr: NonNull<u8>,
    item: ItemLayout,
    capacity: usize,
}

impl ScratchArray {
    pub(crate) fn allocate(item: ItemLayout, capacity: usize) -> Result<ScratchArray> {
        if capacity == 0 {
            return Err(Error::invalid_arg("capacity", "capacity > 0"));
        }
        let ptr = memory::allocate_array(item, capacity)?;
        Ok(ScratchArray {
            ptr,
            item,
            capacity,
        })
    }

    pub(crate) fn ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for ScratchArray {
    fn drop(&mut self) {
        unsafe { memory::free_array(self.ptr, self.item, self.capacity) };
    }
}
