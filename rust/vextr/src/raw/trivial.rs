use std::ptr;

use vextr_common::{Error, Result};

use super::{
    base::{EmbeddedArray, ItemLayout, RawVextr, Storage, overlaps},
    complex::Source,
    descriptor::DescriptorFlags,
    transaction::{Retired, ScratchArray, Sizing, Transaction},
};

#[inline]
unsafe fn copy_bytes(src: *const u8, dst: *mut u8, bytes: usize) {
    if bytes != 0 {
        unsafe { ptr::copy_nonoverlapping(src, dst, bytes) };
    }
}

/// Buffer for items that are copied and moved as plain bytes and need no
/// destruction. Copying and moving are the same operation here.
///
/// The buffer can keep a zero item right past the last one, which lets strings hand
/// out C string views without copying. The terminator is dropped by every change.
#[repr(transparent)]
#[derive(Debug, Default)]
pub struct RawTrivialVextr {
    base: RawVextr,
}

impl std::ops::Deref for RawTrivialVextr {
    type Target = RawVextr;

    fn deref(&self) -> &RawVextr {
        &self.base
    }
}

impl RawTrivialVextr {
    pub const fn new() -> RawTrivialVextr {
        RawTrivialVextr {
            base: RawVextr::new(),
        }
    }

    pub const fn with_embedded() -> RawTrivialVextr {
        RawTrivialVextr {
            base: RawVextr::with_embedded(),
        }
    }

    /// # Safety
    ///
    /// See [`RawVextr::from_read_only`].
    pub const unsafe fn from_read_only(
        array: *const u8,
        len: usize,
        nul_terminated: bool,
    ) -> RawTrivialVextr {
        RawTrivialVextr {
            base: unsafe { RawVextr::from_read_only(array, len, nul_terminated) },
        }
    }

    pub(crate) fn base_mut(&mut self) -> &mut RawVextr {
        &mut self.base
    }

    /// Releases an owned array and leaves the buffer empty.
    ///
    /// # Safety
    ///
    /// `item` and `emb` must match the buffer.
    pub unsafe fn release(&mut self, item: ItemLayout, emb: EmbeddedArray) {
        let _ = Retired::detach(&mut self.base, emb, item);
    }

    /// Replaces the contents with `len` items copied from `src`.
    ///
    /// # Safety
    ///
    /// `item` and `emb` must match the buffer; `src` must be readable for `len` items.
    pub unsafe fn assign_copy(
        &mut self,
        item: ItemLayout,
        emb: EmbeddedArray,
        src: *const u8,
        len: usize,
    ) -> Result<()> {
        if ptr::eq(src, self.base.data(emb)) && len == self.base.len {
            return Ok(());
        }
        unsafe { self.assign_concat(item, emb, Source::copy(src, len), Source::EMPTY) }
    }

    /// Replaces the contents with the items of `a` followed by those of `b`. Either
    /// source may point into this buffer.
    ///
    /// # Safety
    ///
    /// `item` and `emb` must match the buffer; the sources must be readable.
    pub unsafe fn assign_concat(
        &mut self,
        item: ItemLayout,
        emb: EmbeddedArray,
        a: Source,
        b: Source,
    ) -> Result<()> {
        let new_len = a
            .len
            .checked_add(b.len)
            .ok_or_else(|| Error::out_of_memory(usize::MAX))?;
        let (a_bytes, b_bytes) = (item.bytes(a.len), item.bytes(b.len));
        let trn = Transaction::new(&mut self.base, emb, item, new_len, new_len, Sizing::Grow)?;
        let dst = trn.work_ptr();
        let live_bytes = item.bytes(trn.old_len());
        let aliased = !trn.will_replace_array()
            && (overlaps(a.ptr, a_bytes, dst, live_bytes) || overlaps(b.ptr, b_bytes, dst, live_bytes));
        if aliased {
            let scratch = ScratchArray::allocate(item, new_len)?;
            unsafe {
                copy_bytes(a.ptr, scratch.ptr(), a_bytes);
                copy_bytes(b.ptr, scratch.ptr().add(a_bytes), b_bytes);
                copy_bytes(scratch.ptr(), dst, a_bytes + b_bytes);
            }
        } else {
            unsafe {
                copy_bytes(a.ptr, dst, a_bytes);
                copy_bytes(b.ptr, dst.add(a_bytes), b_bytes);
            }
        }
        let _ = trn.commit();
        Ok(())
    }

    /// Takes over the array of `src`, leaving it empty. Never allocates.
    ///
    /// # Panics
    ///
    /// If `src` currently uses an embedded array.
    ///
    /// # Safety
    ///
    /// `item` and `emb` must match the buffer and `src`'s item type.
    pub unsafe fn assign_move(&mut self, item: ItemLayout, emb: EmbeddedArray, src: &mut RawTrivialVextr) {
        assert!(
            src.base.storage() != Storage::Embedded,
            "an embedded array cannot be transferred"
        );
        unsafe { self.release(item, emb) };
        let taken = src.base.take();
        self.base.adopt(taken);
    }

    /// Takes over the array of `src` unless it is embedded, in which case its items
    /// are copied. `src` ends up empty either way.
    ///
    /// # Safety
    ///
    /// `item`/`emb` must match this buffer and `src_emb` must match `src`.
    pub unsafe fn assign_move_dynamic_or_copy(
        &mut self,
        item: ItemLayout,
        emb: EmbeddedArray,
        src: &mut RawTrivialVextr,
        src_emb: EmbeddedArray,
    ) -> Result<()> {
        if src.base.storage() == Storage::Embedded {
            unsafe { self.assign_copy(item, emb, src.base.data(src_emb), src.base.len)? };
            src.base.len = 0;
            src.base.clear_nul_terminated();
        } else {
            unsafe { self.assign_move(item, emb, src) };
        }
        Ok(())
    }

    /// Shares the array of `src` if it is read-only, copies its items otherwise.
    ///
    /// # Safety
    ///
    /// `item`/`emb` must match this buffer and `src_emb` must match `src`.
    pub unsafe fn assign_share_raw_or_copy(
        &mut self,
        item: ItemLayout,
        emb: EmbeddedArray,
        src: &RawTrivialVextr,
        src_emb: EmbeddedArray,
    ) -> Result<()> {
        if src.base.storage() == Storage::ReadOnly {
            unsafe { self.release(item, emb) };
            let shared = unsafe {
                RawVextr::from_read_only(src.base.array, src.base.len, src.base.is_nul_terminated())
            };
            self.base.adopt(shared);
            Ok(())
        } else {
            unsafe { self.assign_copy(item, emb, src.base.data(src_emb), src.base.len) }
        }
    }

    /// Replaces `remove` items at `offset` with the items of `src`.
    ///
    /// # Safety
    ///
    /// `item` and `emb` must match the buffer; `src` must be readable. It may point
    /// into this buffer.
    pub unsafe fn insert_remove(
        &mut self,
        item: ItemLayout,
        emb: EmbeddedArray,
        offset: usize,
        src: Source,
        remove: usize,
    ) -> Result<()> {
        let old_len = self.base.len;
        if offset > old_len || remove > old_len - offset {
            return Err(Error::range(
                offset as isize,
                offset.saturating_add(remove) as isize,
                old_len,
            ));
        }
        if src.len == 0 && remove == 0 {
            return Ok(());
        }
        let new_len = (old_len - remove)
            .checked_add(src.len)
            .ok_or_else(|| Error::out_of_memory(usize::MAX))?;
        let tail = old_len - offset - remove;
        let trn = Transaction::new(&mut self.base, emb, item, new_len, new_len, Sizing::Grow)?;
        let (old, dst) = (trn.old_ptr(), trn.work_ptr());

        if trn.will_replace_array() {
            unsafe {
                copy_bytes(old, dst, item.bytes(offset));
                copy_bytes(src.ptr, dst.add(item.bytes(offset)), item.bytes(src.len));
                copy_bytes(
                    old.add(item.bytes(offset + remove)),
                    dst.add(item.bytes(offset + src.len)),
                    item.bytes(tail),
                );
            }
        } else {
            let mut src_ptr = src.ptr;
            let mut staged = None;
            if overlaps(src.ptr, item.bytes(src.len), dst, item.bytes(old_len)) {
                let scratch = ScratchArray::allocate(item, src.len)?;
                unsafe { copy_bytes(src.ptr, scratch.ptr(), item.bytes(src.len)) };
                src_ptr = scratch.ptr();
                staged = Some(scratch);
            }
            unsafe {
                if tail != 0 && remove != src.len {
                    ptr::copy(
                        dst.add(item.bytes(offset + remove)),
                        dst.add(item.bytes(offset + src.len)),
                        item.bytes(tail),
                    );
                }
                copy_bytes(src_ptr, dst.add(item.bytes(offset)), item.bytes(src.len));
            }
            drop(staged);
        }
        let _ = trn.commit();
        Ok(())
    }

    /// Drops the items past `new_len`.
    pub fn truncate(&mut self, new_len: usize) {
        if new_len >= self.base.len {
            return;
        }
        if new_len == 0 && self.base.storage() == Storage::ReadOnly {
            self.base.reset();
        } else {
            self.base.len = new_len;
            self.base.clear_nul_terminated();
        }
    }

    /// Ensures room for at least `min` items; `preserve` decides whether the current
    /// items survive a change of array.
    ///
    /// # Safety
    ///
    /// `item` and `emb` must match the buffer.
    pub unsafe fn set_capacity(
        &mut self,
        item: ItemLayout,
        emb: EmbeddedArray,
        min: usize,
        preserve: bool,
    ) -> Result<()> {
        if self.base.storage().is_writable() && self.base.desc.capacity >= min {
            return Ok(());
        }
        let old_len = self.base.len;
        let new_len = if preserve { old_len } else { 0 };
        let trn = Transaction::new(&mut self.base, emb, item, min.max(new_len), new_len, Sizing::Exact)?;
        if trn.will_replace_array() && preserve {
            unsafe { copy_bytes(trn.old_ptr(), trn.work_ptr(), item.bytes(old_len)) };
        }
        let _ = trn.commit();
        Ok(())
    }

    /// Sets the number of items in use; growing leaves the new items uninitialized.
    ///
    /// # Safety
    ///
    /// `item` and `emb` must match the buffer, and the caller must initialize new
    /// items before reading them.
    pub unsafe fn set_size(&mut self, item: ItemLayout, emb: EmbeddedArray, new_len: usize) -> Result<()> {
        let old_len = self.base.len;
        if new_len <= old_len {
            self.truncate(new_len);
            return Ok(());
        }
        let trn = Transaction::new(&mut self.base, emb, item, new_len, new_len, Sizing::Grow)?;
        if trn.will_replace_array() {
            unsafe { copy_bytes(trn.old_ptr(), trn.work_ptr(), item.bytes(old_len)) };
        }
        let _ = trn.commit();
        Ok(())
    }

    /// See [`RawComplexVextr::shrink_to_fit`](super::RawComplexVextr::shrink_to_fit).
    ///
    /// # Safety
    ///
    /// `item` and `emb` must match the buffer.
    pub unsafe fn shrink_to_fit(&mut self, item: ItemLayout, emb: EmbeddedArray) -> Result<()> {
        if self.base.storage() != Storage::Dynamic {
            return Ok(());
        }
        let len = self.base.len;
        let trn = Transaction::new(&mut self.base, emb, item, len, len, Sizing::Compact)?;
        if trn.will_replace_array() {
            unsafe { copy_bytes(trn.old_ptr(), trn.work_ptr(), item.bytes(len)) };
            let _ = trn.commit();
        }
        Ok(())
    }

    /// Makes sure a zero item follows the last one, moving the items to a writable
    /// array with a spare slot if needed.
    ///
    /// # Safety
    ///
    /// `item` and `emb` must match the buffer.
    pub unsafe fn ensure_nul_terminated(&mut self, item: ItemLayout, emb: EmbeddedArray) -> Result<()> {
        if self.base.is_nul_terminated() {
            return Ok(());
        }
        let len = self.base.len;
        if !(self.base.storage().is_writable() && self.base.desc.capacity > len) {
            let capacity = len
                .checked_add(1)
                .ok_or_else(|| Error::out_of_memory(usize::MAX))?;
            let trn = Transaction::new(&mut self.base, emb, item, capacity, len, Sizing::Grow)?;
            unsafe { copy_bytes(trn.old_ptr(), trn.work_ptr(), item.bytes(len)) };
            let _ = trn.commit();
        }
        unsafe { ptr::write_bytes(self.base.data(emb).add(item.bytes(len)), 0, item.size) };
        self.base.desc.flags.insert(DescriptorFlags::NUL_TERMINATED);
        Ok(())
    }
}
