use std::ptr;

use vextr_common::{Error, Result};

use super::{
    base::{EmbeddedArray, RawVextr, Storage, overlaps},
    transaction::{Retired, ScratchArray, Sizing, Transaction},
    type_ops::TypeOps,
};

/// How the items of a [`Source`] get into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Copy-construct; the source keeps its items.
    Copy,
    /// Move bitwise; the buffer takes over the items.
    Move,
}

/// A run of items to place into a buffer.
#[derive(Debug, Clone, Copy)]
pub struct Source {
    pub(crate) ptr: *const u8,
    pub(crate) len: usize,
    pub(crate) mode: SourceMode,
}

impl Source {
    pub const EMPTY: Source = Source {
        ptr: ptr::null(),
        len: 0,
        mode: SourceMode::Copy,
    };

    /// Items to be copy-constructed.
    pub fn copy(ptr: *const u8, len: usize) -> Source {
        Source {
            ptr,
            len,
            mode: SourceMode::Copy,
        }
    }

    /// Items to be moved into the buffer.
    ///
    /// When the operation succeeds the buffer owns the items and the caller must
    /// forget them without dropping. When it fails they are left untouched.
    pub fn moved(ptr: *const u8, len: usize) -> Source {
        Source {
            ptr,
            len,
            mode: SourceMode::Move,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Placing these items cannot fail.
    fn is_infallible(&self) -> bool {
        self.len == 0 || self.mode == SourceMode::Move
    }

    /// If this source lies within `[from, from + bytes)`, redirects it to the same
    /// offset in `to`.
    fn rebase(self, item_size: usize, from: *const u8, bytes: usize, to: *const u8) -> Source {
        if self.mode == SourceMode::Copy && overlaps(self.ptr, self.len * item_size, from, bytes) {
            let offset = self.ptr as usize - from as usize;
            Source {
                ptr: unsafe { to.add(offset) },
                ..self
            }
        } else {
            self
        }
    }
}

/// Items already in a buffer, to be relocated into a new array. Read-only items can
/// only be copied; anything else is moved.
fn existing(storage: Storage, ptr: *const u8, len: usize) -> Source {
    if storage == Storage::ReadOnly {
        Source::copy(ptr, len)
    } else {
        Source::moved(ptr, len)
    }
}

/// Buffer for items with drop glue or non-bitwise copies.
///
/// Destructors run exactly once per item: on removal, on truncation, on replacement,
/// or when the buffer is destructed. Items of a read-only array are never destructed.
#[repr(transparent)]
#[derive(Debug, Default)]
pub struct RawComplexVextr {
    base: RawVextr,
}

impl std::ops::Deref for RawComplexVextr {
    type Target = RawVextr;

    fn deref(&self) -> &RawVextr {
        &self.base
    }
}

impl RawComplexVextr {
    pub const fn new() -> RawComplexVextr {
        RawComplexVextr {
            base: RawVextr::new(),
        }
    }

    pub const fn with_embedded() -> RawComplexVextr {
        RawComplexVextr {
            base: RawVextr::with_embedded(),
        }
    }

    /// # Safety
    ///
    /// See [`RawVextr::from_read_only`].
    pub const unsafe fn from_read_only(array: *const u8, len: usize) -> RawComplexVextr {
        RawComplexVextr {
            base: unsafe { RawVextr::from_read_only(array, len, false) },
        }
    }

    pub(crate) fn base_mut(&mut self) -> &mut RawVextr {
        &mut self.base
    }

    /// Destructs all items and releases an owned array, leaving the buffer empty.
    ///
    /// # Safety
    ///
    /// `ops` and `emb` must match the buffer (see the [module docs](super)).
    pub unsafe fn destruct(&mut self, ops: &TypeOps, emb: EmbeddedArray) {
        let storage = self.base.storage();
        let len = self.base.len;
        let retired = Retired::detach(&mut self.base, emb, ops.item);
        if storage.is_writable() {
            unsafe { ops.destruct_range(retired.ptr(), len) };
        }
    }

    /// Replaces the contents with copies of `len` items at `src`.
    ///
    /// Assigning a buffer's own contents to itself is a no-op.
    ///
    /// # Safety
    ///
    /// `ops` and `emb` must match the buffer, and `src` must point to `len`
    /// initialized items.
    pub unsafe fn assign_copy(
        &mut self,
        ops: &TypeOps,
        emb: EmbeddedArray,
        src: *const u8,
        len: usize,
    ) -> Result<()> {
        if ptr::eq(src, self.base.data(emb)) && len == self.base.len {
            return Ok(());
        }
        unsafe { self.assign_concat(ops, emb, Source::copy(src, len), Source::EMPTY) }
    }

    /// Replaces the contents with the items of `a` followed by those of `b`.
    ///
    /// Copy sources may point into this buffer's own items.
    ///
    /// # Safety
    ///
    /// `ops` and `emb` must match the buffer, and both sources must describe
    /// initialized items.
    pub unsafe fn assign_concat(
        &mut self,
        ops: &TypeOps,
        emb: EmbeddedArray,
        a: Source,
        b: Source,
    ) -> Result<()> {
        let size = ops.item.size;
        let new_len = a
            .len
            .checked_add(b.len)
            .ok_or_else(|| Error::out_of_memory(usize::MAX))?;
        let trn = Transaction::new(&mut self.base, emb, ops.item, new_len, new_len, Sizing::Grow)?;
        let old_len = trn.old_len();
        let old_storage = trn.old_storage();

        if trn.will_replace_array() {
            let dst = trn.work_ptr();
            let mut built = Constructed::new(ops);
            unsafe {
                built.place(dst, a)?;
                built.place(dst.add(a.len * size), b)?;
            }
            built.disarm();
            let retired = trn.commit();
            if old_storage.is_writable() {
                unsafe { ops.destruct_range(retired.ptr(), old_len) };
            }
            return Ok(());
        }

        let data = trn.work_ptr();
        if new_len == 0 {
            let _ = trn.commit();
            unsafe { ops.destruct_range(data, old_len) };
            return Ok(());
        }
        if old_len == 0 {
            let mut built = Constructed::new(ops);
            unsafe {
                built.place(data, a)?;
                built.place(data.add(a.len * size), b)?;
            }
            built.disarm();
            let _ = trn.commit();
            return Ok(());
        }

        // Moves cannot fail, so the old items can go first and need no backup. The
        // moved items are placed even if one of the old items panics while dropped.
        if a.is_infallible() && b.is_infallible() {
            let place = PlaceMoved {
                trn: Some(trn),
                ops,
                data,
                a,
                b,
            };
            unsafe { ops.destruct_range(data, old_len) };
            drop(place);
            return Ok(());
        }

        // Overwriting in place: park the old items in a backup array so that they can
        // be put back if building the new contents fails.
        let backup = ScratchArray::allocate(ops.item, old_len)?;
        let old_bytes = old_len * size;
        unsafe { ptr::copy_nonoverlapping(data, backup.ptr(), old_bytes) };
        let a = a.rebase(size, data, old_bytes, backup.ptr());
        let b = b.rebase(size, data, old_bytes, backup.ptr());

        let mut restore = RestoreBackup {
            built: Constructed::new(ops),
            data,
            backup: backup.ptr(),
            bytes: old_bytes,
            armed: true,
        };
        unsafe {
            restore.built.place(data, a)?;
            restore.built.place(data.add(a.len * size), b)?;
        }
        restore.disarm();
        let _ = trn.commit();
        unsafe { ops.destruct_range(backup.ptr(), old_len) };
        Ok(())
    }

    /// Takes over the array of `src`, leaving it empty. Never allocates.
    ///
    /// # Panics
    ///
    /// If `src` currently uses an embedded array: its items cannot leave their
    /// container without being moved one by one.
    ///
    /// # Safety
    ///
    /// `ops` and `emb` must match the buffer, and `src` must hold items of the same
    /// type.
    pub unsafe fn assign_move(&mut self, ops: &TypeOps, emb: EmbeddedArray, src: &mut RawComplexVextr) {
        assert!(
            src.base.storage() != Storage::Embedded,
            "an embedded array cannot be transferred"
        );
        unsafe { self.destruct(ops, emb) };
        let taken = src.base.take();
        self.base.adopt(taken);
    }

    /// Takes over the array of `src` if it is not embedded, otherwise moves its items
    /// one by one into this buffer's own storage. `src` ends up empty.
    ///
    /// Only the item-by-item path can fail (this buffer may need a new array); on
    /// failure both buffers are unchanged.
    ///
    /// # Safety
    ///
    /// `ops`/`emb` must match this buffer, `src_emb` must match `src`, and both must
    /// hold items of the same type.
    pub unsafe fn assign_move_dynamic_or_move_items(
        &mut self,
        ops: &TypeOps,
        emb: EmbeddedArray,
        src: &mut RawComplexVextr,
        src_emb: EmbeddedArray,
    ) -> Result<()> {
        if src.base.storage() == Storage::Embedded {
            let len = src.base.len;
            let items = Source::moved(src.base.data(src_emb), len);
            // Past an allocation failure the items belong to `self`, even if dropping
            // the replaced items panics.
            let handover = Handover {
                len: &mut src.base.len,
            };
            match unsafe { self.assign_concat(ops, emb, items, Source::EMPTY) } {
                Ok(()) => drop(handover),
                Err(e) => {
                    std::mem::forget(handover);
                    return Err(e);
                }
            }
        } else {
            unsafe { self.assign_move(ops, emb, src) };
        }
        Ok(())
    }

    /// Inserts the items of `src` before position `offset` (`0..=len`).
    ///
    /// # Safety
    ///
    /// `ops` and `emb` must match the buffer, and `src` must describe initialized
    /// items. A copy source may point into this buffer's own items.
    pub unsafe fn insert(
        &mut self,
        ops: &TypeOps,
        emb: EmbeddedArray,
        offset: usize,
        src: Source,
    ) -> Result<()> {
        self.base.validate_position(offset, true)?;
        if src.len == 0 {
            return Ok(());
        }
        let size = ops.item.size;
        let old_len = self.base.len;
        let new_len = old_len
            .checked_add(src.len)
            .ok_or_else(|| Error::out_of_memory(usize::MAX))?;
        let trn = Transaction::new(&mut self.base, emb, ops.item, new_len, new_len, Sizing::Grow)?;
        let old_storage = trn.old_storage();

        if trn.will_replace_array() {
            let (old, dst) = (trn.old_ptr(), trn.work_ptr());
            let mut built = Constructed::new(ops);
            unsafe {
                built.place(dst.add(offset * size), src)?;
                built.place(dst, existing(old_storage, old, offset))?;
                built.place(
                    dst.add((offset + src.len) * size),
                    existing(old_storage, old.add(offset * size), old_len - offset),
                )?;
            }
            built.disarm();
            let _ = trn.commit();
            return Ok(());
        }

        let data = trn.work_ptr();
        let mut src = src;
        let mut staged = None;
        if src.mode == SourceMode::Copy && overlaps(src.ptr, src.len * size, data, old_len * size) {
            let scratch = ScratchArray::allocate(ops.item, src.len)?;
            unsafe { ops.copy_range(scratch.ptr(), src.ptr, src.len)? };
            src = Source::moved(scratch.ptr(), src.len);
            staged = Some(scratch);
        }

        let gap = unsafe { data.add(offset * size) };
        let tail_bytes = (old_len - offset) * size;
        let shift = src.len * size;
        unsafe { ptr::copy(gap, gap.add(shift), tail_bytes) };
        let mut shift_back = ShiftBack {
            gap,
            shift,
            bytes: tail_bytes,
            armed: true,
        };
        match src.mode {
            SourceMode::Copy => unsafe { ops.copy_range(gap, src.ptr, src.len)? },
            SourceMode::Move => unsafe { ops.move_range(gap, src.ptr, src.len) },
        }
        shift_back.armed = false;
        // Staged copies now live in the buffer; only the scratch memory goes.
        drop(staged);
        let _ = trn.commit();
        Ok(())
    }

    /// Destructs the items in `begin..end` and closes the gap. Never reallocates a
    /// writable array.
    ///
    /// # Safety
    ///
    /// `ops` and `emb` must match the buffer.
    pub unsafe fn remove(
        &mut self,
        ops: &TypeOps,
        emb: EmbeddedArray,
        begin: usize,
        end: usize,
    ) -> Result<()> {
        let old_len = self.base.len;
        if begin > end || end > old_len {
            return Err(Error::range(begin as isize, end as isize, old_len));
        }
        if begin == end {
            return Ok(());
        }
        let size = ops.item.size;

        if self.base.storage() == Storage::ReadOnly {
            // Borrowed items stay where they are; the survivors are copied out.
            let new_len = old_len - (end - begin);
            let trn = Transaction::new(&mut self.base, emb, ops.item, new_len, new_len, Sizing::Grow)?;
            let (old, dst) = (trn.old_ptr(), trn.work_ptr());
            if new_len > 0 {
                let mut built = Constructed::new(ops);
                unsafe {
                    built.place(dst, Source::copy(old, begin))?;
                    built.place(
                        dst.add(begin * size),
                        Source::copy(old.add(end * size), old_len - end),
                    )?;
                }
                built.disarm();
            }
            let _ = trn.commit();
            return Ok(());
        }

        let data = self.base.data(emb);
        self.base.clear_nul_terminated();
        self.base.len = begin;
        let _close = CloseGap {
            len: &mut self.base.len,
            data,
            begin,
            end,
            old_len,
            size,
        };
        unsafe { ops.destruct_range(data.add(begin * size), end - begin) };
        Ok(())
    }

    /// Destructs the items past `new_len`. Does nothing if there are not more.
    ///
    /// # Safety
    ///
    /// `ops` and `emb` must match the buffer.
    pub unsafe fn truncate(&mut self, ops: &TypeOps, emb: EmbeddedArray, new_len: usize) {
        let old_len = self.base.len;
        if new_len >= old_len {
            return;
        }
        let storage = self.base.storage();
        if storage == Storage::ReadOnly {
            if new_len == 0 {
                self.base.reset();
            } else {
                self.base.len = new_len;
                self.base.clear_nul_terminated();
            }
            return;
        }
        let data = self.base.data(emb);
        self.base.len = new_len;
        self.base.clear_nul_terminated();
        unsafe { ops.destruct_range(data.add(new_len * ops.item.size), old_len - new_len) };
    }

    /// Ensures room for at least `min` items.
    ///
    /// When a new array is needed, `preserve` decides whether the current items are
    /// relocated into it or destructed.
    ///
    /// # Safety
    ///
    /// `ops` and `emb` must match the buffer.
    pub unsafe fn set_capacity(
        &mut self,
        ops: &TypeOps,
        emb: EmbeddedArray,
        min: usize,
        preserve: bool,
    ) -> Result<()> {
        let storage = self.base.storage();
        if storage.is_writable() && self.base.desc.capacity >= min {
            return Ok(());
        }
        let old_len = self.base.len;
        let new_len = if preserve { old_len } else { 0 };
        let trn = Transaction::new(
            &mut self.base,
            emb,
            ops.item,
            min.max(new_len),
            new_len,
            Sizing::Exact,
        )?;
        if !trn.will_replace_array() {
            return Ok(());
        }
        if preserve {
            let mut built = Constructed::new(ops);
            unsafe { built.place(trn.work_ptr(), existing(storage, trn.old_ptr(), old_len))? };
            built.disarm();
            let _ = trn.commit();
        } else {
            let retired = trn.commit();
            if storage.is_writable() {
                unsafe { ops.destruct_range(retired.ptr(), old_len) };
            }
        }
        Ok(())
    }

    /// Sets the number of items in use.
    ///
    /// Shrinking destructs the tail. Growing leaves the new slots uninitialized.
    ///
    /// # Safety
    ///
    /// `ops` and `emb` must match the buffer. After growing, the caller must
    /// initialize every new slot before the items are read or the buffer is dropped.
    pub unsafe fn set_size(&mut self, ops: &TypeOps, emb: EmbeddedArray, new_len: usize) -> Result<()> {
        let old_len = self.base.len;
        if new_len <= old_len {
            unsafe { self.truncate(ops, emb, new_len) };
            return Ok(());
        }
        let storage = self.base.storage();
        let trn = Transaction::new(&mut self.base, emb, ops.item, new_len, new_len, Sizing::Grow)?;
        if trn.will_replace_array() {
            let mut built = Constructed::new(ops);
            unsafe { built.place(trn.work_ptr(), existing(storage, trn.old_ptr(), old_len))? };
            built.disarm();
        }
        let _ = trn.commit();
        Ok(())
    }

    /// Moves an owned array's items into the smallest storage that fits them: the
    /// embedded array, an exactly sized heap array, or none at all.
    ///
    /// # Safety
    ///
    /// `ops` and `emb` must match the buffer.
    pub unsafe fn shrink_to_fit(&mut self, ops: &TypeOps, emb: EmbeddedArray) -> Result<()> {
        if self.base.storage() != Storage::Dynamic {
            return Ok(());
        }
        let len = self.base.len;
        let trn = Transaction::new(&mut self.base, emb, ops.item, len, len, Sizing::Compact)?;
        if trn.will_replace_array() {
            unsafe { ops.move_range(trn.work_ptr(), trn.old_ptr(), len) };
            let _ = trn.commit();
        }
        Ok(())
    }
}

/// Items copy-constructed into a work array so far; destructed again if the operation
/// fails before [`disarm`](Constructed::disarm). Moved items are not tracked: their
/// originals remain valid where they came from.
struct Constructed<'o> {
    ops: &'o TypeOps,
    ranges: [(*mut u8, usize); 3],
    count: usize,
}

impl<'o> Constructed<'o> {
    fn new(ops: &'o TypeOps) -> Constructed<'o> {
        Constructed {
            ops,
            ranges: [(ptr::null_mut(), 0); 3],
            count: 0,
        }
    }

    unsafe fn place(&mut self, dst: *mut u8, src: Source) -> Result<()> {
        if src.len == 0 {
            return Ok(());
        }
        match src.mode {
            SourceMode::Copy => {
                unsafe { self.ops.copy_range(dst, src.ptr, src.len)? };
                self.ranges[self.count] = (dst, src.len);
                self.count += 1;
            }
            SourceMode::Move => unsafe { self.ops.move_range(dst, src.ptr, src.len) },
        }
        Ok(())
    }

    fn disarm(&mut self) {
        self.count = 0;
    }

    fn rollback(&mut self) {
        while self.count > 0 {
            self.count -= 1;
            let (ptr, len) = self.ranges[self.count];
            unsafe { self.ops.destruct_range(ptr, len) };
        }
    }
}

impl Drop for Constructed<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}

/// Puts the backed-up items back in place when an in-place overwrite fails.
struct RestoreBackup<'o> {
    built: Constructed<'o>,
    data: *mut u8,
    backup: *const u8,
    bytes: usize,
    armed: bool,
}

impl RestoreBackup<'_> {
    fn disarm(&mut self) {
        self.built.disarm();
        self.armed = false;
    }
}

impl Drop for RestoreBackup<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.built.rollback();
            unsafe { ptr::copy_nonoverlapping(self.backup, self.data, self.bytes) };
        }
    }
}

/// Moves the items of two infallible sources into place and commits the transaction.
/// Runs on drop so that a panicking destructor of the replaced items cannot leave the
/// buffer claiming items that are gone.
struct PlaceMoved<'o, 't> {
    trn: Option<Transaction<'t>>,
    ops: &'o TypeOps,
    data: *mut u8,
    a: Source,
    b: Source,
}

impl Drop for PlaceMoved<'_, '_> {
    fn drop(&mut self) {
        let size = self.ops.item.size;
        unsafe {
            self.ops.move_range(self.data, self.a.ptr, self.a.len);
            self.ops
                .move_range(self.data.add(self.a.len * size), self.b.ptr, self.b.len);
        }
        if let Some(trn) = self.trn.take() {
            let _ = trn.commit();
        }
    }
}

/// Empties a buffer whose items were moved out.
struct Handover<'a> {
    len: &'a mut usize,
}

impl Drop for Handover<'_> {
    fn drop(&mut self) {
        *self.len = 0;
    }
}

/// Undoes the tail shift of an in-place insertion that failed.
struct ShiftBack {
    gap: *mut u8,
    shift: usize,
    bytes: usize,
    armed: bool,
}

impl Drop for ShiftBack {
    fn drop(&mut self) {
        if self.armed {
            unsafe { ptr::copy(self.gap.add(self.shift), self.gap, self.bytes) };
        }
    }
}

/// Closes the gap left by removed items, whether or not their destructors panic.
struct CloseGap<'a> {
    len: &'a mut usize,
    data: *mut u8,
    begin: usize,
    end: usize,
    old_len: usize,
    size: usize,
}

impl Drop for CloseGap<'_> {
    fn drop(&mut self) {
        let tail = self.old_len - self.end;
        unsafe {
            ptr::copy(
                self.data.add(self.end * self.size),
                self.data.add(self.begin * self.size),
                tail * self.size,
            )
        };
        *self.len = self.begin + tail;
    }
}
