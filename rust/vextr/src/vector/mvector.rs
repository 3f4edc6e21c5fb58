use std::{marker::PhantomData, mem::ManuallyDrop, ptr};

use vextr_common::Result;

use crate::{
    raw::{EmbeddedArray, RawComplexVextr, Source, Storage, TypeOps, policy},
    slice_ext::translate_index,
};

use super::{copy_ops, items, items_mut, ops};

/// Mutable view of a vector of any storage kind.
///
/// Obtained from [`DmVector::as_mvector`](super::DmVector::as_mvector) or
/// [`SmVector::as_mvector`](super::SmVector::as_mvector). Functions that only edit a
/// vector take an `MVector` and need not care whether the vector embeds its items.
///
/// The vectors behind an `MVector` never borrow read-only arrays, so every array it
/// sees is writable or absent.
pub struct MVector<'a, T> {
    raw: &'a mut RawComplexVextr,
    emb: EmbeddedArray,
    _marker: PhantomData<&'a mut [T]>,
}

impl<'a, T> MVector<'a, T> {
    /// # Safety
    ///
    /// `raw` must hold items of type `T`, never a read-only array, and `emb` must be
    /// the embedded array of the container owning `raw`, valid for `'a`.
    pub(crate) unsafe fn new(raw: &'a mut RawComplexVextr, emb: EmbeddedArray) -> MVector<'a, T> {
        debug_assert_ne!(raw.storage(), Storage::ReadOnly);
        MVector {
            raw,
            emb,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Number of items that fit before the next reallocation.
    pub fn capacity(&self) -> usize {
        self.raw.capacity(self.emb)
    }

    pub fn storage(&self) -> Storage {
        self.raw.storage()
    }

    pub fn as_slice(&self) -> &[T] {
        unsafe { items(&**self.raw, self.emb) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { items_mut(&**self.raw, self.emb) }
    }

    /// Moves one value in at `offset`. The value is dropped if that fails.
    fn insert_value(&mut self, offset: usize, value: T) -> Result<()> {
        let value = ManuallyDrop::new(value);
        let src = Source::moved(&*value as *const T as *const u8, 1);
        let result = unsafe { self.raw.insert(&ops::<T>(), self.emb, offset, src) };
        if result.is_err() {
            drop(ManuallyDrop::into_inner(value));
        }
        result
    }

    pub fn push(&mut self, value: T) -> Result<()> {
        let len = self.len();
        self.insert_value(len, value)
    }

    pub fn pop(&mut self) -> Option<T> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        let value = unsafe { (self.raw.data(self.emb) as *const T).add(len - 1).read() };
        unsafe { self.raw.truncate(&TypeOps::forgetful::<T>(), self.emb, len - 1) };
        Some(value)
    }

    pub fn insert(&mut self, index: isize, value: T) -> Result<()> {
        let offset = self.raw.translate_position(index)?;
        self.insert_value(offset, value)
    }

    /// Inserts before `position`, which must designate an item or the end.
    pub fn insert_at(&mut self, position: usize, value: T) -> Result<()> {
        self.raw.validate_position(position, true)?;
        self.insert_value(position, value)
    }

    pub fn insert_slice(&mut self, index: isize, items: &[T]) -> Result<()>
    where
        T: Clone,
    {
        let offset = self.raw.translate_position(index)?;
        let src = Source::copy(items.as_ptr() as *const u8, items.len());
        unsafe { self.raw.insert(&copy_ops::<T>(), self.emb, offset, src) }
    }

    pub fn extend_from_slice(&mut self, items: &[T]) -> Result<()>
    where
        T: Clone,
    {
        let src = Source::copy(items.as_ptr() as *const u8, items.len());
        let len = self.len();
        unsafe { self.raw.insert(&copy_ops::<T>(), self.emb, len, src) }
    }

    /// Appends copies of this vector's own items in `begin..end` (clipped).
    pub fn extend_from_within(&mut self, begin: isize, end: isize) -> Result<()>
    where
        T: Clone,
    {
        let range = self.raw.translate_range(begin, end);
        if range.is_empty() {
            return Ok(());
        }
        let size = std::mem::size_of::<T>();
        let src = Source::copy(
            unsafe { self.raw.data(self.emb).add(range.start * size) },
            range.len(),
        );
        let len = self.len();
        unsafe { self.raw.insert(&copy_ops::<T>(), self.emb, len, src) }
    }

    pub fn append_vec(&mut self, vec: Vec<T>) -> Result<()> {
        let mut vec = ManuallyDrop::new(vec);
        let src = Source::moved(vec.as_ptr() as *const u8, vec.len());
        let len = self.len();
        let result = unsafe { self.raw.insert(&ops::<T>(), self.emb, len, src) };
        if result.is_ok() {
            unsafe { vec.set_len(0) };
        }
        unsafe { ManuallyDrop::drop(&mut vec) };
        result
    }

    pub fn append(&mut self, other: &mut MVector<'_, T>) -> Result<()> {
        let src = Source::moved(other.raw.data(other.emb), other.len());
        let len = self.len();
        unsafe { self.raw.insert(&ops::<T>(), self.emb, len, src)? };
        // The items now belong to `self`; `other` keeps its array.
        unsafe { other.raw.truncate(&TypeOps::forgetful::<T>(), other.emb, 0) };
        Ok(())
    }

    pub fn remove(&mut self, index: isize) -> Result<T> {
        let offset = translate_index(index, self.len())?;
        Ok(self.take_item(offset))
    }

    /// Removes the item at `position`, which must designate an item.
    pub fn remove_at(&mut self, position: usize) -> Result<T> {
        self.raw.validate_position(position, false)?;
        Ok(self.take_item(position))
    }

    fn take_item(&mut self, offset: usize) -> T {
        let value = unsafe { (self.raw.data(self.emb) as *const T).add(offset).read() };
        // Removal from a writable array only closes the gap and cannot fail.
        let closed = unsafe {
            self.raw
                .remove(&TypeOps::forgetful::<T>(), self.emb, offset, offset + 1)
        };
        debug_assert!(closed.is_ok());
        value
    }

    pub fn remove_range(&mut self, begin: isize, end: isize) -> Result<()> {
        let range = self.raw.validate_range(begin, end)?;
        unsafe { self.raw.remove(&ops::<T>(), self.emb, range.start, range.end) }
    }

    pub fn truncate(&mut self, len: usize) {
        unsafe { self.raw.truncate(&ops::<T>(), self.emb, len) }
    }

    pub fn clear(&mut self) {
        self.truncate(0)
    }

    pub fn assign_slice(&mut self, items: &[T]) -> Result<()>
    where
        T: Clone,
    {
        unsafe {
            self.raw
                .assign_copy(&copy_ops::<T>(), self.emb, items.as_ptr() as *const u8, items.len())
        }
    }

    pub fn assign_concat(&mut self, a: &[T], b: &[T]) -> Result<()>
    where
        T: Clone,
    {
        let a = Source::copy(a.as_ptr() as *const u8, a.len());
        let b = Source::copy(b.as_ptr() as *const u8, b.len());
        unsafe { self.raw.assign_concat(&copy_ops::<T>(), self.emb, a, b) }
    }

    /// Replaces the contents with the items of `a` followed by those of `b`, moving
    /// the items of whichever operand is given by value.
    pub(crate) fn assign_concat_sources(&mut self, a: Source, b: Source) -> Result<()>
    where
        T: Clone,
    {
        unsafe { self.raw.assign_concat(&copy_ops::<T>(), self.emb, a, b) }
    }

    /// Replaces the contents with all items of `src`, leaving it empty.
    ///
    /// A heap array is handed over as is; embedded items are moved one by one, which
    /// may need an allocation here. On failure both vectors are unchanged.
    pub fn take_from(&mut self, src: &mut MVector<'_, T>) -> Result<()> {
        unsafe {
            self.raw
                .assign_move_dynamic_or_move_items(&ops::<T>(), self.emb, src.raw, src.emb)
        }
    }

    /// Ensures room for `min` items in total. If that needs a new array and
    /// `preserve` is `false`, the current items are dropped instead of moved.
    pub fn set_capacity(&mut self, min: usize, preserve: bool) -> Result<()> {
        unsafe { self.raw.set_capacity(&ops::<T>(), self.emb, min, preserve) }
    }

    /// Ensures room for `additional` more items, growing geometrically.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let required = self
            .len()
            .checked_add(additional)
            .ok_or_else(|| vextr_common::Error::out_of_memory(usize::MAX))?;
        let capacity = self.capacity();
        if required <= capacity {
            // An empty vector only reports the embedded capacity; switch to it.
            if self.storage() == Storage::Empty && required > 0 {
                return self.set_capacity(required, true);
            }
            return Ok(());
        }
        let target = policy::calculate_increased_capacity(capacity, required);
        self.set_capacity(target, true)
    }

    pub fn resize(&mut self, new_len: usize, value: T) -> Result<()>
    where
        T: Clone,
    {
        self.resize_with(new_len, || value.clone())
    }

    pub fn resize_with(&mut self, new_len: usize, mut f: impl FnMut() -> T) -> Result<()> {
        let len = self.len();
        if new_len <= len {
            self.truncate(new_len);
            return Ok(());
        }
        self.reserve(new_len - len)?;
        let data = self.raw.data(self.emb) as *mut T;
        // The length only grows once the whole tail exists.
        let mut tail = PartialTail {
            start: unsafe { data.add(len) },
            written: 0,
        };
        while tail.written < new_len - len {
            unsafe { tail.start.add(tail.written).write(f()) };
            tail.written += 1;
        }
        std::mem::forget(tail);
        self.raw.base_mut().len = new_len;
        Ok(())
    }

    pub fn set_size(&mut self, new_len: usize) -> Result<()>
    where
        T: Default,
    {
        self.resize_with(new_len, T::default)
    }

    /// Moves the items into the smallest storage that holds them.
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        unsafe { self.raw.shrink_to_fit(&ops::<T>(), self.emb) }
    }
}

/// Items written past the end of a vector by `resize_with`; dropped if a later item
/// cannot be produced.
struct PartialTail<T> {
    start: *mut T,
    written: usize,
}

impl<T> Drop for PartialTail<T> {
    fn drop(&mut self) {
        unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.start, self.written)) }
    }
}

super::impl_vector_traits!(['a, T] MVector<'a, T>);

impl<T> std::ops::DerefMut for MVector<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T> Extend<T> for MVector<'_, T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        super::or_panic(self.reserve(iter.size_hint().0));
        for value in iter {
            super::or_panic(self.push(value));
        }
    }
}
