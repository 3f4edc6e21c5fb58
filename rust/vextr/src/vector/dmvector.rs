use std::{iter::FusedIterator, mem::ManuallyDrop};

use vextr_common::Result;

use crate::raw::{EmbeddedArray, RawComplexVextr, Storage};

use super::{IVector, MVector, assert_sized_items, items, items_mut, ops};

/// Mutable vector that keeps its items in a heap array.
pub struct DmVector<T> {
    raw: RawComplexVextr,
    _marker: std::marker::PhantomData<T>,
}

unsafe impl<T: Send> Send for DmVector<T> {}
unsafe impl<T: Sync> Sync for DmVector<T> {}

impl<T> DmVector<T> {
    pub const fn new() -> DmVector<T> {
        const { assert_sized_items::<T>() };
        DmVector {
            raw: RawComplexVextr::new(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_capacity(capacity: usize) -> Result<DmVector<T>> {
        let mut v = DmVector::new();
        v.set_capacity(capacity, false)?;
        Ok(v)
    }

    pub fn from_slice(items: &[T]) -> Result<DmVector<T>>
    where
        T: Clone,
    {
        let mut v = DmVector::new();
        v.assign_slice(items)?;
        Ok(v)
    }

    /// Collects `iter`, reporting allocation failure instead of panicking.
    pub fn try_from_iter(iter: impl IntoIterator<Item = T>) -> Result<DmVector<T>> {
        let mut v = DmVector::new();
        let iter = iter.into_iter();
        v.reserve(iter.size_hint().0)?;
        for value in iter {
            v.push(value)?;
        }
        Ok(v)
    }

    pub fn as_mvector(&mut self) -> MVector<'_, T> {
        unsafe { MVector::new(&mut self.raw, EmbeddedArray::NONE) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.raw.capacity(EmbeddedArray::NONE)
    }

    pub fn as_slice(&self) -> &[T] {
        unsafe { items(&self.raw, EmbeddedArray::NONE) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { items_mut(&self.raw, EmbeddedArray::NONE) }
    }

    super::forward_mutators!();

    /// Freezes the vector, handing its array over without copying.
    pub fn into_ivector(mut self) -> IVector<T> {
        let mut v = IVector::new();
        unsafe { v.raw_mut().assign_move(&ops::<T>(), EmbeddedArray::NONE, &mut self.raw) };
        v
    }

    /// Builds a mutable copy of an immutable vector. A heap array is taken over; a
    /// borrowed one is copied.
    pub fn from_ivector(mut v: IVector<T>) -> Result<DmVector<T>>
    where
        T: Clone,
    {
        let mut dm = DmVector::new();
        if v.storage() == Storage::ReadOnly {
            dm.assign_slice(v.as_slice())?;
        } else {
            unsafe { dm.raw.assign_move(&ops::<T>(), EmbeddedArray::NONE, v.raw_mut()) };
        }
        Ok(dm)
    }

    pub(crate) fn raw_mut(&mut self) -> &mut RawComplexVextr {
        &mut self.raw
    }

    /// Concatenates two item runs into a new vector; `Move` sources are consumed.
    pub(crate) fn concat_sources(a: crate::raw::Source, b: crate::raw::Source) -> Result<DmVector<T>>
    where
        T: Clone,
    {
        let mut v = DmVector::new();
        v.as_mvector().assign_concat_sources(a, b)?;
        Ok(v)
    }
}

impl<T> Drop for DmVector<T> {
    fn drop(&mut self) {
        unsafe { self.raw.destruct(&ops::<T>(), EmbeddedArray::NONE) };
    }
}

super::impl_vector_traits!([T] DmVector<T>);
super::impl_owned_mutable_traits!([T] DmVector<T>);

impl<T> IntoIterator for DmVector<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        let mut this = ManuallyDrop::new(self);
        let raw = std::mem::take(&mut this.raw);
        let end = raw.len();
        IntoIter {
            raw,
            front: 0,
            back: end,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: Clone> From<IVector<T>> for DmVector<T> {
    fn from(v: IVector<T>) -> Self {
        super::or_panic(DmVector::from_ivector(v))
    }
}

/// Owning iterator over the items of a [`DmVector`].
pub struct IntoIter<T> {
    raw: RawComplexVextr,
    front: usize,
    back: usize,
    _marker: std::marker::PhantomData<T>,
}

unsafe impl<T: Send> Send for IntoIter<T> {}
unsafe impl<T: Sync> Sync for IntoIter<T> {}

impl<T> IntoIter<T> {
    fn data(&self) -> *const T {
        self.raw.data(EmbeddedArray::NONE) as *const T
    }

    /// Items not yet yielded.
    pub fn as_slice(&self) -> &[T] {
        if self.front == self.back {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.data().add(self.front), self.back - self.front) }
    }
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.front == self.back {
            return None;
        }
        let value = unsafe { self.data().add(self.front).read() };
        self.front += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.back - self.front;
        (n, Some(n))
    }
}

impl<T> DoubleEndedIterator for IntoIter<T> {
    fn next_back(&mut self) -> Option<T> {
        if self.front == self.back {
            return None;
        }
        self.back -= 1;
        Some(unsafe { self.data().add(self.back).read() })
    }
}

impl<T> ExactSizeIterator for IntoIter<T> {}

impl<T> FusedIterator for IntoIter<T> {}

impl<T> Drop for IntoIter<T> {
    fn drop(&mut self) {
        let remaining = std::ptr::slice_from_raw_parts_mut(
            (self.data() as *mut T).wrapping_add(self.front),
            self.back - self.front,
        );
        // Yielded items are gone already; the array is released without them.
        self.raw.base_mut().len = 0;
        if self.front != self.back {
            unsafe { std::ptr::drop_in_place(remaining) };
        }
        unsafe { self.raw.destruct(&ops::<T>(), EmbeddedArray::NONE) };
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for IntoIter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("IntoIter").field(&self.as_slice()).finish()
    }
}

