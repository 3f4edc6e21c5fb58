use std::mem::MaybeUninit;

use vextr_common::Result;

use crate::raw::{EmbeddedArray, RawComplexVextr};

use super::{DmVector, MVector, assert_sized_items, items, items_mut, ops};

/// Mutable vector with an embedded array of `N` items.
///
/// Up to `N` items live inside the value itself; beyond that the items move to a heap
/// array, which is kept until [`shrink_to_fit`](SmVector::shrink_to_fit) is called.
/// Moving an `SmVector` moves its embedded items along with it.
pub struct SmVector<T, const N: usize> {
    raw: RawComplexVextr,
    embedded: [MaybeUninit<T>; N],
}

unsafe impl<T: Send, const N: usize> Send for SmVector<T, N> {}
unsafe impl<T: Sync, const N: usize> Sync for SmVector<T, N> {}

impl<T, const N: usize> SmVector<T, N> {
    pub const fn new() -> SmVector<T, N> {
        const { assert_sized_items::<T>() };
        SmVector {
            raw: if N > 0 {
                RawComplexVextr::with_embedded()
            } else {
                RawComplexVextr::new()
            },
            embedded: [const { MaybeUninit::uninit() }; N],
        }
    }

    pub fn from_slice(items: &[T]) -> Result<SmVector<T, N>>
    where
        T: Clone,
    {
        let mut v = SmVector::new();
        v.assign_slice(items)?;
        Ok(v)
    }

    #[inline]
    fn emb(&self) -> EmbeddedArray {
        if N == 0 {
            EmbeddedArray::NONE
        } else {
            unsafe { EmbeddedArray::new(self.embedded.as_ptr() as *mut u8, N) }
        }
    }

    #[inline]
    fn emb_mut(&mut self) -> EmbeddedArray {
        if N == 0 {
            EmbeddedArray::NONE
        } else {
            unsafe { EmbeddedArray::new(self.embedded.as_mut_ptr() as *mut u8, N) }
        }
    }

    pub fn as_mvector(&mut self) -> MVector<'_, T> {
        let emb = self.emb_mut();
        unsafe { MVector::new(&mut self.raw, emb) }
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
        self.raw.capacity(self.emb())
    }

    /// Returns `true` while the items are kept in the embedded array (or there are
    /// none yet).
    pub fn is_inline(&self) -> bool {
        !self.raw.descriptor().is_dynamic()
    }

    pub fn as_slice(&self) -> &[T] {
        unsafe { items(&self.raw, self.emb()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let emb = self.emb_mut();
        unsafe { items_mut(&self.raw, emb) }
    }

    super::forward_mutators!();

    /// Moves the items into a heap-owned vector. A heap array is handed over as is.
    pub fn into_dm_vector(mut self) -> Result<DmVector<T>> {
        let mut dm = DmVector::new();
        dm.take_from(&mut self.as_mvector())?;
        Ok(dm)
    }
}

impl<T, const N: usize> Drop for SmVector<T, N> {
    fn drop(&mut self) {
        let emb = self.emb_mut();
        unsafe { self.raw.destruct(&ops::<T>(), emb) };
    }
}

super::impl_vector_traits!([T, const N: usize] SmVector<T, N>);
super::impl_owned_mutable_traits!([T, const N: usize] SmVector<T, N>);
