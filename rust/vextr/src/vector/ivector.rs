use vextr_common::Result;

use crate::raw::{EmbeddedArray, RawComplexVextr, Storage};

use super::{DmVector, assert_sized_items, copy_ops, items, ops};

/// Immutable vector.
///
/// Built from a `'static` array it borrows that array, and cloning it only copies
/// the pointer. Otherwise it owns a heap array, typically handed over by a
/// [`DmVector`].
pub struct IVector<T> {
    raw: RawComplexVextr,
    _marker: std::marker::PhantomData<T>,
}

// Clones may share a borrowed array across threads.
unsafe impl<T: Send + Sync> Send for IVector<T> {}
unsafe impl<T: Sync> Sync for IVector<T> {}

impl<T> IVector<T> {
    pub const fn new() -> IVector<T> {
        const { assert_sized_items::<T>() };
        IVector {
            raw: RawComplexVextr::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Borrows `items` without copying.
    pub const fn from_static(items: &'static [T]) -> IVector<T> {
        const { assert_sized_items::<T>() };
        IVector {
            raw: unsafe { RawComplexVextr::from_read_only(items.as_ptr() as *const u8, items.len()) },
            _marker: std::marker::PhantomData,
        }
    }

    pub fn from_slice(items: &[T]) -> Result<IVector<T>>
    where
        T: Clone,
    {
        let mut v = IVector::new();
        unsafe {
            v.raw.assign_copy(
                &copy_ops::<T>(),
                EmbeddedArray::NONE,
                items.as_ptr() as *const u8,
                items.len(),
            )?
        };
        Ok(v)
    }

    /// Builds `a ++ b`.
    pub fn concat(a: &[T], b: &[T]) -> Result<IVector<T>>
    where
        T: Clone,
    {
        let mut dm = DmVector::new();
        dm.assign_concat(a, b)?;
        Ok(dm.into_ivector())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn storage(&self) -> Storage {
        self.raw.storage()
    }

    /// Returns `true` if the items live in a borrowed `'static` array.
    pub fn is_borrowed(&self) -> bool {
        self.storage() == Storage::ReadOnly
    }

    pub fn as_slice(&self) -> &[T] {
        unsafe { items(&self.raw, EmbeddedArray::NONE) }
    }

    /// Makes a mutable copy.
    pub fn to_dm_vector(&self) -> Result<DmVector<T>>
    where
        T: Clone,
    {
        DmVector::from_slice(self.as_slice())
    }

    pub(crate) fn raw_mut(&mut self) -> &mut RawComplexVextr {
        &mut self.raw
    }
}

impl<T> Drop for IVector<T> {
    fn drop(&mut self) {
        unsafe { self.raw.destruct(&ops::<T>(), EmbeddedArray::NONE) };
    }
}

impl<T: Clone> Clone for IVector<T> {
    fn clone(&self) -> Self {
        if self.is_borrowed() {
            IVector {
                raw: unsafe {
                    RawComplexVextr::from_read_only(
                        self.raw.data(EmbeddedArray::NONE),
                        self.raw.len(),
                    )
                },
                _marker: std::marker::PhantomData,
            }
        } else {
            super::or_panic(IVector::from_slice(self.as_slice()))
        }
    }
}

impl<T> Default for IVector<T> {
    fn default() -> Self {
        IVector::new()
    }
}

impl<T> From<DmVector<T>> for IVector<T> {
    fn from(v: DmVector<T>) -> Self {
        v.into_ivector()
    }
}

impl<T> From<Vec<T>> for IVector<T> {
    fn from(vec: Vec<T>) -> Self {
        DmVector::from(vec).into_ivector()
    }
}

impl<T> FromIterator<T> for IVector<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        iter.into_iter().collect::<DmVector<T>>().into_ivector()
    }
}

super::impl_vector_traits!([T] IVector<T>);
