//! Growable arrays in four ownership tiers.
//!
//! - [`IVector`]: immutable; either borrows a `'static` array (copying the vector
//!   then costs nothing) or owns a heap array.
//! - [`MVector`]: a mutable view of any concrete mutable vector. Functions that edit a
//!   vector in place take this so that they work with every storage kind.
//! - [`DmVector`]: mutable, heap-owned.
//! - [`SmVector`]: mutable, with an embedded array of `N` items used before anything
//!   is allocated.
//!
//! `DmVector` and `SmVector` are unrelated types: a small vector is never silently
//! turned into a heap vector. Moving items between them goes through explicit calls
//! such as [`MVector::take_from`].
//!
//! All vectors dereference to slices, which is where reading, searching, sorting
//! and iteration come from; [`SliceExt`](crate::SliceExt) adds negative indexing.
//! Zero-sized item types are not supported.

use std::ptr::NonNull;

use vextr_common::Result;

use crate::raw::{EmbeddedArray, RawVextr, TypeOps};

mod dmvector;
mod ivector;
mod mvector;
mod ops;
mod smvector;

pub use dmvector::{DmVector, IntoIter};
pub use ivector::IVector;
pub use mvector::MVector;
pub use smvector::SmVector;

pub(crate) const fn assert_sized_items<T>() {
    assert!(
        std::mem::size_of::<T>() != 0,
        "vectors of zero-sized items are not supported"
    );
}

/// Item operations for moving and destructing `T`.
#[inline]
pub(crate) fn ops<T>() -> TypeOps {
    TypeOps::of::<T>()
}

/// Item operations that can also copy `T`.
#[inline]
pub(crate) fn copy_ops<T: Clone>() -> TypeOps {
    TypeOps::cloneable::<T>()
}

/// # Safety
///
/// The buffer must hold initialized items of type `T`, and `emb` must belong to it.
pub(crate) unsafe fn items<'a, T>(raw: &RawVextr, emb: EmbeddedArray) -> &'a [T] {
    let data = raw.data(emb) as *mut T;
    match NonNull::new(data) {
        Some(data) if raw.len() > 0 => unsafe { std::slice::from_raw_parts(data.as_ptr(), raw.len()) },
        _ => &[],
    }
}

/// # Safety
///
/// As for [`items`], and the buffer's array must be writable.
pub(crate) unsafe fn items_mut<'a, T>(raw: &RawVextr, emb: EmbeddedArray) -> &'a mut [T] {
    let data = raw.data(emb) as *mut T;
    match NonNull::new(data) {
        Some(data) if raw.len() > 0 => unsafe {
            std::slice::from_raw_parts_mut(data.as_ptr(), raw.len())
        },
        _ => &mut [],
    }
}

/// Unwraps the result of an operation whose std trait signature cannot report
/// failure. Allocation failure then aborts the operation like it does for `Vec`.
#[track_caller]
pub(crate) fn or_panic<R>(result: Result<R>) -> R {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{e}"),
    }
}

/// Formats items as `{a, b, c}`.
pub(crate) fn display_items<T: std::fmt::Display>(
    items: &[T],
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    f.write_str("{")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        std::fmt::Display::fmt(item, f)?;
    }
    f.write_str("}")
}

/// Mutating methods of a concrete vector, forwarded to its [`MVector`] view.
macro_rules! forward_mutators {
    () => {
        /// Appends `value` at the end.
        pub fn push(&mut self, value: T) -> $crate::Result<()> {
            self.as_mvector().push(value)
        }

        /// Removes and returns the last item.
        pub fn pop(&mut self) -> Option<T> {
            self.as_mvector().pop()
        }

        /// Inserts `value` before `index`; `index` may be negative and may designate
        /// the end.
        pub fn insert(&mut self, index: isize, value: T) -> $crate::Result<()> {
            self.as_mvector().insert(index, value)
        }

        /// Inserts `value` before the item at `position` (or at the end).
        pub fn insert_at(&mut self, position: usize, value: T) -> $crate::Result<()> {
            self.as_mvector().insert_at(position, value)
        }

        pub fn insert_slice(&mut self, index: isize, items: &[T]) -> $crate::Result<()>
        where
            T: Clone,
        {
            self.as_mvector().insert_slice(index, items)
        }

        pub fn extend_from_slice(&mut self, items: &[T]) -> $crate::Result<()>
        where
            T: Clone,
        {
            self.as_mvector().extend_from_slice(items)
        }

        pub fn extend_from_within(&mut self, begin: isize, end: isize) -> $crate::Result<()>
        where
            T: Clone,
        {
            self.as_mvector().extend_from_within(begin, end)
        }

        /// Moves the items of `vec` to the end.
        pub fn append_vec(&mut self, vec: Vec<T>) -> $crate::Result<()> {
            self.as_mvector().append_vec(vec)
        }

        /// Moves all items of `other` to the end, leaving `other` empty.
        pub fn append(&mut self, other: &mut $crate::vector::MVector<'_, T>) -> $crate::Result<()> {
            self.as_mvector().append(other)
        }

        /// Removes and returns the item at `index` (negative counts from the end).
        pub fn remove(&mut self, index: isize) -> $crate::Result<T> {
            self.as_mvector().remove(index)
        }

        pub fn remove_at(&mut self, position: usize) -> $crate::Result<T> {
            self.as_mvector().remove_at(position)
        }

        /// Removes the items in `begin..end`; both bounds may be negative.
        pub fn remove_range(&mut self, begin: isize, end: isize) -> $crate::Result<()> {
            self.as_mvector().remove_range(begin, end)
        }

        pub fn truncate(&mut self, len: usize) {
            self.as_mvector().truncate(len)
        }

        pub fn clear(&mut self) {
            self.as_mvector().clear()
        }

        /// Replaces the contents with copies of `items`.
        pub fn assign_slice(&mut self, items: &[T]) -> $crate::Result<()>
        where
            T: Clone,
        {
            self.as_mvector().assign_slice(items)
        }

        /// Replaces the contents with copies of `a` followed by copies of `b`.
        pub fn assign_concat(&mut self, a: &[T], b: &[T]) -> $crate::Result<()>
        where
            T: Clone,
        {
            self.as_mvector().assign_concat(a, b)
        }

        /// Takes all items of `src`, by array transfer when possible.
        pub fn take_from(&mut self, src: &mut $crate::vector::MVector<'_, T>) -> $crate::Result<()> {
            self.as_mvector().take_from(src)
        }

        pub fn set_capacity(&mut self, min: usize, preserve: bool) -> $crate::Result<()> {
            self.as_mvector().set_capacity(min, preserve)
        }

        pub fn reserve(&mut self, additional: usize) -> $crate::Result<()> {
            self.as_mvector().reserve(additional)
        }

        pub fn resize(&mut self, new_len: usize, value: T) -> $crate::Result<()>
        where
            T: Clone,
        {
            self.as_mvector().resize(new_len, value)
        }

        pub fn resize_with(&mut self, new_len: usize, f: impl FnMut() -> T) -> $crate::Result<()> {
            self.as_mvector().resize_with(new_len, f)
        }

        /// Sets the number of items, filling new slots with `T::default()`.
        pub fn set_size(&mut self, new_len: usize) -> $crate::Result<()>
        where
            T: Default,
        {
            self.as_mvector().set_size(new_len)
        }

        pub fn shrink_to_fit(&mut self) -> $crate::Result<()> {
            self.as_mvector().shrink_to_fit()
        }
    };
}

/// Comparison, hashing and formatting for a vector type, all in terms of its items.
macro_rules! impl_vector_traits {
    ([$($gen:tt)*] $ty:ty) => {
        impl<$($gen)*> std::ops::Deref for $ty {
            type Target = [T];

            fn deref(&self) -> &[T] {
                self.as_slice()
            }
        }

        impl<$($gen)*> AsRef<[T]> for $ty {
            fn as_ref(&self) -> &[T] {
                self.as_slice()
            }
        }

        impl<$($gen)*> std::borrow::Borrow<[T]> for $ty {
            fn borrow(&self) -> &[T] {
                self.as_slice()
            }
        }

        impl<$($gen)*> std::fmt::Debug for $ty
        where
            T: std::fmt::Debug,
        {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_list().entries(self.as_slice()).finish()
            }
        }

        impl<$($gen)*> std::fmt::Display for $ty
        where
            T: std::fmt::Display,
        {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                $crate::vector::display_items(self.as_slice(), f)
            }
        }

        impl<$($gen)*, R> PartialEq<R> for $ty
        where
            T: PartialEq,
            R: AsRef<[T]> + ?Sized,
        {
            fn eq(&self, other: &R) -> bool {
                self.as_slice() == other.as_ref()
            }
        }

        impl<$($gen)*> Eq for $ty where T: Eq {}

        impl<$($gen)*> PartialOrd for $ty
        where
            T: PartialOrd,
        {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                self.as_slice().partial_cmp(other.as_slice())
            }
        }

        impl<$($gen)*> Ord for $ty
        where
            T: Ord,
        {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.as_slice().cmp(other.as_slice())
            }
        }

        impl<$($gen)*> std::hash::Hash for $ty
        where
            T: std::hash::Hash,
        {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                std::hash::Hash::hash(self.as_slice(), state)
            }
        }

        impl<'v, $($gen)*> IntoIterator for &'v $ty {
            type Item = &'v T;
            type IntoIter = std::slice::Iter<'v, T>;

            fn into_iter(self) -> Self::IntoIter {
                self.as_slice().iter()
            }
        }
    };
}

/// Mutable access and collection traits for the owning mutable vectors.
macro_rules! impl_owned_mutable_traits {
    ([$($gen:tt)*] $ty:ty) => {
        impl<$($gen)*> std::ops::DerefMut for $ty {
            fn deref_mut(&mut self) -> &mut [T] {
                self.as_mut_slice()
            }
        }

        impl<$($gen)*> AsMut<[T]> for $ty {
            fn as_mut(&mut self) -> &mut [T] {
                self.as_mut_slice()
            }
        }

        impl<'v, $($gen)*> IntoIterator for &'v mut $ty {
            type Item = &'v mut T;
            type IntoIter = std::slice::IterMut<'v, T>;

            fn into_iter(self) -> Self::IntoIter {
                self.as_mut_slice().iter_mut()
            }
        }

        impl<$($gen)*> Extend<T> for $ty {
            fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
                let iter = iter.into_iter();
                $crate::vector::or_panic(self.reserve(iter.size_hint().0));
                for value in iter {
                    $crate::vector::or_panic(self.push(value));
                }
            }
        }

        impl<'v, $($gen)*> Extend<&'v T> for $ty
        where
            T: Copy + 'v,
        {
            fn extend<I: IntoIterator<Item = &'v T>>(&mut self, iter: I) {
                self.extend(iter.into_iter().copied())
            }
        }

        impl<$($gen)*> FromIterator<T> for $ty {
            fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
                let mut v = Self::new();
                v.extend(iter);
                v
            }
        }

        impl<$($gen)*> From<Vec<T>> for $ty {
            fn from(vec: Vec<T>) -> Self {
                let mut v = Self::new();
                $crate::vector::or_panic(v.append_vec(vec));
                v
            }
        }

        impl<$($gen)*> From<&[T]> for $ty
        where
            T: Clone,
        {
            fn from(items: &[T]) -> Self {
                $crate::vector::or_panic(Self::from_slice(items))
            }
        }

        impl<$($gen)*> Clone for $ty
        where
            T: Clone,
        {
            fn clone(&self) -> Self {
                $crate::vector::or_panic(Self::from_slice(self.as_slice()))
            }

            fn clone_from(&mut self, source: &Self) {
                $crate::vector::or_panic(self.assign_slice(source.as_slice()))
            }
        }

        impl<$($gen)*> Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

pub(crate) use forward_mutators;
pub(crate) use impl_owned_mutable_traits;
pub(crate) use impl_vector_traits;
