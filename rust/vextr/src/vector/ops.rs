//! Concatenation operators.
//!
//! `a + b` always yields a [`DmVector`]. An operand passed by value gives up its
//! items: a left operand is extended in place, and a right operand's items are moved
//! rather than copied. Borrowed operands are copied. Allocation failure panics; use
//! [`MVector::assign_concat`](super::MVector::assign_concat) to handle it.

use std::ops::{Add, AddAssign};

use crate::raw::Source;

use super::{DmVector, IVector, SmVector, or_panic};

fn copied<T>(items: &[T]) -> Source {
    Source::copy(items.as_ptr() as *const u8, items.len())
}

impl<T: Clone, R: AsRef<[T]> + ?Sized> Add<&R> for DmVector<T> {
    type Output = DmVector<T>;

    fn add(mut self, rhs: &R) -> DmVector<T> {
        or_panic(self.extend_from_slice(rhs.as_ref()));
        self
    }
}

impl<T> Add<DmVector<T>> for DmVector<T> {
    type Output = DmVector<T>;

    fn add(mut self, rhs: DmVector<T>) -> DmVector<T> {
        let mut rhs = rhs;
        or_panic(self.append(&mut rhs.as_mvector()));
        self
    }
}

/// Concatenates a borrowed left operand with a right operand given by value.
fn concat_moving_rhs<T: Clone>(lhs: &[T], mut rhs: DmVector<T>) -> DmVector<T> {
    let moved = Source::moved(rhs.as_ptr() as *const u8, rhs.len());
    let v = or_panic(DmVector::concat_sources(copied(lhs), moved));
    // The items now belong to `v`; only the array of `rhs` is left to release.
    rhs.raw_mut().base_mut().len = 0;
    v
}

macro_rules! impl_borrowed_concat {
    ([$($gen:tt)*] $ty:ty) => {
        impl<'l, $($gen)*, R> Add<&R> for &'l $ty
        where
            T: Clone,
            R: AsRef<[T]> + ?Sized,
        {
            type Output = DmVector<T>;

            fn add(self, rhs: &R) -> DmVector<T> {
                or_panic(DmVector::concat_sources(copied(self.as_slice()), copied(rhs.as_ref())))
            }
        }

        impl<'l, $($gen)*> Add<DmVector<T>> for &'l $ty
        where
            T: Clone,
        {
            type Output = DmVector<T>;

            fn add(self, rhs: DmVector<T>) -> DmVector<T> {
                concat_moving_rhs(self.as_slice(), rhs)
            }
        }
    };
}

impl_borrowed_concat!([T] DmVector<T>);
impl_borrowed_concat!([T] IVector<T>);
impl_borrowed_concat!([T, const N: usize] SmVector<T, N>);

impl<T: Clone, R: AsRef<[T]> + ?Sized> AddAssign<&R> for DmVector<T> {
    fn add_assign(&mut self, rhs: &R) {
        or_panic(self.extend_from_slice(rhs.as_ref()));
    }
}

impl<T: Clone, R: AsRef<[T]> + ?Sized, const N: usize> AddAssign<&R> for SmVector<T, N> {
    fn add_assign(&mut self, rhs: &R) {
        or_panic(self.extend_from_slice(rhs.as_ref()));
    }
}

impl<T> AddAssign<DmVector<T>> for DmVector<T> {
    fn add_assign(&mut self, rhs: DmVector<T>) {
        let mut rhs = rhs;
        or_panic(self.append(&mut rhs.as_mvector()));
    }
}

impl<T, const N: usize> AddAssign<DmVector<T>> for SmVector<T, N> {
    fn add_assign(&mut self, rhs: DmVector<T>) {
        let mut rhs = rhs;
        or_panic(self.append(&mut rhs.as_mvector()));
    }
}
