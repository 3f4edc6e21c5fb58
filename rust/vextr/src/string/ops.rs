//! Concatenation operators. `a + b` yields a [`DmStr`]; a left operand passed by value
//! is extended in place, and a right operand passed by value lends its array when it
//! has room for the result.

use std::ops::{Add, AddAssign};

use crate::vector::or_panic;

use super::{DmStr, IStr, SmStr};

impl<R: AsRef<str> + ?Sized> Add<&R> for DmStr {
    type Output = DmStr;

    fn add(mut self, rhs: &R) -> DmStr {
        or_panic(self.push_str(rhs.as_ref()));
        self
    }
}

impl Add<DmStr> for DmStr {
    type Output = DmStr;

    fn add(mut self, rhs: DmStr) -> DmStr {
        or_panic(self.push_str(rhs.as_str()));
        self
    }
}

fn concat_into_rhs(lhs: &str, mut rhs: DmStr) -> DmStr {
    or_panic(rhs.insert_str(0, lhs));
    rhs
}

macro_rules! impl_borrowed_concat {
    ([$($gen:tt)*] $ty:ty) => {
        impl<'l, $($gen)* R> Add<&R> for &'l $ty
        where
            R: AsRef<str> + ?Sized,
        {
            type Output = DmStr;

            fn add(self, rhs: &R) -> DmStr {
                let mut s = DmStr::new();
                or_panic(s.assign_concat(self.as_str(), rhs.as_ref()));
                s
            }
        }

        impl<'l, $($gen)*> Add<DmStr> for &'l $ty {
            type Output = DmStr;

            fn add(self, rhs: DmStr) -> DmStr {
                concat_into_rhs(self.as_str(), rhs)
            }
        }
    };
}

impl_borrowed_concat!([] DmStr);
impl_borrowed_concat!([] IStr);
impl_borrowed_concat!([const N: usize,] SmStr<N>);

impl<R: AsRef<str> + ?Sized> AddAssign<&R> for DmStr {
    fn add_assign(&mut self, rhs: &R) {
        or_panic(self.push_str(rhs.as_ref()));
    }
}

impl<R: AsRef<str> + ?Sized, const N: usize> AddAssign<&R> for SmStr<N> {
    fn add_assign(&mut self, rhs: &R) {
        or_panic(self.push_str(rhs.as_ref()));
    }
}
