//! UTF-8 strings on top of the byte-oriented trivial engine.
//!
//! The ownership tiers mirror the [vectors](crate::vector): [`IStr`] (immutable,
//! borrows `'static` text when it can), [`MStr`] (mutable view of any mutable
//! string), [`DmStr`] (heap-owned) and [`SmStr`] (embedded array of `N` bytes).
//!
//! Offsets are in bytes and may be negative, counting from the end. An offset that
//! does not fall on a character boundary is reported as an index error.
//!
//! [`c_str`](MStr::c_str) hands out a NUL-terminated view. The terminator is written
//! past the last byte when there is room, so strings built from `'static` C strings or
//! with spare capacity need no copy.

use std::ffi::CStr;

use vextr_common::{Error, Result};

use crate::raw::{EmbeddedArray, ItemLayout, RawVextr};

mod dmstr;
mod istr;
mod mstr;
mod ops;
mod smstr;

pub use dmstr::DmStr;
pub use istr::IStr;
pub use mstr::MStr;
pub use smstr::SmStr;

pub(crate) const BYTE: ItemLayout = ItemLayout::of::<u8>();

/// # Safety
///
/// The buffer must hold valid UTF-8, and `emb` must belong to it.
pub(crate) unsafe fn text<'a>(raw: &RawVextr, emb: EmbeddedArray) -> &'a str {
    unsafe { std::str::from_utf8_unchecked(bytes(raw, emb)) }
}

/// # Safety
///
/// `emb` must belong to the buffer.
pub(crate) unsafe fn bytes<'a>(raw: &RawVextr, emb: EmbeddedArray) -> &'a [u8] {
    let data = raw.data(emb);
    if data.is_null() || raw.is_empty() {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(data, raw.len()) }
    }
}

/// Views a NUL-terminated buffer as a C string.
///
/// # Safety
///
/// The buffer must be NUL-terminated, and `emb` must belong to it.
pub(crate) unsafe fn c_str<'a>(raw: &RawVextr, emb: EmbeddedArray) -> Result<&'a CStr> {
    debug_assert!(raw.is_nul_terminated());
    let data = raw.data(emb);
    if data.is_null() {
        return Ok(c"");
    }
    let with_nul = unsafe { std::slice::from_raw_parts(data, raw.len() + 1) };
    CStr::from_bytes_with_nul(with_nul)
        .map_err(|_| Error::invalid_operation("C string view of text with an interior NUL"))
}

/// Resolves a possibly negative byte offset (the end included) that must fall on a
/// character boundary.
pub(crate) fn char_offset(s: &str, offset: isize) -> Result<usize> {
    let len = s.len();
    let resolved = if offset < 0 {
        offset.checked_add(len as isize)
    } else {
        Some(offset)
    };
    match resolved {
        Some(i) if i >= 0 && s.is_char_boundary(i as usize) => Ok(i as usize),
        _ => Err(Error::index(offset, len)),
    }
}

/// Mutating methods of a concrete string, forwarded to its [`MStr`] view.
macro_rules! forward_mutators {
    () => {
        pub fn push(&mut self, c: char) -> $crate::Result<()> {
            self.as_mstr().push(c)
        }

        pub fn push_str(&mut self, s: &str) -> $crate::Result<()> {
            self.as_mstr().push_str(s)
        }

        pub fn pop(&mut self) -> Option<char> {
            self.as_mstr().pop()
        }

        /// Inserts `c` at byte `offset` (negative counts from the end).
        pub fn insert(&mut self, offset: isize, c: char) -> $crate::Result<()> {
            self.as_mstr().insert(offset, c)
        }

        pub fn insert_str(&mut self, offset: isize, s: &str) -> $crate::Result<()> {
            self.as_mstr().insert_str(offset, s)
        }

        /// Removes and returns the character at byte `offset`.
        pub fn remove(&mut self, offset: isize) -> $crate::Result<char> {
            self.as_mstr().remove(offset)
        }

        pub fn remove_range(&mut self, begin: isize, end: isize) -> $crate::Result<()> {
            self.as_mstr().remove_range(begin, end)
        }

        /// Replaces the bytes in `begin..end` with `s`.
        pub fn replace_range(&mut self, begin: isize, end: isize, s: &str) -> $crate::Result<()> {
            self.as_mstr().replace_range(begin, end, s)
        }

        pub fn truncate(&mut self, len: usize) -> $crate::Result<()> {
            self.as_mstr().truncate(len)
        }

        pub fn clear(&mut self) {
            self.as_mstr().clear()
        }

        pub fn assign(&mut self, s: &str) -> $crate::Result<()> {
            self.as_mstr().assign(s)
        }

        pub fn assign_concat(&mut self, a: &str, b: &str) -> $crate::Result<()> {
            self.as_mstr().assign_concat(a, b)
        }

        /// Takes the text of `src`, leaving it empty. A heap array is handed over.
        pub fn take_from(&mut self, src: &mut $crate::string::MStr<'_>) -> $crate::Result<()> {
            self.as_mstr().take_from(src)
        }

        pub fn set_capacity(&mut self, min: usize, preserve: bool) -> $crate::Result<()> {
            self.as_mstr().set_capacity(min, preserve)
        }

        pub fn reserve(&mut self, additional: usize) -> $crate::Result<()> {
            self.as_mstr().reserve(additional)
        }

        /// Sets the length in bytes, padding with the ASCII byte `fill`.
        pub fn resize(&mut self, new_len: usize, fill: u8) -> $crate::Result<()> {
            self.as_mstr().resize(new_len, fill)
        }

        pub fn shrink_to_fit(&mut self) -> $crate::Result<()> {
            self.as_mstr().shrink_to_fit()
        }

        /// NUL-terminated view of the text, written in place when there is room.
        pub fn c_str(&mut self) -> $crate::Result<&std::ffi::CStr> {
            let emb = self.emb_mut();
            self.as_mstr().ensure_nul_terminated()?;
            unsafe { $crate::string::c_str(self.raw_ref(), emb) }
        }
    };
}

/// Comparison, hashing and formatting for a string type, all in terms of its text.
macro_rules! impl_string_traits {
    ([$($gen:tt)*] $ty:ty) => {
        impl<$($gen)*> std::ops::Deref for $ty {
            type Target = str;

            fn deref(&self) -> &str {
                self.as_str()
            }
        }

        impl<$($gen)*> AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl<$($gen)*> AsRef<[u8]> for $ty {
            fn as_ref(&self) -> &[u8] {
                self.as_str().as_bytes()
            }
        }

        impl<$($gen)*> std::borrow::Borrow<str> for $ty {
            fn borrow(&self) -> &str {
                self.as_str()
            }
        }

        impl<$($gen)*> std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Debug::fmt(self.as_str(), f)
            }
        }

        impl<$($gen)*> std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl<$($gen)* R> PartialEq<R> for $ty
        where
            R: AsRef<str> + ?Sized,
        {
            fn eq(&self, other: &R) -> bool {
                self.as_str() == other.as_ref()
            }
        }

        impl<$($gen)*> Eq for $ty {}

        impl<$($gen)*> PartialOrd for $ty {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl<$($gen)*> Ord for $ty {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.as_str().cmp(other.as_str())
            }
        }

        impl<$($gen)*> std::hash::Hash for $ty {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                std::hash::Hash::hash(self.as_str(), state)
            }
        }
    };
}

/// Construction and editing traits for the owning mutable strings.
macro_rules! impl_owned_mutable_traits {
    ([$($gen:tt)*] $ty:ty) => {
        impl<$($gen)*> std::fmt::Write for $ty {
            fn write_str(&mut self, s: &str) -> std::fmt::Result {
                self.push_str(s).map_err(|_| std::fmt::Error)
            }
        }

        impl<$($gen)*> From<&str> for $ty {
            fn from(s: &str) -> Self {
                $crate::vector::or_panic(<Self as std::str::FromStr>::from_str(s))
            }
        }

        impl<$($gen)*> std::str::FromStr for $ty {
            type Err = $crate::Error;

            fn from_str(s: &str) -> $crate::Result<Self> {
                let mut text = Self::new();
                text.assign(s)?;
                Ok(text)
            }
        }

        impl<$($gen)*> Extend<char> for $ty {
            fn extend<I: IntoIterator<Item = char>>(&mut self, iter: I) {
                for c in iter {
                    $crate::vector::or_panic(self.push(c));
                }
            }
        }

        impl<'s, $($gen)*> Extend<&'s str> for $ty {
            fn extend<I: IntoIterator<Item = &'s str>>(&mut self, iter: I) {
                for s in iter {
                    $crate::vector::or_panic(self.push_str(s));
                }
            }
        }

        impl<$($gen)*> FromIterator<char> for $ty {
            fn from_iter<I: IntoIterator<Item = char>>(iter: I) -> Self {
                let mut text = Self::new();
                text.extend(iter);
                text
            }
        }

        impl<$($gen)*> Clone for $ty {
            fn clone(&self) -> Self {
                $crate::vector::or_panic(<Self as std::str::FromStr>::from_str(self.as_str()))
            }

            fn clone_from(&mut self, source: &Self) {
                $crate::vector::or_panic(self.assign(source.as_str()))
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
pub(crate) use impl_string_traits;
