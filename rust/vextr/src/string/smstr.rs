use std::mem::MaybeUninit;

use vextr_common::Result;

use crate::raw::{EmbeddedArray, RawTrivialVextr, RawVextr};

use super::{BYTE, DmStr, MStr, text};

/// Mutable string with an embedded array of `N` bytes.
///
/// The terminator written by [`c_str`](SmStr::c_str) takes a byte of the embedded
/// array too, so text of exactly `N` bytes moves to the heap when a C string view is
/// requested.
pub struct SmStr<const N: usize> {
    raw: RawTrivialVextr,
    embedded: [MaybeUninit<u8>; N],
}

unsafe impl<const N: usize> Send for SmStr<N> {}
unsafe impl<const N: usize> Sync for SmStr<N> {}

impl<const N: usize> SmStr<N> {
    pub const fn new() -> SmStr<N> {
        SmStr {
            raw: if N > 0 {
                RawTrivialVextr::with_embedded()
            } else {
                RawTrivialVextr::new()
            },
            embedded: [MaybeUninit::uninit(); N],
        }
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

    fn raw_ref(&self) -> &RawVextr {
        &self.raw
    }

    pub fn as_mstr(&mut self) -> MStr<'_> {
        let emb = self.emb_mut();
        unsafe { MStr::new(&mut self.raw, emb) }
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

    /// Returns `true` while the text is kept in the embedded array (or is empty).
    pub fn is_inline(&self) -> bool {
        !self.raw.descriptor().is_dynamic()
    }

    pub fn as_str(&self) -> &str {
        unsafe { text(&self.raw, self.emb()) }
    }

    super::forward_mutators!();

    /// Moves the text into a heap-owned string. A heap array is handed over as is.
    pub fn into_dm_str(mut self) -> Result<DmStr> {
        let mut dm = DmStr::new();
        dm.take_from(&mut self.as_mstr())?;
        Ok(dm)
    }
}

impl<const N: usize> Drop for SmStr<N> {
    fn drop(&mut self) {
        let emb = self.emb_mut();
        unsafe { self.raw.release(BYTE, emb) };
    }
}

super::impl_string_traits!([const N: usize,] SmStr<N>);
super::impl_owned_mutable_traits!([const N: usize,] SmStr<N>);
