use vextr_common::Result;

use crate::raw::{EmbeddedArray, RawTrivialVextr, RawVextr};

use super::{BYTE, IStr, MStr, text};

/// Mutable string that keeps its text in a heap array.
pub struct DmStr {
    raw: RawTrivialVextr,
}

unsafe impl Send for DmStr {}
unsafe impl Sync for DmStr {}

impl DmStr {
    pub const fn new() -> DmStr {
        DmStr {
            raw: RawTrivialVextr::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Result<DmStr> {
        let mut s = DmStr::new();
        s.set_capacity(capacity, false)?;
        Ok(s)
    }

    pub fn as_mstr(&mut self) -> MStr<'_> {
        unsafe { MStr::new(&mut self.raw, EmbeddedArray::NONE) }
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

    pub fn as_str(&self) -> &str {
        unsafe { text(&self.raw, EmbeddedArray::NONE) }
    }

    fn emb_mut(&mut self) -> EmbeddedArray {
        EmbeddedArray::NONE
    }

    fn raw_ref(&self) -> &RawVextr {
        &self.raw
    }

    super::forward_mutators!();

    /// Freezes the string, handing its array over without copying.
    pub fn into_istr(mut self) -> IStr {
        let mut s = IStr::new();
        unsafe { s.raw_mut().assign_move(BYTE, EmbeddedArray::NONE, &mut self.raw) };
        s
    }

    /// Builds a mutable string from an immutable one. A heap array is taken over; a
    /// borrowed one is copied.
    pub fn from_istr(mut s: IStr) -> Result<DmStr> {
        let mut dm = DmStr::new();
        if s.is_borrowed() {
            dm.assign(s.as_str())?;
        } else {
            unsafe { dm.raw.assign_move(BYTE, EmbeddedArray::NONE, s.raw_mut()) };
        }
        Ok(dm)
    }

    pub(crate) fn raw_mut(&mut self) -> &mut RawTrivialVextr {
        &mut self.raw
    }
}

impl Drop for DmStr {
    fn drop(&mut self) {
        unsafe { self.raw.release(BYTE, EmbeddedArray::NONE) };
    }
}

impl From<IStr> for DmStr {
    fn from(s: IStr) -> Self {
        crate::vector::or_panic(DmStr::from_istr(s))
    }
}

impl From<String> for DmStr {
    fn from(s: String) -> Self {
        DmStr::from(s.as_str())
    }
}

super::impl_string_traits!([] DmStr);
super::impl_owned_mutable_traits!([] DmStr);
