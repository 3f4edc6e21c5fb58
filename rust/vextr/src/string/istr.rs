use std::ffi::CStr;

use vextr_common::Result;

use crate::raw::{EmbeddedArray, RawTrivialVextr, Storage};

use super::{BYTE, DmStr, text};

/// Immutable string.
///
/// Built from `'static` text it borrows that text, and cloning it only copies the
/// pointer. Otherwise it owns a heap array, typically handed over by a [`DmStr`].
pub struct IStr {
    raw: RawTrivialVextr,
}

unsafe impl Send for IStr {}
unsafe impl Sync for IStr {}

impl IStr {
    pub const fn new() -> IStr {
        IStr {
            raw: RawTrivialVextr::new(),
        }
    }

    /// Borrows `s` without copying.
    pub const fn from_static(s: &'static str) -> IStr {
        IStr {
            raw: unsafe { RawTrivialVextr::from_read_only(s.as_ptr(), s.len(), false) },
        }
    }

    /// Borrows a C string without copying. Its terminator is reused by
    /// [`c_str`](IStr::c_str).
    ///
    /// Fails if the bytes are not UTF-8.
    pub fn from_c_str(s: &'static CStr) -> Result<IStr> {
        let text = s
            .to_str()
            .map_err(|_| vextr_common::Error::invalid_arg("s", "valid UTF-8"))?;
        Ok(IStr {
            raw: unsafe { RawTrivialVextr::from_read_only(text.as_ptr(), text.len(), true) },
        })
    }

    pub fn copy_from(s: &str) -> Result<IStr> {
        let mut text = IStr::new();
        unsafe {
            text.raw
                .assign_copy(BYTE, EmbeddedArray::NONE, s.as_ptr(), s.len())?
        };
        Ok(text)
    }

    /// Builds `a ++ b`.
    pub fn concat(a: &str, b: &str) -> Result<IStr> {
        let mut dm = DmStr::new();
        dm.assign_concat(a, b)?;
        Ok(dm.into_istr())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn as_str(&self) -> &str {
        unsafe { text(&self.raw, EmbeddedArray::NONE) }
    }

    /// Returns `true` if the text lives in a borrowed `'static` array.
    pub fn is_borrowed(&self) -> bool {
        self.raw.storage() == Storage::ReadOnly
    }

    /// NUL-terminated view of the text.
    ///
    /// Borrowed text without a terminator is copied into a heap array first; owned
    /// text gets the terminator past its last byte.
    pub fn c_str(&mut self) -> Result<&CStr> {
        unsafe {
            self.raw.ensure_nul_terminated(BYTE, EmbeddedArray::NONE)?;
            super::c_str(&self.raw, EmbeddedArray::NONE)
        }
    }

    pub fn to_dm_str(&self) -> Result<DmStr> {
        let mut dm = DmStr::new();
        dm.assign(self.as_str())?;
        Ok(dm)
    }

    pub(crate) fn raw_mut(&mut self) -> &mut RawTrivialVextr {
        &mut self.raw
    }
}

impl Drop for IStr {
    fn drop(&mut self) {
        unsafe { self.raw.release(BYTE, EmbeddedArray::NONE) };
    }
}

impl Clone for IStr {
    fn clone(&self) -> Self {
        let mut text = IStr::new();
        crate::vector::or_panic(unsafe {
            text.raw
                .assign_share_raw_or_copy(BYTE, EmbeddedArray::NONE, &self.raw, EmbeddedArray::NONE)
        });
        text
    }
}

impl Default for IStr {
    fn default() -> Self {
        IStr::new()
    }
}

impl From<&'static str> for IStr {
    fn from(s: &'static str) -> Self {
        IStr::from_static(s)
    }
}

impl From<DmStr> for IStr {
    fn from(s: DmStr) -> Self {
        s.into_istr()
    }
}

super::impl_string_traits!([] IStr);
