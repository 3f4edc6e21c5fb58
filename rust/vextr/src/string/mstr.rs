use std::ffi::CStr;

use vextr_common::{Error, Result, verify_arg};

use crate::raw::{EmbeddedArray, RawTrivialVextr, Source, Storage, policy};

use super::{BYTE, char_offset, text};

/// Mutable view of a string of any storage kind.
///
/// Obtained from [`DmStr::as_mstr`](super::DmStr::as_mstr) or
/// [`SmStr::as_mstr`](super::SmStr::as_mstr). The buffer behind it always holds valid
/// UTF-8 and never borrows a read-only array.
pub struct MStr<'a> {
    raw: &'a mut RawTrivialVextr,
    emb: EmbeddedArray,
}

impl<'a> MStr<'a> {
    /// # Safety
    ///
    /// `raw` must hold UTF-8 text and no read-only array, and `emb` must be the
    /// embedded array of the container owning it, valid for `'a`.
    pub(crate) unsafe fn new(raw: &'a mut RawTrivialVextr, emb: EmbeddedArray) -> MStr<'a> {
        debug_assert_ne!(raw.storage(), Storage::ReadOnly);
        MStr { raw, emb }
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
        self.raw.capacity(self.emb)
    }

    pub fn as_str(&self) -> &str {
        unsafe { text(&**self.raw, self.emb) }
    }

    fn replace_bytes(&mut self, offset: usize, remove: usize, s: &str) -> Result<()> {
        let src = Source::copy(s.as_ptr(), s.len());
        unsafe { self.raw.insert_remove(BYTE, self.emb, offset, src, remove) }
    }

    pub fn push(&mut self, c: char) -> Result<()> {
        let mut buf = [0u8; 4];
        self.push_str(c.encode_utf8(&mut buf))
    }

    pub fn push_str(&mut self, s: &str) -> Result<()> {
        let len = self.len();
        self.replace_bytes(len, 0, s)
    }

    pub fn pop(&mut self) -> Option<char> {
        let c = self.as_str().chars().next_back()?;
        let new_len = self.len() - c.len_utf8();
        self.raw.truncate(new_len);
        Some(c)
    }

    pub fn insert(&mut self, offset: isize, c: char) -> Result<()> {
        let mut buf = [0u8; 4];
        self.insert_str(offset, c.encode_utf8(&mut buf))
    }

    pub fn insert_str(&mut self, offset: isize, s: &str) -> Result<()> {
        let offset = char_offset(self.as_str(), offset)?;
        self.replace_bytes(offset, 0, s)
    }

    pub fn remove(&mut self, offset: isize) -> Result<char> {
        let begin = char_offset(self.as_str(), offset)?;
        let c = self.as_str()[begin..]
            .chars()
            .next()
            .ok_or_else(|| Error::index(offset, self.len()))?;
        self.replace_bytes(begin, c.len_utf8(), "")?;
        Ok(c)
    }

    pub fn remove_range(&mut self, begin: isize, end: isize) -> Result<()> {
        self.replace_range(begin, end, "")
    }

    pub fn replace_range(&mut self, begin: isize, end: isize, s: &str) -> Result<()> {
        let b = char_offset(self.as_str(), begin)?;
        let e = char_offset(self.as_str(), end)?;
        if b > e {
            return Err(Error::range(begin, end, self.len()));
        }
        self.replace_bytes(b, e - b, s)
    }

    /// Shortens the text to `len` bytes, which must end on a character boundary.
    pub fn truncate(&mut self, len: usize) -> Result<()> {
        if len >= self.len() {
            return Ok(());
        }
        if !self.as_str().is_char_boundary(len) {
            return Err(Error::index(len as isize, self.len()));
        }
        self.raw.truncate(len);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.raw.truncate(0);
    }

    pub fn assign(&mut self, s: &str) -> Result<()> {
        unsafe { self.raw.assign_copy(BYTE, self.emb, s.as_ptr(), s.len()) }
    }

    pub fn assign_concat(&mut self, a: &str, b: &str) -> Result<()> {
        let a = Source::copy(a.as_ptr(), a.len());
        let b = Source::copy(b.as_ptr(), b.len());
        unsafe { self.raw.assign_concat(BYTE, self.emb, a, b) }
    }

    /// Takes the text of `src`, leaving it empty.
    pub fn take_from(&mut self, src: &mut MStr<'_>) -> Result<()> {
        unsafe {
            self.raw
                .assign_move_dynamic_or_copy(BYTE, self.emb, src.raw, src.emb)
        }
    }

    pub fn set_capacity(&mut self, min: usize, preserve: bool) -> Result<()> {
        unsafe { self.raw.set_capacity(BYTE, self.emb, min, preserve) }
    }

    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let required = self
            .len()
            .checked_add(additional)
            .ok_or_else(|| Error::out_of_memory(usize::MAX))?;
        let capacity = self.capacity();
        if required <= capacity {
            if self.raw.storage() == Storage::Empty && required > 0 {
                return self.set_capacity(required, true);
            }
            return Ok(());
        }
        self.set_capacity(policy::calculate_increased_capacity(capacity, required), true)
    }

    /// Sets the length in bytes. New bytes are `fill`, which must be ASCII so that the
    /// text stays valid UTF-8; a shorter length must end on a character boundary.
    pub fn resize(&mut self, new_len: usize, fill: u8) -> Result<()> {
        verify_arg!(fill, fill.is_ascii());
        let len = self.len();
        if new_len <= len {
            return self.truncate(new_len);
        }
        unsafe {
            self.raw.set_size(BYTE, self.emb, new_len)?;
            std::ptr::write_bytes(self.raw.data(self.emb).add(len), fill, new_len - len);
        }
        Ok(())
    }

    pub fn shrink_to_fit(&mut self) -> Result<()> {
        unsafe { self.raw.shrink_to_fit(BYTE, self.emb) }
    }

    pub(crate) fn ensure_nul_terminated(&mut self) -> Result<()> {
        unsafe { self.raw.ensure_nul_terminated(BYTE, self.emb) }
    }

    /// NUL-terminated view of the text.
    pub fn c_str(&mut self) -> Result<&CStr> {
        self.ensure_nul_terminated()?;
        unsafe { super::c_str(&**self.raw, self.emb) }
    }
}

super::impl_string_traits!(['a,] MStr<'a>);

impl std::fmt::Write for MStr<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.push_str(s).map_err(|_| std::fmt::Error)
    }
}
