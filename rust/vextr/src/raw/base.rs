use std::ops::Range;

use vextr_common::{Error, Result};

use super::descriptor::{Descriptor, DescriptorFlags};

/// Size and alignment of the items stored in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemLayout {
    pub size: usize,
    pub align: usize,
}

impl ItemLayout {
    pub const fn of<T>() -> ItemLayout {
        ItemLayout {
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
        }
    }

    #[inline]
    pub(crate) fn bytes(&self, count: usize) -> usize {
        self.size * count
    }
}

/// Location and capacity of a container's embedded array.
///
/// Containers are plain Rust values and may be moved at any time, so the buffer never
/// stores the address of the embedded array: the owning container hands it in again
/// on every call.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedArray {
    pub(crate) ptr: *mut u8,
    pub(crate) capacity: usize,
}

impl EmbeddedArray {
    /// For containers without an embedded array.
    pub const NONE: EmbeddedArray = EmbeddedArray {
        ptr: std::ptr::null_mut(),
        capacity: 0,
    };

    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `capacity` items of the buffer's
    /// item type, suitably aligned, and must belong to the container that owns the
    /// buffer it is used with.
    pub const unsafe fn new(ptr: *mut u8, capacity: usize) -> EmbeddedArray {
        EmbeddedArray { ptr, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Which kind of array currently backs a buffer. Exactly one is active at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// No array at all.
    Empty,
    /// A borrowed array that is never written to nor freed.
    ReadOnly,
    /// An owned heap array.
    Dynamic,
    /// The owning container's embedded array.
    Embedded,
}

impl Storage {
    /// Returns `true` if items may be written to the live array in place.
    pub fn is_writable(self) -> bool {
        matches!(self, Storage::Dynamic | Storage::Embedded)
    }
}

/// Descriptor of one contiguous item array.
///
/// The buffer does not know its item type; it only tracks where the array is, how
/// many items are in use and how many fit.
#[derive(Debug)]
pub struct RawVextr {
    /// Live array for `ReadOnly` and `Dynamic` storage; null otherwise.
    pub(crate) array: *mut u8,
    pub(crate) len: usize,
    pub(crate) desc: Descriptor,
}

impl RawVextr {
    pub const fn new() -> RawVextr {
        RawVextr {
            array: std::ptr::null_mut(),
            len: 0,
            desc: Descriptor::new(0, DescriptorFlags::empty()),
        }
    }

    /// Creates an empty buffer whose container provides an embedded array.
    pub const fn with_embedded() -> RawVextr {
        RawVextr {
            array: std::ptr::null_mut(),
            len: 0,
            desc: Descriptor::new(0, DescriptorFlags::HAS_EMBEDDED),
        }
    }

    /// Creates a buffer that borrows a read-only array.
    ///
    /// # Safety
    ///
    /// `array` must stay valid for reads of `len` items for as long as this buffer,
    /// or any buffer it is shared with, refers to it. With `nul_terminated` set, the
    /// item right past the last one must be readable and zero.
    pub const unsafe fn from_read_only(
        array: *const u8,
        len: usize,
        nul_terminated: bool,
    ) -> RawVextr {
        if len == 0 && !nul_terminated {
            return RawVextr::new();
        }
        let flags = if nul_terminated {
            DescriptorFlags::NUL_TERMINATED
        } else {
            DescriptorFlags::empty()
        };
        RawVextr {
            array: array as *mut u8,
            len,
            desc: Descriptor::new(0, flags),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn descriptor(&self) -> Descriptor {
        self.desc
    }

    pub fn storage(&self) -> Storage {
        if self.desc.is_embedded_in_use() {
            Storage::Embedded
        } else if self.desc.is_dynamic() {
            Storage::Dynamic
        } else if self.array.is_null() {
            Storage::Empty
        } else {
            Storage::ReadOnly
        }
    }

    /// Number of items that fit without a new array.
    ///
    /// A read-only array reports zero: nothing can be appended to it in place. An
    /// empty buffer reports the size of the embedded array it may switch to.
    pub fn capacity(&self, emb: EmbeddedArray) -> usize {
        match self.storage() {
            Storage::Empty => emb.capacity,
            Storage::ReadOnly => 0,
            Storage::Dynamic | Storage::Embedded => self.desc.capacity,
        }
    }

    /// Pointer to the first item; null when there is no array.
    #[inline]
    pub fn data(&self, emb: EmbeddedArray) -> *mut u8 {
        if self.desc.is_embedded_in_use() {
            emb.ptr
        } else {
            self.array
        }
    }

    pub fn is_nul_terminated(&self) -> bool {
        self.desc.is_nul_terminated()
    }

    /// Resolves a possibly negative item index; `-1` is the last item.
    pub fn translate_index(&self, index: isize) -> Result<usize> {
        let len = self.len as isize;
        let resolved = if index < 0 { index + len } else { index };
        if (0..len).contains(&resolved) {
            Ok(resolved as usize)
        } else {
            Err(Error::index(index, self.len))
        }
    }

    /// Resolves a possibly negative insertion position; `len` (the end) is allowed.
    pub fn translate_position(&self, index: isize) -> Result<usize> {
        let len = self.len as isize;
        let resolved = if index < 0 { index + len } else { index };
        if (0..=len).contains(&resolved) {
            Ok(resolved as usize)
        } else {
            Err(Error::index(index, self.len))
        }
    }

    /// Resolves a pair of possibly negative bounds, clipping them to the items in use.
    /// An inverted range becomes empty.
    pub fn translate_range(&self, begin: isize, end: isize) -> Range<usize> {
        let len = self.len as isize;
        let clip = |i: isize| (if i < 0 { i + len } else { i }).clamp(0, len) as usize;
        let begin = clip(begin);
        let end = clip(end).max(begin);
        begin..end
    }

    /// Resolves a pair of possibly negative bounds that must both fall within
    /// `[0, len]` and be ordered.
    pub fn validate_range(&self, begin: isize, end: isize) -> Result<Range<usize>> {
        let len = self.len as isize;
        let resolve = |i: isize| if i < 0 { i + len } else { i };
        let (b, e) = (resolve(begin), resolve(end));
        if 0 <= b && b <= e && e <= len {
            Ok(b as usize..e as usize)
        } else {
            Err(Error::range(begin, end, self.len))
        }
    }

    /// Checks that `position` designates an item (or the end, with `allow_end`).
    pub fn validate_position(&self, position: usize, allow_end: bool) -> Result<()> {
        if position < self.len || (allow_end && position == self.len) {
            Ok(())
        } else {
            Err(Error::iterator_validity(position, self.len))
        }
    }

    /// Forgets the live array and items, keeping only the embedded-array declaration.
    pub(crate) fn reset(&mut self) {
        let keep = self.desc.flags & DescriptorFlags::HAS_EMBEDDED;
        self.array = std::ptr::null_mut();
        self.len = 0;
        self.desc = Descriptor::new(0, keep);
    }

    /// Moves the live array out into a new descriptor and leaves `self` empty.
    ///
    /// Must not be called while the embedded array is in use.
    pub(crate) fn take(&mut self) -> RawVextr {
        debug_assert!(!self.desc.is_embedded_in_use());
        let mut flags = self.desc.flags;
        flags.remove(DescriptorFlags::HAS_EMBEDDED);
        let taken = RawVextr {
            array: self.array,
            len: self.len,
            desc: Descriptor::new(self.desc.capacity, flags),
        };
        self.reset();
        taken
    }

    /// Installs an array taken from another buffer. `self` must hold no array.
    pub(crate) fn adopt(&mut self, other: RawVextr) {
        debug_assert_eq!(self.storage(), Storage::Empty);
        debug_assert!(!other.desc.is_embedded_in_use());
        let keep = self.desc.flags & DescriptorFlags::HAS_EMBEDDED;
        self.array = other.array;
        self.len = other.len;
        self.desc = Descriptor::new(other.desc.capacity, other.desc.flags | keep);
    }

    #[inline]
    pub(crate) fn clear_nul_terminated(&mut self) {
        self.desc.flags.remove(DescriptorFlags::NUL_TERMINATED);
    }
}

impl Default for RawVextr {
    fn default() -> Self {
        RawVextr::new()
    }
}

/// Returns `true` if `[ptr, ptr + bytes)` intersects `[region, region + region_bytes)`.
pub(crate) fn overlaps(ptr: *const u8, bytes: usize, region: *const u8, region_bytes: usize) -> bool {
    if bytes == 0 || region_bytes == 0 || region.is_null() {
        return false;
    }
    let (a, b) = (ptr as usize, region as usize);
    a < b + region_bytes && b < a + bytes
}
