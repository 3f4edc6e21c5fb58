use std::alloc::{Layout, alloc_zeroed, dealloc};

pub fn allocate(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    let page_size = get_page_size();
    let capacity = round_up_to_page(size.max(1))?;

    // Page alignment keeps the layout identical to the mmap-backed implementation.
    let layout = Layout::from_size_align(capacity, page_size)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid layout"))?;

    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::OutOfMemory,
            "Failed to allocate memory",
        ));
    }

    Ok((ptr as *mut std::ffi::c_void, capacity))
}

/// # Safety
///
/// `ptr` and `size` must come from a previous call to [`allocate`].
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    let page_size = get_page_size();
    assert!(size.is_multiple_of(page_size));

    let layout = Layout::from_size_align(size, page_size)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid layout"))?;

    unsafe {
        dealloc(ptr as *mut u8, layout);
    }
    Ok(())
}

/// No page protection is available here; the range stays accessible.
///
/// # Safety
///
/// Same contract as the mmap-backed implementation.
pub unsafe fn protect_none(_ptr: *mut std::ffi::c_void, _size: usize) -> std::io::Result<()> {
    Ok(())
}

pub fn supports_guard_pages() -> bool {
    false
}

pub fn get_page_size() -> usize {
    4 * 1024
}

pub fn round_up_to_page(size: usize) -> std::io::Result<usize> {
    let page_size = get_page_size();
    size.checked_add(page_size - 1)
        .map(|n| n & !(page_size - 1))
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "size overflows address space")
        })
}
