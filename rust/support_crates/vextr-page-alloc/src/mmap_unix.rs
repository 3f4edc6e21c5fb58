use std::sync::OnceLock;

/// Allocates memory using standard pages via an anonymous private mapping.
///
/// # Arguments
///
/// * `size` - The number of bytes to allocate. The actual allocation will be rounded up
///   to the nearest page boundary.
///
/// # Returns
///
/// Returns a `Result` containing:
/// - `Ok((ptr, capacity))` - A tuple with a pointer to the allocated memory and the actual
///   capacity in bytes (which may be larger than the requested size due to page alignment)
/// - `Err(io::Error)` - An I/O error if the allocation fails
///
/// The returned pointer must be deallocated using [`free`] with the same capacity value
/// to avoid leaking the mapping. The memory is readable, writable and zero-filled.
pub fn allocate(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    let page_size = get_page_size();
    assert!(page_size.is_power_of_two());
    let capacity = round_up_to_page(size.max(1))?;
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            capacity,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr.is_null() || ptr == libc::MAP_FAILED {
        let err = std::io::Error::last_os_error();
        return Err(err);
    }
    Ok((ptr, capacity))
}

/// Frees memory that was allocated with [`allocate`].
///
/// # Safety
///
/// - `ptr` was returned by a previous call to [`allocate`]
/// - `size` matches the capacity returned by that call
/// - The memory has not already been freed and is no longer referenced
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    let res = unsafe { libc::munmap(ptr, size) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Revokes all access to a page-aligned range, turning it into a guard region.
///
/// Any access to the range afterwards raises `SIGSEGV` instead of silently
/// corrupting adjacent memory.
///
/// # Safety
///
/// `ptr..ptr + size` must lie within a mapping returned by [`allocate`], and `ptr`
/// must be page-aligned.
pub unsafe fn protect_none(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    let res = unsafe { libc::mprotect(ptr, size, libc::PROT_NONE) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Returns `true` when this platform can enforce guard pages.
pub fn supports_guard_pages() -> bool {
    true
}

/// Gets the system's standard page size in bytes.
///
/// The value is cached after the first call. If the system's page size cannot be
/// determined, returns a default value of 4KB.
pub fn get_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    if let Some(&size) = SIZE.get() {
        size
    } else {
        match read_page_size() {
            Ok(size) => {
                let _ = SIZE.set(size);
                size
            }
            Err(_) => 4 * 1024,
        }
    }
}

/// Rounds `size` up to a whole number of pages.
pub fn round_up_to_page(size: usize) -> std::io::Result<usize> {
    let page_size = get_page_size();
    size.checked_add(page_size - 1)
        .map(|n| n & !(page_size - 1))
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "size overflows address space")
        })
}

fn read_page_size() -> std::io::Result<usize> {
    let res = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    assert!(res < i32::MAX as _);
    Ok(res as usize)
}
