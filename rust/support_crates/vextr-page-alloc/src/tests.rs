use crate::{StackPages, mmap};

#[test]
fn test_normal_allocations() {
    let p = Pages::allocate(1).unwrap();
    assert!(!p.ptr.is_null());
    assert!(p.size >= mmap::get_page_size());
    assert!(p.is_aligned(mmap::get_page_size()));

    let p = Pages::allocate(0).unwrap();
    assert!(!p.ptr.is_null());
    assert_eq!(p.size, mmap::get_page_size(), "Zero size should allocate one page");
}

#[test]
fn test_allocate_multiple_pages() {
    let page_size = mmap::get_page_size();
    let size = page_size * 3 + 100; // Should round up to 4 pages
    let pages = Pages::allocate(size).expect("allocate");
    assert_eq!(pages.size, page_size * 4);
}

#[test]
fn test_allocation_is_zeroed_and_writable() {
    let pages = Pages::allocate(10000).expect("allocate");
    let bytes = unsafe { std::slice::from_raw_parts_mut(pages.ptr as *mut u8, pages.size) };
    assert!(bytes.iter().all(|&b| b == 0));
    bytes[0] = 1;
    bytes[pages.size - 1] = 2;
    assert_eq!(bytes[0] + bytes[pages.size - 1], 3);
}

#[test]
fn test_round_up_to_page() {
    let page_size = mmap::get_page_size();
    assert_eq!(mmap::round_up_to_page(1).unwrap(), page_size);
    assert_eq!(mmap::round_up_to_page(page_size).unwrap(), page_size);
    assert_eq!(mmap::round_up_to_page(page_size + 1).unwrap(), page_size * 2);
    assert!(mmap::round_up_to_page(usize::MAX).is_err());
}

#[test]
fn test_stack_layout() {
    let page_size = mmap::get_page_size();
    let stack = StackPages::allocate(64 * 1024, true).expect("stack");
    assert!(stack.usable_size() >= 64 * 1024);
    assert_eq!(stack.usable_size() % page_size, 0);
    assert_eq!(stack.top() as usize - stack.bottom() as usize, stack.usable_size());
    assert_eq!(stack.bottom() as usize % page_size, 0);
    if mmap::supports_guard_pages() {
        assert_eq!(stack.guard_size(), page_size);
    }

    // The whole usable region is writable, right up to the top.
    unsafe {
        stack.bottom().write(0xAB);
        stack.top().sub(1).write(0xCD);
        assert_eq!(stack.bottom().read(), 0xAB);
        assert_eq!(stack.top().sub(1).read(), 0xCD);
    }
}

#[test]
fn test_stack_without_guard() {
    let stack = StackPages::allocate(1, false).expect("stack");
    assert_eq!(stack.guard_size(), 0);
    assert_eq!(stack.usable_size(), mmap::get_page_size());
}

#[test]
fn test_many_stacks() {
    let stacks = (0..32)
        .map(|i| StackPages::allocate(16 * 1024 + i, true).expect("stack"))
        .collect::<Vec<_>>();
    for pair in stacks.windows(2) {
        assert_ne!(pair[0].bottom(), pair[1].bottom());
    }
}

struct Pages {
    ptr: *mut std::ffi::c_void,
    size: usize,
}

impl Pages {
    fn allocate(size: usize) -> std::io::Result<Pages> {
        let (ptr, size) = crate::mmap::allocate(size)?;
        Ok(Pages { ptr, size })
    }

    fn is_aligned(&self, alignment: usize) -> bool {
        (self.ptr as usize) % alignment == 0
    }
}

impl Drop for Pages {
    fn drop(&mut self) {
        unsafe { crate::mmap::free(self.ptr, self.size).unwrap() };
    }
}
