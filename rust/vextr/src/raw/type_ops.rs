use std::ptr;

use vextr_common::{Error, Result};

use super::base::ItemLayout;

/// Copy-construct `count` items from `src` into the uninitialized `dst`.
pub type CopyConstrFn = unsafe fn(dst: *mut u8, src: *const u8, count: usize);

/// Destruct `count` items starting at `ptr`.
pub type DestructFn = unsafe fn(ptr: *mut u8, count: usize);

/// Type-erased operations on the items of a [`RawComplexVextr`](super::RawComplexVextr).
///
/// Moving an item is always a bitwise copy in Rust, so only copying and destruction
/// need per-type code. A missing `copy_constr` makes every operation that would copy
/// items fail with an invalid-operation error; a missing `destruct` means items have
/// no drop glue.
#[derive(Clone, Copy)]
pub struct TypeOps {
    pub item: ItemLayout,
    pub copy_constr: Option<CopyConstrFn>,
    pub destruct: Option<DestructFn>,
}

impl TypeOps {
    /// Operations for `T` without copy support.
    pub fn of<T>() -> TypeOps {
        TypeOps {
            item: ItemLayout::of::<T>(),
            copy_constr: None,
            destruct: if std::mem::needs_drop::<T>() {
                Some(drop_items::<T> as DestructFn)
            } else {
                None
            },
        }
    }

    /// Operations for `T` that copy by cloning.
    pub fn cloneable<T: Clone>() -> TypeOps {
        TypeOps {
            copy_constr: Some(clone_items::<T> as CopyConstrFn),
            ..TypeOps::of::<T>()
        }
    }

    /// Operations that neither copy nor destruct: items removed with these are
    /// forgotten, the caller having taken ownership of them beforehand.
    pub fn forgetful<T>() -> TypeOps {
        TypeOps {
            item: ItemLayout::of::<T>(),
            copy_constr: None,
            destruct: None,
        }
    }

    /// Copy-constructs `count` items. All or nothing: if a copy panics, the copies
    /// already made are destructed before the panic continues.
    pub(crate) unsafe fn copy_range(&self, dst: *mut u8, src: *const u8, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        match self.copy_constr {
            Some(copy) => {
                unsafe { copy(dst, src, count) };
                Ok(())
            }
            None => Err(Error::invalid_operation(
                "copy of items that have no copy constructor",
            )),
        }
    }

    pub(crate) unsafe fn move_range(&self, dst: *mut u8, src: *const u8, count: usize) {
        if count != 0 {
            unsafe { ptr::copy_nonoverlapping(src, dst, self.item.bytes(count)) };
        }
    }

    pub(crate) unsafe fn destruct_range(&self, ptr: *mut u8, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(destruct) = self.destruct {
            unsafe { destruct(ptr, count) };
        }
    }
}

impl std::fmt::Debug for TypeOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeOps")
            .field("item", &self.item)
            .field("copy", &self.copy_constr.is_some())
            .field("destruct", &self.destruct.is_some())
            .finish()
    }
}

unsafe fn drop_items<T>(ptr: *mut u8, count: usize) {
    unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(ptr as *mut T, count)) };
}

unsafe fn clone_items<T: Clone>(dst: *mut u8, src: *const u8, count: usize) {
    let dst = dst as *mut T;
    let src = src as *const T;
    let mut guard = PartialClone { dst, done: 0 };
    while guard.done < count {
        unsafe {
            let value = (*src.add(guard.done)).clone();
            dst.add(guard.done).write(value);
        }
        guard.done += 1;
    }
    std::mem::forget(guard);
}

/// Drops the clones made so far when a clone panics.
struct PartialClone<T> {
    dst: *mut T,
    done: usize,
}

impl<T> Drop for PartialClone<T> {
    fn drop(&mut self) {
        unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.dst, self.done)) };
    }
}
