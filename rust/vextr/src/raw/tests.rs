use std::{
    cell::Cell,
    panic::{AssertUnwindSafe, catch_unwind},
    rc::Rc,
};

use crate::memory::{self, fault};

use super::*;

/// Element that counts its live instances and can be told to panic on the Nth clone.
#[derive(Debug)]
struct Tracked {
    value: u32,
    live: Rc<Cell<isize>>,
    clones_left: Rc<Cell<Option<usize>>>,
}

impl Tracked {
    fn new(value: u32, probe: &Probe) -> Tracked {
        probe.live.set(probe.live.get() + 1);
        Tracked {
            value,
            live: probe.live.clone(),
            clones_left: probe.clones_left.clone(),
        }
    }
}

impl Clone for Tracked {
    fn clone(&self) -> Self {
        if let Some(n) = self.clones_left.get() {
            if n == 0 {
                panic!("clone of {} refused", self.value);
            }
            self.clones_left.set(Some(n - 1));
        }
        self.live.set(self.live.get() + 1);
        Tracked {
            value: self.value,
            live: self.live.clone(),
            clones_left: self.clones_left.clone(),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

#[derive(Default)]
struct Probe {
    live: Rc<Cell<isize>>,
    clones_left: Rc<Cell<Option<usize>>>,
}

impl Probe {
    fn make(&self, values: impl IntoIterator<Item = u32>) -> Vec<Tracked> {
        values.into_iter().map(|v| Tracked::new(v, self)).collect()
    }

    fn fail_clone_after(&self, n: usize) {
        self.clones_left.set(Some(n));
    }

    fn allow_clones(&self) {
        self.clones_left.set(None);
    }
}

/// A complex buffer with typed access, for tests only.
struct Buf<T, const N: usize> {
    raw: RawComplexVextr,
    emb: [std::mem::MaybeUninit<T>; N],
    ops: TypeOps,
}

impl<T: Clone, const N: usize> Buf<T, N> {
    fn new() -> Self {
        Buf {
            raw: if N > 0 {
                RawComplexVextr::with_embedded()
            } else {
                RawComplexVextr::new()
            },
            emb: [const { std::mem::MaybeUninit::uninit() }; N],
            ops: TypeOps::cloneable::<T>(),
        }
    }

    fn emb(&mut self) -> EmbeddedArray {
        if N == 0 {
            EmbeddedArray::NONE
        } else {
            unsafe { EmbeddedArray::new(self.emb.as_mut_ptr() as *mut u8, N) }
        }
    }

    fn items(&mut self) -> &[T] {
        let emb = self.emb();
        let ptr = self.raw.data(emb) as *const T;
        if self.raw.is_empty() {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(ptr, self.raw.len()) }
        }
    }

    fn push_all(&mut self, items: Vec<T>) -> vextr_common::Result<()> {
        let emb = self.emb();
        let ops = self.ops;
        let len = self.raw.len();
        let mut items = std::mem::ManuallyDrop::new(items);
        let src = Source::moved(items.as_ptr() as *const u8, items.len());
        let res = unsafe { self.raw.insert(&ops, emb, len, src) };
        if res.is_ok() {
            unsafe { items.set_len(0) };
        }
        unsafe { std::mem::ManuallyDrop::drop(&mut items) };
        res
    }

    fn insert_copies(&mut self, offset: usize, items: &[T]) -> vextr_common::Result<()> {
        let emb = self.emb();
        let ops = self.ops;
        unsafe {
            self.raw
                .insert(&ops, emb, offset, Source::copy(items.as_ptr() as *const u8, items.len()))
        }
    }

    fn capacity(&mut self) -> usize {
        let emb = self.emb();
        self.raw.capacity(emb)
    }
}

impl<T, const N: usize> Drop for Buf<T, N> {
    fn drop(&mut self) {
        let emb = if N == 0 {
            EmbeddedArray::NONE
        } else {
            unsafe { EmbeddedArray::new(self.emb.as_mut_ptr() as *mut u8, N) }
        };
        unsafe { self.raw.destruct(&self.ops, emb) };
    }
}

fn values<T: AsRef<Tracked>>(items: &[T]) -> Vec<u32> {
    items.iter().map(|t| t.as_ref().value).collect()
}

impl AsRef<Tracked> for Tracked {
    fn as_ref(&self) -> &Tracked {
        self
    }
}

#[test]
fn test_insert_and_drop_exactly_once() {
    let probe = Probe::default();
    {
        let mut buf = Buf::<Tracked, 0>::new();
        buf.push_all(probe.make(0..5)).unwrap();
        buf.push_all(probe.make(5..20)).unwrap();
        assert_eq!(probe.live.get(), 20);
        assert_eq!(values(buf.items()), (0..20).collect::<Vec<_>>());

        let emb = buf.emb();
        let ops = buf.ops;
        unsafe { buf.raw.remove(&ops, emb, 2, 7).unwrap() };
        assert_eq!(probe.live.get(), 15);
        assert_eq!(values(buf.items())[..3], [0, 1, 7]);

        unsafe { buf.raw.truncate(&ops, emb, 4) };
        assert_eq!(probe.live.get(), 4);
    }
    assert_eq!(probe.live.get(), 0);
}

#[test]
fn test_insert_rollback_on_clone_panic_with_reallocation() {
    let probe = Probe::default();
    let mut buf = Buf::<Tracked, 0>::new();
    buf.push_all(probe.make(0..8)).unwrap();
    assert_eq!(buf.capacity(), 8);

    let extra = probe.make(100..104);
    probe.fail_clone_after(2);
    let result = catch_unwind(AssertUnwindSafe(|| buf.insert_copies(3, &extra)));
    probe.allow_clones();
    assert!(result.is_err());

    assert_eq!(values(buf.items()), (0..8).collect::<Vec<_>>());
    assert_eq!(buf.capacity(), 8);
    assert_eq!(probe.live.get(), 12);
    drop(extra);
    drop(buf);
    assert_eq!(probe.live.get(), 0);
}

#[test]
fn test_insert_rollback_on_clone_panic_in_place() {
    let probe = Probe::default();
    let mut buf = Buf::<Tracked, 0>::new();
    let emb = buf.emb();
    let ops = buf.ops;
    unsafe { buf.raw.set_capacity(&ops, emb, 32, true).unwrap() };
    buf.push_all(probe.make(0..6)).unwrap();

    let extra = probe.make(50..53);
    probe.fail_clone_after(1);
    let result = catch_unwind(AssertUnwindSafe(|| buf.insert_copies(2, &extra)));
    probe.allow_clones();
    assert!(result.is_err());
    assert_eq!(values(buf.items()), (0..6).collect::<Vec<_>>());
    assert_eq!(probe.live.get(), 9);

    buf.insert_copies(2, &extra).unwrap();
    assert_eq!(values(buf.items()), [0, 1, 50, 51, 52, 2, 3, 4, 5]);
}

#[test]
fn test_assign_copy_rollback_keeps_original() {
    let probe = Probe::default();
    let mut buf = Buf::<Tracked, 0>::new();
    buf.push_all(probe.make(0..4)).unwrap();
    let other = probe.make(10..13);

    probe.fail_clone_after(1);
    let emb = buf.emb();
    let ops = buf.ops;
    let result = catch_unwind(AssertUnwindSafe(|| unsafe {
        buf.raw
            .assign_copy(&ops, emb, other.as_ptr() as *const u8, other.len())
    }));
    probe.allow_clones();
    assert!(result.is_err());
    assert_eq!(values(buf.items()), [0, 1, 2, 3]);
    assert_eq!(probe.live.get(), 7);

    unsafe {
        buf.raw
            .assign_copy(&ops, emb, other.as_ptr() as *const u8, other.len())
            .unwrap()
    };
    assert_eq!(values(buf.items()), [10, 11, 12]);
    assert_eq!(probe.live.get(), 6);
}

#[test]
fn test_allocation_failure_leaves_buffer_unchanged() {
    let mut buf = Buf::<u64, 0>::new();
    buf.push_all((0..8).collect()).unwrap();
    let before = buf.items().to_vec();
    {
        let _guard = fault::fail_after(0);
        let err = buf.push_all(vec![99]).unwrap_err();
        assert!(err.is_out_of_memory());
    }
    assert_eq!(buf.items(), &before[..]);
    assert_eq!(buf.capacity(), 8);
}

#[test]
fn test_self_assignment_is_noop() {
    let mut buf = Buf::<String, 0>::new();
    buf.push_all(vec!["a".to_string(), "b".to_string()]).unwrap();
    let emb = buf.emb();
    let ops = buf.ops;
    let data = buf.raw.data(emb);
    let len = buf.raw.len();
    unsafe { buf.raw.assign_copy(&ops, emb, data, len).unwrap() };
    assert_eq!(buf.items(), ["a", "b"]);
}

#[test]
fn test_assign_concat_from_own_items() {
    let mut buf = Buf::<String, 0>::new();
    buf.push_all(vec!["x".to_string(), "y".to_string(), "z".to_string()])
        .unwrap();
    let emb = buf.emb();
    let ops = buf.ops;
    let data = buf.raw.data(emb) as *const u8;
    let size = ops.item.size;
    unsafe {
        buf.raw
            .assign_concat(
                &ops,
                emb,
                Source::copy(data.add(size), 2),
                Source::copy(data, 3),
            )
            .unwrap()
    };
    assert_eq!(buf.items(), ["y", "z", "x", "y", "z"]);
}

#[test]
fn test_insert_own_items_in_place() {
    let mut buf = Buf::<String, 0>::new();
    let emb = buf.emb();
    let ops = buf.ops;
    unsafe { buf.raw.set_capacity(&ops, emb, 16, true).unwrap() };
    buf.push_all(["a", "b", "c", "d"].map(String::from).to_vec())
        .unwrap();
    let data = buf.raw.data(emb) as *const u8;
    unsafe {
        buf.raw
            .insert(&ops, emb, 1, Source::copy(data.add(2 * ops.item.size), 2))
            .unwrap()
    };
    assert_eq!(buf.items(), ["a", "c", "d", "b", "c", "d"]);
}

#[test]
fn test_growth_is_logarithmic() {
    let mut buf = Buf::<u32, 0>::new();
    let before = memory::thread_stats();
    let mut last_capacity = 0;
    for i in 0..10_000u32 {
        buf.push_all(vec![i]).unwrap();
        let capacity = buf.capacity();
        assert!(capacity >= last_capacity);
        last_capacity = capacity;
    }
    let allocations = memory::thread_stats().allocations - before.allocations;
    assert!(allocations <= 12, "{allocations} allocations");
    assert_eq!(buf.items().len(), 10_000);
}

#[test]
fn test_assign_move_never_allocates() {
    let probe = Probe::default();
    let mut a = Buf::<Tracked, 0>::new();
    let mut b = Buf::<Tracked, 0>::new();
    a.push_all(probe.make(0..10)).unwrap();
    b.push_all(probe.make(20..22)).unwrap();

    let ops = a.ops;
    {
        let _guard = fault::fail_after(0);
        unsafe { b.raw.assign_move(&ops, EmbeddedArray::NONE, &mut a.raw) };
    }
    assert!(a.raw.is_empty());
    assert_eq!(a.raw.storage(), Storage::Empty);
    assert_eq!(values(b.items()), (0..10).collect::<Vec<_>>());
    assert_eq!(probe.live.get(), 10);
}

#[test]
fn test_move_items_out_of_embedded() {
    let probe = Probe::default();
    let mut small = Buf::<Tracked, 4>::new();
    small.push_all(probe.make(1..4)).unwrap();
    assert_eq!(small.raw.storage(), Storage::Embedded);

    let mut big = Buf::<Tracked, 0>::new();
    let (big_emb, small_emb) = (big.emb(), small.emb());
    let ops = big.ops;
    unsafe {
        big.raw
            .assign_move_dynamic_or_move_items(&ops, big_emb, &mut small.raw, small_emb)
            .unwrap()
    };
    assert!(small.raw.is_empty());
    assert_eq!(values(big.items()), [1, 2, 3]);
    assert_eq!(probe.live.get(), 3);
}

#[test]
fn test_embedded_spills_to_heap() {
    let mut buf = Buf::<u16, 4>::new();
    let before = memory::thread_stats();
    buf.push_all(vec![1, 2, 3]).unwrap();
    assert_eq!(memory::thread_stats(), before);
    assert_eq!(buf.capacity(), 4);
    buf.push_all(vec![4, 5]).unwrap();
    assert_eq!(buf.raw.storage(), Storage::Dynamic);
    assert_eq!(buf.items(), [1, 2, 3, 4, 5]);

    let emb = buf.emb();
    let ops = buf.ops;
    unsafe { buf.raw.truncate(&ops, emb, 2) };
    unsafe { buf.raw.shrink_to_fit(&ops, emb).unwrap() };
    assert_eq!(buf.raw.storage(), Storage::Embedded);
    assert_eq!(buf.items(), [1, 2]);
    assert_eq!(memory::thread_stats().live(), before.live());
}

#[test]
fn test_read_only_items_are_copied_on_write() {
    static ITEMS: [u32; 5] = [1, 2, 3, 4, 5];
    let ops = TypeOps::cloneable::<u32>();
    let mut raw = unsafe { RawComplexVextr::from_read_only(ITEMS.as_ptr() as *const u8, 5) };
    assert_eq!(raw.storage(), Storage::ReadOnly);
    assert_eq!(raw.capacity(EmbeddedArray::NONE), 0);

    unsafe { raw.remove(&ops, EmbeddedArray::NONE, 1, 3).unwrap() };
    assert_eq!(raw.storage(), Storage::Dynamic);
    let items = unsafe { std::slice::from_raw_parts(raw.data(EmbeddedArray::NONE) as *const u32, 3) };
    assert_eq!(items, [1, 4, 5]);
    assert_eq!(ITEMS, [1, 2, 3, 4, 5]);
    unsafe { raw.destruct(&ops, EmbeddedArray::NONE) };
}

#[test]
fn test_set_capacity_without_preserve_drops_items() {
    let probe = Probe::default();
    let mut buf = Buf::<Tracked, 0>::new();
    buf.push_all(probe.make(0..3)).unwrap();
    let emb = buf.emb();
    let ops = buf.ops;
    unsafe { buf.raw.set_capacity(&ops, emb, 100, false).unwrap() };
    assert!(buf.raw.is_empty());
    assert_eq!(buf.capacity(), 100);
    assert_eq!(probe.live.get(), 0);
}

#[test]
fn test_copy_without_copy_constructor_fails() {
    let ops = TypeOps::of::<Box<u8>>();
    let items = [Box::new(1u8)];
    let mut raw = RawComplexVextr::new();
    let err = unsafe {
        raw.assign_copy(&ops, EmbeddedArray::NONE, items.as_ptr() as *const u8, 1)
            .unwrap_err()
    };
    assert!(matches!(
        err.kind(),
        vextr_common::ErrorKind::InvalidOperation { .. }
    ));
    assert!(raw.is_empty());
}

#[test]
fn test_index_translation() {
    static ITEMS: [u8; 4] = [0; 4];
    let raw = unsafe { RawVextr::from_read_only(ITEMS.as_ptr(), 4, false) };
    assert_eq!(raw.translate_index(-1).unwrap(), 3);
    assert_eq!(raw.translate_index(0).unwrap(), 0);
    assert!(raw.translate_index(4).is_err());
    assert!(raw.translate_index(-5).is_err());
    assert_eq!(raw.translate_position(4).unwrap(), 4);
    assert_eq!(raw.translate_range(-3, 100), 1..4);
    assert_eq!(raw.translate_range(3, 1), 3..3);
    assert!(raw.validate_range(1, 5).is_err());
    assert!(raw.validate_position(4, false).is_err());
    raw.validate_position(4, true).unwrap();
}

#[test]
fn test_trivial_insert_remove_and_nul() {
    let item = ItemLayout::of::<u8>();
    let emb = EmbeddedArray::NONE;
    let mut raw = RawTrivialVextr::new();
    unsafe {
        raw.assign_copy(item, emb, b"hello world".as_ptr(), 11).unwrap();
        raw.insert_remove(item, emb, 5, Source::copy(b",".as_ptr(), 1), 0)
            .unwrap();
        raw.ensure_nul_terminated(item, emb).unwrap();
    }
    assert!(raw.is_nul_terminated());
    let bytes = unsafe { std::slice::from_raw_parts(raw.data(emb), raw.len() + 1) };
    assert_eq!(bytes, b"hello, world\0");

    unsafe {
        raw.insert_remove(item, emb, 0, Source::copy(b"J".as_ptr(), 1), 5)
            .unwrap()
    };
    assert!(!raw.is_nul_terminated());
    let bytes = unsafe { std::slice::from_raw_parts(raw.data(emb), raw.len()) };
    assert_eq!(bytes, b"J, world");
    unsafe { raw.release(item, emb) };
}

#[test]
fn test_trivial_concat_with_self_overlap() {
    let item = ItemLayout::of::<u8>();
    let emb = EmbeddedArray::NONE;
    let mut raw = RawTrivialVextr::new();
    unsafe {
        raw.set_capacity(item, emb, 64, false).unwrap();
        raw.assign_copy(item, emb, b"abc".as_ptr(), 3).unwrap();
        let data = raw.data(emb);
        raw.assign_concat(item, emb, Source::copy(data.add(1), 2), Source::copy(data, 3))
            .unwrap();
    }
    let bytes = unsafe { std::slice::from_raw_parts(raw.data(emb), raw.len()) };
    assert_eq!(bytes, b"bcabc");
    unsafe { raw.release(item, emb) };
}

#[test]
fn test_trivial_share_read_only() {
    static TEXT: &[u8] = b"shared\0";
    let item = ItemLayout::of::<u8>();
    let emb = EmbeddedArray::NONE;
    let src = unsafe { RawTrivialVextr::from_read_only(TEXT.as_ptr(), 6, true) };
    let mut dst = RawTrivialVextr::new();
    let before = memory::thread_stats();
    unsafe { dst.assign_share_raw_or_copy(item, emb, &src, emb).unwrap() };
    assert_eq!(memory::thread_stats(), before);
    assert_eq!(dst.data(emb) as *const u8, TEXT.as_ptr());
    assert!(dst.is_nul_terminated());
}

/// Element whose destructor panics when it is armed.
#[derive(Debug)]
struct Fragile {
    value: u32,
    armed: bool,
    live: Rc<Cell<isize>>,
}

impl Clone for Fragile {
    fn clone(&self) -> Self {
        self.live.set(self.live.get() + 1);
        Fragile {
            value: self.value,
            armed: false,
            live: self.live.clone(),
        }
    }
}

impl Drop for Fragile {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
        if self.armed {
            panic!("drop of {} refused", self.value);
        }
    }
}

fn fragile(
    values: impl IntoIterator<Item = u32>,
    armed: Option<u32>,
    live: &Rc<Cell<isize>>,
) -> Vec<Fragile> {
    values
        .into_iter()
        .map(|value| {
            live.set(live.get() + 1);
            Fragile {
                value,
                armed: armed == Some(value),
                live: live.clone(),
            }
        })
        .collect()
}

fn fragile_values<const N: usize>(buf: &mut Buf<Fragile, N>) -> Vec<u32> {
    buf.items().iter().map(|f| f.value).collect()
}

#[test]
fn test_remove_closes_gap_when_drop_panics() {
    let live = Rc::new(Cell::new(0));
    let mut buf = Buf::<Fragile, 0>::new();
    buf.push_all(fragile(0..6, Some(2), &live)).unwrap();
    let emb = buf.emb();
    let ops = buf.ops;

    let result = catch_unwind(AssertUnwindSafe(|| unsafe { buf.raw.remove(&ops, emb, 1, 4) }));
    assert!(result.is_err());
    assert_eq!(fragile_values(&mut buf), [0, 4, 5]);
    assert_eq!(live.get(), 3);

    buf.push_all(fragile([7], None, &live)).unwrap();
    assert_eq!(fragile_values(&mut buf), [0, 4, 5, 7]);
}

#[test]
fn test_truncate_drops_whole_tail_when_drop_panics() {
    let live = Rc::new(Cell::new(0));
    let mut buf = Buf::<Fragile, 2>::new();
    buf.push_all(fragile(0..5, Some(3), &live)).unwrap();
    let emb = buf.emb();
    let ops = buf.ops;

    let result = catch_unwind(AssertUnwindSafe(|| unsafe { buf.raw.truncate(&ops, emb, 1) }));
    assert!(result.is_err());
    assert_eq!(fragile_values(&mut buf), [0]);
    assert_eq!(live.get(), 1);
}

#[test]
fn test_set_capacity_allocation_failure_keeps_items() {
    let probe = Probe::default();
    let mut buf = Buf::<Tracked, 2>::new();
    buf.push_all(probe.make(0..2)).unwrap();
    assert_eq!(buf.raw.storage(), Storage::Embedded);
    let emb = buf.emb();
    let ops = buf.ops;
    {
        let _guard = fault::fail_after(0);
        let err = unsafe { buf.raw.set_capacity(&ops, emb, 16, true).unwrap_err() };
        assert!(err.is_out_of_memory());
    }
    assert_eq!(buf.raw.storage(), Storage::Embedded);
    assert_eq!(values(buf.items()), [0, 1]);
    assert_eq!(probe.live.get(), 2);

    unsafe { buf.raw.set_capacity(&ops, emb, 16, true).unwrap() };
    assert_eq!(buf.raw.storage(), Storage::Dynamic);
    assert_eq!(buf.capacity(), 16);
    assert_eq!(values(buf.items()), [0, 1]);
    assert_eq!(probe.live.get(), 2);
}

#[test]
fn test_move_items_into_embedded_needs_no_allocation() {
    let probe = Probe::default();
    let mut dst = Buf::<Tracked, 4>::new();
    dst.push_all(probe.make([9])).unwrap();
    let mut src = Buf::<Tracked, 4>::new();
    src.push_all(probe.make([1, 2])).unwrap();
    let (dst_emb, src_emb) = (dst.emb(), src.emb());
    let ops = dst.ops;
    {
        let _guard = fault::fail_after(0);
        unsafe {
            dst.raw
                .assign_move_dynamic_or_move_items(&ops, dst_emb, &mut src.raw, src_emb)
                .unwrap()
        };
    }
    assert_eq!(dst.raw.storage(), Storage::Embedded);
    assert_eq!(values(dst.items()), [1, 2]);
    assert!(src.raw.is_empty());
    assert_eq!(probe.live.get(), 2);
}

#[test]
fn test_move_items_when_replaced_item_drop_panics() {
    let live = Rc::new(Cell::new(0));
    let mut dst = Buf::<Fragile, 4>::new();
    dst.push_all(fragile([8, 9], Some(9), &live)).unwrap();
    let mut src = Buf::<Fragile, 4>::new();
    src.push_all(fragile([1, 2, 3], None, &live)).unwrap();
    let (dst_emb, src_emb) = (dst.emb(), src.emb());
    let ops = dst.ops;

    let result = catch_unwind(AssertUnwindSafe(|| unsafe {
        dst.raw
            .assign_move_dynamic_or_move_items(&ops, dst_emb, &mut src.raw, src_emb)
    }));
    assert!(result.is_err());
    assert_eq!(fragile_values(&mut dst), [1, 2, 3]);
    assert!(src.raw.is_empty());
    assert_eq!(live.get(), 3);
}
