use std::{any::Any, cell::RefCell, collections::HashMap, rc::Rc};

use crate::scheduler::Core;

thread_local! {
    static THREAD_VALUES: RefCell<HashMap<usize, Rc<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Storage with one value per coroutine.
///
/// Declared as a `static`; every coroutine sees its own value, created by `init` on
/// first access and dropped when the coroutine terminates. Code that is not running
/// in a coroutine sees a per-thread value instead. Values are shared references, so
/// mutation goes through `Cell` or `RefCell`:
///
/// ```ignore
/// static REQUESTS: CoroutineLocal<Cell<u32>> = CoroutineLocal::new(|| Cell::new(0));
///
/// REQUESTS.with(|n| n.set(n.get() + 1));
/// ```
pub struct CoroutineLocal<T: 'static> {
    init: fn() -> T,
}

impl<T: 'static> CoroutineLocal<T> {
    pub const fn new(init: fn() -> T) -> CoroutineLocal<T> {
        CoroutineLocal { init }
    }

    /// Calls `f` with the caller's value.
    pub fn with<R>(&'static self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.slot();
        let Some(value) = value.downcast_ref::<T>() else {
            unreachable!("coroutine-local slot holds a value of another type");
        };
        f(value)
    }

    fn slot(&'static self) -> Rc<dyn Any> {
        // Distinct statics have distinct addresses, which makes them usable as keys.
        let key = self as *const Self as usize;
        let init = || Rc::new((self.init)()) as Rc<dyn Any>;
        if let Some((core, id)) = Core::current_coroutine() {
            if let Some(value) = core.local(id, key, init) {
                return value;
            }
        }
        let existing = THREAD_VALUES.with(|values| values.borrow().get(&key).cloned());
        if let Some(value) = existing {
            return value;
        }
        let value = init();
        THREAD_VALUES.with(|values| values.borrow_mut().entry(key).or_insert(value).clone())
    }
}

impl<T: 'static + Clone> CoroutineLocal<T> {
    /// Returns a copy of the caller's value.
    pub fn get(&'static self) -> T {
        self.with(T::clone)
    }
}
