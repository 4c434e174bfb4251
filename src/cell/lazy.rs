use std::cell::UnsafeCell;
use std::ops::Deref;

/// A value initialized on first dereference
///
/// Used for process-wide switches read from the environment. Not safe
/// for concurrent first access; the crate only uses it for idempotent
/// initializers.
pub struct LazyCell<T, F = fn() -> T> {
    value: UnsafeCell<Option<T>>,
    init: UnsafeCell<Option<F>>,
}

unsafe impl<T, F: Send> Sync for LazyCell<T, F> where T: Sync {}

impl<T, F: FnOnce() -> T> LazyCell<T, F> {
    pub const fn new(f: F) -> Self {
        Self {
            value: UnsafeCell::new(None),
            init: UnsafeCell::new(Some(f)),
        }
    }
}

impl<T, F: FnOnce() -> T> Deref for LazyCell<T, F> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe {
            let value = &mut *self.value.get();
            if value.is_none() {
                match (*self.init.get()).take() {
                    Some(f) => *value = Some(f()),
                    None => unreachable!("initializer ran without storing a value"),
                }
            }
            value.as_ref().unwrap()
        }
    }
}
