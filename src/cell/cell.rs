use crate::alloc::MemPool;
use crate::ptr::Ptr;
use crate::stm::{Journal, Log, Notifier};
use crate::PSafe;
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;

/// A mutable persistent memory location
///
/// The cell keeps a one-byte log flag in front of the value. The first
/// mutation in a transaction copies the old value into the journal and
/// raises the flag; further mutations in the same transaction skip the
/// log. Commit and rollback reset the flag through the log's notifier.
pub struct PCell<T: PSafe, A: MemPool> {
    heap: PhantomData<A>,
    value: UnsafeCell<(u8, T)>,
}

unsafe impl<T: PSafe, A: MemPool> PSafe for PCell<T, A> {}

impl<T: PSafe, A: MemPool> PCell<T, A> {
    pub const fn new(value: T) -> Self {
        Self {
            heap: PhantomData,
            value: UnsafeCell::new((0, value)),
        }
    }

    /// Takes an undo log of the value unless already logged in the
    /// running transaction
    fn take_log(&self, journal: &Journal<A>) {
        unsafe {
            let inner = &mut *self.value.get();
            if inner.0 == 0 && A::valid(inner) {
                Log::create(
                    &inner.1,
                    journal,
                    Notifier::NonAtomic(Ptr::from_ref(&inner.0)),
                );
            }
        }
    }

    /// Replaces the value, logging the old one
    pub fn set(&self, value: T, journal: &Journal<A>) {
        self.replace(value, journal);
    }

    /// Replaces the value, returning the old one
    pub fn replace(&self, value: T, journal: &Journal<A>) -> T {
        self.take_log(journal);
        unsafe {
            let inner = &mut *self.value.get();
            std::mem::replace(&mut inner.1, value)
        }
    }

    /// Takes the value, leaving `T::default()` behind
    pub fn take(&self, journal: &Journal<A>) -> T
    where
        T: Default,
    {
        self.replace(T::default(), journal)
    }
}

impl<T: PSafe + Copy, A: MemPool> PCell<T, A> {
    #[inline]
    pub fn get(&self) -> T {
        unsafe { (*self.value.get()).1 }
    }

    /// Applies `f` to the value in place
    pub fn update<F: FnOnce(T) -> T>(&self, f: F, journal: &Journal<A>) -> T {
        let old = self.get();
        let new = f(old);
        self.set(new, journal);
        new
    }
}

impl<T: PSafe + Default, A: MemPool> Default for PCell<T, A> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: PSafe + Copy + fmt::Debug, A: MemPool> fmt::Debug for PCell<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PCell({:?})", self.get())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alloc::Heap;

    #[test]
    fn set_and_get() {
        let cell = PCell::<i32, Heap>::new(7);
        Heap::transaction(|j| {
            assert_eq!(cell.get(), 7);
            cell.set(12, j);
            assert_eq!(cell.get(), 12);
        })
        .unwrap();
        assert_eq!(cell.get(), 12);
    }
}
