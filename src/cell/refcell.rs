use crate::alloc::MemPool;
use crate::ptr::Ptr;
use crate::stm::{Journal, Log, Notifier};
use crate::PSafe;
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

/// Borrow state tagged with the pool's open generation
///
/// The count lives in persistent memory but is meaningful only within
/// one open of the pool: a crash in the middle of a borrow must not wedge
/// the cell forever, so a stored count from an older generation reads as
/// zero.
struct BorrowFlag<A: MemPool> {
    inner: UnsafeCell<(u32, i8)>,
    marker: PhantomData<A>,
}

unsafe impl<A: MemPool> PSafe for BorrowFlag<A> {}

impl<A: MemPool> BorrowFlag<A> {
    const fn new() -> Self {
        Self {
            inner: UnsafeCell::new((0, 0)),
            marker: PhantomData,
        }
    }

    #[inline]
    fn get(&self) -> i8 {
        let (gen, v) = unsafe { *self.inner.get() };
        if gen == A::gen() {
            v
        } else {
            0
        }
    }

    #[inline]
    fn set(&self, v: i8) {
        unsafe {
            *self.inner.get() = (A::gen(), v);
        }
    }
}

/// A persistent memory location with dynamically checked borrow rules
///
/// Like [`PCell`](./struct.PCell.html), the first mutable borrow in a
/// transaction logs the old value; unlike it, the value need not be
/// `Copy` and is accessed through borrow guards.
pub struct PRefCell<T: PSafe, A: MemPool> {
    heap: PhantomData<A>,
    borrow: BorrowFlag<A>,
    value: UnsafeCell<(u8, T)>,
}

unsafe impl<T: PSafe, A: MemPool> PSafe for PRefCell<T, A> {}

impl<T: PSafe, A: MemPool> PRefCell<T, A> {
    pub const fn new(value: T) -> Self {
        Self {
            heap: PhantomData,
            borrow: BorrowFlag::new(),
            value: UnsafeCell::new((0, value)),
        }
    }

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

    /// Immutably borrows the value
    ///
    /// Panics if the value is mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, T, A> {
        let b = self.borrow.get();
        assert!(b >= 0, "already mutably borrowed");
        self.borrow.set(b + 1);
        Ref {
            value: unsafe { &(*self.value.get()).1 },
            borrow: &self.borrow,
        }
    }

    /// Mutably borrows the value, logging it in `journal`
    ///
    /// Panics if the value is borrowed.
    pub fn borrow_mut(&self, journal: &Journal<A>) -> RefMut<'_, T, A> {
        assert_eq!(self.borrow.get(), 0, "already borrowed");
        self.take_log(journal);
        self.borrow.set(-1);
        RefMut {
            value: unsafe { &mut (*self.value.get()).1 },
            borrow: &self.borrow,
        }
    }

    /// Replaces the value, returning the old one
    pub fn replace(&self, value: T, journal: &Journal<A>) -> T {
        let mut b = self.borrow_mut(journal);
        std::mem::replace(&mut *b, value)
    }
}

/// A shared borrow of a [`PRefCell`](./struct.PRefCell.html)
pub struct Ref<'b, T: PSafe, A: MemPool> {
    value: &'b T,
    borrow: &'b BorrowFlag<A>,
}

impl<T: PSafe, A: MemPool> Deref for Ref<'_, T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<T: PSafe, A: MemPool> Drop for Ref<'_, T, A> {
    fn drop(&mut self) {
        self.borrow.set(self.borrow.get() - 1);
    }
}

/// An exclusive borrow of a [`PRefCell`](./struct.PRefCell.html)
pub struct RefMut<'b, T: PSafe, A: MemPool> {
    value: &'b mut T,
    borrow: &'b BorrowFlag<A>,
}

impl<T: PSafe, A: MemPool> Deref for RefMut<'_, T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<T: PSafe, A: MemPool> DerefMut for RefMut<'_, T, A> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
    }
}

impl<T: PSafe, A: MemPool> Drop for RefMut<'_, T, A> {
    fn drop(&mut self) {
        self.borrow.set(0);
    }
}

impl<T: PSafe + Default, A: MemPool> Default for PRefCell<T, A> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: PSafe + fmt::Debug, A: MemPool> fmt::Debug for PRefCell<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PRefCell({:?})", &*self.borrow())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alloc::Heap;

    #[test]
    fn borrow_rules() {
        let cell = PRefCell::<i32, Heap>::new(5);
        {
            let a = cell.borrow();
            let b = cell.borrow();
            assert_eq!(*a + *b, 10);
        }
        Heap::transaction(|j| {
            let mut m = cell.borrow_mut(j);
            *m += 1;
        })
        .unwrap();
        assert_eq!(*cell.borrow(), 6);
    }
}
