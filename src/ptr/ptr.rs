use crate::alloc::MemPool;
use crate::PSafe;
use std::fmt;
use std::marker::PhantomData;

/// A typed handle into the pool `A`
///
/// `Ptr` keeps only the offset of its target; the owning pool is the
/// type parameter. The offset `u64::MAX` is the dangling value and is
/// never dereferenced.
pub struct Ptr<T, A: MemPool> {
    off: u64,
    marker: PhantomData<(A, *const T)>,
}

unsafe impl<T: PSafe, A: MemPool> PSafe for Ptr<T, A> {}
unsafe impl<T, A: MemPool> Send for Ptr<T, A> {}
unsafe impl<T, A: MemPool> Sync for Ptr<T, A> {}

impl<T, A: MemPool> Ptr<T, A> {
    /// The null handle
    #[inline]
    pub const fn dangling() -> Self {
        Self {
            off: u64::MAX,
            marker: PhantomData,
        }
    }

    /// Creates a handle from a reference already residing in the pool
    #[inline]
    pub fn from_ref(x: &T) -> Self {
        Self {
            off: unsafe { A::off_unchecked(x) },
            marker: PhantomData,
        }
    }

    /// Creates a handle from a raw pool offset
    ///
    /// # Safety
    ///
    /// `off` must be the offset of a live `T` in pool `A`, or `u64::MAX`.
    #[inline]
    pub const unsafe fn from_off(off: u64) -> Self {
        Self {
            off,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn is_dangling(&self) -> bool {
        self.off == u64::MAX
    }

    #[inline]
    pub fn off(&self) -> u64 {
        self.off
    }
}

impl<T, A: MemPool> Ptr<T, A> {
    #[inline]
    pub(crate) fn as_ref(&self) -> &T {
        unsafe { A::get_unchecked(self.off) }
    }

    #[inline]
    pub(crate) fn as_mut(&mut self) -> &mut T {
        unsafe { &mut *A::get_mut_unchecked(self.off) }
    }
}

impl<T, A: MemPool> Copy for Ptr<T, A> {}

impl<T, A: MemPool> Clone for Ptr<T, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, A: MemPool> Default for Ptr<T, A> {
    fn default() -> Self {
        Self::dangling()
    }
}

impl<T, A: MemPool> PartialEq for Ptr<T, A> {
    fn eq(&self, other: &Self) -> bool {
        self.off == other.off
    }
}

impl<T, A: MemPool> Eq for Ptr<T, A> {}

impl<T, A: MemPool> fmt::Debug for Ptr<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dangling() {
            write!(f, "Ptr(dangling)")
        } else {
            write!(f, "Ptr({:x})", self.off)
        }
    }
}
