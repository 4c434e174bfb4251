use crate::alloc::MemPool;
use crate::PSafe;
use std::fmt;
use std::marker::PhantomData;

/// A persistent fat pointer: a pool offset paired with a capacity
///
/// This is the metadata a dynamic array keeps for its backing storage:
/// where the element array lives (`off`) and how many elements fit in it
/// (`cap`). The invariant `cap == 0` if and only if `off == u64::MAX`
/// holds at every commit point.
pub struct Slice<T, A: MemPool> {
    off: u64,
    cap: usize,
    marker: PhantomData<(A, [T; 0])>,
}

unsafe impl<T: PSafe, A: MemPool> PSafe for Slice<T, A> {}
unsafe impl<T, A: MemPool> Send for Slice<T, A> {}
unsafe impl<T, A: MemPool> Sync for Slice<T, A> {}

impl<T, A: MemPool> Slice<T, A> {
    /// A handle owning no storage
    #[inline]
    pub const fn empty() -> Self {
        Self {
            off: u64::MAX,
            cap: 0,
            marker: PhantomData,
        }
    }

    /// Creates a fat pointer from a raw offset and capacity
    ///
    /// # Safety
    ///
    /// `off` must be the offset of an allocation in pool `A` large enough
    /// for `cap` values of `T`, or (`u64::MAX`, 0).
    #[inline]
    pub unsafe fn from_off_cap(off: u64, cap: usize) -> Self {
        Self {
            off,
            cap,
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

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Number of bytes the backing allocation occupies
    #[inline]
    pub fn size_in_bytes(&self) -> usize {
        self.cap * std::mem::size_of::<T>()
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *const T {
        unsafe { A::get_unchecked::<T>(self.off) }
    }

    #[inline]
    pub(crate) fn as_mut_ptr(&self) -> *mut T {
        unsafe { A::get_mut_unchecked::<T>(self.off) }
    }

    /// Views the first `len` slots as a slice
    ///
    /// # Safety
    ///
    /// `len <= cap` and the first `len` slots must be initialized.
    #[inline]
    pub unsafe fn as_slice(&self, len: usize) -> &[T] {
        debug_assert!(len <= self.cap);
        if len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(self.as_ptr(), len)
        }
    }

    /// Views the first `len` slots as a mutable slice
    ///
    /// # Safety
    ///
    /// Same as [`as_slice`](#method.as_slice), and the caller must hold
    /// undo logs for any slot it overwrites.
    #[inline]
    pub unsafe fn as_slice_mut(&mut self, len: usize) -> &mut [T] {
        debug_assert!(len <= self.cap);
        if len == 0 {
            &mut []
        } else {
            std::slice::from_raw_parts_mut(self.as_mut_ptr(), len)
        }
    }
}

impl<T, A: MemPool> Copy for Slice<T, A> {}

impl<T, A: MemPool> Clone for Slice<T, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, A: MemPool> Default for Slice<T, A> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T, A: MemPool> fmt::Debug for Slice<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dangling() {
            write!(f, "Slice(dangling)")
        } else {
            write!(f, "Slice({:x}; cap = {})", self.off, self.cap)
        }
    }
}
