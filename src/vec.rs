//! A crash-consistent dynamic array
//!
//! [`Vec`] keeps exactly three persistent words: the offset of its
//! element array, the array's capacity (both inside a
//! [`Slice`](../ptr/struct.Slice.html)), and the element count. Every
//! mutating operation runs inside a transaction: it takes an undo log of
//! the metadata, logs the live element range only when overwriting it in
//! place, and stages storage movement so that the old array stays intact
//! until the transaction commits.
//!
//! Capacity is always zero or a power of two, and a capacity of zero
//! means the handle is dangling. The slack `[len, capacity)` is never
//! logged; its contents are meaningless.

use crate::alloc::MemPool;
use crate::cell::RootObj;
use crate::clone::PClone;
use crate::convert::PFrom;
use crate::err::Error;
use crate::ll::persist;
use crate::ptr::Slice;
use crate::result::Result;
use crate::stm::{Journal, Log, Notifier, TxStage};
use crate::utils::next_pow_2;
use crate::PSafe;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;

/// A dynamic array resident in pool `A`
pub struct Vec<T: PSafe, A: MemPool> {
    buf: Slice<T, A>,
    len: usize,
}

unsafe impl<T: PSafe, A: MemPool> PSafe for Vec<T, A> {}

impl<T: PSafe, A: MemPool> Vec<T, A> {
    /// An empty vector owning no storage
    pub const fn empty() -> Self {
        Self {
            buf: Slice::empty(),
            len: 0,
        }
    }

    /// An empty vector, constructed inside a transaction
    pub fn new(_journal: &Journal<A>) -> Self {
        Self::empty()
    }

    /// `count` copies of `value`; capacity is the next power of two
    pub fn with_value(count: usize, value: T, journal: &Journal<A>) -> Result<Self>
    where
        T: PClone<A>,
    {
        Self::check_tx()?;
        let mut v = Self::empty();
        if count == 0 {
            return Ok(v);
        }
        unsafe {
            v.alloc_storage(next_pow_2(count), journal)?;
            v.grow_with(count, |j| value.pclone(j), journal);
        }
        Ok(v)
    }

    /// `count` default values; capacity is the next power of two
    pub fn with_default(count: usize, journal: &Journal<A>) -> Result<Self>
    where
        T: Default,
    {
        Self::check_tx()?;
        let mut v = Self::empty();
        if count == 0 {
            return Ok(v);
        }
        unsafe {
            v.alloc_storage(next_pow_2(count), journal)?;
            v.grow_with(count, |_| T::default(), journal);
        }
        Ok(v)
    }

    /// A copy of `s`; capacity is the next power of two of its length
    pub fn from_slice(s: &[T], journal: &Journal<A>) -> Result<Self>
    where
        T: PClone<A>,
    {
        Self::check_tx()?;
        let mut v = Self::empty();
        if s.is_empty() {
            return Ok(v);
        }
        unsafe {
            v.alloc_storage(next_pow_2(s.len()), journal)?;
            v.grow_slice(s, journal);
        }
        Ok(v)
    }

    /// The largest element count any vector of `T` can reach in pool `A`
    pub fn max_size() -> usize {
        let size = std::mem::size_of::<T>();
        if size == 0 {
            usize::MAX
        } else {
            A::MAX_ALLOC_BYTES / size
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        unsafe { self.buf.as_slice(self.len) }
    }

    /// The element at `n`, or `OutOfRange`
    pub fn at(&self, n: usize) -> Result<&T> {
        self.as_slice().get(n).ok_or(Error::OutOfRange(n))
    }

    pub fn front(&self) -> Option<&T> {
        self.as_slice().first()
    }

    pub fn back(&self) -> Option<&T> {
        self.as_slice().last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Mutable access to the element at `n`, logging it first
    pub fn at_mut(&mut self, n: usize, journal: &Journal<A>) -> Result<&mut T> {
        Self::check_tx()?;
        if n >= self.len {
            return Err(Error::OutOfRange(n));
        }
        unsafe {
            self.log_range(n, n + 1, journal);
            Ok(&mut *self.buf.as_mut_ptr().add(n))
        }
    }

    /// Mutable access to the first element
    pub fn front_mut(&mut self, journal: &Journal<A>) -> Result<&mut T> {
        self.at_mut(0, journal)
    }

    /// Mutable access to the last element
    pub fn back_mut(&mut self, journal: &Journal<A>) -> Result<&mut T> {
        if self.len == 0 {
            Self::check_tx()?;
            return Err(Error::OutOfRange(0));
        }
        self.at_mut(self.len - 1, journal)
    }

    /// Mutable view of the live elements, logging all of them
    pub fn as_slice_mut(&mut self, journal: &Journal<A>) -> Result<&mut [T]> {
        Self::check_tx()?;
        unsafe {
            self.log_range(0, self.len, journal);
            Ok(self.buf.as_slice_mut(self.len))
        }
    }

    /// Mutable iteration, logging all live elements
    pub fn iter_mut(&mut self, journal: &Journal<A>) -> Result<std::slice::IterMut<'_, T>> {
        Ok(self.as_slice_mut(journal)?.iter_mut())
    }

    /// Moves the contents out, leaving `self` empty
    pub fn take(&mut self, journal: &Journal<A>) -> Result<Self> {
        self.begin(journal)?;
        let v = Self {
            buf: self.buf,
            len: self.len,
        };
        self.buf = Slice::empty();
        self.len = 0;
        Ok(v)
    }

    /// Exchanges contents with `other`
    pub fn swap(&mut self, other: &mut Self, journal: &Journal<A>) -> Result<()> {
        self.begin(journal)?;
        unsafe { other.log_meta(journal) };
        std::mem::swap(&mut self.buf, &mut other.buf);
        std::mem::swap(&mut self.len, &mut other.len);
        Ok(())
    }

    /// Replaces the contents with `count` copies of `value`
    ///
    /// Keeps the current storage when `count` fits its capacity.
    pub fn assign_value(&mut self, count: usize, value: T, journal: &Journal<A>) -> Result<()>
    where
        T: PClone<A>,
    {
        self.do_assign(count, |_, j| value.pclone(j), journal)
    }

    /// Replaces the contents with a copy of `s`
    pub fn assign_slice(&mut self, s: &[T], journal: &Journal<A>) -> Result<()>
    where
        T: PClone<A>,
    {
        self.do_assign(s.len(), |i, j| s[i].pclone(j), journal)
    }

    /// Grows the capacity to hold at least `n` elements
    pub fn reserve(&mut self, n: usize, journal: &Journal<A>) -> Result<()> {
        self.begin(journal)?;
        if n > Self::max_size() {
            return Err(Error::Length(n));
        }
        if n <= self.capacity() {
            return Ok(());
        }
        let cap = next_pow_2(n);
        unsafe {
            if self.buf.is_dangling() {
                self.alloc_storage(cap, journal)
            } else {
                self.realloc_storage(cap, journal)
            }
        }
    }

    /// Reduces the capacity to the next power of two of the length
    pub fn shrink_to_fit(&mut self, journal: &Journal<A>) -> Result<()> {
        self.begin(journal)?;
        let cap = next_pow_2(self.len);
        unsafe { self.realloc_storage(cap, journal) }
    }

    /// Resizes to `count` elements, filling with `T::default()`
    pub fn resize(&mut self, count: usize, journal: &Journal<A>) -> Result<()>
    where
        T: Default,
    {
        self.do_resize(count, |_| T::default(), journal)
    }

    /// Resizes to `count` elements, filling with copies of `value`
    pub fn resize_with(&mut self, count: usize, value: T, journal: &Journal<A>) -> Result<()>
    where
        T: PClone<A>,
    {
        self.do_resize(count, |j| value.pclone(j), journal)
    }

    /// Destroys the elements and releases the storage
    pub fn free_data(&mut self, journal: &Journal<A>) -> Result<()> {
        self.begin(journal)?;
        unsafe {
            self.log_range(0, self.len, journal);
            if self.len > 0 {
                let p = self.buf.as_mut_ptr();
                for i in 0..self.len {
                    std::ptr::drop_in_place(p.add(i));
                }
            }
            self.len = 0;
            self.dealloc(journal)
        }
    }

    // ----- mutation protocol -----

    /// Mutation is legal only in the work stage of a transaction
    fn check_tx() -> Result<()> {
        if A::tx_stage() != TxStage::Work {
            Err(Error::Transaction(
                "the operation requires a running transaction".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn begin(&self, journal: &Journal<A>) -> Result<()> {
        Self::check_tx()?;
        unsafe { self.log_meta(journal) };
        Ok(())
    }

    /// Logs the metadata words as one contiguous range
    ///
    /// A header living outside the pool has no committed state to undo,
    /// so it is not logged.
    unsafe fn log_meta(&self, journal: &Journal<A>) {
        if A::valid(self) {
            Log::create(self, journal, Notifier::None);
        }
    }

    /// Logs the live elements `[from, to)` before an in-place overwrite
    unsafe fn log_range(&self, from: usize, to: usize, journal: &Journal<A>) {
        debug_assert!(to <= self.len);
        if to > from {
            Log::create(&self.as_slice()[from..to], journal, Notifier::None);
        }
    }

    // ----- storage manager -----

    /// Allocates the backing array; the vector must own none
    unsafe fn alloc_storage(&mut self, cap: usize, journal: &Journal<A>) -> Result<()> {
        debug_assert!(self.buf.is_dangling() && self.len == 0);
        debug_assert_eq!(cap, next_pow_2(cap));
        if cap == 0 {
            return Ok(());
        }
        if cap > Self::max_size() {
            return Err(Error::Length(cap));
        }
        let (_, off) = A::tx_alloc::<T>(cap, journal)?;
        self.buf = Slice::from_off_cap(off, cap);
        Ok(())
    }

    /// Schedules the backing array for reclamation at commit
    unsafe fn dealloc(&mut self, journal: &Journal<A>) -> Result<()> {
        if !self.buf.is_dangling() {
            A::tx_free::<T>(self.buf.off(), self.buf.capacity(), journal)?;
            self.buf = Slice::empty();
        }
        self.len = 0;
        Ok(())
    }

    /// Moves the elements into an array of capacity `cap`
    ///
    /// The new array is allocated and filled first; the old one is only
    /// scheduled for reclamation at commit, and the handle is reseated
    /// last, so no point in time has the elements unreachable.
    unsafe fn realloc_storage(&mut self, cap: usize, journal: &Journal<A>) -> Result<()> {
        debug_assert!(self.len <= cap || cap == 0);
        if cap == self.buf.capacity() {
            return Ok(());
        }
        if cap == 0 {
            return self.dealloc(journal);
        }
        if cap > Self::max_size() {
            return Err(Error::Length(cap));
        }
        let keep = self.len.min(cap);
        let (ptr, off) = A::tx_alloc::<T>(cap, journal)?;
        if !self.buf.is_dangling() {
            std::ptr::copy_nonoverlapping(self.buf.as_ptr(), ptr, keep);
            persist(ptr, keep * std::mem::size_of::<T>(), true);
            A::tx_free::<T>(self.buf.off(), self.buf.capacity(), journal)?;
        }
        self.buf = Slice::from_off_cap(off, cap);
        self.len = keep;
        Ok(())
    }

    /// Destroys the elements `[count, len)`
    unsafe fn shrink(&mut self, count: usize, journal: &Journal<A>) {
        debug_assert!(count <= self.len);
        if count == self.len {
            return;
        }
        self.log_range(count, self.len, journal);
        let p = self.buf.as_mut_ptr();
        for i in count..self.len {
            std::ptr::drop_in_place(p.add(i));
        }
        self.len = count;
    }

    /// Constructs `count` elements at the end; capacity must suffice
    unsafe fn grow_with<F: FnMut(&Journal<A>) -> T>(
        &mut self,
        count: usize,
        mut f: F,
        journal: &Journal<A>,
    ) {
        debug_assert!(self.len + count <= self.capacity());
        if count == 0 {
            return;
        }
        let start = self.len;
        let p = self.buf.as_mut_ptr();
        for _ in 0..count {
            p.add(self.len).write(f(journal));
            self.len += 1;
        }
        persist(p.add(start), count * std::mem::size_of::<T>(), true);
    }

    /// Appends a copy of `s`; capacity must suffice
    unsafe fn grow_slice(&mut self, s: &[T], journal: &Journal<A>)
    where
        T: PClone<A>,
    {
        debug_assert!(self.len + s.len() <= self.capacity());
        if s.is_empty() {
            return;
        }
        let start = self.len;
        let p = self.buf.as_mut_ptr();
        for x in s {
            p.add(self.len).write(x.pclone(journal));
            self.len += 1;
        }
        persist(p.add(start), s.len() * std::mem::size_of::<T>(), true);
    }

    /// Replaces the contents with `count` elements produced by `f(i)`
    ///
    /// When the new contents fit the current capacity, the live prefix is
    /// logged and overwritten in place and the storage is kept. Otherwise
    /// the elements are destroyed and built afresh in a new array.
    fn do_assign<F: FnMut(usize, &Journal<A>) -> T>(
        &mut self,
        count: usize,
        mut f: F,
        journal: &Journal<A>,
    ) -> Result<()> {
        self.begin(journal)?;
        if count > Self::max_size() {
            return Err(Error::Length(count));
        }
        unsafe {
            if count > self.capacity() {
                self.log_range(0, self.len, journal);
                if self.len > 0 {
                    let p = self.buf.as_mut_ptr();
                    for i in 0..self.len {
                        std::ptr::drop_in_place(p.add(i));
                    }
                }
                let old = self.buf;
                self.len = 0;
                self.buf = Slice::empty();
                self.alloc_storage(next_pow_2(count), journal)?;
                if !old.is_dangling() {
                    A::tx_free::<T>(old.off(), old.capacity(), journal)?;
                }
                let p = self.buf.as_mut_ptr();
                for i in 0..count {
                    p.add(i).write(f(i, journal));
                    self.len += 1;
                }
                persist(p, count * std::mem::size_of::<T>(), true);
            } else {
                let overwrite = count.min(self.len);
                self.log_range(0, overwrite, journal);
                let p = self.buf.as_mut_ptr();
                for i in 0..overwrite {
                    *p.add(i) = f(i, journal);
                }
                if overwrite > 0 {
                    persist(p, overwrite * std::mem::size_of::<T>(), true);
                }
                if count < self.len {
                    self.shrink(count, journal);
                } else if count > self.len {
                    let start = self.len;
                    for i in start..count {
                        p.add(i).write(f(i, journal));
                        self.len += 1;
                    }
                    persist(
                        p.add(start),
                        (count - start) * std::mem::size_of::<T>(),
                        true,
                    );
                }
            }
        }
        Ok(())
    }

    fn do_resize<F: FnMut(&Journal<A>) -> T>(
        &mut self,
        count: usize,
        mut f: F,
        journal: &Journal<A>,
    ) -> Result<()> {
        self.begin(journal)?;
        if count > Self::max_size() {
            return Err(Error::Length(count));
        }
        unsafe {
            if count < self.len {
                self.shrink(count, journal);
            }
            let cap = next_pow_2(count);
            if cap != self.capacity() {
                if self.buf.is_dangling() {
                    self.alloc_storage(cap, journal)?;
                } else {
                    self.realloc_storage(cap, journal)?;
                }
            }
            if count > self.len {
                let missing = count - self.len;
                self.grow_with(missing, &mut f, journal);
            }
        }
        Ok(())
    }
}

impl<T: PSafe, A: MemPool> Deref for Vec<T, A> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: PSafe, A: MemPool> Default for Vec<T, A> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: PSafe, A: MemPool> RootObj<A> for Vec<T, A> {
    fn init(_journal: &Journal<A>) -> Self {
        Self::empty()
    }
}

impl<T: PSafe + PClone<A>, A: MemPool> PClone<A> for Vec<T, A> {
    /// Clones contents and capacity alike
    fn pclone(&self, journal: &Journal<A>) -> Self {
        let mut v = Self::empty();
        if self.capacity() > 0 {
            unsafe {
                if let Err(e) = v.alloc_storage(self.capacity(), journal) {
                    panic!("{}", e);
                }
                v.grow_slice(self.as_slice(), journal);
            }
        }
        v
    }
}

impl<T: PSafe + PClone<A>, A: MemPool> PFrom<&[T], A> for Vec<T, A> {
    fn pfrom(s: &[T], journal: &Journal<A>) -> Self {
        match Self::from_slice(s, journal) {
            Ok(v) => v,
            Err(e) => panic!("{}", e),
        }
    }
}

impl<'a, T: PSafe, A: MemPool> IntoIterator for &'a Vec<T, A> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

impl<T: PSafe, A: MemPool> Drop for Vec<T, A> {
    /// Dropping cannot reclaim pool storage: there is no journal here.
    /// A vector dropped while owning storage leaks it;
    /// [`free_data`](#method.free_data) is the sanctioned release.
    fn drop(&mut self) {
        if !self.buf.is_dangling() {
            crate::log!(
                A,
                Yellow,
                "LEAK",
                "vector dropped with {} bytes of storage",
                self.buf.size_in_bytes()
            );
        }
    }
}

macro_rules! impl_slice_eq {
    ($rhs:ty $(, $N:ident)?) => {
        impl<T, U, A: MemPool $(, const $N: usize)?> PartialEq<$rhs> for Vec<T, A>
        where
            T: PSafe + PartialEq<U>,
        {
            #[inline]
            fn eq(&self, other: &$rhs) -> bool {
                self[..] == other[..]
            }
        }
    };
}

impl_slice_eq!(&[U]);
impl_slice_eq!([U; N], N);
impl_slice_eq!(&[U; N], N);

impl<T, U, A: MemPool> PartialEq<Vec<U, A>> for Vec<T, A>
where
    T: PSafe + PartialEq<U>,
    U: PSafe,
{
    #[inline]
    fn eq(&self, other: &Vec<U, A>) -> bool {
        self[..] == other[..]
    }
}

impl<T: PSafe + Eq, A: MemPool> Eq for Vec<T, A> {}

impl<T: PSafe + PartialOrd, A: MemPool> PartialOrd for Vec<T, A> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        PartialOrd::partial_cmp(&**self, &**other)
    }
}

impl<T: PSafe + Ord, A: MemPool> Ord for Vec<T, A> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        Ord::cmp(&**self, &**other)
    }
}

impl<T: PSafe + fmt::Debug, A: MemPool> fmt::Debug for Vec<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, x) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", x)?;
        }
        write!(f, "]")
    }
}

impl<T: PSafe + fmt::Display, A: MemPool> fmt::Display for Vec<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, x) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", x)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alloc::Heap;

    type V = Vec<i32, Heap>;

    fn free(v: &mut V) {
        Heap::transaction(move |j| v.free_data(j).unwrap()).unwrap();
    }

    #[test]
    fn capacity_is_next_power_of_two() {
        Heap::transaction(|j| {
            let mut v = Vec::<f64, Heap>::with_value(666, 6.66, j).unwrap();
            assert_eq!(v.len(), 666);
            assert_eq!(v.capacity(), 1024);
            assert!(v.iter().all(|x| *x == 6.66));
            v.free_data(j).unwrap();

            let mut v = V::with_default(5, j).unwrap();
            assert_eq!(v.capacity(), 8);
            assert_eq!(v.as_slice(), &[0; 5]);
            v.free_data(j).unwrap();

            let s: std::vec::Vec<i32> = (0..18).collect();
            let mut v = V::from_slice(&s, j).unwrap();
            assert_eq!(v.len(), 18);
            assert_eq!(v.capacity(), 32);
            assert_eq!(&v[..], &s[..]);
            v.free_data(j).unwrap();

            let v = V::new(j);
            assert!(v.is_empty());
            assert_eq!(v.capacity(), 0);
        })
        .unwrap();
    }

    #[test]
    fn reserve_and_shrink() {
        let mut v = Heap::transaction(|j| V::from_slice(&[1, 2, 3, 4, 5], j).unwrap()).unwrap();
        assert_eq!(v.capacity(), 8);
        Heap::transaction(|j| {
            v.reserve(10, j).unwrap();
            assert_eq!(v.capacity(), 16);
            v.reserve(3, j).unwrap();
            assert_eq!(v.capacity(), 16);
            assert_eq!(&v[..], &[1, 2, 3, 4, 5]);
            v.shrink_to_fit(j).unwrap();
            assert_eq!(v.capacity(), 8);
            assert_eq!(&v[..], &[1, 2, 3, 4, 5]);
            v.shrink_to_fit(j).unwrap();
            assert_eq!(v.capacity(), 8);
            v.free_data(j).unwrap();
            v.shrink_to_fit(j).unwrap();
            assert_eq!(v.capacity(), 0);
        })
        .unwrap();
    }

    #[test]
    fn assign_keeps_fitting_storage() {
        let mut v = Heap::transaction(|j| V::from_slice(&[1, 2, 3, 4, 5], j).unwrap()).unwrap();
        Heap::transaction(|j| {
            v.assign_value(3, 9, j).unwrap();
            assert_eq!(&v[..], &[9, 9, 9]);
            assert_eq!(v.capacity(), 8);

            v.assign_slice(&[7; 8], j).unwrap();
            assert_eq!(&v[..], &[7; 8]);
            assert_eq!(v.capacity(), 8);

            v.assign_value(12, 1, j).unwrap();
            assert_eq!(&v[..], &[1; 12]);
            assert_eq!(v.capacity(), 16);
        })
        .unwrap();
        free(&mut v);
    }

    #[test]
    fn resize_follows_count() {
        let mut v = Heap::transaction(|j| V::from_slice(&[1, 2, 3, 4, 5], j).unwrap()).unwrap();
        Heap::transaction(|j| {
            v.resize(2, j).unwrap();
            assert_eq!(&v[..], &[1, 2]);
            assert_eq!(v.capacity(), 2);

            v.resize_with(6, 7, j).unwrap();
            assert_eq!(&v[..], &[1, 2, 7, 7, 7, 7]);
            assert_eq!(v.capacity(), 8);

            v.resize(0, j).unwrap();
            assert!(v.is_empty());
            assert_eq!(v.capacity(), 0);
        })
        .unwrap();
    }

    #[test]
    fn element_access() {
        let mut v = Heap::transaction(|j| V::from_slice(&[10, 20, 30], j).unwrap()).unwrap();
        assert_eq!(*v.at(1).unwrap(), 20);
        assert!(matches!(v.at(3), Err(Error::OutOfRange(3))));
        assert_eq!(v.front(), Some(&10));
        assert_eq!(v.back(), Some(&30));

        Heap::transaction(|j| {
            *v.at_mut(1, j).unwrap() = 21;
            *v.front_mut(j).unwrap() = 11;
            *v.back_mut(j).unwrap() = 31;
            assert!(matches!(v.at_mut(5, j), Err(Error::OutOfRange(5))));
            for x in v.iter_mut(j).unwrap() {
                *x += 1;
            }
        })
        .unwrap();
        assert_eq!(&v[..], &[12, 22, 32]);

        let mut e = V::empty();
        Heap::transaction(|j| {
            assert!(matches!(e.back_mut(j), Err(Error::OutOfRange(0))));
        })
        .unwrap();
        free(&mut v);
    }

    #[test]
    fn panic_rolls_everything_back() {
        let mut v = Heap::transaction(|j| V::from_slice(&[1, 2, 3, 4, 5], j).unwrap()).unwrap();
        let res = Heap::transaction(|j| {
            v.as_slice_mut(j).unwrap().reverse();
            v.resize_with(40, 0, j).unwrap();
            panic!("midway failure");
        });
        assert!(matches!(res, Err(Error::Element(_))));
        assert_eq!(&v[..], &[1, 2, 3, 4, 5]);
        assert_eq!(v.capacity(), 8);
        free(&mut v);
    }

    #[test]
    fn error_rolls_everything_back() {
        let mut v = Heap::transaction(|j| V::from_slice(&[1, 2, 3], j).unwrap()).unwrap();
        let res: crate::result::Result<()> = Heap::try_transaction(|j| {
            v.assign_value(2, 8, j)?;
            Err(Error::Element("refused".to_string()))
        });
        assert!(res.is_err());
        assert_eq!(&v[..], &[1, 2, 3]);
        free(&mut v);
    }

    #[test]
    fn take_and_swap() {
        let mut a = Heap::transaction(|j| V::from_slice(&[1, 2], j).unwrap()).unwrap();
        let mut b = Heap::transaction(|j| V::from_slice(&[3, 4, 5], j).unwrap()).unwrap();
        Heap::transaction(|j| {
            a.swap(&mut b, j).unwrap();
            assert_eq!(&a[..], &[3, 4, 5]);
            assert_eq!(&b[..], &[1, 2]);

            let mut t = a.take(j).unwrap();
            assert!(a.is_empty());
            assert_eq!(a.capacity(), 0);
            assert_eq!(&t[..], &[3, 4, 5]);
            t.free_data(j).unwrap();
            b.free_data(j).unwrap();
        })
        .unwrap();
    }

    #[test]
    fn pclone_preserves_capacity() {
        Heap::transaction(|j| {
            let mut v = V::from_slice(&[1, 2, 3], j).unwrap();
            v.reserve(9, j).unwrap();
            assert_eq!(v.capacity(), 16);
            let mut c = v.pclone(j);
            assert_eq!(&c[..], &[1, 2, 3]);
            assert_eq!(c.capacity(), 16);
            v.free_data(j).unwrap();
            c.free_data(j).unwrap();
        })
        .unwrap();
    }

    #[test]
    fn comparisons() {
        Heap::transaction(|j| {
            let mut a = V::from_slice(&[1, 2, 3], j).unwrap();
            let mut b = a.pclone(j);
            assert_eq!(a, b);
            assert_eq!(a, [1, 2, 3]);
            assert_eq!(a, &[1, 2, 3][..]);
            *b.back_mut(j).unwrap() = 9;
            assert!(a < b);
            assert_eq!(format!("{:?}", a), "[1, 2, 3]");
            a.free_data(j).unwrap();
            b.free_data(j).unwrap();
        })
        .unwrap();
    }

    #[test]
    fn length_limit() {
        Heap::transaction(|j| {
            let mut v = V::empty();
            let too_big = V::max_size() + 1;
            assert!(matches!(v.reserve(too_big, j), Err(Error::Length(n)) if n == too_big));
            assert!(v.is_empty());
        })
        .unwrap();
    }

    #[test]
    fn random_ops_match_std_vec() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        Heap::transaction(|j| {
            let mut v = V::new(j);
            let mut oracle: std::vec::Vec<i32> = std::vec::Vec::new();
            for _ in 0..200 {
                match rng.gen_range(0..5) {
                    0 => {
                        let n = rng.gen_range(0..50);
                        let x = rng.gen();
                        v.resize_with(n, x, j).unwrap();
                        oracle.resize(n, x);
                    }
                    1 => {
                        let n = rng.gen_range(0..50);
                        let x = rng.gen();
                        v.assign_value(n, x, j).unwrap();
                        oracle.clear();
                        oracle.resize(n, x);
                    }
                    2 if !v.is_empty() => {
                        let i = rng.gen_range(0..v.len());
                        let x = rng.gen();
                        *v.at_mut(i, j).unwrap() = x;
                        oracle[i] = x;
                    }
                    3 => {
                        v.shrink_to_fit(j).unwrap();
                    }
                    _ => {
                        let n = rng.gen_range(0..64);
                        v.reserve(n, j).unwrap();
                    }
                }
                assert_eq!(&v[..], &oracle[..]);
                assert!(v.capacity() >= v.len());
                assert!(v.capacity() == 0 || v.capacity().is_power_of_two());
            }
            v.free_data(j).unwrap();
        })
        .unwrap();
    }

    #[test]
    fn requires_transaction() {
        assert!(matches!(
            V::check_tx(),
            Err(Error::Transaction(_))
        ));
    }
}
