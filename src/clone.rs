//! Transactional clone

use crate::alloc::MemPool;
use crate::stm::Journal;
use crate::PSafe;

/// A clone that may allocate in pool `A`
///
/// `Clone` cannot allocate persistent memory because it has no journal;
/// types owning pool storage implement `PClone` instead and thread the
/// journal through.
pub trait PClone<A: MemPool>: Sized {
    fn pclone(&self, journal: &Journal<A>) -> Self;

    /// Performs copy-assignment from `source`
    fn pclone_from(&mut self, source: &Self, journal: &Journal<A>) {
        *self = source.pclone(journal);
    }
}

macro_rules! impl_pclone {
    ($($ty:ty),*) => {
        $(impl<A: MemPool> PClone<A> for $ty {
            #[inline]
            fn pclone(&self, _journal: &Journal<A>) -> Self {
                *self
            }
        })*
    };
}

impl_pclone!(u8, u16, u32, u64, u128, usize);
impl_pclone!(i8, i16, i32, i64, i128, isize);
impl_pclone!(f32, f64, bool, char, ());

impl<T: PClone<A>, A: MemPool> PClone<A> for Option<T> {
    fn pclone(&self, journal: &Journal<A>) -> Self {
        self.as_ref().map(|x| x.pclone(journal))
    }
}

impl<T: PClone<A> + PSafe, A: MemPool, const N: usize> PClone<A> for [T; N] {
    fn pclone(&self, journal: &Journal<A>) -> Self {
        let mut out = std::mem::MaybeUninit::<[T; N]>::uninit();
        let p = out.as_mut_ptr() as *mut T;
        for (i, x) in self.iter().enumerate() {
            unsafe { p.add(i).write(x.pclone(journal)) };
        }
        unsafe { out.assume_init() }
    }
}
