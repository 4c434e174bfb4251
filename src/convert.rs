//! Transactional conversions

use crate::alloc::MemPool;
use crate::stm::Journal;

/// A conversion that may allocate in pool `A`
pub trait PFrom<T, A: MemPool>: Sized {
    fn pfrom(value: T, journal: &Journal<A>) -> Self;
}

/// The reciprocal of [`PFrom`]
pub trait PInto<T, A: MemPool>: Sized {
    fn pinto(self, journal: &Journal<A>) -> T;
}

impl<T, U: PFrom<T, A>, A: MemPool> PInto<U, A> for T {
    #[inline]
    fn pinto(self, journal: &Journal<A>) -> U {
        U::pfrom(self, journal)
    }
}
