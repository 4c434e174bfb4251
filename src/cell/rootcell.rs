use crate::alloc::{MemPool, PoolGuard};
use crate::PSafe;
use std::ops::Deref;
use std::sync::Arc;

/// Constructs the pool's root object inside the opening transaction
///
/// The root object is created once, the first time the pool is opened,
/// and found again on every later open. Its `init` runs inside a
/// transaction, so a crash during first open leaves the pool without a
/// root rather than with a half-built one.
pub trait RootObj<A: MemPool>: PSafe {
    fn init(journal: &crate::stm::Journal<A>) -> Self;
}

macro_rules! impl_root_obj {
    ($($ty:ty),*) => {
        $(impl<A: MemPool> RootObj<A> for $ty {
            fn init(_journal: &crate::stm::Journal<A>) -> Self {
                Default::default()
            }
        })*
    };
}

impl_root_obj!(u8, u16, u32, u64, u128, usize);
impl_root_obj!(i8, i16, i32, i64, i128, isize);
impl_root_obj!(f32, f64, bool, char, ());

impl<T: PSafe + RootObj<A>, A: MemPool> RootObj<A> for crate::cell::PCell<T, A> {
    fn init(journal: &crate::stm::Journal<A>) -> Self {
        Self::new(T::init(journal))
    }
}

impl<T: PSafe + RootObj<A>, A: MemPool> RootObj<A> for crate::cell::PRefCell<T, A> {
    fn init(journal: &crate::stm::Journal<A>) -> Self {
        Self::new(T::init(journal))
    }
}

/// A handle to the root object, keeping its pool open
pub struct RootCell<'a, T: PSafe + ?Sized, A: MemPool>(&'a T, Arc<PoolGuard<A>>);

impl<'a, T: PSafe + ?Sized, A: MemPool> RootCell<'a, T, A> {
    pub fn new(value: &'a T, pool: Arc<PoolGuard<A>>) -> Self {
        Self(value, pool)
    }
}

impl<T: PSafe + ?Sized, A: MemPool> Deref for RootCell<'_, T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        self.0
    }
}

impl<'a, T: PSafe + ?Sized, A: MemPool> Clone for RootCell<'a, T, A> {
    fn clone(&self) -> Self {
        Self(self.0, self.1.clone())
    }
}
