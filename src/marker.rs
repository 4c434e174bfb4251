//! Marker traits for pool-resident data

use std::cell::UnsafeCell;
use std::marker::PhantomData;

/// Safe to be stored in persistent memory
///
/// A type is `PSafe` when it contains no volatile pointers or references:
/// all of its reachable state lives inside the pool, expressed as offsets,
/// so it remains meaningful after a restart at a different base address.
///
/// # Safety
///
/// Implementing `PSafe` for a type holding a raw pointer, a reference, or
/// a handle into volatile memory breaks crash consistency: the value read
/// after a reopen would point into the old address space.
pub unsafe trait PSafe {}

macro_rules! impl_psafe {
    ($($ty:ty),*) => {
        $(unsafe impl PSafe for $ty {})*
    };
}

impl_psafe!(u8, u16, u32, u64, u128, usize);
impl_psafe!(i8, i16, i32, i64, i128, isize);
impl_psafe!(f32, f64, bool, char, ());

unsafe impl<T: PSafe> PSafe for Option<T> {}
unsafe impl<T: PSafe, E: PSafe> PSafe for Result<T, E> {}
unsafe impl<T: PSafe> PSafe for [T] {}
unsafe impl<T: PSafe, const N: usize> PSafe for [T; N] {}
unsafe impl<T: ?Sized> PSafe for PhantomData<T> {}
unsafe impl<T: PSafe + ?Sized> PSafe for UnsafeCell<T> {}

macro_rules! impl_psafe_tuple {
    ($($name:ident)+) => {
        unsafe impl<$($name: PSafe),+> PSafe for ($($name,)+) {}
    };
}

impl_psafe_tuple!(A);
impl_psafe_tuple!(A B);
impl_psafe_tuple!(A B C);
impl_psafe_tuple!(A B C D);
impl_psafe_tuple!(A B C D E);
impl_psafe_tuple!(A B C D E F);
impl_psafe_tuple!(A B C D E F G);
