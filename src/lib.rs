//! A persistent-memory vector with transactional crash consistency
//!
//! This crate keeps a contiguous dynamic array inside a memory-mapped
//! pool file and makes every mutation transactional: operations run
//! inside a [`transaction`], take undo logs in a per-thread [`Journal`],
//! and either commit atomically or roll back on panic, error, or crash.
//! Reopening the pool after a failure replays the recovery procedure and
//! lands on the last committed state.
//!
//! The entry point is the default pool module:
//!
//! ```no_run
//! use pvector::default::*;
//! use pvector::open_flags::*;
//! use pvector::alloc::MemPool;
//! use pvector::cell::RootObj;
//!
//! type P = Allocator;
//!
//! struct Root {
//!     data: PRefCell<PVec<i32>>,
//! }
//!
//! unsafe impl pvector::PSafe for Root {}
//!
//! impl RootObj<P> for Root {
//!     fn init(_j: &Journal) -> Self {
//!         Root { data: PRefCell::new(PVec::empty()) }
//!     }
//! }
//!
//! let root = P::open::<Root>("data.pool", O_CFNE).unwrap();
//! P::transaction(|j| {
//!     let mut data = root.data.borrow_mut(j);
//!     data.assign_slice(&[1, 2, 3], j).unwrap();
//! }).unwrap();
//! ```
//!
//! [`transaction`]: ./stm/fn.transaction.html
//! [`Journal`]: ./stm/struct.Journal.html

pub mod alloc;
pub mod cell;
pub mod clone;
pub mod convert;
pub mod err;
pub mod ll;
pub mod marker;
pub mod ptr;
pub mod stm;
pub mod utils;
pub mod vec;

#[cfg(test)]
mod tests;

pub mod result {
    /// Result of a fallible pool or container operation
    pub type Result<T> = std::result::Result<T, crate::err::Error>;
}

pub use crate::alloc::*;
pub use crate::cell::{LazyCell, PCell, PRefCell, RootCell, RootObj};
pub use crate::clone::PClone;
pub use crate::convert::{PFrom, PInto};
pub use crate::err::Error;
pub use crate::marker::PSafe;
pub use crate::stm::{transaction, Journal, TxStage};
