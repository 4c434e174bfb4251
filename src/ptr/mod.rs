//! Persistent pointers
//!
//! Pointers into a pool are stored as offsets from the pool's base
//! address, so they survive reopening the pool at a different address.
//! The pool identity is part of the pointer type.

mod ptr;
mod slice;

pub use ptr::*;
pub use slice::*;
