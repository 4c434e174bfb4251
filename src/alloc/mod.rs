//! Memory pools and allocation

pub mod default;
pub mod heap;
mod pool;

pub use heap::Heap;
pub use pool::*;
