//! Snapshot-aware cells and the root object protocol

mod cell;
mod lazy;
mod refcell;
mod rootcell;

pub use cell::*;
pub use lazy::*;
pub use refcell::*;
pub use rootcell::*;
