//! Software transactional memory for persistent pools
//!
//! Mutation of pool-resident data happens only inside a transaction. The
//! [`transaction`] wrapper obtains the calling thread's [`Journal`] in
//! pool `P` (creating one at the first, outermost call), runs the body,
//! and commits on success. If the body panics, the journal's undo logs
//! roll every logged range back before the error is reported.

mod journal;
mod log;

pub use journal::*;
pub use log::*;

use crate::alloc::MemPool;
use crate::result::Result;
use std::cell::Cell;

/// The stage of the calling thread's transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStage {
    /// No transaction is running
    None,
    /// The transaction body is executing; mutation is allowed
    Work,
    /// The journal is being rolled back
    OnAbort,
    /// The journal is being committed
    OnCommit,
    /// Logs and journal pages are being reclaimed
    Finally,
}

thread_local! {
    static STAGE: Cell<TxStage> = Cell::new(TxStage::None);
}

/// The stage of the calling thread's transaction
#[inline]
pub fn stage() -> TxStage {
    STAGE.with(|s| s.get())
}

#[inline]
pub(crate) fn set_stage(s: TxStage) {
    STAGE.with(|c| c.set(s))
}

/// Runs `body` atomically with respect to crashes in pool `P`
///
/// A shorthand for [`MemPool::transaction`].
pub fn transaction<T, P, F>(body: F) -> Result<T>
where
    P: MemPool,
    F: FnOnce(&'static Journal<P>) -> T,
{
    P::transaction(body)
}
