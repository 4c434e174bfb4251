//! Error kinds reported by pools, transactions, and containers
//!
//! Every fallible operation in this crate resolves to one of the kinds
//! below. Errors returned from inside a transaction body make the
//! enclosing [`transaction`] roll back; nothing is retried locally.
//!
//! [`transaction`]: ../stm/fn.transaction.html

use std::fmt;

/// The error type for pool, transaction, and container operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The address does not belong to an open pool, the pool image is
    /// invalid, or the pool could not be opened/closed
    Pool(String),

    /// The operation requires an active transaction in the work stage
    Transaction(String),

    /// Allocation of the given number of bytes failed inside a
    /// transaction
    TransactionAlloc(usize),

    /// Reclaiming persistent memory failed inside a transaction
    TransactionFree(String),

    /// The requested element count exceeds `max_size`
    Length(usize),

    /// Index past the end of the container
    OutOfRange(usize),

    /// A panic unwound out of an element constructor or the transaction
    /// body; carries the panic payload when it is printable
    Element(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Pool(s) => write!(f, "pool error: {}", s),
            Error::Transaction(s) => write!(f, "transaction error: {}", s),
            Error::TransactionAlloc(len) => {
                write!(f, "failed to allocate {} bytes in transaction", len)
            }
            Error::TransactionFree(s) => write!(f, "failed to free memory: {}", s),
            Error::Length(cnt) => write!(f, "length error: {} elements exceed max_size", cnt),
            Error::OutOfRange(i) => write!(f, "index {} out of range", i),
            Error::Element(s) => write!(f, "element operation failed: {}", s),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Converts a panic payload into an `Element` error
    pub(crate) fn from_panic(e: Box<dyn std::any::Any + Send>) -> Self {
        if let Some(s) = e.downcast_ref::<&str>() {
            Error::Element(s.to_string())
        } else if let Some(s) = e.downcast_ref::<String>() {
            Error::Element(s.clone())
        } else {
            Error::Element("unknown panic payload".to_string())
        }
    }
}
