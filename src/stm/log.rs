//! Undo-log records

use crate::alloc::MemPool;
use crate::ll::*;
use crate::ptr::Ptr;
use crate::stm::Journal;
use crate::utils;
use std::fmt;

/// The payload of one journal slot
///
/// `repr(u64)` pins the tag to the first word, so a slot can be emptied
/// with a staged 64-bit write applied atomically with the reclamation it
/// records.
#[repr(u64)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum LogEnum {
    /// Empty slot
    None,

    /// An undo record `(src, log, len)`: `len` bytes at offset `src`
    /// were copied to the log area at offset `log` before mutation.
    /// Rollback copies them back.
    DataLog(u64, u64, usize),

    /// The allocation `(off, len)` is reclaimed if the transaction
    /// aborts. Used for storage allocated inside the transaction.
    DropOnAbort(u64, usize),

    /// The allocation `(off, len)` is reclaimed when the transaction
    /// commits. Used for storage freed inside the transaction, so an
    /// abort can still find the old contents in place.
    DropOnCommit(u64, usize),
}

use LogEnum::*;

/// Resets a log flag when the owning journal commits or rolls back
///
/// A snapshot-aware cell keeps a one-byte flag next to its value; the
/// flag is raised when the value is logged so the same transaction does
/// not log it twice. The notifier points at that byte.
pub enum Notifier<A: MemPool> {
    /// Points to the flag byte of the logged cell
    NonAtomic(Ptr<u8, A>),
    /// No flag to maintain
    None,
}

impl<A: MemPool> Notifier<A> {
    #[inline]
    pub(crate) fn update(&mut self, v: u8) {
        if let Notifier::NonAtomic(p) = self {
            if !p.is_dangling() {
                unsafe {
                    *utils::as_mut(p.as_ref()) = v;
                }
                persist_obj(p.as_ref(), false);
            }
        }
    }
}

impl<A: MemPool> Copy for Notifier<A> {}

impl<A: MemPool> Clone for Notifier<A> {
    fn clone(&self) -> Self {
        *self
    }
}

/// One slot of a journal page: a record and its notifier
pub struct Log<A: MemPool>(pub(crate) LogEnum, pub(crate) Notifier<A>);

impl<A: MemPool> Copy for Log<A> {}

impl<A: MemPool> Clone for Log<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: MemPool> Log<A> {
    pub(crate) const NONE: Log<A> = Log(LogEnum::None, Notifier::None);

    /// Takes an undo log of `x` in `journal`
    ///
    /// Copies the bytes of `x` into a fresh log area in the pool,
    /// persists them, and records a [`DataLog`] slot. Rolling the journal
    /// back restores the bytes; committing reclaims the log area.
    ///
    /// Panics if the pool cannot provide the log area; the panic unwinds
    /// into the enclosing transaction, which rolls back.
    ///
    /// [`DataLog`]: ./enum.LogEnum.html#variant.DataLog
    pub unsafe fn create<T: ?Sized>(x: &T, journal: &Journal<A>, mut notifier: Notifier<A>) {
        let len = std::mem::size_of_val(x);
        if len == 0 {
            return;
        }
        let src = A::off_unchecked(x as *const T as *const u8);
        let (ptr, off, _) = A::pre_alloc(len);
        if ptr.is_null() {
            panic!("not enough space to take a log of {} bytes", len);
        }
        A::perform();
        std::ptr::copy_nonoverlapping(x as *const T as *const u8, ptr, len);
        persist(ptr, len, true);
        crate::log!(
            A,
            Cyan,
            "LOG",
            "FOR:     ({:>6x}:{:<6x}) = {:<6} DATA",
            src,
            src + len as u64 - 1,
            len
        );
        journal.write(DataLog(src, off, len), notifier);
        notifier.update(1);
    }

    /// Records that the allocation `(off, len)` dies on abort
    ///
    /// Returns a handle to the slot so a staged allocation can patch the
    /// offset and length through [`Log::set`] before the allocator's
    /// `perform` makes them visible atomically.
    pub(crate) unsafe fn drop_on_abort(
        off: u64,
        len: usize,
        journal: &Journal<A>,
    ) -> Ptr<Log<A>, A> {
        journal.write(DropOnAbort(off, len), Notifier::None)
    }

    /// Records that the allocation `(off, len)` dies on commit
    pub(crate) unsafe fn drop_on_commit(
        off: u64,
        len: usize,
        journal: &Journal<A>,
    ) -> Ptr<Log<A>, A> {
        journal.write(DropOnCommit(off, len), Notifier::None)
    }

    /// Patches the offset and length of a drop record through the
    /// allocator's staged 64-bit writes
    ///
    /// The slot becomes visible together with the allocation itself when
    /// the allocator performs its staged changes, so a crash in between
    /// leaves either both or neither.
    pub(crate) unsafe fn set(mut slot: Ptr<Log<A>, A>, off: u64, len: usize) {
        match &mut slot.as_mut().0 {
            DropOnAbort(o, l) | DropOnCommit(o, l) => {
                A::log64(A::off_unchecked(o as *const u64), off);
                A::log64(A::off_unchecked(l as *const usize as *const u64), len as u64);
            }
            _ => unreachable!("not a drop record"),
        }
    }

    /// Reclaims `(off, len)` and empties this slot in the same atomic
    /// step, so running the record again after a crash is a no-op
    unsafe fn reclaim(&mut self, off: u64, len: usize) {
        A::pre_dealloc(A::get_mut_unchecked::<u8>(off), len);
        // 0 is the tag of `LogEnum::None`
        A::log64(A::off_unchecked(&self.0 as *const LogEnum as *const u64), 0);
        A::perform();
    }

    /// Applies the commit action of this record
    pub(crate) unsafe fn commit(&mut self) {
        match self.0 {
            // the mutated data becomes the committed state; flush it
            // before the log that could have restored it goes away
            DataLog(src, _, len) => {
                persist(A::get_mut_unchecked::<u8>(src), len, false);
            }
            DropOnCommit(off, len) => {
                if off != u64::MAX {
                    crate::log!(
                        A,
                        Red,
                        "DEL",
                        "COMMIT:  ({:>6x}:{:<6x}) = {:<6}",
                        off,
                        off + len as u64 - 1,
                        len
                    );
                    self.reclaim(off, len);
                }
            }
            _ => {}
        }
    }

    /// Applies the abort action of this record
    pub(crate) unsafe fn rollback(&mut self) {
        match self.0 {
            DataLog(src, log, len) => {
                crate::log!(
                    A,
                    Magenta,
                    "RESTORE",
                    "         ({:>6x}:{:<6x}) = {:<6}",
                    src,
                    src + len as u64 - 1,
                    len
                );
                let src_ptr = A::get_mut_unchecked::<u8>(src);
                let log_ptr = A::get_mut_unchecked::<u8>(log);
                std::ptr::copy_nonoverlapping(log_ptr as *const u8, src_ptr, len);
                persist(src_ptr, len, false);
            }
            DropOnAbort(off, len) => {
                if off != u64::MAX {
                    crate::log!(
                        A,
                        Red,
                        "DEL",
                        "ABORT:   ({:>6x}:{:<6x}) = {:<6}",
                        off,
                        off + len as u64 - 1,
                        len
                    );
                    self.reclaim(off, len);
                }
            }
            _ => {}
        }
    }

    /// Re-applies the pending action of this record during recovery
    ///
    /// A journal found committed may have crashed while reclaiming, so
    /// its `DropOnCommit` records run again; an uncommitted journal is
    /// rolled back as if it had aborted. Both actions empty their slot
    /// atomically with the reclamation, so repeating them is safe.
    pub(crate) unsafe fn recover(&mut self, committed: bool) {
        if committed {
            self.commit();
        } else {
            self.rollback();
        }
    }

    /// Resets the notifier flag byte
    pub(crate) fn notify(&mut self, v: u8) {
        self.1.update(v)
    }

    /// Reclaims the log area of a `DataLog` record and empties the slot
    pub(crate) unsafe fn clear(&mut self) {
        if let DataLog(_, log, len) = self.0 {
            if log != u64::MAX {
                self.reclaim(log, len);
            }
        }
        self.0 = LogEnum::None;
    }
}

impl<A: MemPool> fmt::Debug for Log<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            LogEnum::None => write!(f, "None"),
            DataLog(src, log, len) => write!(f, "DataLog({:x} <- {:x}; {})", src, log, len),
            DropOnAbort(off, len) => write!(f, "DropOnAbort({:x}; {})", off, len),
            DropOnCommit(off, len) => write!(f, "DropOnCommit({:x}; {})", off, len),
        }
    }
}
