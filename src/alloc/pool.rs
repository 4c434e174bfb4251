//! The memory pool interface
//!
//! A pool is a zero-sized type implementing [`MemPool`]: all of its state
//! is static, so persistent pointers can name their pool by type alone.
//! The trait couples three concerns the same way throughout the crate:
//!
//! * address translation between pool offsets and mapped addresses,
//! * staged allocation, where free-list updates are queued with
//!   [`log64`](MemPool::log64) and flipped atomically by
//!   [`perform`](MemPool::perform), and
//! * transactions, which tie allocation lifetime to a [`Journal`].

use crate::cell::{RootCell, RootObj};
use crate::err::Error;
use crate::ll::*;
use crate::result::Result;
use crate::stm::{self, Journal, Log, TxStage, JOURNAL_COMMITTED};
use crate::utils::read_addr;
use crate::PSafe;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::marker::PhantomData;
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::ThreadId;

/// Pool size used when the open flags carry no size and the file does
/// not exist yet
pub const DEFAULT_POOL_SIZE: u64 = 8 * 1024 * 1024;

/// Flags for [`MemPool::open`] and [`MemPool::open_no_root`]
pub mod open_flags {
    /// Creates the pool file, replacing an existing one
    pub const O_C: u32 = 0x0001;

    /// Formats the pool image
    pub const O_F: u32 = 0x0002;

    /// Restricts `O_C`/`O_F` to the case that the file does not exist
    pub const O_CNE: u32 = 0x0004;

    /// Creates and formats
    pub const O_CF: u32 = O_C | O_F;

    /// Creates and formats only if the file does not exist
    pub const O_CFNE: u32 = O_C | O_F | O_CNE;

    /// Pool size flags: the requested size is `(flags >> 4) << 30` bytes
    pub const O_1GB: u32 = 1 << 4;
    pub const O_2GB: u32 = 2 << 4;
    pub const O_4GB: u32 = 4 << 4;
    pub const O_8GB: u32 = 8 << 4;
    pub const O_16GB: u32 = 16 << 4;
    pub const O_32GB: u32 = 32 << 4;
    pub const O_64GB: u32 = 64 << 4;
}

/// Dereferences the pool's volatile singleton, panicking when no pool
/// is open
#[macro_export]
macro_rules! static_inner {
    ($id:ident, $inner:ident, $body:block) => {
        unsafe {
            if let Some(inner) = $id {
                let $inner = &mut *inner;
                $body
            } else {
                panic!("No memory pool is open");
            }
        }
    };
}

/// Keeps a pool open; closes it when dropped
pub struct PoolGuard<P: MemPool>(PhantomData<P>);

impl<P: MemPool> PoolGuard<P> {
    pub(crate) fn new() -> Self {
        Self(PhantomData)
    }
}

impl<P: MemPool> Drop for PoolGuard<P> {
    fn drop(&mut self) {
        unsafe {
            let _ = P::close();
        }
    }
}

/// Creates a zeroed pool file of the given size
pub fn create_file(filename: &str, size: u64) -> Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(filename)
        .map_err(|e| Error::Pool(format!("{}", e)))?;
    file.set_len(size)
        .map_err(|e| Error::Pool(format!("{}", e)))?;
    Ok(())
}

/// A persistent memory pool with static identity
///
/// # Safety
///
/// Implementations must guarantee that offsets handed out by the
/// allocation methods stay stable for the lifetime of the pool file, and
/// that [`perform`](#method.perform) applies staged changes atomically
/// with respect to crashes.
pub unsafe trait MemPool
where
    Self: 'static + Sized + Default + Clone + Copy,
{
    /// Largest single allocation the pool accepts, in bytes
    const MAX_ALLOC_BYTES: usize = 0x3FFD_FFC0;

    /// Name of the pool type, used in log tracing
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Formats the pool image file
    unsafe fn format(filename: &str) -> Result<()>;

    /// The open generation of the pool, incremented on every open
    fn gen() -> u32 {
        1
    }

    fn size() -> usize;
    fn available() -> usize;

    fn used() -> usize {
        Self::size() - Self::available()
    }

    /// The range of valid mapped addresses
    fn rng() -> Range<u64>;

    /// Base address of the mapped image
    fn start() -> u64;

    /// One past the last mapped address
    fn end() -> u64;

    #[inline]
    fn contains(addr: u64) -> bool {
        Self::rng().contains(&addr)
    }

    /// Whether `x` resides inside the pool
    #[inline]
    fn valid<T: ?Sized>(x: &T) -> bool {
        let addr = x as *const T as *const u8 as u64;
        Self::contains(addr)
    }

    /// Resolves the pool offset of `x`, failing when `x` is not
    /// pool-resident
    #[inline]
    fn off<T: ?Sized>(x: &T) -> Result<u64> {
        if Self::valid(x) {
            unsafe { Ok(Self::off_unchecked(x)) }
        } else {
            Err(Error::Pool(format!(
                "address {:p} does not belong to the pool",
                x as *const T as *const u8
            )))
        }
    }

    #[inline]
    unsafe fn off_unchecked<T: ?Sized>(x: *const T) -> u64 {
        x as *const u8 as u64 - Self::start()
    }

    #[inline]
    unsafe fn get_unchecked<'a, T>(off: u64) -> &'a T {
        read_addr(Self::start() + off)
    }

    #[inline]
    unsafe fn get_mut_unchecked<'a, T>(off: u64) -> *mut T {
        read_addr::<T>(Self::start() + off) as *mut T
    }

    /// Dereferences `off`, verifying it names an allocation
    #[inline]
    fn deref_mut<'a, T>(off: u64) -> Result<&'a mut T> {
        if off != u64::MAX
            && Self::contains(Self::start() + off)
            && Self::allocated(off, std::mem::size_of::<T>())
        {
            unsafe { Ok(read_addr(Self::start() + off)) }
        } else {
            Err(Error::Pool(format!("invalid offset {:x}", off)))
        }
    }

    #[inline]
    fn deref<'a, T>(off: u64) -> Result<&'a T> {
        Self::deref_mut(off).map(|x| &*x)
    }

    /// Whether the range `(off, len)` lies in allocated pool memory
    fn allocated(off: u64, len: usize) -> bool;

    /// Stages an allocation of `size` bytes
    ///
    /// Returns the mapped pointer, the pool offset, and the rounded
    /// length, or a null pointer on exhaustion. The allocation is not
    /// durable until [`perform`](#method.perform); a failed staging must
    /// be dropped with [`discard`](#method.discard).
    unsafe fn pre_alloc(size: usize) -> (*mut u8, u64, usize);

    /// Stages the reclamation of an allocation
    unsafe fn pre_dealloc(ptr: *mut u8, size: usize);

    /// Stages a 64-bit write to be applied with the current staged
    /// allocation state
    unsafe fn log64(off: u64, val: u64);

    /// Atomically applies all staged changes
    unsafe fn perform();

    /// Throws away all staged changes
    unsafe fn discard();

    /// Head of the pool's persistent journal list
    unsafe fn journals_head() -> &'static u64;

    /// Runs `f` on the pool's thread-to-journal table
    ///
    /// The table maps each thread to the pool offset of its journal and
    /// the nesting depth of its transaction.
    unsafe fn journals<T, F: Fn(&mut HashMap<ThreadId, Box<(u64, i32)>>) -> T>(f: F) -> T;

    /// Unlinks a finished journal from the pool's journal list and
    /// reclaims it
    unsafe fn drop_journal(journal: &mut Journal<Self>);

    /// Completes interrupted transactions and allocator operations after
    /// a crash
    unsafe fn recover();

    fn open_no_root(path: &str, flags: u32) -> Result<PoolGuard<Self>>;

    /// Opens the pool and returns its root object, initializing it
    /// through [`RootObj::init`] inside a transaction on first open
    fn open<'a, U: 'a + PSafe + RootObj<Self>>(
        path: &str,
        flags: u32,
    ) -> Result<RootCell<'a, U, Self>>;

    fn is_open() -> bool;

    unsafe fn close() -> Result<()>;

    /// Creates and formats the pool file according to the open flags
    unsafe fn apply_flags(filename: &str, flags: u32) -> Result<()> {
        use open_flags::*;
        let mut size = ((flags >> 4) as u64) << 30;
        if size == 0 {
            size = DEFAULT_POOL_SIZE;
        }
        let exists = std::path::Path::new(filename).exists();
        if !exists {
            if flags & O_C == 0 {
                return Err(Error::Pool(format!("'{}' does not exist", filename)));
            }
            create_file(filename, size)?;
            Self::format(filename)?;
        } else if flags & O_CNE == 0 {
            if flags & O_C != 0 {
                create_file(filename, size)?;
            }
            if flags & O_F != 0 {
                Self::format(filename)?;
            }
        }
        Ok(())
    }

    /// The stage of the calling thread's transaction in this pool
    fn tx_stage() -> TxStage {
        if Self::is_open() && Journal::<Self>::is_running() {
            stm::stage()
        } else {
            TxStage::None
        }
    }

    /// Allocates room for `count` values of `T`, tied to the life of the
    /// transaction behind `journal`
    ///
    /// The allocation is recorded as a `DropOnAbort` slot first, staged,
    /// and performed, so an abort or a crash before commit reclaims it.
    unsafe fn tx_alloc<T>(count: usize, journal: &Journal<Self>) -> Result<(*mut T, u64)> {
        debug_assert!(count > 0);
        let len = count * std::mem::size_of::<T>();
        let slot = Log::drop_on_abort(u64::MAX, 1, journal);
        let (ptr, off, size) = Self::pre_alloc(len);
        if ptr.is_null() {
            // pre_alloc drops its own staged state on exhaustion
            return Err(Error::TransactionAlloc(len));
        }
        Log::set(slot, off, size);
        Self::perform();
        crate::log!(
            Self,
            Green,
            "ALLOC",
            "TX:      ({:>6x}:{:<6x}) = {:<6}",
            off,
            off + len as u64 - 1,
            len
        );
        Ok((ptr as *mut T, off))
    }

    /// Schedules the reclamation of `count` values of `T` at `off` for
    /// commit time
    ///
    /// The memory stays intact until the transaction commits, so an
    /// abort finds the old contents in place.
    unsafe fn tx_free<T>(off: u64, count: usize, journal: &Journal<Self>) -> Result<()> {
        let len = count * std::mem::size_of::<T>();
        if !Self::allocated(off, len) {
            return Err(Error::TransactionFree(format!(
                "offset {:x} ({} bytes) is not allocated",
                off, len
            )));
        }
        Log::drop_on_commit(off, len, journal);
        Ok(())
    }

    /// Moves `x` into the pool inside the transaction behind `journal`
    unsafe fn new<'a, T: PSafe>(x: T, journal: &Journal<Self>) -> &'a mut T {
        let (ptr, _) = Self::tx_alloc::<T>(1, journal)
            .unwrap_or_else(|e| panic!("{}", e));
        ptr.write(x);
        persist(ptr, std::mem::size_of::<T>(), true);
        &mut *ptr
    }

    /// Runs `body` atomically: commits on return, rolls back on panic
    ///
    /// Nested calls join the outer transaction through a per-thread
    /// depth counter; only the outermost commit writes back.
    fn transaction<T, F: FnOnce(&'static Journal<Self>) -> T>(body: F) -> Result<T> {
        if !Self::is_open() {
            return Err(Error::Pool("no open pool".to_string()));
        }
        unsafe {
            let (j, depth) = match Journal::<Self>::current(true) {
                Some(c) => c,
                None => return Err(Error::Pool("no open pool".to_string())),
            };
            let journal = crate::utils::as_mut(j);
            journal.unset(JOURNAL_COMMITTED);
            *depth += 1;
            stm::set_stage(TxStage::Work);
            let res = catch_unwind(AssertUnwindSafe(|| body(&*j)));
            sfence();
            match res {
                Ok(v) => {
                    Self::commit();
                    Ok(v)
                }
                Err(e) => {
                    Self::rollback();
                    Err(Error::from_panic(e))
                }
            }
        }
    }

    /// Like [`transaction`](#method.transaction), additionally rolling
    /// back when the body returns `Err`
    fn try_transaction<T, F: FnOnce(&'static Journal<Self>) -> Result<T>>(body: F) -> Result<T> {
        if !Self::is_open() {
            return Err(Error::Pool("no open pool".to_string()));
        }
        unsafe {
            let (j, depth) = match Journal::<Self>::current(true) {
                Some(c) => c,
                None => return Err(Error::Pool("no open pool".to_string())),
            };
            let journal = crate::utils::as_mut(j);
            journal.unset(JOURNAL_COMMITTED);
            *depth += 1;
            stm::set_stage(TxStage::Work);
            let res = catch_unwind(AssertUnwindSafe(|| body(&*j)));
            sfence();
            match res {
                Ok(Ok(v)) => {
                    Self::commit();
                    Ok(v)
                }
                Ok(Err(e)) => {
                    Self::rollback();
                    Err(e)
                }
                Err(e) => {
                    Self::rollback();
                    Err(Error::from_panic(e))
                }
            }
        }
    }

    /// Commits the calling thread's transaction at depth zero
    unsafe fn commit() {
        if let Some((j, depth)) = Journal::<Self>::current(false) {
            *depth -= 1;
            if *depth == 0 {
                let journal = crate::utils::as_mut(j);
                stm::set_stage(TxStage::OnCommit);
                journal.commit();
                stm::set_stage(TxStage::Finally);
                journal.clear();
                Self::drop_journal(journal);
                Journal::<Self>::drop_current();
                stm::set_stage(TxStage::None);
            }
        }
    }

    /// Rolls the calling thread's transaction back
    ///
    /// A nested rollback panics so the outermost frame unwinds and rolls
    /// the whole journal back.
    unsafe fn rollback() {
        if let Some((j, depth)) = Journal::<Self>::current(false) {
            if *depth > 1 {
                *depth -= 1;
                panic!("unsuccessful nested transaction");
            }
            *depth -= 1;
            let journal = crate::utils::as_mut(j);
            stm::set_stage(TxStage::OnAbort);
            journal.rollback();
            stm::set_stage(TxStage::Finally);
            journal.clear();
            Self::drop_journal(journal);
            Journal::<Self>::drop_current();
            stm::set_stage(TxStage::None);
        }
    }
}
