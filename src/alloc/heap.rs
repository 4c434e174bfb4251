//! A volatile pass-through pool
//!
//! `Heap` implements [`MemPool`] on ordinary heap memory: offsets are
//! addresses, nothing is durable, and recovery is a no-op. It exists so
//! transactional code and its tests can run without a pool file; the
//! undo-log machinery behaves exactly as it does on a file-backed pool.

use crate::alloc::pool::*;
use crate::cell::{RootCell, RootObj};
use crate::err::Error;
use crate::result::Result;
use crate::stm::Journal;
use crate::utils::Ring;
use crate::PSafe;
use lazy_static::lazy_static;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;

// covers the alignment of every primitive type
const HEAP_ALIGN: usize = 64;

lazy_static! {
    static ref JOURNALS: Mutex<HashMap<ThreadId, Box<(u64, i32)>>> = Mutex::new(HashMap::new());
    static ref LOGS: Mutex<Ring<(u64, u64), 8>> = Mutex::new(Ring::new());
}

static mut JOURNALS_HEAD: u64 = u64::MAX;

fn guarded<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    }
}

/// The volatile heap as a memory pool
#[derive(Clone, Copy, Default)]
pub struct Heap;

unsafe impl MemPool for Heap {
    fn name() -> &'static str {
        "heap"
    }

    unsafe fn format(_filename: &str) -> Result<()> {
        Ok(())
    }

    fn size() -> usize {
        usize::MAX
    }

    fn available() -> usize {
        usize::MAX
    }

    fn used() -> usize {
        0
    }

    fn rng() -> Range<u64> {
        0..u64::MAX
    }

    fn start() -> u64 {
        0
    }

    fn end() -> u64 {
        u64::MAX
    }

    fn allocated(_off: u64, _len: usize) -> bool {
        true
    }

    unsafe fn pre_alloc(size: usize) -> (*mut u8, u64, usize) {
        debug_assert!(size > 0);
        let ptr = alloc_zeroed(Layout::from_size_align_unchecked(size, HEAP_ALIGN));
        if ptr.is_null() {
            (std::ptr::null_mut(), u64::MAX, 0)
        } else {
            (ptr, ptr as u64, size)
        }
    }

    unsafe fn pre_dealloc(ptr: *mut u8, size: usize) {
        dealloc(ptr, Layout::from_size_align_unchecked(size, HEAP_ALIGN));
    }

    unsafe fn log64(off: u64, val: u64) {
        guarded(&LOGS).push((off, val));
    }

    unsafe fn perform() {
        let mut logs = guarded(&LOGS);
        while let Some((off, val)) = logs.pop() {
            *(off as *mut u64) = val;
        }
    }

    unsafe fn discard() {
        guarded(&LOGS).clear();
    }

    unsafe fn journals_head() -> &'static u64 {
        &JOURNALS_HEAD
    }

    unsafe fn journals<T, F: Fn(&mut HashMap<ThreadId, Box<(u64, i32)>>) -> T>(f: F) -> T {
        f(&mut *guarded(&JOURNALS))
    }

    unsafe fn drop_journal(journal: &mut Journal<Self>) {
        let off = Self::off_unchecked(journal);
        if JOURNALS_HEAD == off {
            JOURNALS_HEAD = journal.next_off();
        }
        if let Ok(prev) = Self::deref_mut::<Journal<Self>>(journal.prev_off()) {
            Self::log64(Self::off_unchecked(prev.next_off_ref()), journal.next_off());
        }
        if let Ok(next) = Self::deref_mut::<Journal<Self>>(journal.next_off()) {
            Self::log64(Self::off_unchecked(next.prev_off_ref()), journal.prev_off());
        }
        Self::pre_dealloc(
            journal as *mut Journal<Self> as *mut u8,
            std::mem::size_of::<Journal<Self>>(),
        );
        Self::perform();
    }

    unsafe fn recover() {}

    fn open_no_root(_path: &str, _flags: u32) -> Result<PoolGuard<Self>> {
        Ok(PoolGuard::new())
    }

    fn open<'a, U: 'a + PSafe + RootObj<Self>>(
        path: &str,
        flags: u32,
    ) -> Result<RootCell<'a, U, Self>> {
        let guard = Self::open_no_root(path, flags)?;
        let root = Self::transaction(|j| unsafe { Self::new(U::init(j), j) as *const U })?;
        unsafe { Ok(RootCell::new(&*root, Arc::new(guard))) }
    }

    fn is_open() -> bool {
        true
    }

    unsafe fn close() -> Result<()> {
        let mut journals = guarded(&JOURNALS);
        if !journals.is_empty() {
            return Err(Error::Pool(
                "an uncommitted transaction exists in the pool".to_string(),
            ));
        }
        journals.clear();
        JOURNALS_HEAD = u64::MAX;
        Ok(())
    }
}
