//! The default file-backed pool
//!
//! The pool image starts with a persistent header ([`Image`]) holding
//! the magic number, the root object, the head of the journal list, and
//! the allocator state ([`Pow2Alg`]): segregated free lists of
//! power-of-two blocks with buddy merging. Free-list updates are staged
//! in a header-resident redo ring and materialized atomically, so a
//! crash in the middle of an allocation either completes or discards it
//! on the next open.

use crate::alloc::pool::*;
use crate::cell::{RootCell, RootObj};
use crate::err::Error;
use crate::ll::*;
use crate::result::Result;
use crate::static_inner;
use crate::stm;
use crate::utils::{read, read_addr, Ring};
use crate::PSafe;
use lazy_static::lazy_static;
use memmap::MmapMut;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

const FLAG_HAS_ROOT: u64 = 0x0000_0001;

#[repr(transparent)]
#[derive(Clone, Debug)]
/// Free-block header: the offset of the next free block of the same
/// size, `u64::MAX` at the end of a list
struct Block {
    next: u64,
}

#[inline]
const fn num_bits<T>() -> u32 {
    (mem::size_of::<T>() << 3) as u32
}

#[inline]
fn get_idx(x: usize) -> usize {
    if x == 0 {
        usize::MAX
    } else {
        let x = x.max(mem::size_of::<Block>());
        (num_bits::<usize>() - (x - 1).leading_zeros()) as usize
    }
}

#[inline]
fn off_to_option(p: u64) -> Option<u64> {
    if p == u64::MAX {
        None
    } else {
        Some(p)
    }
}

#[cfg(not(any(feature = "no_pthread", windows)))]
unsafe fn init_lock(mutex: &mut libc::pthread_mutex_t, attr: &mut libc::pthread_mutexattr_t) {
    libc::pthread_mutexattr_init(attr);
    libc::pthread_mutex_init(mutex, attr);
}

#[repr(C)]
/// Power-of-two free-list allocator with buddy merging
///
/// Keeps one list per block size `2^k`. An allocation of `len` bytes is
/// served from list `get_idx(len)`, splitting larger blocks as needed;
/// reclamation merges a block with its buddy when both halves are free.
/// The required list-link changes are staged in `aux` and the external
/// 64-bit writes in `log64`; [`perform`](#method.perform) materializes
/// both after marking `aux_valid`, so the recovery procedure can finish
/// an interrupted drain.
pub struct Pow2Alg<A: MemPool> {
    free_lists: [u64; 64],
    last_idx: usize,
    available: usize,
    size: usize,

    /// Staged free-list link changes
    aux: Ring<(u64, u64), 128>,

    /// Staged external 64-bit writes
    log64: Ring<(u64, u64), 8>,

    aux_valid: bool,
    available_log: usize,

    #[cfg(not(any(feature = "no_pthread", windows)))]
    mutex: (libc::pthread_mutex_t, libc::pthread_mutexattr_t),

    #[cfg(any(feature = "no_pthread", windows))]
    mutex: u64,

    phantom: PhantomData<A>,
}

impl<A: MemPool> Pow2Alg<A> {
    pub fn init(&mut self, base: u64, size: usize) {
        let mut idx = get_idx(size);
        if 1 << idx > size {
            idx -= 1;
        }
        self.free_lists = [u64::MAX; 64];
        self.size = 1 << idx;
        self.available = self.size;
        self.free_lists[idx] = base;
        self.last_idx = idx;
        self.log64.clear();
        self.aux.clear();
        self.aux_valid = false;

        Self::block(base).next = u64::MAX;

        #[cfg(not(any(feature = "no_pthread", windows)))]
        unsafe {
            init_lock(&mut self.mutex.0, &mut self.mutex.1);
        }

        #[cfg(any(feature = "no_pthread", windows))]
        {
            self.mutex = 0;
        }
    }

    #[inline]
    fn in_range(off: u64) -> bool {
        (off < u64::MAX - A::start()) && (off + A::start() < A::end())
    }

    #[inline]
    fn block<'a>(off: u64) -> &'a mut Block {
        debug_assert!(Self::in_range(off), "off(0x{:x}) out of range", off);
        unsafe { read_addr(A::start() + off) }
    }

    #[inline]
    fn lock(&mut self) {
        unsafe {
            #[cfg(not(any(feature = "no_pthread", windows)))]
            libc::pthread_mutex_lock(&mut self.mutex.0);

            #[cfg(any(feature = "no_pthread", windows))]
            {
                let a = &*(&self.mutex as *const u64 as *const std::sync::atomic::AtomicU64);
                while a
                    .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Relaxed)
                    .is_err()
                {}
            }
        }
    }

    #[inline]
    fn unlock(&mut self) {
        unsafe {
            #[cfg(not(any(feature = "no_pthread", windows)))]
            libc::pthread_mutex_unlock(&mut self.mutex.0);

            #[cfg(any(feature = "no_pthread", windows))]
            {
                let a = &*(&self.mutex as *const u64 as *const std::sync::atomic::AtomicU64);
                a.store(0, Ordering::Release);
            }
        }
    }

    #[inline]
    pub unsafe fn log(&mut self, off: u64, data: u64) {
        self.log64.push((off, data));
    }

    #[inline]
    unsafe fn aux_push(&mut self, off: u64, data: u64) {
        self.aux.push((off, data));
    }

    /// Materializes the staged changes
    ///
    /// Not valid until called; the recovery procedure performs staged
    /// changes found with `aux_valid` set and discards them otherwise.
    fn drain_aux(&mut self) {
        sfence();

        self.aux_valid = true;
        persist_obj(&self.aux_valid, true);
        self.aux.foreach(|(off, next)| {
            let b = Self::block(off);
            b.next = next;
            persist_obj(&b.next, false);
        });
        self.aux.clear();
        self.log64.foreach(|(off, data)| {
            let b = Self::block(off);
            b.next = data;
            persist_obj(&b.next, false);
        });
        self.log64.clear();
        self.available = self.available_log;
        persist_obj(&self.available, true);
    }

    #[inline]
    pub unsafe fn perform(&mut self) {
        self.drain_aux();
        self.aux_valid = false;
        persist_obj(&self.aux_valid, true);
        self.unlock();
    }

    #[inline]
    pub fn discard(&mut self) {
        self.aux.clear();
        self.log64.clear();
        self.unlock();
    }

    #[inline]
    fn list_off(&self, idx: usize) -> u64 {
        unsafe { A::off_unchecked(&self.free_lists[idx]) }
    }

    #[inline]
    unsafe fn find_free_memory(&mut self, idx: usize, split: bool) -> Option<u64> {
        if idx > self.last_idx {
            None
        } else {
            let res;
            if let Some(b) = off_to_option(self.free_lists[idx]) {
                let block = Self::block(b);
                self.aux_push(self.list_off(idx), block.next);
                res = b;
            } else {
                res = self.find_free_memory(idx + 1, true)?;
            }
            if idx > 0 && split {
                // release the upper half into the next list down,
                // keeping it address-ordered for buddy merging
                let next = res + (1 << (idx - 1));
                let mut curr = self.free_lists[idx - 1];
                let mut prev: Option<u64> = None;

                while let Some(b) = off_to_option(curr) {
                    if b > next {
                        break;
                    }
                    prev = Some(b);
                    curr = Self::block(b).next;
                }

                if let Some(p) = prev {
                    self.aux_push(next, Self::block(p).next);
                    self.aux_push(p, next);
                } else {
                    self.aux_push(next, self.free_lists[idx - 1]);
                    self.aux_push(self.list_off(idx - 1), next);
                }
            }
            Some(res)
        }
    }

    /// Stages an allocation of `len` bytes; returns its offset or
    /// `u64::MAX` on exhaustion
    pub unsafe fn alloc_impl(&mut self, len: usize, perform: bool) -> u64 {
        self.lock();
        let idx = get_idx(len);
        let len = 1 << idx;

        if len > self.available {
            self.discard();
            u64::MAX
        } else {
            match self.find_free_memory(idx, false) {
                Some(off) => {
                    self.available_log = self.available - len;
                    self.aux.sync_all();
                    if perform {
                        self.perform();
                    }
                    off
                }
                None => {
                    self.discard();
                    u64::MAX
                }
            }
        }
    }

    /// Stages the reclamation of the block at `off`
    pub unsafe fn dealloc_impl(&mut self, off: u64, len: usize, perform: bool) {
        self.lock();
        self.available_log = self.available;
        self.free_impl(off, len);
        self.aux.sync_all();
        if perform {
            self.perform();
        }
    }

    unsafe fn free_impl(&mut self, off: u64, len: usize) {
        let idx = get_idx(len);
        let len = 1 << idx;
        let end = off + (1 << idx);
        let mut curr = self.free_lists[idx];
        let mut prev: Option<u64> = None;
        if idx < self.last_idx {
            while let Some(b) = off_to_option(curr) {
                let e = Self::block(b);
                let on_left = off & (1 << idx) == 0;
                if (b == end && on_left) || (b + len as u64 == off && !on_left) {
                    // the buddy is free: merge upward
                    let off = off.min(b);
                    if let Some(p) = prev {
                        self.aux_push(p, e.next);
                    } else {
                        self.aux_push(self.list_off(idx), e.next);
                    }
                    self.available_log -= len;
                    self.free_impl(off, len << 1);
                    return;
                }
                if b > off {
                    break;
                }
                prev = Some(b);
                curr = e.next;
                debug_assert_ne!(curr, b, "cyclic link in free_impl");
            }
        }
        if let Some(p) = prev {
            self.aux_push(off, Self::block(p).next);
            self.aux_push(p, off);
        } else {
            self.aux_push(off, self.free_lists[idx]);
            self.aux_push(self.list_off(idx), off);
        }
        self.available_log += len;
    }

    /// Finishes an interrupted drain
    ///
    /// The staged rings live in the pool header, so if the crash hit
    /// between `drain_aux` and the end of `perform`, the same changes
    /// are applied again; staged-but-unvalidated changes are discarded.
    pub fn recover(&mut self) {
        #[cfg(not(any(feature = "no_pthread", windows)))]
        unsafe {
            init_lock(&mut self.mutex.0, &mut self.mutex.1);
        }

        #[cfg(any(feature = "no_pthread", windows))]
        {
            self.mutex = 0;
        }

        if self.aux_valid {
            self.drain_aux();
            self.aux_valid = false;
            persist_obj(&self.aux_valid, true);
        } else {
            self.aux.clear();
            self.log64.clear();
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.available
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.size - self.available
    }
}

#[repr(C)]
struct Image {
    magic_number: u64,
    flags: u64,
    gen: u32,
    root_obj: u64,
    root_type_id: u64,
    journals: u64,
    size: usize,
    alg: Pow2Alg<Allocator>,
}

impl Image {
    fn type_id() -> u64 {
        let id = std::any::type_name::<Self>();
        let mut s = DefaultHasher::new();
        id.hash(&mut s);
        s.finish()
    }

    fn init(&mut self, size: usize) {
        self.flags = 0;
        self.gen = 1;
        self.root_obj = u64::MAX;
        self.root_type_id = 0;
        self.journals = u64::MAX;
        self.size = size;

        self.magic_number = u64::MAX;
        self.alg.init(0, size);
        unsafe {
            // carve the header out of the managed space
            self.alg.alloc_impl(mem::size_of::<Self>(), true);
        }
        self.magic_number = Self::type_id();
    }

    fn has_root(&self) -> bool {
        self.flags & FLAG_HAS_ROOT == FLAG_HAS_ROOT
    }
}

struct VData {
    #[allow(dead_code)]
    filename: String,
    journals: HashMap<ThreadId, Box<(u64, i32)>>,
    #[allow(dead_code)]
    mmap: MmapMut,
}

impl VData {
    fn new(mmap: MmapMut, filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            journals: HashMap::new(),
            mmap,
        }
    }
}

static mut POOL_START: u64 = 0;
static mut POOL_VALID_START: u64 = 0;
static mut POOL_END: u64 = 0;
static mut INNER: Option<*mut Image> = None;
static OPEN: AtomicBool = AtomicBool::new(false);
static mut MAX_GEN: u32 = 0;

lazy_static! {
    static ref VDATA: Mutex<Option<VData>> = Mutex::new(None);
}

fn vdata_lock() -> std::sync::MutexGuard<'static, Option<VData>> {
    match VDATA.lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    }
}

/// The default file-backed memory pool
#[derive(Clone, Copy, Default)]
pub struct Allocator;

impl Allocator {
    fn running_transaction() -> bool {
        let vdata = vdata_lock();
        if let Some(vdata) = &*vdata {
            !vdata.journals.is_empty()
        } else {
            false
        }
    }

    fn open_impl(filename: &str) -> Result<PoolGuard<Self>> {
        let metadata =
            std::fs::metadata(filename).map_err(|e| Error::Pool(format!("{}", e)))?;
        if !metadata.is_file() || metadata.len() < 8 {
            return Err(Error::Pool(format!("invalid pool file '{}'", filename)));
        }
        let path = PathBuf::from(filename);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::Pool(format!("{}", e)))?;

        let mut mmap = unsafe {
            memmap::MmapOptions::new()
                .map_mut(&file)
                .map_err(|e| Error::Pool(format!("{}", e)))?
        };

        let raw = mmap
            .get_mut(0)
            .ok_or_else(|| Error::Pool("empty pool image".to_string()))?;

        let inner = unsafe { read::<Image>(raw) };
        if inner.magic_number != Image::type_id() {
            return Err(Error::Pool(format!(
                "invalid magic number in '{}'",
                filename
            )));
        }

        let base = raw as *mut _ as u64;
        unsafe {
            inner.gen = MAX_GEN.max(inner.gen + 1);
            MAX_GEN = inner.gen;
            POOL_START = base;
            POOL_VALID_START = base + mem::size_of::<Image>() as u64;
            POOL_END = POOL_START + inner.size as u64 + 1;
            INNER = Some(inner);
            let mut vdata = vdata_lock();
            *vdata = Some(VData::new(mmap, filename));
        }

        Ok(PoolGuard::new())
    }
}

unsafe impl MemPool for Allocator {
    #[inline]
    fn name() -> &'static str {
        "pool"
    }

    unsafe fn format(filename: &str) -> Result<()> {
        if !Path::new(filename).exists() {
            return Err(Error::Pool(format!("'{}' does not exist", filename)));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(filename)
            .map_err(|e| Error::Pool(format!("{}", e)))?;
        let mut len = file
            .metadata()
            .map_err(|e| Error::Pool(format!("{}", e)))?
            .len();
        if len < 8 {
            len = DEFAULT_POOL_SIZE;
            file.set_len(len)
                .map_err(|e| Error::Pool(format!("{}", e)))?;
        }

        let mut mmap = memmap::MmapOptions::new()
            .map_mut(&file)
            .map_err(|e| Error::Pool(format!("{}", e)))?;
        let begin = mmap
            .get_mut(0)
            .ok_or_else(|| Error::Pool("empty pool image".to_string()))?;
        std::ptr::write_bytes(begin, 0xff, 8);
        POOL_START = begin as *const _ as u64;
        POOL_END = u64::MAX;

        let inner = read::<Image>(begin);
        inner.init(len as usize);
        mmap.flush().map_err(|e| Error::Pool(format!("{}", e)))?;
        Ok(())
    }

    #[inline]
    fn gen() -> u32 {
        static_inner!(INNER, inner, { inner.gen })
    }

    fn size() -> usize {
        static_inner!(INNER, inner, { inner.size })
    }

    fn available() -> usize {
        static_inner!(INNER, inner, { inner.alg.available() })
    }

    fn used() -> usize {
        static_inner!(INNER, inner, { inner.alg.used() })
    }

    #[inline]
    fn rng() -> Range<u64> {
        unsafe { POOL_VALID_START..POOL_END }
    }

    #[inline]
    fn start() -> u64 {
        unsafe { POOL_START }
    }

    #[inline]
    fn end() -> u64 {
        unsafe { POOL_END }
    }

    unsafe fn pre_alloc(size: usize) -> (*mut u8, u64, usize) {
        static_inner!(INNER, inner, {
            let idx = get_idx(size);
            let len = 1 << idx;
            let off = inner.alg.alloc_impl(size, false);
            if off == u64::MAX {
                (std::ptr::null_mut(), u64::MAX, 0)
            } else {
                (Self::get_mut_unchecked(off), off, len)
            }
        })
    }

    unsafe fn pre_dealloc(ptr: *mut u8, size: usize) {
        static_inner!(INNER, inner, {
            let off = Self::off_unchecked(ptr);
            inner.alg.dealloc_impl(off, size, false);
        })
    }

    #[inline]
    unsafe fn log64(off: u64, val: u64) {
        static_inner!(INNER, inner, {
            inner.alg.log(off, val);
        })
    }

    #[inline]
    unsafe fn perform() {
        static_inner!(INNER, inner, {
            inner.alg.perform();
        })
    }

    #[inline]
    unsafe fn discard() {
        static_inner!(INNER, inner, {
            inner.alg.discard();
        })
    }

    #[inline]
    fn allocated(off: u64, _len: usize) -> bool {
        static_inner!(INNER, _inner, {
            if off >= Self::end() {
                false
            } else {
                Self::contains(off + Self::start())
            }
        })
    }

    unsafe fn journals_head() -> &'static u64 {
        static_inner!(INNER, inner, { &inner.journals })
    }

    unsafe fn journals<T, F: Fn(&mut HashMap<ThreadId, Box<(u64, i32)>>) -> T>(f: F) -> T {
        let mut vdata = vdata_lock();
        if let Some(vdata) = &mut *vdata {
            f(&mut vdata.journals)
        } else {
            panic!("no memory pool is open");
        }
    }

    unsafe fn drop_journal(journal: &mut stm::Journal<Self>) {
        static_inner!(INNER, inner, {
            let off = Self::off_unchecked(journal);
            Self::pre_dealloc(
                journal as *mut stm::Journal<Self> as *mut u8,
                mem::size_of::<stm::Journal<Self>>(),
            );
            if inner.journals == off {
                Self::log64(Self::off_unchecked(&inner.journals), journal.next_off());
            }
            if let Ok(prev) = Self::deref_mut::<stm::Journal<Self>>(journal.prev_off()) {
                Self::log64(Self::off_unchecked(prev.next_off_ref()), journal.next_off());
            }
            if let Ok(next) = Self::deref_mut::<stm::Journal<Self>>(journal.next_off()) {
                Self::log64(Self::off_unchecked(next.prev_off_ref()), journal.prev_off());
            }
            Self::perform();
        })
    }

    unsafe fn recover() {
        static_inner!(INNER, inner, {
            inner.alg.recover();

            while let Ok(journal) = Self::deref_mut::<stm::Journal<Self>>(inner.journals) {
                journal.recover();
                journal.clear();
                Self::drop_journal(journal);
            }
        })
    }

    fn open<'a, U: 'a + PSafe + RootObj<Self>>(
        path: &str,
        flags: u32,
    ) -> Result<RootCell<'a, U, Self>> {
        let guard = Self::open_no_root(path, flags)?;
        static_inner!(INNER, inner, {
            let id = format!("{} ({})", std::any::type_name::<U>(), mem::size_of::<U>());
            let mut s = DefaultHasher::new();
            id.hash(&mut s);
            let id = s.finish();
            if !inner.has_root() {
                if mem::size_of::<U>() == 0 {
                    return Err(Error::Pool("root type cannot be a ZST".to_string()));
                }
                let root_off = Self::transaction(move |j| {
                    let ptr = Self::new(U::init(j), j);
                    Self::off_unchecked(ptr)
                })?;
                let ptr = Self::get_unchecked(root_off);
                inner.flags |= FLAG_HAS_ROOT;
                inner.root_obj = root_off;
                inner.root_type_id = id;
                persist_obj(inner, true);
                Ok(RootCell::new(ptr, Arc::new(guard)))
            } else if inner.root_type_id == id {
                Ok(RootCell::new(Self::deref::<U>(inner.root_obj)?, Arc::new(guard)))
            } else {
                Err(Error::Pool("incompatible root type".to_string()))
            }
        })
    }

    #[inline]
    fn is_open() -> bool {
        unsafe { INNER.is_some() }
    }

    fn open_no_root(path: &str, flags: u32) -> Result<PoolGuard<Self>> {
        unsafe {
            while OPEN
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {}
            if Self::running_transaction() {
                OPEN.store(false, Ordering::Release);
                return Err(Error::Pool(
                    "an uncommitted transaction exists in the pool".to_string(),
                ));
            }
            let res = Self::apply_flags(path, flags).and_then(|_| Self::open_impl(path));
            match res {
                Ok(guard) => {
                    Self::recover();
                    Ok(guard)
                }
                Err(e) => {
                    OPEN.store(false, Ordering::Release);
                    Err(e)
                }
            }
        }
    }

    unsafe fn close() -> Result<()> {
        if OPEN.load(Ordering::Acquire) {
            let mut vdata = vdata_lock();
            *vdata = None;
            INNER = None;
            OPEN.store(false, Ordering::Release);
            Ok(())
        } else {
            Err(Error::Pool("pool was already closed".to_string()))
        }
    }
}

/// Compact form of [`Vec`](../../vec/struct.Vec.html)`<T, Allocator>`
pub type PVec<T> = crate::vec::Vec<T, Allocator>;

/// Compact form of [`PCell`](../../cell/struct.PCell.html)`<T, Allocator>`
pub type PCell<T> = crate::cell::PCell<T, Allocator>;

/// Compact form of [`PRefCell`](../../cell/struct.PRefCell.html)`<T, Allocator>`
pub type PRefCell<T> = crate::cell::PRefCell<T, Allocator>;

/// Compact form of [`Ref`](../../cell/struct.Ref.html)`<'b, T, Allocator>`
pub type PRef<'b, T> = crate::cell::Ref<'b, T, Allocator>;

/// Compact form of [`RefMut`](../../cell/struct.RefMut.html)`<'b, T, Allocator>`
pub type PRefMut<'b, T> = crate::cell::RefMut<'b, T, Allocator>;

/// Compact form of [`Journal`](../../stm/struct.Journal.html)`<Allocator>`
pub type Journal = crate::stm::Journal<Allocator>;
