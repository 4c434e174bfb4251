//! Per-thread undo-log journals
//!
//! A journal is a pool-resident linked list of fixed-size pages of log
//! slots. Every open pool keeps a persistent list of its journals; on
//! opening, the pool walks that list and rolls back any journal whose
//! transaction did not commit before the crash.

use crate::alloc::MemPool;
use crate::ll::*;
use crate::ptr::Ptr;
use crate::stm::{Log, LogEnum, Notifier};
use crate::utils;
use std::fmt;

/// The transaction of this journal reached its commit point
pub const JOURNAL_COMMITTED: u64 = 0x0000_0001;

pub(crate) const PAGE_SIZE: usize = 64;

#[repr(C)]
struct Page<A: MemPool> {
    len: usize,
    next: Ptr<Page<A>, A>,
    logs: [Log<A>; PAGE_SIZE],
}

impl<A: MemPool> Page<A> {
    fn empty() -> Self {
        Self {
            len: 0,
            next: Ptr::dangling(),
            logs: [Log::NONE; PAGE_SIZE],
        }
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.len == PAGE_SIZE
    }

    fn write(&mut self, log: LogEnum, notifier: Notifier<A>) -> Ptr<Log<A>, A> {
        debug_assert!(self.len < PAGE_SIZE, "journal page overflow");
        self.logs[self.len] = Log(log, notifier);
        persist_obj(&self.logs[self.len], false);
        let slot = Ptr::from_ref(&self.logs[self.len]);
        self.len += 1;
        persist_obj(&self.len, true);
        slot
    }

    fn notify(&mut self, v: u8) {
        for i in 0..self.len {
            self.logs[i].notify(v);
        }
    }

    unsafe fn commit(&mut self) {
        for i in 0..self.len {
            self.logs[i].commit();
        }
    }

    unsafe fn rollback(&mut self) {
        for i in (0..self.len).rev() {
            self.logs[i].rollback();
        }
    }

    unsafe fn recover(&mut self, committed: bool) {
        if committed {
            for i in 0..self.len {
                self.logs[i].recover(true);
            }
        } else {
            for i in (0..self.len).rev() {
                self.logs[i].recover(false);
            }
        }
    }

    unsafe fn clear(&mut self) {
        for i in 0..self.len {
            self.logs[i].clear();
        }
        self.len = 0;
        persist_obj(&self.len, true);
    }
}

/// The undo log of one thread's transaction in pool `A`
#[repr(C)]
pub struct Journal<A: MemPool> {
    pages: Ptr<Page<A>, A>,
    flags: u64,
    next_off: u64,
    prev_off: u64,
}

impl<A: MemPool> Journal<A> {
    fn new() -> Self {
        Self {
            pages: Ptr::dangling(),
            flags: 0,
            next_off: u64::MAX,
            prev_off: u64::MAX,
        }
    }

    #[inline]
    pub(crate) fn is_set(&self, flag: u64) -> bool {
        self.flags & flag == flag
    }

    #[inline]
    pub(crate) fn set(&mut self, flag: u64) {
        self.flags |= flag;
        persist_obj(&self.flags, true);
    }

    #[inline]
    pub(crate) fn unset(&mut self, flag: u64) {
        self.flags &= !flag;
        persist_obj(&self.flags, true);
    }

    #[inline]
    pub(crate) fn next_off(&self) -> u64 {
        self.next_off
    }

    #[inline]
    pub(crate) fn prev_off(&self) -> u64 {
        self.prev_off
    }

    #[inline]
    pub(crate) fn next_off_ref(&self) -> &u64 {
        &self.next_off
    }

    #[inline]
    pub(crate) fn prev_off_ref(&self) -> &u64 {
        &self.prev_off
    }

    /// Appends a fresh page in front of the page list
    ///
    /// The page allocation and the new list head become visible together
    /// when the allocator performs its staged changes.
    unsafe fn new_page(&self) -> &'static mut Page<A> {
        let this = utils::as_mut(self);
        let (ptr, off, _) = A::pre_alloc(std::mem::size_of::<Page<A>>());
        if ptr.is_null() {
            panic!("not enough space for a journal page");
        }
        let page = utils::read::<Page<A>>(ptr);
        *page = Page::empty();
        page.next = this.pages;
        persist_obj(page, false);
        A::log64(A::off_unchecked(&this.pages), off);
        A::perform();
        page
    }

    /// Writes a new log slot, allocating a page when the head is full
    pub(crate) unsafe fn write(&self, log: LogEnum, notifier: Notifier<A>) -> Ptr<Log<A>, A> {
        let page = if self.pages.is_dangling() || self.pages.as_ref().is_full() {
            self.new_page()
        } else {
            utils::as_mut(self.pages.as_ref())
        };
        page.write(log, notifier)
    }

    /// Commit pass: reset cell flags, then apply commit actions
    pub(crate) unsafe fn commit(&mut self) {
        let mut page = self.pages;
        while !page.is_dangling() {
            page.as_mut().notify(0);
            page = page.as_ref().next;
        }
        let mut page = self.pages;
        while !page.is_dangling() {
            page.as_mut().commit();
            page = page.as_ref().next;
        }
        self.set(JOURNAL_COMMITTED);
    }

    /// Rollback pass: restore logged ranges newest-first, reset flags
    pub(crate) unsafe fn rollback(&mut self) {
        let mut page = self.pages;
        while !page.is_dangling() {
            page.as_mut().rollback();
            page = page.as_ref().next;
        }
        let mut page = self.pages;
        while !page.is_dangling() {
            page.as_mut().notify(0);
            page = page.as_ref().next;
        }
        self.set(JOURNAL_COMMITTED);
    }

    /// Completes this journal's transaction after a crash
    pub(crate) unsafe fn recover(&mut self) {
        let committed = self.is_set(JOURNAL_COMMITTED);
        let mut page = self.pages;
        while !page.is_dangling() {
            page.as_mut().recover(committed);
            page = page.as_ref().next;
        }
        // the crashed process never reset its cell flags
        let mut page = self.pages;
        while !page.is_dangling() {
            page.as_mut().notify(0);
            page = page.as_ref().next;
        }
        if !committed {
            self.set(JOURNAL_COMMITTED);
        }
    }

    /// Reclaims log areas and pages
    pub(crate) unsafe fn clear(&mut self) {
        let mut page = self.pages;
        while !page.is_dangling() {
            let next = page.as_ref().next;
            page.as_mut().clear();
            let len = std::mem::size_of::<Page<A>>();
            A::pre_dealloc(page.as_mut() as *mut Page<A> as *mut u8, len);
            A::log64(A::off_unchecked(&self.pages), next.off());
            A::perform();
            page = next;
        }
    }

    /// Links this journal into the pool's persistent journal list
    ///
    /// Called between the journal's staged allocation and the allocator's
    /// `perform`, so the list head and the allocation flip together.
    pub(crate) unsafe fn enter_into(&mut self, head_off: &u64, self_off: u64) {
        self.next_off = *head_off;
        if let Ok(next) = A::deref_mut::<Journal<A>>(*head_off) {
            A::log64(A::off_unchecked(&next.prev_off), self_off);
        }
        A::log64(A::off_unchecked(head_off), self_off);
    }

    /// Whether the calling thread has a journal in pool `A`
    pub fn is_running() -> bool {
        unsafe { A::journals(|journals| journals.contains_key(&std::thread::current().id())) }
    }

    /// The calling thread's journal and transaction depth counter
    ///
    /// With `create`, the outermost call allocates a journal in the pool
    /// and links it into the pool's journal list.
    pub(crate) unsafe fn current(create: bool) -> Option<(*const Self, *mut i32)> {
        let tid = std::thread::current().id();
        A::journals(move |journals| {
            if !journals.contains_key(&tid) {
                if !create {
                    return None;
                }
                let (ptr, off, _) = A::pre_alloc(std::mem::size_of::<Self>());
                if ptr.is_null() {
                    panic!("not enough space for a journal");
                }
                let j = utils::read::<Self>(ptr);
                *j = Journal::new();
                persist_obj(j, false);
                j.enter_into(A::journals_head(), off);
                A::perform();
                journals.insert(tid, Box::new((off, 0)));
            }
            let entry = &mut **journals.get_mut(&tid).unwrap();
            Some((
                A::get_unchecked::<Self>(entry.0) as *const Self,
                &mut entry.1 as *mut i32,
            ))
        })
    }

    /// Forgets the calling thread's journal handle
    pub(crate) unsafe fn drop_current() {
        let tid = std::thread::current().id();
        A::journals(move |journals| {
            journals.remove(&tid);
        })
    }
}

impl<A: MemPool> fmt::Debug for Journal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Journal(committed = {})",
            self.is_set(JOURNAL_COMMITTED)
        )?;
        let mut page = self.pages;
        while !page.is_dangling() {
            let p = page.as_ref();
            for i in 0..p.len {
                writeln!(f, "  {:?}", p.logs[i])?;
            }
            page = p.next;
        }
        Ok(())
    }
}
