use std::fmt::{Debug, Error, Formatter};

#[cfg(not(feature = "no_flush_alloc"))]
use crate::ll::*;

#[inline]
#[doc(hidden)]
pub unsafe fn as_mut<'a, T: ?Sized>(v: *const T) -> &'a mut T {
    &mut *(v as *mut T)
}

pub fn as_slice<T: ?Sized>(x: &T) -> &[u8] {
    let ptr: *const T = x;
    let ptr: *const u8 = ptr as *const u8;
    unsafe { std::slice::from_raw_parts(ptr, std::mem::size_of_val(x)) }
}

#[inline(always)]
pub unsafe fn read<'a, T: ?Sized>(raw: *mut u8) -> &'a mut T {
    assert_ne!(raw, std::ptr::null_mut(), "null dereferencing");
    union U<T: ?Sized> {
        raw: *mut u8,
        rf: *mut T,
    }
    &mut *U { raw }.rf
}

#[inline(always)]
pub unsafe fn read_addr<'a, T: ?Sized>(addr: u64) -> &'a mut T {
    assert_ne!(addr, u64::MAX, "null dereferencing");
    union U<T: ?Sized> {
        addr: u64,
        rf: *mut T,
    }
    &mut *U { addr }.rf
}

/// A fixed-capacity ring of staged records
///
/// Used by the allocator for its redo ring and drop logs. Entries pushed
/// with [`push_sync`] are flushed to the pool media before the tail
/// advances, so a half-staged record is never observed after a crash.
///
/// [`push_sync`]: #method.push_sync
#[repr(C)]
pub struct Ring<T, const N: usize> {
    data: [T; N],
    head: usize,
    tail: usize,
}

impl<T, const N: usize> Ring<T, N> {
    pub fn new() -> Self {
        unsafe {
            Self {
                data: std::mem::zeroed(),
                head: 0,
                tail: 0,
            }
        }
    }

    #[inline]
    pub fn push(&mut self, x: T) {
        debug_assert!(
            (self.tail + 1) % N != self.head,
            "too many slots are used (len = {})",
            N
        );

        self.data[self.tail] = x;
        self.tail = (self.tail + 1) % N;
    }

    #[inline]
    pub fn push_sync(&mut self, x: T) {
        debug_assert!(
            (self.tail + 1) % N != self.head,
            "too many slots are used (len = {})",
            N
        );
        self.data[self.tail] = x;

        #[cfg(not(feature = "no_flush_alloc"))]
        persist(&self.data[self.tail], std::mem::size_of::<T>(), false);

        self.tail = (self.tail + 1) % N;

        #[cfg(not(feature = "no_flush_alloc"))]
        persist(&self.head, 16, false);
    }

    #[inline]
    pub fn sync_all(&self) {
        if self.head == self.tail {
            #[cfg(not(feature = "no_flush_alloc"))]
            persist(&self.head, 16, false);
            return;
        }
        #[cfg(not(feature = "no_flush_alloc"))]
        {
            let h = &self.data[self.head] as *const _ as usize;
            let t = &self.data[self.tail] as *const _ as usize;
            if h < t {
                persist(&self.data[self.head], t - h, false);
                persist(&self.head, 16, false);
            } else {
                let b = self as *const Self as usize;
                persist(self, h - b, false);
                let b = b + std::mem::size_of::<Self>();
                persist(&self.data[self.tail], b - t, false);
            }
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.head = self.tail;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    #[inline]
    pub fn len(&self) -> usize {
        ((self.tail + N) - self.head) % N
    }
}

impl<T: Copy, const N: usize> Ring<T, N> {
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        if self.head == self.tail {
            None
        } else {
            let res = Some(self.data[self.head]);
            self.head = (self.head + 1) % N;
            res
        }
    }

    #[inline]
    pub fn foreach<F: FnMut(T) -> ()>(&self, mut f: F) {
        let mut head = self.head;
        while head != self.tail {
            f(self.data[head]);
            head = (head + 1) % N;
        }
    }

}

impl<T: Debug, const N: usize> Debug for Ring<T, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{{len: {}, [", self.len())?;
        let mut head = self.head;
        while head != self.tail {
            write!(f, "{:?}", self.data[head])?;
            head = (head + 1) % N;
            if head != self.tail {
                write!(f, ", ")?;
            }
        }
        write!(f, "]}}")
    }
}

#[cfg(feature = "verbose")]
pub static VERBOSE: crate::cell::LazyCell<bool> = crate::cell::LazyCell::new(|| {
    if let Ok(val) = std::env::var("VERBOSE") {
        val == "1"
    } else {
        false
    }
});

#[macro_export]
macro_rules! log {
    ($p:tt, $c:tt, $tag:expr, $msg:expr, $($args:tt)*) => {
        #[cfg(feature = "verbose")] {
            use term_painter::Color::*;
            use term_painter::ToStyle;

            if *$crate::utils::VERBOSE {
                println!("{:<8} {}", $p::name().to_owned() + ":",
                    $c.paint(format!("{:>10}  {}", $tag, format!($msg, $($args)*))));
            }
        }
    };
    (@none, $c:tt, $tag:expr, $msg:expr, $($args:tt)*) => {
        #[cfg(feature = "verbose")] {
            use term_painter::Color::*;
            use term_painter::ToStyle;

            if *$crate::utils::VERBOSE {
                println!("{:<8} {}", "",
                    $c.paint(format!("{:>10}  {}", $tag, format!($msg, $($args)*))));
            }
        }
    };
}

/// The smallest power of two that is not less than `v`
///
/// Capacities in this crate are always zero or a power of two, and the
/// empty container owns no storage, so `next_pow_2(0) == 0`.
pub const fn next_pow_2(v: usize) -> usize {
    if v == 0 {
        0
    } else {
        v.next_power_of_two()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ring_buffer() {
        let mut rng: Ring<i32, 8> = Ring::new();

        for i in 1..8 {
            rng.push(i);
        }
        assert_eq!(rng.len(), 7);

        let mut sum = 0;
        rng.foreach(|x| sum += x);
        assert_eq!(sum, 28);

        assert_eq!(rng.pop(), Some(1));
        rng.clear();
        assert!(rng.is_empty());
    }

    #[test]
    fn pow2() {
        assert_eq!(next_pow_2(0), 0);
        assert_eq!(next_pow_2(1), 1);
        assert_eq!(next_pow_2(3), 4);
        assert_eq!(next_pow_2(16), 16);
        assert_eq!(next_pow_2(17), 32);
        assert_eq!(next_pow_2(666), 1024);
    }
}
