//! Integration tests against a memory-mapped pool file
//!
//! The default pool is a process-wide singleton, so everything that
//! opens and closes it lives in one test function, run as a sequence of
//! open/mutate/close phases.

use crate::alloc::MemPool;
use crate::cell::RootObj;
use crate::default::*;
use crate::err::Error;
use crate::open_flags::*;
use crate::result::Result;

type P = Allocator;

struct Root {
    data: PRefCell<PVec<i32>>,
}

unsafe impl crate::PSafe for Root {}

impl RootObj<P> for Root {
    fn init(_journal: &Journal) -> Self {
        Root {
            data: PRefCell::new(PVec::empty()),
        }
    }
}

const FILE: &str = "/tmp/pvector-test.pool";

#[test]
fn pool_lifecycle() {
    let _ = std::fs::remove_file(FILE);

    // first open formats the file and builds the root object
    {
        let root = P::open::<Root>(FILE, O_CF).unwrap();
        assert!(root.data.borrow().is_empty());
        P::transaction(|j| {
            let mut data = root.data.borrow_mut(j);
            data.assign_slice(&[1, 2, 3, 4, 5], j).unwrap();
        })
        .unwrap();
        assert_eq!(&root.data.borrow()[..], &[1, 2, 3, 4, 5]);
    }

    // a transaction cut short by process death leaves an uncommitted
    // journal behind; the next open must roll it back
    unsafe {
        let pid = libc::fork();
        assert!(pid >= 0);
        if pid == 0 {
            let root = P::open::<Root>(FILE, 0).unwrap();
            let _ = P::transaction(|j| {
                let mut data = root.data.borrow_mut(j);
                data.assign_value(100, 9, j).unwrap();
                libc::_exit(0);
            });
            libc::_exit(1);
        }
        let mut status = 0;
        libc::waitpid(pid, &mut status, 0);
        assert!(libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0);
    }

    // contents survive close and reopen, and the dead child's
    // transaction is gone
    {
        let root = P::open::<Root>(FILE, 0).unwrap();
        assert_eq!(&root.data.borrow()[..], &[1, 2, 3, 4, 5]);
        assert_eq!(root.data.borrow().capacity(), 8);

        // a panic mid-transaction leaves the committed state untouched
        let res = P::transaction(|j| {
            let mut data = root.data.borrow_mut(j);
            data.assign_value(2, 9, j).unwrap();
            data.reserve(100, j).unwrap();
            panic!("abort");
        });
        assert!(matches!(res, Err(Error::Element(_))));
        assert_eq!(&root.data.borrow()[..], &[1, 2, 3, 4, 5]);
        assert_eq!(root.data.borrow().capacity(), 8);

        P::transaction(|j| {
            let mut data = root.data.borrow_mut(j);
            data.resize_with(8, 7, j).unwrap();
        })
        .unwrap();
    }

    // the committed mutation is durable
    {
        let root = P::open::<Root>(FILE, 0).unwrap();
        assert_eq!(&root.data.borrow()[..], &[1, 2, 3, 4, 5, 7, 7, 7]);

        // the pool holds 8 MiB; a 64 MiB request must fail cleanly
        let res: Result<()> = P::try_transaction(|j| {
            let _v = PVec::<u8>::with_value(64 << 20, 0, j)?;
            Ok(())
        });
        assert!(matches!(res, Err(Error::TransactionAlloc(_))));

        // and the pool stays usable afterwards
        P::transaction(|j| {
            let mut data = root.data.borrow_mut(j);
            *data.front_mut(j).unwrap() = 100;
        })
        .unwrap();
        assert_eq!(root.data.borrow().front(), Some(&100));

        // released blocks go back to their free list
        let used = P::used();
        P::transaction(|j| {
            let mut v = PVec::<i64>::with_default(1000, j).unwrap();
            v.free_data(j).unwrap();
        })
        .unwrap();
        assert_eq!(P::used(), used);
    }

    let _ = std::fs::remove_file(FILE);
}
