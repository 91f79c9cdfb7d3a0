//! A fixed-size pool of fibers, all sharing the worker loop as their entry point.
//!
//! Fibers are identified by small integer indices rather than passed around by value: once a
//! fiber has been resumed, there is no Rust value left to represent it (the underlying platform
//! handle is simply "running somewhere"), so the pool only ever tracks *which index is idle*, not
//! an owned `Fiber`. [`fiber::Fiber::from_id`] reconstructs a resumable handle from a remembered
//! [`FiberId`] whenever one is needed again.

use fiber::{Fiber, FiberId};
use std::sync::atomic::{AtomicBool, Ordering};

/// Fixed-size array of fiber ids, with a parallel array of idle flags.
///
/// Acquisition never yields: workers must guarantee enough fibers stay free for the fan-out depth
/// in play (see the crate's sizing guidance for `fiber_count`). If every fiber in the pool is
/// parked, `acquire` spins forever, which is the designed-for deadlock failure mode rather than
/// an error return.
pub(crate) struct FiberPool {
    ids: Box<[FiberId]>,
    idle: Box<[AtomicBool]>,
}

impl FiberPool {
    pub fn new(count: usize, stack_size: usize, entry: fn(Fiber) -> !) -> FiberPool {
        let ids: Vec<FiberId> = (0..count).map(|_| Fiber::new(stack_size, entry).id()).collect();
        let idle: Vec<AtomicBool> = (0..count).map(|_| AtomicBool::new(true)).collect();

        FiberPool {
            ids: ids.into_boxed_slice(),
            idle: idle.into_boxed_slice(),
        }
    }

    /// Spins across the idle flags, claiming the first idle slot via CAS.
    pub fn acquire(&self) -> usize {
        loop {
            for (index, flag) in self.idle.iter().enumerate() {
                if flag
                    .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    return index;
                }
            }
            std::hint::spin_loop();
        }
    }

    pub fn id(&self, index: usize) -> FiberId {
        self.ids[index]
    }

    /// Finds the slot holding `id`, if any. Returns `None` for a fiber id that isn't part of this
    /// pool (e.g. a thread's own thread-fiber). Linear scan: fine at the pool's typical size
    /// (tens to low hundreds of fibers), and only exercised on the resume-a-parked-fiber path.
    pub fn index_of(&self, id: FiberId) -> Option<usize> {
        self.ids.iter().position(|&candidate| candidate == id)
    }

    /// Publishes `index` as idle again. Must be called at most once per `acquire` it balances.
    pub fn release(&self, index: usize) {
        self.idle[index].store(true, Ordering::Release);
    }
}
