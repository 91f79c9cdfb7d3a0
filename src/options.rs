//! Construction parameters for a [`crate::Scheduler`].

use crate::error::Error;

/// The three priority tiers jobs can be submitted at.
///
/// There is no finer granularity than this, and no guarantee of FIFO order across priorities or
/// across producing threads -- only that, on a given worker's tick, High drains before Normal
/// drains before Low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// Typed, validated construction parameters for a [`crate::Scheduler`].
///
/// Every queue size must be a power of two (the bounded MPMC queue's indexing scheme relies on
/// it); `thread_count` and `fiber_count` must both be nonzero. [`Scheduler::new`] validates an
/// `Options` value before allocating any OS resource, so a bad configuration never leaves
/// partially-constructed worker threads behind.
///
/// [`Scheduler::new`]: crate::Scheduler::new
#[derive(Debug, Clone)]
pub struct Options {
    /// Number of worker threads, including the thread that calls `Scheduler::new` (worker 0).
    pub thread_count: usize,
    /// Size of the fiber pool.
    pub fiber_count: usize,
    /// Capacity of the high-priority queue (power of two).
    pub high_priority_queue_size: usize,
    /// Capacity of the normal-priority queue (power of two).
    pub normal_priority_queue_size: usize,
    /// Capacity of the low-priority queue (power of two).
    pub low_priority_queue_size: usize,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            thread_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            fiber_count: 160,
            high_priority_queue_size: 1024,
            normal_priority_queue_size: 2048,
            low_priority_queue_size: 4096,
        }
    }
}

impl Options {
    /// Rejects non-power-of-two queue sizes and a zero thread or fiber count.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.thread_count == 0 {
            return Err(Error::InvalidOptions("thread_count must be nonzero"));
        }
        if self.fiber_count == 0 {
            return Err(Error::InvalidOptions("fiber_count must be nonzero"));
        }
        for (name, size) in [
            ("high_priority_queue_size", self.high_priority_queue_size),
            ("normal_priority_queue_size", self.normal_priority_queue_size),
            ("low_priority_queue_size", self.low_priority_queue_size),
        ] {
            if size < 2 || !size.is_power_of_two() {
                return Err(Error::InvalidOptions(match name {
                    "high_priority_queue_size" => "high_priority_queue_size must be a power of two >= 2",
                    "normal_priority_queue_size" => "normal_priority_queue_size must be a power of two >= 2",
                    _ => "low_priority_queue_size must be a power of two >= 2",
                }));
            }
        }
        Ok(())
    }
}
