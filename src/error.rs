//! The scheduler's error taxonomy.
//!
//! Every fatal condition the scheduler can hit surfaces as one of these variants from the public
//! API boundary (`Scheduler::new`, `add_job`, `add_jobs`). There are no retries and no
//! partial-failure modes: a job system that can't guarantee its own invariants has nothing
//! trustworthy left to hand back to the caller.

use crate::options::Priority;

/// Fatal error conditions raised by the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A priority queue had no room for a submitted job.
    #[error("the {priority:?} priority queue is full")]
    QueueFull { priority: Priority },

    /// A counter already had 16 armed waiters when a 17th tried to register.
    #[error("counter waiter slots exhausted (max 16 concurrent waiters)")]
    WaiterExhaustion,

    /// A job or thread was launched with no entry function.
    #[error("attempted to launch with a null callback")]
    NullCallback,

    /// Attempted to switch to or from a fiber whose native handle was never initialized.
    #[error("attempted to switch using an uninitialized fiber handle")]
    UninitializedSwitch,

    /// The OS refused to create a worker thread.
    #[error("failed to create a worker thread: {0}")]
    ThreadCreateFailure(#[source] std::io::Error),

    /// Setting a worker thread's CPU affinity failed.
    #[error("failed to set worker thread affinity")]
    AffinityFailure,

    /// `Options` failed validation before any OS resource was allocated.
    #[error("invalid scheduler options: {0}")]
    InvalidOptions(&'static str),
}
