//! A fiber-based job scheduling runtime for in-process parallelism.
//!
//! Client code submits jobs that run on a fixed pool of worker threads; each worker executes jobs
//! on top of cooperative, user-space stacks (fibers) so a job can park on a [`Counter`] without
//! blocking its underlying OS thread. When a parked job becomes runnable again, any worker may
//! resume it -- not necessarily the one it was originally running on.
//!
//! # Example
//!
//! ```no_run
//! use jobsystem::{Counter, Job, Options, Priority, Scheduler};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let scheduler = Scheduler::new(Options::default()).unwrap();
//!
//! static SUM: AtomicUsize = AtomicUsize::new(0);
//! fn add_one(_scheduler: &Scheduler, _data: *mut u8) {
//!     SUM.fetch_add(1, Ordering::Relaxed);
//! }
//!
//! let counter = Counter::new();
//! let jobs = (0..1024).map(|_| Job::new(add_one, std::ptr::null_mut()));
//! scheduler.add_jobs(jobs, Some(&counter), Priority::Normal).unwrap();
//! scheduler.wait(&counter, 0);
//! assert_eq!(SUM.load(Ordering::Relaxed), 1024);
//!
//! scheduler.shutdown(true);
//! ```
//!
//! # Job contract
//!
//! A job is `fn(&Scheduler, *mut u8)`. The data pointer is owned by the caller and must outlive
//! every execution of the job. Jobs are trusted callbacks: a panicking job unwinds the fiber it's
//! running on, which the scheduler does not catch -- wrap job bodies in `catch_unwind` if that
//! matters to your application.
//!
//! The only place a job (or the calling thread, via [`Scheduler::wait`]) suspends is inside
//! `wait` itself. Code must not assume it resumes on the same OS thread it was last running on.

mod counter;
mod error;
mod fiber_pool;
mod job;
mod options;
mod queue;
mod scheduler;
mod worker;

pub use counter::Counter;
pub use error::Error;
pub use job::{Job, JobFn};
pub use options::{Options, Priority};
pub use scheduler::Scheduler;
