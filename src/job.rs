//! The executable descriptor moved through the scheduler's queues.

use crate::counter::Counter;
use crate::scheduler::Scheduler;
use std::ptr;

/// A job's entry point: `(scheduler, data)`. `data` is an opaque pointer the caller owns; it must
/// outlive every job that reads it.
pub type JobFn = fn(&Scheduler, *mut u8);

/// An executable unit submitted to the scheduler.
///
/// A `Job` is trivially copyable: it's just a function pointer and three addresses. The
/// callback's captured environment (whatever `data` points at) is not re-entered by copying the
/// descriptor -- only one worker ever executes a given `Job` value.
///
/// `scheduler` and `counter` are bound by [`Scheduler::add_job`]/[`Scheduler::add_jobs`] at
/// submission time; client code constructs a `Job` with only `function` and `data` set.
#[derive(Clone, Copy)]
pub struct Job {
    function: JobFn,
    data: *mut u8,
    scheduler: *const Scheduler,
    counter: *const Counter,
}

// SAFETY: a `Job` is handed to exactly one worker thread at a time (it's popped from a queue by
// value, never aliased), and `function` only ever dereferences `data` on that worker. The caller
// who constructs a `Job` is responsible for `data`'s lifetime and thread-safety, per the
// documented contract on `Job::new`.
unsafe impl Send for Job {}

impl Job {
    /// Creates a job. `data` must outlive every execution of this job and must be safe to access
    /// from whichever worker thread ends up running it.
    pub fn new(function: JobFn, data: *mut u8) -> Job {
        Job {
            function,
            data,
            scheduler: ptr::null(),
            counter: ptr::null(),
        }
    }

    pub(crate) fn bind(&mut self, scheduler: &Scheduler, counter: Option<&Counter>) {
        self.scheduler = scheduler as *const Scheduler;
        self.counter = counter.map_or(ptr::null(), |c| c as *const Counter);
    }

    /// Runs the callback, then decrements the bound counter (if any) exactly once.
    ///
    /// # Safety
    ///
    /// Must only be called on a job that has been bound via [`Job::bind`], by the worker that
    /// popped it from a scheduler queue.
    pub(crate) unsafe fn execute(self) {
        let scheduler = unsafe { &*self.scheduler };
        (self.function)(scheduler, self.data);

        if !self.counter.is_null() {
            let counter = unsafe { &*self.counter };
            scheduler.finish_job(counter);
        }
    }
}
