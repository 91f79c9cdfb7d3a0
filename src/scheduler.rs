//! The scheduler core: initialization, submission, the worker loop, and shutdown.

use crate::counter::{Counter, WaitOutcome};
use crate::fiber_pool::FiberPool;
use crate::job::Job;
use crate::options::{Options, Priority};
use crate::queue::Queue;
use crate::worker::{self, FiberDestination, ReadyFiber};
use crate::Error;
use fiber::{Fiber, FiberId};
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, trace, warn};

const DEFAULT_STACK_SIZE: usize = 64 * 1024;

thread_local! {
    /// The scheduler a fiber-pool fiber on this thread belongs to. Set once per OS thread at
    /// worker startup; read by `fiber_entry`, which otherwise has no way to reach back into the
    /// scheduler (it's a plain `fn(Fiber) -> !`, so it can't capture anything).
    ///
    /// This is per-thread, not a process-wide singleton: a process hosting more than one
    /// `Scheduler` gets one of these per worker OS thread, each pointing at whichever scheduler
    /// owns that thread.
    static CURRENT_SCHEDULER: RefCell<Option<Arc<Scheduler>>> = const { RefCell::new(None) };
}

/// A fiber-based job scheduling runtime.
///
/// Owns a fixed pool of worker threads (one of which is the thread that calls [`Scheduler::new`]),
/// a pool of cooperative fibers those threads execute jobs on, and three priority queues jobs are
/// submitted through. See the crate-level docs for the full model.
pub struct Scheduler {
    high: Queue<Job>,
    normal: Queue<Job>,
    low: Queue<Job>,
    fiber_pool: FiberPool,
    quit: AtomicBool,
    ready_senders: Vec<Sender<ReadyFiber>>,
    thread_fiber_ids: Mutex<HashSet<FiberId>>,
    join_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Validates `options`, then allocates queues, the fiber pool, and worker threads 1..N-1.
    /// The calling thread becomes worker 0 but does not yet run the worker loop -- it only joins
    /// the cooperative system the first time it calls [`Scheduler::wait`].
    pub fn new(options: Options) -> Result<Arc<Scheduler>, Error> {
        options.validate()?;

        let high = Queue::new(options.high_priority_queue_size);
        let normal = Queue::new(options.normal_priority_queue_size);
        let low = Queue::new(options.low_priority_queue_size);
        let fiber_pool = FiberPool::new(options.fiber_count, DEFAULT_STACK_SIZE, fiber_entry);

        let mut senders = Vec::with_capacity(options.thread_count);
        let mut receivers = Vec::with_capacity(options.thread_count);
        for _ in 0..options.thread_count {
            let (tx, rx) = mpsc::channel();
            senders.push(tx);
            receivers.push(Some(rx));
        }

        let scheduler = Arc::new(Scheduler {
            high,
            normal,
            low,
            fiber_pool,
            quit: AtomicBool::new(false),
            ready_senders: senders,
            thread_fiber_ids: Mutex::new(HashSet::new()),
            join_handles: Mutex::new(Vec::new()),
        });

        let worker0_fiber_id = fiber::init();
        scheduler.thread_fiber_ids.lock().unwrap().insert(worker0_fiber_id);
        worker::init_tls(0, worker0_fiber_id, receivers[0].take().unwrap());
        CURRENT_SCHEDULER.with(|cell| *cell.borrow_mut() = Some(scheduler.clone()));

        let mut handles = Vec::with_capacity(options.thread_count.saturating_sub(1));
        for thread_index in 1..options.thread_count {
            let scheduler = scheduler.clone();
            let ready_rx = receivers[thread_index].take().unwrap();
            let handle = std::thread::Builder::new()
                .name(format!("jobsystem-worker-{thread_index}"))
                .spawn(move || worker_thread_main(scheduler, thread_index, ready_rx))
                .map_err(Error::ThreadCreateFailure)?;
            handles.push(handle);
        }
        *scheduler.join_handles.lock().unwrap() = handles;

        debug!(thread_count = options.thread_count, fiber_count = options.fiber_count, "scheduler initialized");
        Ok(scheduler)
    }

    /// Submits one job, initializing `counter` (if given) to 1 before enqueueing it.
    pub fn add_job(&self, mut job: Job, counter: Option<&Counter>, priority: Priority) -> Result<(), Error> {
        if let Some(counter) = counter {
            counter.init(1);
        }
        job.bind(self, counter);
        self.enqueue(job, priority)
    }

    /// Submits a batch of jobs, initializing `counter` (if given) to the batch size *before* any
    /// job is enqueued -- a worker must never be able to observe the counter before its full
    /// expected count is established.
    pub fn add_jobs(
        &self,
        jobs: impl IntoIterator<Item = Job>,
        counter: Option<&Counter>,
        priority: Priority,
    ) -> Result<(), Error> {
        let jobs: Vec<Job> = jobs.into_iter().collect();
        if let Some(counter) = counter {
            counter.init(jobs.len() as u32);
        }
        for mut job in jobs {
            job.bind(self, counter);
            self.enqueue(job, priority)?;
        }
        Ok(())
    }

    fn enqueue(&self, job: Job, priority: Priority) -> Result<(), Error> {
        let queue = match priority {
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        };
        queue.push(job).map_err(|_| {
            warn!(?priority, "priority queue full");
            Error::QueueFull { priority }
        })
    }

    /// Called by [`Job::execute`] once a job's callback returns.
    pub(crate) fn finish_job(&self, counter: &Counter) {
        let value = counter.decrement();
        let woken = counter.check_waiters(value);
        if woken.is_empty() {
            return;
        }

        let thread_index = worker::current_thread_index();
        for entry in woken {
            // The receiving end is this same thread's, since `check_waiters` is always invoked
            // from inside a job running on some worker; if the send fails the receiver has
            // already been dropped, which only happens at process teardown.
            let _ = self.ready_senders[thread_index].send(entry);
        }
    }

    /// Parks the current fiber until `counter` reaches `target`.
    pub fn wait(&self, counter: &Counter, target: u32) {
        loop {
            if counter.value() == target {
                return;
            }

            let stored_flag = Arc::new(AtomicBool::new(false));
            let fiber_id = fiber::current().expect("Scheduler::wait called before a fiber context exists on this thread");

            match counter
                .add_waiter(fiber_id, stored_flag.clone(), target)
                .expect("waiter registration failed")
            {
                WaitOutcome::ImmediatelySatisfied => return,
                WaitOutcome::Parked => {
                    trace!(fiber = fiber_id.as_usize(), target, "parking fiber on counter");
                    let index = self.fiber_pool.acquire();
                    let pooled_id = self.fiber_pool.id(index);
                    self.record_outgoing_and_switch(Some(index), pooled_id, Some(stored_flag));
                    self.finalize_previous_fiber();
                }
            }
        }
    }

    /// The worker loop, run on every fiber-pool fiber. Never returns: on `quit` it switches back
    /// to this OS thread's thread-fiber instead.
    fn worker_loop(self: Arc<Self>) -> ! {
        loop {
            self.finalize_previous_fiber();

            if self.quit.load(Ordering::Acquire) {
                let thread_fiber_id = worker::with_tls(|tls| tls.thread_fiber_id);
                let _ = unsafe { Fiber::from_id(thread_fiber_id).resume() };
                unreachable!("a fiber-pool fiber was resumed after its thread had already quit");
            }

            if let Some(job) = self.high.pop() {
                unsafe { job.execute() };
                continue;
            }

            if let Some(ready) = worker::with_tls(|tls| tls.next_ready_fiber()) {
                let index = self.fiber_pool.index_of(ready.fiber_id);
                self.record_outgoing_and_switch(index, ready.fiber_id, None);
                continue;
            }

            if let Some(job) = self.normal.pop().or_else(|| self.low.pop()) {
                unsafe { job.execute() };
                continue;
            }

            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    /// Records the currently-active fiber as "to be released on the resuming thread" and
    /// switches into `target_fiber_id`. `new_current_index` is the pool index of the fiber being
    /// switched into, or `None` if it's a thread-fiber (only possible when resuming a ready
    /// fiber that turns out to be some thread's original call stack).
    fn record_outgoing_and_switch(&self, new_current_index: Option<usize>, target_fiber_id: FiberId, stored: Option<Arc<AtomicBool>>) {
        let outgoing_id = fiber::current().expect("no fiber context on this thread");
        let is_thread_fiber = self.thread_fiber_ids.lock().unwrap().contains(&outgoing_id);

        worker::with_tls(|tls| {
            tls.previous_fiber_index = tls.current_fiber_index;
            tls.previous_fiber_destination = if stored.is_some() {
                FiberDestination::Waiting
            } else if is_thread_fiber {
                FiberDestination::None
            } else {
                FiberDestination::Pool
            };
            tls.previous_fiber_stored = stored;
            tls.current_fiber_index = new_current_index;
        });

        let target = unsafe { Fiber::from_id(target_fiber_id) };
        let _ = unsafe { target.resume() };
    }

    fn finalize_previous_fiber(&self) {
        let (destination, index, stored) = worker::with_tls(|tls| {
            let destination = tls.previous_fiber_destination;
            tls.previous_fiber_destination = FiberDestination::None;
            (destination, tls.previous_fiber_index, tls.previous_fiber_stored.take())
        });

        match destination {
            FiberDestination::Pool => {
                if let Some(index) = index {
                    self.fiber_pool.release(index);
                }
            }
            FiberDestination::Waiting => {
                if let Some(flag) = stored {
                    flag.store(true, Ordering::Release);
                }
            }
            FiberDestination::None => {}
        }
    }

    /// Publishes the quit flag. If `blocking`, joins worker threads 1..N-1. Idempotent.
    pub fn shutdown(&self, blocking: bool) {
        self.quit.store(true, Ordering::Release);
        if blocking {
            let mut handles = self.join_handles.lock().unwrap();
            for handle in handles.drain(..) {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

fn worker_thread_main(scheduler: Arc<Scheduler>, thread_index: usize, ready_rx: mpsc::Receiver<ReadyFiber>) {
    if let Err(error) = worker::pin_to_cpu(thread_index) {
        warn!(thread_index, %error, "failed to pin worker thread to its CPU, continuing unpinned");
    }

    let thread_fiber_id = fiber::init();
    scheduler.thread_fiber_ids.lock().unwrap().insert(thread_fiber_id);
    worker::init_tls(thread_index, thread_fiber_id, ready_rx);
    CURRENT_SCHEDULER.with(|cell| *cell.borrow_mut() = Some(scheduler.clone()));

    let index = scheduler.fiber_pool.acquire();
    let pooled_id = scheduler.fiber_pool.id(index);
    worker::with_tls(|tls| tls.current_fiber_index = Some(index));

    let fiber = unsafe { Fiber::from_id(pooled_id) };
    let _ = unsafe { fiber.resume() };
    // Control returns here only once `quit` has switched this thread's fiber back to its
    // thread-fiber (see `Scheduler::worker_loop`), at which point the thread exits normally.
}

/// Shared entry point installed on every fiber in the pool.
fn fiber_entry(_resumed_by: Fiber) -> ! {
    let scheduler = CURRENT_SCHEDULER
        .with(|cell| cell.borrow().clone())
        .expect("fiber_entry ran on a thread with no scheduler installed");
    scheduler.worker_loop();
}
