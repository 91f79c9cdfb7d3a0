//! Per-thread scheduler state and OS thread/CPU-affinity plumbing.
//!
//! The worker loop itself (popping jobs, parking, resuming ready fibers) lives on
//! [`crate::Scheduler`], since it's inseparable from the scheduler's queues and counters. This
//! module owns what's purely about "one OS thread, pinned to one CPU, with its own bookkeeping":
//! [`Tls`], the [`FiberDestination`] handoff record, the ready-fiber mailbox, and CPU pinning.

use crate::Error;
use fiber::FiberId;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::Receiver;

/// Where a fiber this thread just switched away from should end up, once the newly-entered
/// fiber's first loop iteration gets around to finalizing the handoff.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum FiberDestination {
    /// No pending handoff.
    None,
    /// Release the index back to the fiber pool.
    Pool,
    /// Publish `previous_fiber_stored = true`: the fiber is now safe for any thread to resume.
    Waiting,
}

/// A fiber a `Counter` has observed reaching its target, posted onto the thread that observed it
/// for later resumption.
pub(crate) struct ReadyFiber {
    pub fiber_id: FiberId,
    pub stored_flag: Arc<AtomicBool>,
}

/// Per-thread scheduler state.
pub(crate) struct Tls {
    pub thread_index: usize,
    pub thread_fiber_id: FiberId,
    /// The pool index currently active on this thread, or `None` while running on the
    /// thread-fiber itself (never a pool slot).
    pub current_fiber_index: Option<usize>,
    pub previous_fiber_index: Option<usize>,
    pub previous_fiber_destination: FiberDestination,
    pub previous_fiber_stored: Option<Arc<AtomicBool>>,
    ready_rx: Receiver<ReadyFiber>,
    /// Entries drained out of `ready_rx`, exclusively owned by this thread and scanned FIFO.
    ready_queue: VecDeque<ReadyFiber>,
}

impl Tls {
    /// Drains newly-arrived mailbox entries into the local queue, then removes and returns the
    /// first entry whose parking origin has finished the handoff (`stored_flag` observed true).
    /// Entries that aren't ready yet stay queued for the next iteration.
    pub fn next_ready_fiber(&mut self) -> Option<ReadyFiber> {
        while let Ok(entry) = self.ready_rx.try_recv() {
            self.ready_queue.push_back(entry);
        }

        let position = self
            .ready_queue
            .iter()
            .position(|entry| entry.stored_flag.load(std::sync::atomic::Ordering::Acquire))?;
        self.ready_queue.remove(position)
    }
}

thread_local! {
    static TLS: RefCell<Option<Tls>> = const { RefCell::new(None) };
}

/// Installs this thread's `Tls`. Must be called exactly once per worker thread, before the worker
/// loop runs. `ready_rx` is the receiving half of the channel the scheduler created for this
/// thread's index at construction time.
pub(crate) fn init_tls(thread_index: usize, thread_fiber_id: FiberId, ready_rx: Receiver<ReadyFiber>) {
    TLS.with(|tls| {
        *tls.borrow_mut() = Some(Tls {
            thread_index,
            thread_fiber_id,
            current_fiber_index: None,
            previous_fiber_index: None,
            previous_fiber_destination: FiberDestination::None,
            previous_fiber_stored: None,
            ready_rx,
            ready_queue: VecDeque::new(),
        });
    });
}

/// Runs `f` with mutable access to this thread's `Tls`.
///
/// # Panics
///
/// Panics if called before [`init_tls`] on this thread.
pub(crate) fn with_tls<R>(f: impl FnOnce(&mut Tls) -> R) -> R {
    TLS.with(|tls| {
        let mut tls = tls.borrow_mut();
        let tls = tls.as_mut().expect("worker::with_tls called before init_tls on this thread");
        f(tls)
    })
}

/// This thread's worker index, i.e. "which worker am I". Looked up via thread-local state rather
/// than the original design's linear scan of kernel thread ids -- equivalent semantics, O(1)
/// instead of O(thread_count).
pub(crate) fn current_thread_index() -> usize {
    with_tls(|tls| tls.thread_index)
}

/// Pins the calling thread to the given CPU index.
pub(crate) fn pin_to_cpu(index: usize) -> Result<(), Error> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            pin_to_cpu_linux(index)
        } else if #[cfg(windows)] {
            pin_to_cpu_windows(index)
        } else {
            tracing::warn!(cpu = index, "CPU affinity pinning is not implemented on this platform, continuing unpinned");
            let _ = index;
            Ok(())
        }
    }
}

#[cfg(target_os = "linux")]
fn pin_to_cpu_linux(index: usize) -> Result<(), Error> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(index, &mut set);
        let result = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if result != 0 {
            return Err(Error::AffinityFailure);
        }
    }
    Ok(())
}

#[cfg(windows)]
fn pin_to_cpu_windows(index: usize) -> Result<(), Error> {
    use windows_sys::Win32::System::Threading::{GetCurrentThread, SetThreadAffinityMask};

    let mask: usize = 1usize << index;
    let previous = unsafe { SetThreadAffinityMask(GetCurrentThread(), mask) };
    if previous == 0 {
        return Err(Error::AffinityFailure);
    }
    Ok(())
}
