//! The completion counter: the primitive through which jobs synchronize.
//!
//! A `Counter` is a wait-group. It starts at some expected count, is decremented once per
//! completed job, and lets fibers register to be woken when it reaches a target value. The
//! interesting part is the waiter-slot protocol in [`Counter::add_waiter`] and
//! [`Counter::check_waiters`]: both the thread that's about to park and the thread that completes
//! the last job race to observe the target value, and whichever one gets there must resume the
//! waiter exactly once.

use fiber::FiberId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Maximum concurrent waiters per counter. A 17th registration is a fatal
/// [`crate::Error::WaiterExhaustion`].
pub const MAX_WAITERS: usize = 16;

/// What happened when a fiber tried to register as a waiter.
pub(crate) enum WaitOutcome {
    /// The counter already matched the target; the caller does not need to park.
    ImmediatelySatisfied,
    /// The caller should park; it will be woken once the counter reaches `target`.
    Parked,
}

struct WaiterSlot {
    /// `true` when the slot is unclaimed.
    free: AtomicBool,
    /// `true` while a waiter is in the process of being resumed (the transient third state).
    in_use: AtomicBool,
    fiber_id: std::sync::Mutex<Option<(FiberId, Arc<AtomicBool>)>>,
    target_value: AtomicU32,
}

impl WaiterSlot {
    fn new() -> WaiterSlot {
        WaiterSlot {
            free: AtomicBool::new(true),
            in_use: AtomicBool::new(false),
            fiber_id: std::sync::Mutex::new(None),
            target_value: AtomicU32::new(0),
        }
    }
}

/// A monotonically-updated counter with up to [`MAX_WAITERS`] slots where fibers register to wake
/// when it reaches a target value.
pub struct Counter {
    value: AtomicU32,
    slots: [WaiterSlot; MAX_WAITERS],
}

impl Counter {
    /// Creates a counter starting at 0. The scheduler initializes it to the expected job count on
    /// submission, before any job bound to it can run.
    pub fn new() -> Counter {
        Counter {
            value: AtomicU32::new(0),
            slots: std::array::from_fn(|_| WaiterSlot::new()),
        }
    }

    /// Current value. Racy by nature -- useful for the `Wait(C, value_of_C)` fast path and tests,
    /// not as a substitute for registering a waiter.
    pub fn value(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }

    /// Sets the counter to `value` up-front. Must happen before any job bound to this counter is
    /// enqueued -- see the scheduler's `add_job`/`add_jobs`.
    pub(crate) fn init(&self, value: u32) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Decrements by one, returning the post-update value.
    pub(crate) fn decrement(&self) -> u32 {
        self.value.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Registers the current fiber as a waiter for `target`. Scans the 16 slots linearly,
    /// claiming the first free one.
    pub(crate) fn add_waiter(
        &self,
        fiber_id: FiberId,
        stored_flag: Arc<AtomicBool>,
        target: u32,
    ) -> Result<WaitOutcome, crate::Error> {
        for slot in &self.slots {
            if slot
                .free
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            *slot.fiber_id.lock().unwrap() = Some((fiber_id, stored_flag));
            slot.target_value.store(target, Ordering::Release);
            slot.in_use.store(false, Ordering::Release);

            if self.value() == target {
                if slot
                    .in_use
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    *slot.fiber_id.lock().unwrap() = None;
                    slot.free.store(true, Ordering::Release);
                    return Ok(WaitOutcome::ImmediatelySatisfied);
                }
                // `check_waiters` won the race to claim this slot; it will post the fiber onto a
                // ready mailbox itself, so from here this is no different than having parked.
            }

            return Ok(WaitOutcome::Parked);
        }

        Err(crate::Error::WaiterExhaustion)
    }

    /// Called after every increment/decrement with the post-update value. Claims every armed
    /// slot whose target matches and returns the woken waiters for the caller to route onto its
    /// own ready mailbox.
    pub(crate) fn check_waiters(&self, value: u32) -> Vec<(FiberId, Arc<AtomicBool>)> {
        let mut woken = Vec::new();

        for slot in &self.slots {
            if slot.free.load(Ordering::Acquire) {
                continue;
            }
            if slot.in_use.load(Ordering::Acquire) {
                continue;
            }
            if slot.target_value.load(Ordering::Acquire) != value {
                continue;
            }
            if slot
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            if let Some(entry) = slot.fiber_id.lock().unwrap().take() {
                woken.push(entry);
            }
            slot.free.store(true, Ordering::Release);
        }

        woken
    }
}

impl Default for Counter {
    fn default() -> Counter {
        Counter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_fiber_id() -> FiberId {
        fiber::init()
    }

    #[test]
    fn wait_on_already_satisfied_counter_does_not_park() {
        let counter = Counter::new();
        counter.init(0);
        let outcome = counter
            .add_waiter(dummy_fiber_id(), Arc::new(AtomicBool::new(false)), 0)
            .unwrap();
        assert!(matches!(outcome, WaitOutcome::ImmediatelySatisfied));
    }

    #[test]
    fn decrement_to_target_wakes_armed_waiter() {
        let counter = Counter::new();
        counter.init(1);
        let flag = Arc::new(AtomicBool::new(false));
        let outcome = counter.add_waiter(dummy_fiber_id(), flag.clone(), 0).unwrap();
        assert!(matches!(outcome, WaitOutcome::Parked));

        let new_value = counter.decrement();
        assert_eq!(new_value, 0);

        let woken = counter.check_waiters(new_value);
        assert_eq!(woken.len(), 1);
        assert!(Arc::ptr_eq(&woken[0].1, &flag));
    }

    #[test]
    fn sixteen_waiters_ok_seventeenth_fatal() {
        let counter = Counter::new();
        counter.init(100);
        for _ in 0..16 {
            counter
                .add_waiter(dummy_fiber_id(), Arc::new(AtomicBool::new(false)), 0)
                .unwrap();
        }
        let err = counter
            .add_waiter(dummy_fiber_id(), Arc::new(AtomicBool::new(false)), 0)
            .unwrap_err();
        assert!(matches!(err, crate::Error::WaiterExhaustion));
    }

    #[test]
    fn released_slot_can_be_reused() {
        let counter = Counter::new();
        counter.init(1);
        let flag = Arc::new(AtomicBool::new(false));
        counter.add_waiter(dummy_fiber_id(), flag, 0).unwrap();
        let new_value = counter.decrement();
        counter.check_waiters(new_value);

        // The slot freed by the previous check_waiters call must be claimable again.
        counter.init(5);
        for _ in 0..16 {
            counter
                .add_waiter(dummy_fiber_id(), Arc::new(AtomicBool::new(false)), 0)
                .unwrap();
        }
    }
}
