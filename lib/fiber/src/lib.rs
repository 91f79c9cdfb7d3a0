//! A library for creating and managing fibers in a cross-platform manner.
//!
//! Fibers are cooperative stacks that must be manually scheduled by the client application, as
//! opposed to threads which are automatically scheduled by the OS. Each fiber has its own stack
//! space and yields control to another fiber explicitly, by calling [`Fiber::resume`]. This
//! allows for concurrency patterns (parking, cooperative handoff) that plain OS threads can't
//! support without blocking.
//!
//! This crate is deliberately low-level: it knows nothing about job scheduling, priorities, or
//! pools. It's meant to be the foundation a fiber-pool / job-scheduling layer is built on top of.
//!
//! # Fibers and Threads
//!
//! Fibers run on top of system threads, with one fiber active on a thread at a time. Once a
//! fiber has been suspended (by another fiber calling [`Fiber::resume`] in its place) it can be
//! resumed on any thread, not necessarily the one it was last running on.
//!
//! Being able to move a fiber between threads has implications for thread-safety: types that
//! assume thread-affinity (certain lock guards, `!Send` types) must not be allowed to live
//! across a call to [`Fiber::resume`].
//!
//! # Safety
//!
//! [`Fiber::resume`] is unsafe because the callee fiber proc runs with the caller's stack frozen
//! underneath it; resuming a fiber while a `!Send` value is alive on the stack can violate that
//! value's thread-affinity invariant. Callers are responsible for ensuring nothing unsound is
//! alive across the switch.
//!
//! # Example
//!
//! ```no_run
//! use fiber::Fiber;
//!
//! // Entry point run by the fiber. Must never return: there's no natural "return to caller" for
//! // a fiber proc on every platform.
//! fn fiber_proc(suspended: Fiber) -> ! {
//!     println!("suspended fiber: {:?}", suspended);
//!     unsafe { suspended.resume(); }
//!     panic!("resumed a fiber proc that already ran to its logical end");
//! }
//!
//! let fiber = Fiber::new(64 * 1024, fiber_proc);
//! let fiber_id = fiber.id();
//!
//! let prev = unsafe { fiber.resume() };
//! assert_eq!(fiber_id, prev.id());
//! ```

use std::cell::Cell;

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        #[path = "platform/windows.rs"]
        mod platform;
    } else if #[cfg(unix)] {
        #[path = "platform/unix.rs"]
        mod platform;
    } else {
        compile_error!("fiber: unsupported platform, only windows and unix are implemented");
    }
}

use platform::PlatformId;

/// Opaque, stable identifier for a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberId(PlatformId);

impl FiberId {
    /// Exposes the underlying platform handle as a plain integer, for callers that need a
    /// loggable value (e.g. attaching it to a tracing span).
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

// `FiberId` wraps a raw platform handle, so it's not `Send`/`Sync` by default. This crate never
// dereferences the handle except through `resume`, which is itself unsafe and requires the
// caller to uphold fiber-switch safety, so sharing the id itself is sound.
unsafe impl Send for FiberId {}
unsafe impl Sync for FiberId {}

/// A cooperative stack with its own register state.
///
/// A `Fiber` handle is either newly created (not yet run) or was handed back to the caller by a
/// previous call to [`Fiber::resume`] (meaning it's currently suspended).
#[derive(Debug)]
pub struct Fiber(PlatformId);

thread_local! {
    /// The fiber that most recently suspended on this thread, used to hand a `Fiber` handle
    /// back to the resumer once a switch lands.
    static PREV: Cell<Option<PlatformId>> = const { Cell::new(None) };
    /// The fiber currently executing on this thread.
    static CURRENT: Cell<Option<PlatformId>> = const { Cell::new(None) };
}

/// Converts the calling OS thread's own stack into a fiber, making it safe to call
/// [`Fiber::resume`] from this thread.
///
/// Must be called once per thread before any other fiber operation on that thread.
pub fn init() -> FiberId {
    let platform_fiber = platform::init();
    CURRENT.with(|current| current.set(Some(platform_fiber)));
    FiberId(platform_fiber)
}

impl Fiber {
    /// Creates a new fiber with the given stack size, set to begin executing `entry` the first
    /// time it's resumed.
    ///
    /// `entry` receives the `Fiber` that was suspended to make this one active; it must never
    /// return.
    pub fn new(stack_size: usize, entry: fn(Fiber) -> !) -> Fiber {
        Fiber(platform::create_fiber(stack_size, entry))
    }

    /// Makes this fiber active, suspending the caller in its place.
    ///
    /// Returns once some fiber resumes whichever fiber called `resume` -- the returned `Fiber`
    /// is whichever fiber performed that resume, not necessarily the one originally passed to
    /// this call (control may pass through several fibers before coming back).
    ///
    /// # Safety
    ///
    /// The caller must not hold any `!Send` value across this call.
    pub unsafe fn resume(self) -> Fiber {
        if CURRENT.with(|current| current.get()).is_none() {
            init();
        }

        let prev_handle = CURRENT.with(|current| current.replace(Some(self.0)));
        PREV.with(|prev| prev.set(prev_handle));

        // SAFETY: forwarded to the caller's contract on `resume`.
        unsafe { platform::resume(self.0) };

        // Execution resumes here once some fiber switches back to us. `PREV`/`CURRENT` are the
        // only state we can trust; anything local from before the switch may be stale.
        let prev_fiber = PREV.with(|prev| prev.get().expect("PREV was None after resuming a fiber"));
        Fiber(prev_fiber)
    }

    /// Returns this fiber's stable id.
    pub fn id(&self) -> FiberId {
        FiberId(self.0)
    }

    /// Reconstructs a resumable handle for a fiber whose id was obtained earlier (e.g. from
    /// [`Fiber::id`] before the fiber was suspended by a switch elsewhere).
    ///
    /// # Safety
    ///
    /// `id` must refer to a fiber that is currently suspended and not concurrently being
    /// resumed through any other handle. Constructing two live handles for the same suspended
    /// fiber and resuming both violates the "one thread at a time" invariant this crate only
    /// otherwise enforces through move semantics.
    pub unsafe fn from_id(id: FiberId) -> Fiber {
        Fiber(id.0)
    }
}

// Fibers are designed to move between threads; the only unsafe operation is resuming the same
// fiber on two threads at once, which `resume`'s signature (it consumes `self`) statically
// prevents as long as callers don't fabricate a second `Fiber` for the same id.
unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

/// Returns the id of the fiber currently executing on this thread, or `None` if [`init`] hasn't
/// been called yet.
pub fn current() -> Option<FiberId> {
    CURRENT.with(|current| current.get()).map(FiberId)
}
