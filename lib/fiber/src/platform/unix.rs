use crate::{Fiber, PREV};
use std::cell::RefCell;
use std::collections::HashMap;
use std::mem::MaybeUninit;

/// Minimum stack size we'll allocate for a fiber, regardless of what the caller asks for.
/// `ucontext`-based stacks that are too small corrupt memory silently rather than failing
/// cleanly, so we floor everything at a size known to be safe for a simple trampoline frame.
const MIN_STACK_SIZE: usize = 32 * 1024;

/// Heap-allocated fiber context: the saved CPU registers (`ucontext_t`) plus the stack memory
/// they point into. Boxed so the address is stable across moves of the `Fiber` handle itself
/// (the handle is just a pointer to this).
struct Context {
    ucontext: libc::ucontext_t,
    _stack: Vec<u8>,
}

pub type PlatformId = *mut Context;

thread_local! {
    /// `makecontext`'s entry point is a plain `extern "C" fn()` with no argument slot wide
    /// enough to carry a Rust function pointer portably, so the entry for a context-in-progress
    /// is looked up here by context address instead, the first (and only) time it runs.
    static PENDING_ENTRY: RefCell<HashMap<usize, fn(Fiber) -> !>> = RefCell::new(HashMap::new());
}

pub fn init() -> PlatformId {
    let mut ctx = Box::new(Context {
        ucontext: unsafe { MaybeUninit::zeroed().assume_init() },
        _stack: Vec::new(),
    });

    if unsafe { libc::getcontext(&mut ctx.ucontext) } != 0 {
        panic!("fiber: getcontext failed while converting the current thread");
    }

    Box::into_raw(ctx)
}

pub fn create_fiber(stack_size: usize, func: fn(Fiber) -> !) -> PlatformId {
    let mut stack = vec![0u8; stack_size.max(MIN_STACK_SIZE)];

    let mut ucontext: libc::ucontext_t = unsafe { MaybeUninit::zeroed().assume_init() };
    if unsafe { libc::getcontext(&mut ucontext) } != 0 {
        panic!("fiber: getcontext failed while creating a fiber");
    }

    ucontext.uc_stack.ss_sp = stack.as_mut_ptr() as *mut libc::c_void;
    ucontext.uc_stack.ss_size = stack.len();
    ucontext.uc_link = std::ptr::null_mut();

    unsafe {
        libc::makecontext(&mut ucontext, trampoline, 0);
    }

    let ctx = Box::into_raw(Box::new(Context {
        ucontext,
        _stack: stack,
    }));

    PENDING_ENTRY.with(|pending| pending.borrow_mut().insert(ctx as usize, func));

    ctx
}

/// `extern "C" fn()` installed on every fiber by [`create_fiber`]. Looks up its own entry point
/// by the (now-current) context's address and runs it.
extern "C" fn trampoline() {
    let current = crate::current().expect("fiber: trampoline ran with no CURRENT set");
    let ctx_addr = current.as_usize();

    let func = PENDING_ENTRY
        .with(|pending| pending.borrow_mut().remove(&ctx_addr))
        .expect("fiber: trampoline ran without a registered entry point");

    let prev_fiber = PREV.with(|prev| prev.get().expect("PREV was None in trampoline"));
    func(Fiber(prev_fiber));
}

/// Makes `fiber` active, saving the caller's register state into the context it's currently
/// running on (tracked via the crate's `CURRENT` thread-local) before swapping. Unlike the
/// Windows Fiber API, `ucontext` has no notion of "the fiber this thread is currently on" baked
/// into the OS, so we thread it through `crate::current()` ourselves.
pub unsafe fn resume(fiber: PlatformId) {
    let current = crate::current().expect("fiber: resume called before init() on this thread");
    let current_ctx = current.as_usize() as PlatformId;

    unsafe {
        libc::swapcontext(&mut (*current_ctx).ucontext, &(*fiber).ucontext);
    }
}
