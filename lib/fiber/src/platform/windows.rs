use crate::{Fiber, PREV};
use std::ffi::c_void;
use std::mem;
use windows_sys::Win32::System::Threading::{ConvertThreadToFiber, CreateFiber, SwitchToFiber};

pub type PlatformId = *mut c_void;

pub fn init() -> PlatformId {
    let fiber = unsafe { ConvertThreadToFiber(std::ptr::null_mut()) };

    if fiber.is_null() {
        panic!("fiber: ConvertThreadToFiber failed");
    }

    fiber
}

pub fn create_fiber(stack_size: usize, func: fn(Fiber) -> !) -> PlatformId {
    let fiber = unsafe { CreateFiber(stack_size as u32, Some(fiber_proc), func as *mut c_void) };

    if fiber.is_null() {
        panic!("fiber: CreateFiber failed");
    }

    fiber
}

/// Makes `fiber` active. The Windows Fiber API tracks the "current fiber" per-thread internally
/// and saves its state into the fiber object being switched away from, so unlike the Unix
/// `ucontext` backend we don't need to pass the outgoing fiber explicitly.
pub unsafe fn resume(fiber: PlatformId) {
    unsafe { SwitchToFiber(fiber) };
}

/// Entry point installed on every fiber created by [`create_fiber`]. `data` is secretly the
/// `fn(Fiber) -> !` pointer passed to `CreateFiber`.
unsafe extern "system" fn fiber_proc(data: *mut c_void) {
    let func: fn(Fiber) -> ! = unsafe { mem::transmute(data) };
    let prev_fiber = PREV.with(|prev| prev.get().expect("PREV was None in fiber_proc"));

    func(Fiber(prev_fiber));
}

// TODO: a suspended `Fiber` that's dropped instead of resumed again leaks its native fiber
// object (no safe point exists to call `DeleteFiber`, since a suspended fiber's stack may still
// be mid-unwind on some other logical owner). The job scheduler built on this crate never drops
// pooled fibers, so this hasn't mattered in practice.
