use fiber::Fiber;

#[test]
fn basic_usage() {
    fn fiber_proc(suspended: Fiber) -> ! {
        println!("suspended fiber: {:?}", suspended);
        unsafe {
            suspended.resume();
        }

        panic!("resumed a fiber proc that already ran to its logical end");
    }

    let fiber = Fiber::new(64 * 1024, fiber_proc);
    let fiber_id = fiber.id();

    let prev = unsafe { fiber.resume() };
    assert_eq!(fiber_id, prev.id());
}

#[test]
fn resume_chain() {
    // Three fibers handing control to each other in a ring, each one checking that the fiber it
    // gets back from `resume` is the one it expects.
    fn fiber_proc(suspended: Fiber) -> ! {
        let returned = unsafe { suspended.resume() };
        std::mem::forget(returned);
        panic!("resumed a fiber proc that already ran to its logical end");
    }

    let a = Fiber::new(64 * 1024, fiber_proc);
    let a_id = a.id();

    let b = Fiber::new(64 * 1024, fiber_proc);
    let b_id = b.id();

    let returned = unsafe { a.resume() };
    assert_eq!(a_id, returned.id());
    std::mem::forget(returned);

    let returned = unsafe { b.resume() };
    assert_eq!(b_id, returned.id());
    std::mem::forget(returned);
}
