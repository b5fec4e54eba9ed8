//! Stackful fibers: cooperatively-scheduled, symmetric coroutines that run on
//! their own OS-allocated stack.
//!
//! A [`Fiber`] is a cheap handle (an [`Arc`] clone) to a saved register block
//! plus, for spawned fibers, the stack that block points into. There is no
//! asymmetric caller/callee relationship as in a generator: any fiber can
//! [`switch_to`](Fiber::switch_to) any other, including one currently
//! suspended on a different OS thread than the one performing the switch.
//!
//! Every OS thread has an implicit fiber representing its native call stack,
//! lazily created on first use by [`Fiber::current`]. Switching away from it
//! and back again works exactly like switching between two spawned fibers.

mod arch;
pub mod stack;

use crate::stack::Stack;
use std::cell::{Cell, RefCell};
use std::ptr;
use std::sync::Arc;

struct Inner {
    regs: std::cell::UnsafeCell<arch::Registers>,
    /// `None` for the implicit fiber adopting an OS thread's native stack.
    stack: Option<Stack>,
    /// The double-boxed `Box<dyn FnOnce()>` passed to a spawned fiber's
    /// trampoline, reclaimed by `switch_to` the first time this fiber runs.
    /// Null for an adopted fiber, or once the first switch has consumed it.
    arg: Cell<*mut u8>,
}

// Safety: `regs` is only ever read or written while holding exclusive
// scheduling ownership of the fiber (see `Fiber::switch_to`); the scheduler
// that drives fibers across threads guarantees a given `Inner` is never the
// target of two concurrent switches. `arg` is a plain pointer handed off
// under the same exclusivity guarantee, not genuinely thread-local data.
unsafe impl Sync for Inner {}
unsafe impl Send for Inner {}

impl Drop for Inner {
    fn drop(&mut self) {
        let ptr = self.arg.take();
        if !ptr.is_null() {
            // Safety: non-null only when this fiber was spawned but never
            // switched into, so the double box is still intact.
            unsafe {
                drop(Box::from_raw(ptr.cast::<Box<dyn FnOnce()>>()));
            }
        }
    }
}

/// A handle to a fiber's saved execution state.
///
/// Cloning a `Fiber` is cheap and yields another handle to the same
/// underlying state; [`PartialEq`] compares by identity, not by register
/// contents.
#[derive(Clone)]
pub struct Fiber(Arc<Inner>);

impl PartialEq for Fiber {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Fiber")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}

impl Eq for Fiber {}

thread_local! {
    static CURRENT: RefCell<Fiber> = RefCell::new(Fiber::adopt_current_thread());
}

impl Fiber {
    /// Spawns a new fiber with its own `stack_size`-byte stack, which will
    /// run `f` the first time it is switched into.
    ///
    /// `f` never returns in practice (the scheduler's worker loop runs
    /// forever); if it ever does, the process aborts rather than attempting
    /// to resume into unspecified state.
    ///
    /// `f` must be `Send`: a fiber's closure can end up running on a
    /// different OS thread than the one that spawned it, whenever the
    /// scheduler resumes it elsewhere.
    pub fn spawn<F>(stack_size: usize, f: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let stack = Stack::new(stack_size)?;

        let boxed: Box<dyn FnOnce()> = Box::new(f);
        let arg = Box::into_raw(Box::new(boxed)).cast::<u8>();

        // Safety: `stack.top()` is a freshly mmap'd, guard-paged region sized
        // and aligned by `Stack::new`.
        let regs = arch::Registers::new(stack.top().get(), fiber_trampoline, arg);

        Ok(Self(Arc::new(Inner {
            regs: std::cell::UnsafeCell::new(regs),
            stack: Some(stack),
            arg: Cell::new(arg),
        })))
    }

    /// Returns a handle to the fiber currently running on this OS thread.
    ///
    /// On a thread that has never run a spawned fiber, this lazily adopts the
    /// thread's native stack and returns a handle to it; that handle compares
    /// equal across every subsequent call from the same thread until some
    /// other fiber has been switched into and back out of.
    pub fn current() -> Self {
        CURRENT.with(|c| c.borrow().clone())
    }

    fn adopt_current_thread() -> Self {
        Self(Arc::new(Inner {
            regs: std::cell::UnsafeCell::new(arch::Registers::default()),
            stack: None,
            arg: Cell::new(ptr::null_mut()),
        }))
    }

    /// Suspends the calling fiber and resumes `self`.
    ///
    /// Returns once some later `switch_to` call targets the fiber that was
    /// running when this call was made, possibly on a different OS thread
    /// than the one that made it.
    ///
    /// # Safety
    ///
    /// `self` must not already be running on another OS thread, and must not
    /// be switched into concurrently from two threads at once. The scheduler
    /// built on top of this crate is responsible for upholding both.
    pub fn switch_to(&self) {
        let prev = CURRENT.with(|c| c.replace(self.clone()));

        // Hand ownership of the spawn closure to the about-to-run fiber; a
        // no-op on every switch after the first, and on adopted fibers.
        self.0.arg.take();

        // Safety: `prev` is the fiber that was running on this thread just
        // before this call, and `self` is a valid register block per this
        // function's contract.
        unsafe {
            arch::switch_to(prev.0.regs.get(), self.0.regs.get());
        }

        CURRENT.with(|c| c.replace(prev));
    }
}

unsafe extern "C" fn fiber_trampoline(arg: *mut u8) -> ! {
    // Safety: `arg` is the double-boxed closure pointer written by
    // `Fiber::spawn`, consumed exactly once on a fiber's first switch-in.
    let closure = unsafe { Box::from_raw(arg.cast::<Box<dyn FnOnce()>>()) };
    (*closure)();

    // A spawned fiber's closure is expected to run forever (it is the
    // scheduler's worker loop); returning from it leaves the stack in a
    // state this crate has no way to resume from.
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::Fiber;
    use std::sync::{Arc, Mutex};

    #[test]
    fn current_is_stable_across_calls() {
        assert_eq!(Fiber::current(), Fiber::current());
    }

    #[test]
    fn ping_pong_switch() {
        let trace = Arc::new(Mutex::new(Vec::new()));

        let main_fiber = Fiber::current();

        let child = {
            let trace = trace.clone();
            let main_fiber = main_fiber.clone();
            Fiber::spawn(64 * 1024, move || {
                trace.lock().unwrap().push("child:1");
                main_fiber.switch_to();

                trace.lock().unwrap().push("child:2");
                main_fiber.switch_to();

                trace.lock().unwrap().push("child:3");
                // Park forever rather than returning; this crate aborts on
                // trampoline return, and the test only expects two resumes.
                loop {
                    main_fiber.switch_to();
                }
            })
            .unwrap()
        };

        trace.lock().unwrap().push("main:1");
        child.switch_to();
        trace.lock().unwrap().push("main:2");
        child.switch_to();
        trace.lock().unwrap().push("main:3");

        assert_eq!(
            *trace.lock().unwrap(),
            vec!["main:1", "child:1", "main:2", "child:2", "main:3"]
        );
    }

    #[test]
    fn stack_integrity_across_switch() {
        let main_fiber = Fiber::current();
        let child = {
            let main_fiber = main_fiber.clone();
            Fiber::spawn(64 * 1024, move || {
                const PATTERN: u64 = 0xDEAD_BEEF_CAFE_F00D;
                let canary = PATTERN;
                let canary_addr = &canary as *const u64 as usize;

                main_fiber.switch_to();

                assert_eq!(canary, PATTERN, "stack memory was clobbered across a switch");
                assert_eq!(
                    &canary as *const u64 as usize, canary_addr,
                    "stack moved across a switch"
                );

                loop {
                    main_fiber.switch_to();
                }
            })
            .unwrap()
        };

        child.switch_to();
        child.switch_to();
    }

    #[test]
    fn spawn_and_drop_without_switch_does_not_leak() {
        let ran = Arc::new(Mutex::new(false));
        let ran2 = ran.clone();
        let fiber = Fiber::spawn(64 * 1024, move || {
            *ran2.lock().unwrap() = true;
        })
        .unwrap();
        drop(fiber);
        assert!(!*ran.lock().unwrap());
    }
}
