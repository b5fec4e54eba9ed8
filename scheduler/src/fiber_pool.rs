use fiber::Fiber;
use mpmc::Queue;
use std::sync::OnceLock;

/// Every fiber slot the scheduler knows about: one per OS thread (adopting
/// that thread's native stack) followed by the spawned, initially-dormant
/// fibers handed out by [`crate::wait_until`].
pub(crate) struct FiberPool {
    fibers: Box<[OnceLock<Fiber>]>,
    dormant: Queue<u32>,
}

impl FiberPool {
    pub(crate) fn new(fiber_count: usize, dormant_capacity: usize) -> Self {
        Self {
            fibers: (0..fiber_count).map(|_| OnceLock::new()).collect(),
            dormant: Queue::new(dormant_capacity.max(2).next_power_of_two()),
        }
    }

    pub(crate) fn set(&self, index: usize, f: Fiber) {
        self.fibers[index]
            .set(f)
            .unwrap_or_else(|_| panic!("fiber slot {index} initialized twice"));
    }

    pub(crate) fn fiber(&self, index: usize) -> &Fiber {
        self.fibers[index]
            .get()
            .expect("fiber slot read before initialization")
    }

    pub(crate) fn push_dormant(&self, index: usize) {
        self.dormant
            .push(index as u32)
            .expect("dormant queue sized to fiber_count - thread_count");
    }

    /// Claims a dormant fiber, spinning until one is available.
    pub(crate) fn claim_dormant(&self) -> usize {
        loop {
            if let Some(index) = self.dormant.pop() {
                return index as usize;
            }
            std::hint::spin_loop();
        }
    }
}
