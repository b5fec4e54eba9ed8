use crate::Error;

/// Sizing for a [`crate::init`] call.
///
/// Every pool named here is fixed for the lifetime of the scheduler: no
/// queue grows, no fiber is spawned after `init` returns.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of OS threads the scheduler drives. Thread 0 is always the
    /// calling thread; `thread_count - 1` additional threads are spawned.
    pub thread_count: usize,

    /// Total number of fibers, including one per OS thread (which adopt that
    /// thread's native stack) plus the spawned, initially-dormant fibers
    /// available for [`wait_until`](crate::wait_until) to hand out.
    ///
    /// Must be at least `thread_count + 1`, so there is always at least one
    /// dormant fiber available to hand out to a [`wait_until`](crate::wait_until) caller.
    pub fiber_count: usize,

    /// Number of concurrently outstanding [`wait_until`](crate::wait_until)
    /// calls the scheduler can track at once.
    pub waiting_count: usize,

    /// Capacity of the high-priority job queue. Must be a power of two.
    pub high_priority_capacity: usize,

    /// Capacity of the normal-priority job queue. Must be a power of two.
    pub normal_priority_capacity: usize,

    /// Capacity of the low-priority job queue. Must be a power of two.
    pub low_priority_capacity: usize,

    /// Stack size, in bytes, for each spawned (non-adopted) fiber.
    pub fiber_stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_count: 4,
            fiber_count: 16,
            waiting_count: 64,
            high_priority_capacity: 256,
            normal_priority_capacity: 256,
            low_priority_capacity: 256,
            fiber_stack_size: fiber::stack::DEFAULT_STACK_SIZE,
        }
    }
}

impl SchedulerConfig {
    /// Validates every sizing constraint `init` relies on.
    pub fn validate(&self) -> Result<(), Error> {
        if self.thread_count == 0 {
            return Err(Error::InvalidConfiguration {
                reason: "thread_count must be at least 1".into(),
            });
        }
        if self.fiber_count < self.thread_count + 1 {
            return Err(Error::InvalidConfiguration {
                reason: "fiber_count must be >= thread_count + 1".into(),
            });
        }
        if self.waiting_count == 0 {
            return Err(Error::InvalidConfiguration {
                reason: "waiting_count must be at least 1".into(),
            });
        }
        for (name, cap) in [
            ("high_priority_capacity", self.high_priority_capacity),
            ("normal_priority_capacity", self.normal_priority_capacity),
            ("low_priority_capacity", self.low_priority_capacity),
        ] {
            if !cap.is_power_of_two() || cap < 2 {
                return Err(Error::InvalidConfiguration {
                    reason: format!("{name} must be a power of two >= 2, got {cap}"),
                });
            }
        }
        if self.fiber_stack_size < fiber::stack::MIN_STACK_SIZE {
            return Err(Error::InvalidConfiguration {
                reason: format!(
                    "fiber_stack_size must be at least {}",
                    fiber::stack::MIN_STACK_SIZE
                ),
            });
        }
        Ok(())
    }
}
