use crate::{CURRENT_FIBER_INDEX, Scheduler};

/// Entry point run by every worker fiber, including the one adopting each OS
/// thread's native stack.
///
/// Never returns: once the scheduler is shut down there is nothing left for
/// it to do, but no shutdown protocol exists yet, so this loops forever.
pub(crate) fn worker_main(scheduler: &'static Scheduler, fiber_index: usize) -> ! {
    while !scheduler.is_running() {
        std::hint::spin_loop();
    }

    loop {
        if let Some(job) = scheduler.work_queue.pop_high() {
            job();
            continue;
        }

        if let Some((_slot, resumed_fiber)) = scheduler.waiting.poll(std::thread::current().id()) {
            tracing::trace!(from = fiber_index, to = resumed_fiber, "resuming waiter");
            scheduler.fiber_pool.push_dormant(fiber_index);
            CURRENT_FIBER_INDEX.with(|c| c.set(resumed_fiber));
            scheduler.fiber_pool.fiber(resumed_fiber).switch_to();
            continue;
        }

        if let Some(job) = scheduler.work_queue.pop_normal() {
            job();
            continue;
        }

        if let Some(job) = scheduler.work_queue.pop_low() {
            job();
            continue;
        }

        std::hint::spin_loop();
    }
}
