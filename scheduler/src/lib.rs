//! A fiber-based M:N job scheduler.
//!
//! A fixed pool of OS threads cooperatively runs a larger pool of stackful
//! fibers. Jobs submitted via [`enqueue`] run to completion on whichever
//! fiber picks them up; a job may suspend itself with [`wait_for`] until some
//! [`Task`] it depends on reports [`TaskStatus::Complete`], freeing its
//! worker thread to run other fibers in the meantime.
//!
//! [`init`] must be called exactly once before any other function in this
//! crate is used.

mod config;
mod error;
mod fiber_pool;
mod job;
mod waiting;
mod worker;

pub use config::SchedulerConfig;
pub use error::Error;
pub use job::{Job, Priority};

use fiber::Fiber;
use fiber_pool::FiberPool;
use job::WorkQueue;
use std::cell::Cell;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use waiting::{WaitingEntry, WaitingTable};

/// Progress of a unit of work a fiber can [`wait_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Complete,
}

/// Something a fiber can suspend itself waiting on.
///
/// Implementations are responsible for their own internal synchronization:
/// `status` may be called concurrently with whatever sets it, and from a
/// different OS thread than the one that registered the wait.
pub trait Task: Send + Sync {
    fn status(&self) -> TaskStatus;
}

struct Scheduler {
    work_queue: WorkQueue,
    waiting: WaitingTable,
    fiber_pool: FiberPool,
    ready_count: AtomicUsize,
    thread_count: usize,
}

impl Scheduler {
    fn is_running(&self) -> bool {
        self.ready_count.load(Ordering::Acquire) == self.thread_count
    }
}

// Safety: every field synchronizes internally (atomics, CAS-guarded slots,
// `OnceLock`); `Scheduler` itself adds no additional shared mutable state.
unsafe impl Sync for Scheduler {}

static SCHEDULER: OnceLock<Scheduler> = OnceLock::new();

thread_local! {
    static CURRENT_FIBER_INDEX: Cell<usize> = const { Cell::new(0) };
}

fn scheduler() -> &'static Scheduler {
    SCHEDULER
        .get()
        .expect("scheduler::init must be called before using the scheduler")
}

/// Starts the scheduler: spawns `config.thread_count - 1` additional OS
/// threads and `config.fiber_count - config.thread_count` dormant worker
/// fibers, then blocks until every thread reports ready.
///
/// The calling thread becomes worker 0; it does not itself enter the worker
/// loop (see [`worker::worker_main`]) until the first time it calls
/// [`wait_for`] or [`wait_until`].
///
/// # Panics
///
/// Panics if called more than once.
pub fn init(config: SchedulerConfig) -> Result<(), Error> {
    config.validate()?;

    let dormant_count = config.fiber_count - config.thread_count;
    let built = Scheduler {
        work_queue: WorkQueue::new(
            config.high_priority_capacity,
            config.normal_priority_capacity,
            config.low_priority_capacity,
        ),
        waiting: WaitingTable::new(config.waiting_count),
        fiber_pool: FiberPool::new(config.fiber_count, dormant_count),
        ready_count: AtomicUsize::new(0),
        thread_count: config.thread_count,
    };

    let scheduler = SCHEDULER
        .set(built)
        .map_err(|_| Error::InvalidConfiguration {
            reason: "scheduler::init called more than once".into(),
        })
        .map(|()| SCHEDULER.get().expect("just set"))?;

    // Slot 0 adopts the calling thread; it is filled in below, after the
    // dormant fibers and worker threads have been spawned, so that those
    // spawns observe a consistent fiber pool.
    for index in config.thread_count..config.fiber_count {
        let fiber = Fiber::spawn(config.fiber_stack_size, move || {
            worker::worker_main(scheduler, index)
        })?;
        scheduler.fiber_pool.set(index, fiber);
        scheduler.fiber_pool.push_dormant(index);
    }

    for index in 1..config.thread_count {
        std::thread::Builder::new()
            .name(format!("scheduler-worker-{index}"))
            .spawn(move || {
                scheduler.fiber_pool.set(index, Fiber::current());
                CURRENT_FIBER_INDEX.with(|c| c.set(index));
                scheduler.ready_count.fetch_add(1, Ordering::AcqRel);
                let _span = tracing::info_span!("worker", index).entered();
                worker::worker_main(scheduler, index);
            })?;
    }

    scheduler.fiber_pool.set(0, Fiber::current());
    CURRENT_FIBER_INDEX.with(|c| c.set(0));
    scheduler.ready_count.fetch_add(1, Ordering::AcqRel);

    while scheduler.ready_count.load(Ordering::Acquire) != config.thread_count {
        std::hint::spin_loop();
    }

    tracing::info!(
        thread_count = config.thread_count,
        fiber_count = config.fiber_count,
        waiting_count = config.waiting_count,
        "scheduler started"
    );

    Ok(())
}

/// Whether every worker thread has finished starting up.
///
/// There is no shutdown protocol; once this returns `true` it stays `true`
/// for the lifetime of the process.
pub fn is_running() -> bool {
    match SCHEDULER.get() {
        Some(s) => s.is_running(),
        None => false,
    }
}

/// Submits `job` to the normal-priority queue.
pub fn enqueue(job: impl FnOnce() + Send + 'static) -> Result<(), Error> {
    enqueue_with_priority(Priority::Normal, job)
}

/// Submits `job` to the queue selected by `priority`.
pub fn enqueue_with_priority(
    priority: Priority,
    job: impl FnOnce() + Send + 'static,
) -> Result<(), Error> {
    let result = scheduler().work_queue.push(priority, Box::new(job));
    match &result {
        Ok(()) => tracing::trace!(?priority, "enqueued job"),
        Err(_) => tracing::warn!(?priority, "job queue overflow"),
    }
    result
}

/// Suspends the calling fiber until `task.status()` is [`TaskStatus::Complete`].
///
/// The OS thread this fiber was running on is freed to run other fibers for
/// the duration of the wait; resumption may happen on a different thread
/// than the one `wait_for` was called from.
pub fn wait_for(task: &dyn Task) -> bool {
    wait_until(Duration::MAX, task)
}

/// Identical to [`wait_for`]; `timeout` is accepted for interface
/// compatibility but not currently consulted.
pub fn wait_until(_timeout: Duration, task: &dyn Task) -> bool {
    let scheduler = scheduler();

    let waiting_fiber = CURRENT_FIBER_INDEX.with(Cell::get);
    let registering_thread = std::thread::current().id();
    let dormant_fiber = scheduler.fiber_pool.claim_dormant();

    tracing::trace!(
        fiber = waiting_fiber,
        dormant = dormant_fiber,
        "registering wait"
    );

    // Safety: `task` outlives this call, since the calling fiber's stack
    // frame is merely suspended (not dropped) until some worker resumes it
    // via the waiting table, which only happens after `task.status()` has
    // already been observed as `Complete`.
    let task: *const dyn Task = task;
    scheduler.waiting.fill(WaitingEntry {
        task,
        fiber_index: waiting_fiber,
        thread_id: None,
    });

    CURRENT_FIBER_INDEX.with(|c| c.set(dormant_fiber));
    scheduler.fiber_pool.fiber(dormant_fiber).switch_to();

    tracing::trace!(
        fiber = waiting_fiber,
        migrated = std::thread::current().id() != registering_thread,
        "resumed after wait"
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flag(std::sync::atomic::AtomicBool);

    impl Task for Flag {
        fn status(&self) -> TaskStatus {
            if self.0.load(Ordering::Acquire) {
                TaskStatus::Complete
            } else {
                TaskStatus::InProgress
            }
        }
    }

    #[test]
    fn default_config_validates() {
        SchedulerConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_too_few_fibers() {
        let config = SchedulerConfig {
            thread_count: 4,
            fiber_count: 4,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn flag_task_reports_status() {
        let flag = Flag(std::sync::atomic::AtomicBool::new(false));
        assert_eq!(flag.status(), TaskStatus::InProgress);
        flag.0.store(true, Ordering::Release);
        assert_eq!(flag.status(), TaskStatus::Complete);
    }
}
