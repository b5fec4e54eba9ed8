//! With only one waiting-table slot, two fibers registering a wait at
//! roughly the same time must still both resolve correctly: the second
//! registration blocks (spinning on the slot/dormant-fiber free lists)
//! until the first waiter has been resumed and freed its slot.

use scheduler::{SchedulerConfig, Task, TaskStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

struct Flag(AtomicBool);

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
fn single_waiting_slot_serializes_concurrent_waiters() {
    scheduler::init(SchedulerConfig {
        thread_count: 2,
        fiber_count: 4,
        waiting_count: 1,
        ..SchedulerConfig::default()
    })
    .unwrap();

    let flag1 = Arc::new(Flag(AtomicBool::new(false)));
    let flag2 = Arc::new(Flag(AtomicBool::new(false)));
    let done = Arc::new(AtomicUsize::new(0));

    for flag in [flag1.clone(), flag2.clone()] {
        let done = done.clone();
        scheduler::enqueue(move || {
            assert!(scheduler::wait_for(flag.as_ref()));
            done.fetch_add(1, Ordering::AcqRel);
        })
        .unwrap();
    }

    flag1.0.store(true, Ordering::Release);
    flag2.0.store(true, Ordering::Release);

    let start = Instant::now();
    while done.load(Ordering::Acquire) != 2 {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "waiters deadlocked under a single waiting slot"
        );
        std::thread::yield_now();
    }
}
