//! Runs a handful of jobs across the scheduler, one of which waits on the
//! result of another.

use scheduler::{Priority, SchedulerConfig, Task, TaskStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

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

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    scheduler::init(SchedulerConfig::default()).expect("scheduler starts");

    let flag = Arc::new(Flag(AtomicBool::new(false)));
    let result = Arc::new(AtomicUsize::new(0));

    let waiter_flag = flag.clone();
    let waiter_result = result.clone();
    scheduler::enqueue(move || {
        scheduler::wait_for(waiter_flag.as_ref());
        waiter_result.store(42, Ordering::Release);
    })
    .expect("normal queue has room");

    let setter_flag = flag.clone();
    scheduler::enqueue_with_priority(Priority::High, move || {
        setter_flag.0.store(true, Ordering::Release);
    })
    .expect("high queue has room");

    while result.load(Ordering::Acquire) != 42 {
        std::hint::spin_loop();
    }

    println!("result = {}", result.load(Ordering::Acquire));
}
