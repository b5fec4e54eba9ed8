//! With a single worker thread, queued jobs run strictly high before normal
//! before low, regardless of submission order.

use scheduler::{Priority, SchedulerConfig, Task, TaskStatus};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

struct CountReached {
    count: Arc<AtomicUsize>,
    target: usize,
}

impl Task for CountReached {
    fn status(&self) -> TaskStatus {
        if self.count.load(Ordering::Acquire) >= self.target {
            TaskStatus::Complete
        } else {
            TaskStatus::InProgress
        }
    }
}

#[test]
fn high_before_normal_before_low() {
    scheduler::init(SchedulerConfig {
        thread_count: 1,
        fiber_count: 2,
        waiting_count: 4,
        ..SchedulerConfig::default()
    })
    .unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let ran = Arc::new(AtomicUsize::new(0));

    let order_l = order.clone();
    let ran_l = ran.clone();
    scheduler::enqueue_with_priority(Priority::Low, move || {
        order_l.lock().unwrap().push("low");
        ran_l.fetch_add(1, Ordering::AcqRel);
    })
    .unwrap();

    let order_n = order.clone();
    let ran_n = ran.clone();
    scheduler::enqueue_with_priority(Priority::Normal, move || {
        order_n.lock().unwrap().push("normal");
        ran_n.fetch_add(1, Ordering::AcqRel);
    })
    .unwrap();

    let order_h = order.clone();
    let ran_h = ran.clone();
    scheduler::enqueue_with_priority(Priority::High, move || {
        order_h.lock().unwrap().push("high");
        ran_h.fetch_add(1, Ordering::AcqRel);
    })
    .unwrap();

    let task = CountReached { count: ran, target: 3 };
    assert!(scheduler::wait_for(&task));

    assert_eq!(*order.lock().unwrap(), vec!["high", "normal", "low"]);
}
