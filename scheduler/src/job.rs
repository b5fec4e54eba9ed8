use crate::Error;
use mpmc::Queue;

/// Relative priority of an enqueued [`Job`].
///
/// Workers always drain `High` before `Normal`, and `Normal` before `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// A unit of work submitted to the scheduler.
pub type Job = Box<dyn FnOnce() + Send>;

pub(crate) struct WorkQueue {
    high: Queue<Job>,
    normal: Queue<Job>,
    low: Queue<Job>,
}

impl WorkQueue {
    pub(crate) fn new(high_cap: usize, normal_cap: usize, low_cap: usize) -> Self {
        Self {
            high: Queue::new(high_cap),
            normal: Queue::new(normal_cap),
            low: Queue::new(low_cap),
        }
    }

    pub(crate) fn get(&self, priority: Priority) -> &Queue<Job> {
        match priority {
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        }
    }

    pub(crate) fn push(&self, priority: Priority, job: Job) -> Result<(), Error> {
        self.get(priority)
            .push(job)
            .map_err(|_| Error::QueueOverflow { priority })
    }

    pub(crate) fn pop_high(&self) -> Option<Job> {
        self.high.pop()
    }

    pub(crate) fn pop_normal(&self) -> Option<Job> {
        self.normal.pop()
    }

    pub(crate) fn pop_low(&self) -> Option<Job> {
        self.low.pop()
    }
}
