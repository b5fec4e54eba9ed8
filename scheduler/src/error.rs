use crate::Priority;

/// Errors returned by the scheduler's public API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// [`SchedulerConfig`](crate::SchedulerConfig) failed validation.
    #[error("invalid scheduler configuration: {reason}")]
    InvalidConfiguration {
        /// Human-readable description of which constraint was violated.
        reason: String,
    },

    /// A resource allocation (a stack, a queue's backing buffer) failed.
    #[error("out of memory while initializing the scheduler")]
    OutOfMemory,

    /// [`enqueue`](crate::enqueue) was called against a full priority queue.
    #[error("job queue for {priority:?} priority is full")]
    QueueOverflow {
        /// The priority queue that was full.
        priority: Priority,
    },
}

impl From<std::io::Error> for Error {
    fn from(_: std::io::Error) -> Self {
        Error::OutOfMemory
    }
}
