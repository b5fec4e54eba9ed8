//! A bounded, lock-free multi-producer multi-consumer queue.
//!
//! This is Dmitry Vyukov's [bounded MPMC queue][vyukov]: a fixed-size ring
//! buffer where each slot carries its own sequence counter, so producers and
//! consumers only ever contend on a single slot at a time instead of the
//! whole buffer.
//!
//! [vyukov]: http://www.1024cores.net/home/lock-free-algorithms/queues/bounded-mpmc-queue

#![cfg_attr(not(any(test, loom)), no_std)]

extern crate alloc;

mod loom;

use crate::loom::UnsafeCell;
use crate::loom::atomic::{AtomicUsize, Ordering};
use alloc::boxed::Box;
use core::fmt;
use core::mem::MaybeUninit;
use crossbeam_utils::CachePadded;

struct Cell<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded MPMC queue holding up to `capacity` elements of type `T`.
///
/// `capacity` is fixed at construction and must be a power of two. Both
/// [`push`](Queue::push) and [`pop`](Queue::pop) are lock-free: a thread
/// preempted mid-operation never blocks another thread's progress on a
/// different slot.
pub struct Queue<T> {
    buffer: CachePadded<Box<[Cell<T>]>>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

impl<T> Queue<T> {
    /// Creates a new queue with room for exactly `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two, or is less than 2.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity >= 2,
            "mpmc::Queue capacity must be a power of two >= 2, got {capacity}"
        );

        let buffer = (0..capacity)
            .map(|i| Cell {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Box<[_]>>();

        Self {
            buffer: CachePadded::new(buffer),
            mask: capacity - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the queue's fixed capacity.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Attempts to push `value` onto the queue.
    ///
    /// Returns `Err(value)` if the queue is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        let cell = loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                if self
                    .enqueue_pos
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    break cell;
                }
            } else if diff < 0 {
                return Err(value);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        };

        cell.value.with_mut(|slot| unsafe {
            (*slot).write(value);
        });
        cell.sequence.store(pos + 1, Ordering::Release);

        Ok(())
    }

    /// Attempts to pop a value from the queue.
    ///
    /// Returns `None` if the queue is empty.
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        let cell = loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - (pos + 1) as isize;

            if diff == 0 {
                if self
                    .dequeue_pos
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    break cell;
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        };

        let value = cell.value.with(|slot| unsafe { (*slot).assume_init_read() });
        cell.sequence.store(pos + self.mask + 1, Ordering::Release);

        Some(value)
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

// Safety: a `Cell<T>` moves `T` values between threads on push/pop, never
// sharing a `&T` across threads; `Sync` only requires that `&Queue<T>` (used
// concurrently by every producer/consumer) be safe to share, which holds
// whenever `T` is safe to send.
unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}


#[cfg(loom)]
mod loom_tests {
    use super::Queue;
    use loom::sync::Arc;
    use loom::thread;

    #[test]
    fn two_producers_two_consumers() {
        loom::model(|| {
            let q = Arc::new(Queue::<usize>::new(2));

            let producers: Vec<_> = (0..2)
                .map(|i| {
                    let q = q.clone();
                    thread::spawn(move || {
                        while q.push(i).is_err() {
                            thread::yield_now();
                        }
                    })
                })
                .collect();

            let consumers: Vec<_> = (0..2)
                .map(|_| {
                    let q = q.clone();
                    thread::spawn(move || {
                        loop {
                            if q.pop().is_some() {
                                return;
                            }
                            thread::yield_now();
                        }
                    })
                })
                .collect();

            for p in producers {
                p.join().unwrap();
            }
            for c in consumers {
                c.join().unwrap();
            }
        });
    }

    #[test]
    fn single_slot_handoff_is_exclusive() {
        loom::model(|| {
            let q = Arc::new(Queue::<usize>::new(2));
            q.push(0).unwrap();

            let q2 = q.clone();
            let t = thread::spawn(move || q2.pop());

            let popped_here = q.pop();
            let popped_there = t.join().unwrap();

            // Exactly one of the two pops observes the value; the other sees
            // an empty queue.
            assert_eq!(
                popped_here.is_some() as u8 + popped_there.is_some() as u8,
                1
            );
        });
    }
}
