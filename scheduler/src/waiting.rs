use crate::Task;
use mpmc::Queue;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::ThreadId;

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Vacant = 0,
    Updating = 1,
    Filled = 2,
}

pub(crate) struct WaitingEntry {
    pub(crate) task: *const dyn Task,
    pub(crate) fiber_index: usize,
    /// If set, only the worker running on this OS thread may resume the
    /// waiter; used when a caller pins itself via [`crate::wait_until`] from
    /// a context that must not migrate threads. Currently always `None`;
    /// reserved for a future thread-pinned variant of `wait_until`.
    pub(crate) thread_id: Option<ThreadId>,
}

struct Slot {
    state: AtomicU8,
    entry: UnsafeCell<Option<WaitingEntry>>,
}

// Safety: `entry` is only touched while the owning thread holds the
// Vacant->Filled write side (the slot was just claimed from `vacant`, so no
// other thread observes it yet) or has won the Filled->Updating CAS on the
// read side; both sides serialize through `state`.
unsafe impl Sync for Slot {}

/// Table of in-flight [`crate::wait_until`] calls, scanned by every worker
/// looking for a task that has completed since it last checked.
pub(crate) struct WaitingTable {
    slots: Box<[Slot]>,
    vacant: Queue<u32>,
}

impl WaitingTable {
    pub(crate) fn new(count: usize) -> Self {
        let slots = (0..count)
            .map(|_| Slot {
                state: AtomicU8::new(SlotState::Vacant as u8),
                entry: UnsafeCell::new(None),
            })
            .collect::<Box<[_]>>();

        let vacant = Queue::new(count.max(2).next_power_of_two());
        for i in 0..count {
            vacant.push(i as u32).expect("freshly sized vacant queue");
        }

        Self { slots, vacant }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Claims a free slot, spinning until one is available, and fills it with
    /// `entry`. Returns the claimed slot index.
    pub(crate) fn fill(&self, entry: WaitingEntry) -> usize {
        let index = loop {
            if let Some(index) = self.vacant.pop() {
                break index as usize;
            }
            std::hint::spin_loop();
        };

        let slot = &self.slots[index];
        debug_assert_eq!(slot.state.load(Ordering::Relaxed), SlotState::Vacant as u8);

        // Safety: this slot was just popped off `vacant`, so no other thread
        // holds a reference to it until the `Release` store below publishes it.
        unsafe {
            *slot.entry.get() = Some(entry);
        }
        slot.state.store(SlotState::Filled as u8, Ordering::Release);

        index
    }

    /// Scans the table once, resuming the first fiber whose task has
    /// completed (and is viable on this thread). Returns the index of the
    /// freed slot and the fiber that should be resumed, if any.
    pub(crate) fn poll(&self, current_thread: ThreadId) -> Option<(usize, usize)> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot
                .state
                .compare_exchange(
                    SlotState::Filled as u8,
                    SlotState::Updating as u8,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_err()
            {
                continue;
            }

            // Safety: we just won the Filled->Updating transition, so we
            // have exclusive access to `entry` until we store a new state.
            let entry_ref = unsafe { &*slot.entry.get() };
            let entry = entry_ref.as_ref().expect("Filled slot has an entry");

            let thread_viable = entry.thread_id.is_none_or(|id| id == current_thread);
            // Safety: `task` remains valid for as long as the waiting fiber
            // has not been resumed, which is exactly the condition this
            // function is deciding.
            let complete = thread_viable && unsafe { &*entry.task }.status() == crate::TaskStatus::Complete;

            if complete {
                let fiber_index = entry.fiber_index;
                // Safety: exclusive access, as above.
                unsafe {
                    *slot.entry.get() = None;
                }
                slot.state.store(SlotState::Vacant as u8, Ordering::Release);
                self.vacant
                    .push(index as u32)
                    .expect("slot count matches vacant queue capacity");
                return Some((index, fiber_index));
            }

            slot.state.store(SlotState::Filled as u8, Ordering::Release);
        }

        None
    }
}
