//! Bounded multi-producer, single-consumer priority queue

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::{Event, Priority};

/// One FIFO lane per priority, drained highest first
///
/// Priority is strict: while higher lanes hold events, lower lanes wait.
/// Arrival order is kept within a lane. Capacity counts all lanes together.
#[derive(Debug)]
pub struct PriorityEventQueue {
    capacity: usize,
    lanes: Mutex<[VecDeque<Event>; 3]>,
    available: Notify,
}

impl PriorityEventQueue {
    /// Create a queue holding at most `capacity` events
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lanes: Mutex::new(Default::default()),
            available: Notify::new(),
        }
    }

    fn lanes(&self) -> MutexGuard<'_, [VecDeque<Event>; 3]> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue without blocking; `false` means the queue is full
    ///
    /// Callable from any thread, async or not.
    pub fn offer(&self, event: Event) -> bool {
        {
            let mut lanes = self.lanes();
            let len: usize = lanes.iter().map(VecDeque::len).sum();
            if len >= self.capacity {
                return false;
            }
            lanes[event.priority.index()].push_back(event);
        }
        self.available.notify_one();
        true
    }

    /// Dequeue the next event if one is ready
    pub fn try_take(&self) -> Option<Event> {
        let mut lanes = self.lanes();
        Priority::ALL
            .iter()
            .find_map(|p| lanes[p.index()].pop_front())
    }

    /// Wait for and dequeue the next event
    ///
    /// Intended for a single consumer.
    pub async fn take(&self) -> Event {
        loop {
            if let Some(event) = self.try_take() {
                return event;
            }
            self.available.notified().await;
        }
    }

    /// Number of queued events
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes().iter().map(VecDeque::len).sum()
    }

    /// Whether no events are queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued events
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
