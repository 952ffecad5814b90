use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Fixed-capacity FIFO between event producers and the drain loop.
///
/// `enqueue` never blocks and silently drops the item when the queue is
/// full — the caller's request path is favored over delivery completeness.
/// `dequeue` never blocks either and returns `None` on an empty queue.
///
/// Safe for concurrent producers and a single consumer.
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue. Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be greater than 0");
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Puts `item` at the tail of the queue.
    ///
    /// Returns `false` when the queue is at capacity and the item was
    /// dropped. Queue-full is a drop policy, not an error condition.
    pub fn enqueue(&self, item: T) -> bool {
        let mut items = self.lock();
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(item);
        true
    }

    /// Removes and returns the head of the queue, or `None` when empty.
    pub fn dequeue(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Reports whether a `dequeue` would currently yield an item.
    pub fn has_next(&self) -> bool {
        self.len() > 0
    }

    /// Current number of queued items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Reports whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity fixed at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // The queue holds the lock only for push/pop; a poisoned mutex cannot
    // leave the deque in a broken state, so recover instead of propagating.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
