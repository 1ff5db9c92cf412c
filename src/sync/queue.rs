use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Fixed-capacity FIFO safe for concurrent producers and consumers.
///
/// `push` blocks while the queue is full, `pop` blocks while it is empty.
/// Waiters are signalled per predicate (not-empty / not-full); strict FIFO
/// fairness between waiters is not guaranteed.
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        BoundedQueue {
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Appends an item, blocking while the queue is at capacity.
    pub fn push(&self, item: T) {
        let mut items = self.lock();
        while items.len() >= self.capacity {
            items = self
                .not_full
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }
        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
    }

    /// Removes the oldest item, blocking while the queue is empty.
    pub fn pop(&self) -> T {
        let mut items = self.lock();
        loop {
            if let Some(item) = items.pop_front() {
                drop(items);
                self.not_full.notify_one();
                return item;
            }
            items = self
                .not_empty
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Removes the oldest item if one is present, without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.lock().pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Like `pop`, but gives up after `timeout` with `None`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut items = self.lock();
        loop {
            if let Some(item) = items.pop_front() {
                drop(items);
                self.not_full.notify_one();
                return Some(item);
            }
            let (guard, result) = self
                .not_empty
                .wait_timeout(items, timeout)
                .unwrap_or_else(PoisonError::into_inner);
            items = guard;
            if result.timed_out() {
                let item = items.pop_front();
                drop(items);
                if item.is_some() {
                    self.not_full.notify_one();
                }
                return item;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn pops_in_fifo_order() {
        let queue = BoundedQueue::new(8);
        for i in 0..5 {
            queue.push(i);
        }
        for i in 0..5 {
            assert_eq!(queue.pop(), i);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn push_blocks_at_capacity() {
        let queue = Arc::new(BoundedQueue::new(2));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..20 {
                    queue.push(i);
                }
            })
        };

        let mut popped = Vec::new();
        while popped.len() < 20 {
            max_seen.fetch_max(queue.len(), Ordering::Relaxed);
            if let Some(item) = queue.pop_timeout(Duration::from_secs(5)) {
                popped.push(item);
            } else {
                panic!("producer stalled");
            }
        }
        producer.join().unwrap();

        assert!(max_seen.load(Ordering::Relaxed) <= 2);
        assert_eq!(popped, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn pop_blocks_until_item_arrives() {
        let queue = Arc::new(BoundedQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(50));
        queue.push(42);
        assert_eq!(consumer.join().unwrap(), 42);
    }

    #[test]
    fn try_pop_never_blocks() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(1);
        assert_eq!(queue.try_pop(), None);
        queue.push(7);
        assert_eq!(queue.try_pop(), Some(7));
    }

    #[test]
    fn pop_timeout_expires_on_empty_queue() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(1);
        assert_eq!(queue.pop_timeout(Duration::from_millis(20)), None);
    }
}
