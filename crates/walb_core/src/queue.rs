use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// A blocking FIFO handoff between adjacent pipeline stages.
///
/// Generalizes the teacher's `SpinLock<LogData> + SpinLockCondVar` pair
/// from `fs/log.rs`'s `begin_op`/`end_op`: a kernel spin lock becomes a
/// blocking `std::sync::Mutex` since each stage here is a normal OS
/// thread rather than atomic-context kernel code (Design Notes: "in a
/// portable implementation, shutdown runs in a normal blocking
/// context").
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    cond: Condvar,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        }
    }

    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push_back(item);
        self.cond.notify_one();
    }

    pub fn push_many(&self, items: impl IntoIterator<Item = T>) {
        let mut guard = self.items.lock().unwrap();
        guard.extend(items);
        drop(guard);
        self.cond.notify_all();
    }

    /// Blocks until at least one item is available, then drains up to
    /// `max` of them in FIFO order.
    pub fn pop_batch(&self, max: usize) -> Vec<T> {
        let mut guard = self.items.lock().unwrap();
        while guard.is_empty() {
            guard = self.cond.wait(guard).unwrap();
        }
        let n = guard.len().min(max);
        guard.drain(..n).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn pop_batch_respects_max_and_fifo_order() {
        let q = WorkQueue::new();
        q.push_many(1..=5);
        let batch = q.pop_batch(3);
        assert_eq!(batch, vec![1, 2, 3]);
        let rest = q.pop_batch(10);
        assert_eq!(rest, vec![4, 5]);
    }

    #[test]
    fn pop_batch_blocks_until_pushed() {
        let q = Arc::new(WorkQueue::new());
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.pop_batch(10));
        thread::sleep(std::time::Duration::from_millis(20));
        q.push(42);
        let batch = handle.join().unwrap();
        assert_eq!(batch, vec![42]);
    }
}
