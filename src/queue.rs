//! Waitable queue connecting the parse worker to the consuming thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

/// How many queued items it takes before waiters are woken. Batching the
/// wakeups keeps the consumer from thrashing the condvar on every row.
const NOTIFY_SIZE: usize = 100;

/// An unbounded deque that a producer pushes to while consumers wait.
///
/// Mutations go through an internal mutex; the `empty` and `waitable` flags
/// are lock-free atomics so the consumer's polling fast path never contends
/// with the producer. `waitable` must be raised *before* the producer thread
/// starts, otherwise a consumer can observe "not waitable and empty" right
/// after spawn and wrongly conclude exhaustion.
pub(crate) struct WaitDeque<T> {
    data: Mutex<VecDeque<T>>,
    cond: Condvar,
    is_empty: AtomicBool,
    is_waitable: AtomicBool,
    notify_size: usize,
}

impl<T> Default for WaitDeque<T> {
    fn default() -> Self {
        WaitDeque {
            data: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            is_empty: AtomicBool::new(true),
            is_waitable: AtomicBool::new(false),
            notify_size: NOTIFY_SIZE,
        }
    }
}

impl<T> WaitDeque<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Lock-free emptiness check.
    pub(crate) fn empty(&self) -> bool {
        self.is_empty.load(Ordering::Acquire)
    }

    /// Whether a producer is actively pushing.
    pub(crate) fn is_waitable(&self) -> bool {
        self.is_waitable.load(Ordering::Acquire)
    }

    pub(crate) fn push_back(&self, item: T) {
        let mut data = self.data.lock();
        data.push_back(item);
        self.is_empty.store(false, Ordering::Release);
        if data.len() >= self.notify_size {
            self.cond.notify_all();
        }
    }

    pub(crate) fn pop_front(&self) -> Option<T> {
        let mut data = self.data.lock();
        let item = data.pop_front();
        if data.is_empty() {
            self.is_empty.store(true, Ordering::Release);
        }
        item
    }

    pub(crate) fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Block until the queue fills past the notify threshold or the producer
    /// stops. Returns immediately if no producer is active.
    pub(crate) fn wait(&self) {
        if !self.is_waitable() {
            return;
        }
        let mut data = self.data.lock();
        while data.len() < self.notify_size && self.is_waitable() {
            self.cond.wait(&mut data);
        }
    }

    /// Announce that a producer is about to push.
    pub(crate) fn start_waiters(&self) {
        self.is_waitable.store(true, Ordering::Release);
        let _guard = self.data.lock();
        self.cond.notify_all();
    }

    /// Announce that the producer is done; wakes every waiter.
    pub(crate) fn stop_waiters(&self) {
        self.is_waitable.store(false, Ordering::Release);
        let _guard = self.data.lock();
        self.cond.notify_all();
    }

    /// Move everything out of `other` into `self`, preserving order.
    pub(crate) fn append_from(&self, other: &WaitDeque<T>) {
        let mut src = other.data.lock();
        if src.is_empty() {
            return;
        }
        let mut dst = self.data.lock();
        dst.extend(src.drain(..));
        other.is_empty.store(true, Ordering::Release);
        self.is_empty.store(false, Ordering::Release);
        if dst.len() >= self.notify_size {
            self.cond.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fifo_order() {
        let q = WaitDeque::new();
        assert!(q.empty());
        q.push_back(1);
        q.push_back(2);
        q.push_back(3);
        assert!(!q.empty());
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop_front(), Some(1));
        assert_eq!(q.pop_front(), Some(2));
        assert_eq!(q.pop_front(), Some(3));
        assert!(q.empty());
        assert_eq!(q.pop_front(), None);
    }

    #[test]
    fn wait_returns_when_producer_stops() {
        let q: Arc<WaitDeque<u32>> = Arc::new(WaitDeque::new());
        q.start_waiters();
        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                for i in 0..10 {
                    q.push_back(i);
                }
                q.stop_waiters();
            })
        };
        // Either we wake on the threshold or on stop; both mean progress.
        q.wait();
        producer.join().unwrap();
        assert!(!q.is_waitable());
        let mut seen = Vec::new();
        while let Some(v) = q.pop_front() {
            seen.push(v);
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn append_from_drains_in_order() {
        let staging = WaitDeque::new();
        let out = WaitDeque::new();
        staging.push_back("a");
        staging.push_back("b");
        out.push_back("x");
        out.append_from(&staging);
        assert!(staging.empty());
        assert_eq!(out.pop_front(), Some("x"));
        assert_eq!(out.pop_front(), Some("a"));
        assert_eq!(out.pop_front(), Some("b"));
    }
}
