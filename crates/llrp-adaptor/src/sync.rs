// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wait primitives for pump and watchdog threads.
//!
//! - [`CancelToken`]: cooperative stop signal; waiting on it doubles as an
//!   interruptible sleep.
//! - [`WorkQueue`]: multi-producer, single-consumer FIFO with a bounded
//!   blocking pop so a consumer re-checks its token periodically even if a
//!   wake-up is missed.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Safety-net wake-up period for queue consumers.
pub const PUMP_WAKE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct TokenState {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

/// Cooperative cancellation signal shared by one session's threads.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation and wake every waiter.
    pub fn cancel(&self) {
        let mut cancelled = self.state.cancelled.lock();
        *cancelled = true;
        self.state.condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.cancelled.lock()
    }

    /// Sleep up to `timeout`, returning early with `true` once cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.state.cancelled.lock();
        while !*cancelled {
            if self
                .state
                .condvar
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                break;
            }
        }
        *cancelled
    }

    /// Whether both handles refer to the same token.
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

/// Mutex/condvar protected FIFO.
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    condvar: Condvar,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
        }
    }

    /// Append and wake the consumer.
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.condvar.notify_one();
    }

    /// Append only if the queue holds fewer than `limit` items.
    ///
    /// The item is handed back when the queue is saturated.
    pub fn try_push(&self, item: T, limit: usize) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= limit {
            return Err(item);
        }
        items.push_back(item);
        drop(items);
        self.condvar.notify_one();
        Ok(())
    }

    /// Pop the head, waiting at most `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut items = self.items.lock();
        if items.is_empty() {
            let _ = self.condvar.wait_for(&mut items, timeout);
        }
        items.pop_front()
    }

    /// Wake the consumer without adding anything (used on cancellation).
    pub fn wake(&self) {
        self.condvar.notify_all();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_cancel_wakes_waiter() {
        let token = CancelToken::new();
        let t = token.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            t.cancel();
        });

        let start = Instant::now();
        assert!(token.wait_timeout(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_times_out_when_not_cancelled() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(!token.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(19));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_token_identity() {
        let a = CancelToken::new();
        let b = a.clone();
        let c = CancelToken::new();
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }

    #[test]
    fn test_queue_fifo_and_limit() {
        let queue = WorkQueue::new();
        assert!(queue.try_push(1, 2).is_ok());
        assert!(queue.try_push(2, 2).is_ok());
        assert_eq!(queue.try_push(3, 2), Err(3));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), Some(1));
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), Some(2));
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), None);
    }

    #[test]
    fn test_pop_wakes_on_push() {
        let queue = Arc::new(WorkQueue::new());
        let q = Arc::clone(&queue);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            q.push("frame");
        });

        assert_eq!(queue.pop_timeout(Duration::from_secs(5)), Some("frame"));
        handle.join().unwrap();
    }
}
