//! A start/stop-gated producer-consumer queue: `push` never blocks, `pop`
//! blocks until an item is available or the queue is stopped.
//!
//! Grounded on `common/blocking_queue.h`: a mutex-and-condvar-guarded
//! `VecDeque` with a `started` flag. `pop` wakes on every `push`/`stop` and
//! only returns `None` once the queue is both stopped and drained --
//! items pushed before a `stop()` are still delivered to `pop`.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct State<T> {
    started: bool,
    items: VecDeque<T>,
}

pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        BlockingQueue {
            state: Mutex::new(State { started: true, items: VecDeque::new() }),
            cond: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn start(&self) {
        let mut state = self.state.lock();
        state.started = true;
    }

    /// Stops the queue and wakes every blocked `pop`. Items already queued
    /// are still popped afterward; `pop` only starts returning `None` once
    /// the queue is both stopped and empty.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.started {
            state.started = false;
            self.cond.notify_all();
        }
    }

    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        state.items.push_back(item);
        self.cond.notify_one();
    }

    /// Blocks until an item is available, returning `None` once stopped
    /// and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if !state.started {
                return None;
            }
            self.cond.wait(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn push_then_pop_returns_in_fifo_order() {
        let q: BlockingQueue<i32> = BlockingQueue::new();
        q.push(1);
        q.push(2);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
    }

    #[test]
    fn pop_blocks_until_pushed_from_another_thread() {
        let q = Arc::new(BlockingQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q2.push(42);
        });
        assert_eq!(q.pop(), Some(42));
        handle.join().unwrap();
    }

    #[test]
    fn stop_wakes_blocked_pop_with_none_once_drained() {
        let q = Arc::new(BlockingQueue::<i32>::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q2.stop();
        });
        assert_eq!(q.pop(), None);
        handle.join().unwrap();
    }

    #[test]
    fn stopped_queue_still_delivers_queued_items() {
        let q: BlockingQueue<i32> = BlockingQueue::new();
        q.push(1);
        q.stop();
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), None);
    }
}
