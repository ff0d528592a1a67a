//! A fixed-size pool of worker threads draining a shared task queue.
//!
//! Grounded on `common/thread_pool.{h,cc}`: `post` pushes a closure onto
//! the *front* of the task queue, and each worker pops from the front too,
//! so tasks queued while every worker is busy drain in LIFO order once a
//! worker frees up (most-recently-posted first). `run` posts one closure
//! (or a batch) and blocks the calling thread on a wait-token condvar
//! until every posted closure has completed -- the synchronous
//! "run-on-the-pool-and-wait" counterpart to the fire-and-forget `post`.
//! `stop` lets every worker thread drain whatever remains queued before
//! it exits, so a `stop()` right after a burst of `post()`s still runs
//! all of them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    state: Mutex<PoolState>,
    cond: Condvar,
}

struct PoolState {
    started: bool,
    tasks: VecDeque<Task>,
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                if let Some(task) = state.tasks.pop_front() {
                    break Some(task);
                }
                if !state.started {
                    break None;
                }
                shared.cond.wait(&mut state);
            }
        };
        match task {
            Some(task) => task(),
            None => break,
        }
    }

    // drain whatever is still queued before this worker truly exits, so a
    // stop() racing a burst of post()s doesn't drop tasks.
    loop {
        let task = {
            let mut state = shared.state.lock();
            state.tasks.pop_front()
        };
        match task {
            Some(task) => task(),
            None => break,
        }
    }
}

/// A wait token one `run` call uses to block until its posted closure(s)
/// finish, mirroring `ThreadPool::wait_token_t`.
struct WaitToken {
    remain: Mutex<usize>,
    cond: Condvar,
}

impl WaitToken {
    fn new(remain: usize) -> Self {
        WaitToken { remain: Mutex::new(remain), cond: Condvar::new() }
    }

    fn complete_one(&self) {
        let mut remain = self.remain.lock();
        *remain -= 1;
        if *remain == 0 {
            self.cond.notify_all();
        }
    }

    fn wait(&self) {
        let mut remain = self.remain.lock();
        while *remain > 0 {
            self.cond.wait(&mut remain);
        }
    }
}

pub struct ThreadPool {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPool {
    pub fn new() -> Self {
        ThreadPool {
            shared: Arc::new(Shared { state: Mutex::new(PoolState { started: false, tasks: VecDeque::new() }), cond: Condvar::new() }),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn started(&self) -> bool {
        self.shared.state.lock().started
    }

    /// Spawns `n` worker threads. A no-op if already started.
    pub fn start(&self, n: usize) {
        let mut state = self.shared.state.lock();
        if state.started {
            return;
        }
        state.started = true;
        drop(state);

        let mut threads = self.threads.lock();
        for _ in 0..n {
            let shared = self.shared.clone();
            threads.push(std::thread::spawn(move || worker_loop(shared)));
        }
    }

    /// Stops accepting new waits, wakes every worker, and joins them once
    /// they've drained the remaining queue.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.started = false;
        }
        self.shared.cond.notify_all();

        let mut threads = self.threads.lock();
        for thread in threads.drain(..) {
            let _ = thread.join();
        }
    }

    /// Queues `task` to run on the next free worker; does not block.
    /// Panics if the pool has not been started, matching the debug-assert
    /// in the original.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        assert!(self.started(), "post: the thread pool is not started");
        let mut state = self.shared.state.lock();
        state.tasks.push_front(Box::new(task));
        self.shared.cond.notify_one();
    }

    /// Posts `task` and blocks the calling thread until it has run.
    pub fn run(&self, task: impl FnOnce() + Send + 'static) {
        let token = Arc::new(WaitToken::new(1));
        let token2 = token.clone();
        self.post(move || {
            task();
            token2.complete_one();
        });
        token.wait();
    }

    /// Posts every closure in `tasks` and blocks until all of them have
    /// run (they may run concurrently across workers).
    pub fn run_all(&self, tasks: Vec<Box<dyn FnOnce() + Send + 'static>>) {
        let token = Arc::new(WaitToken::new(tasks.len()));
        for task in tasks {
            let token2 = token.clone();
            self.post(move || {
                task();
                token2.complete_one();
            });
        }
        token.wait();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}
