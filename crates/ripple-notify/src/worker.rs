//! Work queue feeding the calculator thread.
//!
//! A condition-variable-protected FIFO of pending change computations. The
//! per-coordinator transaction callbacks are the producers (commit threads);
//! the single calculator thread is the only consumer. Pushing is cheap by
//! contract: commit callbacks do nothing heavier than taking this lock.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use ripple_store::{Database, VersionId};

/// One pending change computation.
///
/// The handle is pinned at the version the change starts from; the job is
/// consumed exactly once by the calculator.
pub(crate) struct Job {
    /// Handle pinned at the from-version; handed to the consumer as the old
    /// side of the resulting notification.
    pub database: Database,
    /// Version to advance to.
    pub target_version: VersionId,
}

struct WorkState {
    queue: VecDeque<Job>,
    shutdown: bool,
}

/// Thread-safe FIFO with shutdown.
pub(crate) struct WorkQueue {
    state: Mutex<WorkState>,
    cv: Condvar,
}

impl WorkQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(WorkState {
                queue: VecDeque::new(),
                shutdown: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Enqueues a job and wakes the calculator.
    pub(crate) fn push(&self, job: Job) {
        let mut state = self.state.lock();
        state.queue.push_back(job);
        self.cv.notify_one();
    }

    /// Blocks until a job is available or shutdown is requested.
    ///
    /// Returns `None` on shutdown; queued jobs are discarded.
    pub(crate) fn next(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(job) = state.queue.pop_front() {
                return Some(job);
            }
            self.cv.wait(&mut state);
        }
    }

    /// Requests shutdown and wakes all waiters.
    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.cv.notify_all();
    }
}
