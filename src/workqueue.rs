//! Deferred work for report queues
//!
//! A [`DeferredWork`] is a function bound to its own worker thread. Code on
//! the delivery path calls [`DeferredWork::schedule`], which only flips a flag
//! under a short lock and wakes the worker; the function itself runs later on
//! the worker thread, where it may block.
//!
//! States follow the usual work-item lifecycle:
//!
//! ```text
//! Idle --schedule--> Pending --worker picks up--> Running --return--> Idle
//!                                         \--schedule while running--> Running+Pending
//! ```
//!
//! There is never more than one execution in flight. Scheduling while an
//! execution is pending is a no-op; scheduling while one is running queues
//! exactly one more run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::error::WorkError;

#[derive(Debug, Default)]
struct WorkState {
    pending: bool,
    running: bool,
    cancelled: bool,
}

struct Shared {
    name: String,
    state: Mutex<WorkState>,
    cond: Condvar,
}

/// A function run on demand by a dedicated worker thread
pub struct DeferredWork {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl DeferredWork {
    /// Spawn the worker thread for `func`
    ///
    /// The thread sleeps until the first [`schedule`](Self::schedule).
    pub fn spawn<F>(name: impl Into<String>, func: F) -> Result<Self, WorkError>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            state: Mutex::new(WorkState::default()),
            cond: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(worker_shared, func))
            .map_err(|source| WorkError::Spawn { name, source })?;

        Ok(Self {
            shared,
            thread_id: handle.thread().id(),
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Request one execution
    ///
    /// Never blocks beyond a short state lock, so it is safe from the
    /// delivery path. Returns false if an execution is already pending or the
    /// work has been cancelled.
    pub fn schedule(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.cancelled || state.pending {
            return false;
        }
        state.pending = true;
        self.shared.cond.notify_all();
        true
    }

    /// Check if an execution is waiting to start
    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().pending
    }

    /// Block until no execution is pending or running
    ///
    /// Returns immediately when called from the worker thread.
    pub fn flush(&self) {
        if std::thread::current().id() == self.thread_id {
            return;
        }
        let mut state = self.shared.state.lock();
        while state.pending || state.running {
            self.shared.cond.wait(&mut state);
        }
    }

    /// Cancel the work and wait for the worker thread to exit
    ///
    /// A pending execution that has not started is discarded; a running one
    /// is waited for. Afterwards `schedule` always returns false. Returns
    /// whether a pending execution was discarded.
    ///
    /// Must not be called from the worker itself: the work is still marked
    /// cancelled, but [`WorkError::CancelFromWorker`] is returned instead of
    /// deadlocking on the join.
    pub fn cancel_sync(&self) -> Result<bool, WorkError> {
        let discarded = {
            let mut state = self.shared.state.lock();
            let discarded = state.pending;
            state.pending = false;
            state.cancelled = true;
            self.shared.cond.notify_all();
            discarded
        };

        if std::thread::current().id() == self.thread_id {
            return Err(WorkError::CancelFromWorker(self.shared.name.clone()));
        }

        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("worker {} exited by panic", self.shared.name);
            }
        }
        if discarded {
            debug!("worker {}: discarded pending run", self.shared.name);
        }
        Ok(discarded)
    }
}

impl Drop for DeferredWork {
    fn drop(&mut self) {
        match self.cancel_sync() {
            Ok(_) => {}
            // Last reference dropped on the worker thread: it sees the
            // cancelled flag and exits on its own.
            Err(WorkError::CancelFromWorker(_)) => {}
            Err(e) => warn!("{}", e),
        }
    }
}

fn worker_loop<F: FnMut()>(shared: Arc<Shared>, mut func: F) {
    debug!("worker {} started", shared.name);
    loop {
        {
            let mut state = shared.state.lock();
            while !state.pending && !state.cancelled {
                shared.cond.wait(&mut state);
            }
            if state.cancelled {
                break;
            }
            state.pending = false;
            state.running = true;
        }

        if catch_unwind(AssertUnwindSafe(&mut func)).is_err() {
            error!("worker {}: work function panicked", shared.name);
        }

        let mut state = shared.state.lock();
        state.running = false;
        shared.cond.notify_all();
    }
    debug!("worker {} exiting", shared.name);
}
