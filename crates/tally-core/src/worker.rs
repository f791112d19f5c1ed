//! Background update worker
//!
//! One [`UpdateWorker`] serves one asynchronous stat. Jobs arrive over an
//! unbounded channel and are handled strictly in order, so a rescan queued
//! after an incremental update always runs after it. In `OnTimer` mode an idle
//! period of `timer_period` counts as an update request.

use crate::error::{Result, StatError};
use crate::stat::StatShared;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Unit of work for an update worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Job {
    /// Apply queued per-record updates
    Update,
    /// Recompute every field from the store
    Rescan,
    /// Finish queued work, then exit
    Shutdown,
}

/// Handle to a running worker thread
#[derive(Debug)]
pub(crate) struct UpdateWorker {
    jobs: Sender<Job>,
    handle: Option<JoinHandle<()>>,
}

impl UpdateWorker {
    /// Start a worker for the given stat
    pub(crate) fn spawn(shared: Arc<StatShared>) -> Result<Self> {
        let (jobs, inbox) = channel::unbounded();
        let name = format!("tally-stat-{}", shared.name());
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run(&shared, &inbox))
            .map_err(|e| StatError::Internal(format!("failed to spawn update worker: {e}")))?;

        Ok(Self {
            jobs,
            handle: Some(handle),
        })
    }

    /// Sender for scheduling jobs
    pub(crate) fn sender(&self) -> Sender<Job> {
        self.jobs.clone()
    }

    /// Let queued jobs drain, then stop the thread and wait for it
    pub(crate) fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // a closed channel also stops the loop
        let _ = self.jobs.send(Job::Shutdown);
        if handle.thread().id() == thread::current().id() {
            // dropped from inside a job; the loop exits on its own
            return;
        }
        if handle.join().is_err() {
            tracing::error!("Update worker panicked");
        }
    }
}

impl Drop for UpdateWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: &StatShared, inbox: &Receiver<Job>) {
    tracing::debug!("Update worker for stat '{}' started", shared.name());
    loop {
        let job = match shared.tick_period() {
            Some(period) => match inbox.recv_timeout(period) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) => Job::Update,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match inbox.recv() {
                Ok(job) => job,
                Err(_) => break,
            },
        };

        match job {
            Job::Update => shared.process(false),
            Job::Rescan => shared.process(true),
            Job::Shutdown => break,
        }
    }
    tracing::debug!("Update worker for stat '{}' stopped", shared.name());
    shared.wake_waiters();
}
