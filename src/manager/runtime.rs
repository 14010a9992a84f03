//! Bounded thread-based runtime for the rule manager.
//!
//! Independent events may be dispatched in parallel; the lifecycle manager
//! serializes writes to the same inferred relationship. Jobs are queued on a
//! bounded channel and a full queue is reported instead of blocking.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::{ExecutionError, InferenceError, InferenceResult};
use crate::event::RelationshipEvent;
use crate::relationship::{ChangeEvent, ElementId};

use super::RuleManager;

type Reply = Sender<InferenceResult<Vec<ChangeEvent>>>;

enum Job {
    Dispatch { event: RelationshipEvent, reply: Reply },
    Retract { deleted: ElementId, reply: Reply },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(config: &RuntimeConfig, manager: &Arc<RuleManager>) -> InferenceResult<Self> {
        let workers = config.workers.max(1);
        let queue_capacity = config.queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let manager = Arc::clone(manager);
            let handle = thread::Builder::new()
                .name(format!("stixrule-dispatch-{idx}"))
                .spawn(move || run_worker(&rx, &manager))
                .map_err(|e| InferenceError::internal(format!("failed to spawn dispatch worker: {e}")))?;
            handles.push(handle);
        }

        debug!(workers, queue_capacity, "rule runtime started");
        Ok(Self {
            tx,
            workers: handles,
            queue_capacity,
        })
    }

    fn try_submit(&self, job: Job) -> InferenceResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(capacity = self.queue_capacity, "dispatch queue full");
                Err(ExecutionError::QueueFull {
                    capacity: self.queue_capacity,
                }
                .into())
            }
            Err(TrySendError::Disconnected(_)) => Err(ExecutionError::Disconnected.into()),
        }
    }

    fn shutdown(self) {
        // Workers drain queued jobs, then see the closed channel.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

fn run_worker(rx: &Receiver<Job>, manager: &RuleManager) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Dispatch { event, reply } => {
                let _ = reply.send(manager.dispatch_cascading(&event));
            }
            Job::Retract { deleted, reply } => {
                let _ = reply.send(manager.retract(&deleted));
            }

            #[cfg(test)]
            Job::Sleep { duration, reply } => {
                thread::sleep(duration);
                let _ = reply.send(());
            }
        }
    }
}

/// Pending result of a submitted job.
#[derive(Debug)]
pub struct DispatchHandle {
    rx: Receiver<InferenceResult<Vec<ChangeEvent>>>,
}

impl DispatchHandle {
    /// Waits for the job to complete.
    ///
    /// # Errors
    ///
    /// Returns the job's own error, or `Disconnected` if the worker died.
    pub fn join(self) -> InferenceResult<Vec<ChangeEvent>> {
        self.rx
            .recv()
            .map_err(|_| InferenceError::Execution(ExecutionError::Disconnected))?
    }

    /// Waits for the job to complete with a timeout.
    ///
    /// # Errors
    ///
    /// As [`DispatchHandle::join`], plus `Timeout` when `timeout` elapses.
    pub fn join_timeout(self, timeout: Duration) -> InferenceResult<Vec<ChangeEvent>> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => InferenceError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => InferenceError::Execution(ExecutionError::Disconnected),
        })?
    }
}

/// Runs a [`RuleManager`] on a pool of worker threads.
pub struct RuleRuntime {
    manager: Arc<RuleManager>,
    pool: Option<WorkerPool>,
}

impl std::fmt::Debug for RuleRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRuntime")
            .field("manager", &self.manager)
            .field("workers", &self.pool.as_ref().map_or(0, |p| p.workers.len()))
            .finish()
    }
}

impl RuleRuntime {
    /// Starts the worker pool.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a worker thread cannot be spawned.
    pub fn start(manager: RuleManager, config: &RuntimeConfig) -> InferenceResult<Self> {
        let manager = Arc::new(manager);
        let pool = WorkerPool::start(config, &manager)?;
        Ok(Self {
            manager,
            pool: Some(pool),
        })
    }

    /// Queues an event for cascading dispatch.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` when the queue is at capacity.
    pub fn submit(&self, event: RelationshipEvent) -> InferenceResult<DispatchHandle> {
        let (reply, rx) = bounded(1);
        self.pool()?.try_submit(Job::Dispatch { event, reply })?;
        Ok(DispatchHandle { rx })
    }

    /// Queues the retraction of a deleted element.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` when the queue is at capacity.
    pub fn submit_retract(&self, deleted: ElementId) -> InferenceResult<DispatchHandle> {
        let (reply, rx) = bounded(1);
        self.pool()?.try_submit(Job::Retract { deleted, reply })?;
        Ok(DispatchHandle { rx })
    }

    /// Dispatches an event and waits for the result.
    ///
    /// # Errors
    ///
    /// See [`RuleRuntime::submit`] and [`DispatchHandle::join`].
    pub fn dispatch(&self, event: RelationshipEvent) -> InferenceResult<Vec<ChangeEvent>> {
        self.submit(event)?.join()
    }

    /// The manager shared by the workers.
    #[must_use]
    pub fn manager(&self) -> &RuleManager {
        &self.manager
    }

    fn pool(&self) -> InferenceResult<&WorkerPool> {
        self.pool
            .as_ref()
            .ok_or(InferenceError::Execution(ExecutionError::Disconnected))
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> InferenceResult<Receiver<()>> {
        let (reply, rx) = bounded::<()>(1);
        self.pool()?.try_submit(Job::Sleep { duration, reply })?;
        Ok(rx)
    }
}

impl Drop for RuleRuntime {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}
