//! Fixed-size worker pool with a bounded, blocking admission queue.
//!
//! Workers are dedicated OS threads, each with its own single-threaded tokio
//! runtime driving task invocation. The admission queue is a bounded
//! crossbeam channel; a saturated queue blocks the submitting thread until a
//! worker frees a slot. Nothing is ever rejected or dropped: blocking the
//! producer is the backpressure discipline.
//!
//! Every task outcome, success or failure, is delivered on the completion
//! channel. Worker panics are caught and surfaced the same way; no failure
//! is swallowed inside a worker thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::core::error::JobError;
use crate::core::task::Task;

/// One completed item's outcome, delivered on the completion channel.
#[derive(Debug)]
pub struct Completion {
    /// The work item the task was bound to.
    pub item: String,
    /// Result text, or the task's failure.
    pub outcome: Result<String, JobError>,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Currently executing tasks.
    pub active_tasks: u64,
    /// Tasks admitted but not yet started.
    pub queued_tasks: u64,
    /// Tasks completed successfully.
    pub completed_tasks: u64,
    /// Tasks that failed.
    pub failed_tasks: u64,
    /// Tasks submitted in total.
    pub submitted_tasks: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_tasks: AtomicU64,
    pub queued_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub failed_tasks: AtomicU64,
    pub submitted_tasks: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            queued_tasks: self.queued_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
        }
    }
}

struct QueuedTask {
    item: String,
    task: Box<dyn Task>,
}

/// Fixed worker pool for one job run.
///
/// The pool size and queue capacity are fixed for the job's duration.
pub struct WorkerPool {
    worker_count: usize,
    /// Admission sender. Option allows shutdown by dropping.
    task_tx: Mutex<Option<Sender<QueuedTask>>>,
    /// Completion receiver handed to the monitor.
    completion_rx: Receiver<Completion>,
    counters: Arc<PoolCounters>,
    /// Set on abort; workers drop queued-but-unstarted tasks and exit.
    aborted: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers behind a queue of `queue_capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Configuration`] for a zero worker count or queue
    /// capacity, and [`JobError::Internal`] if a worker thread cannot spawn.
    pub fn new(worker_count: usize, queue_capacity: usize) -> Result<Self, JobError> {
        if worker_count == 0 {
            return Err(JobError::Configuration("worker count must be > 0".into()));
        }
        if queue_capacity == 0 {
            return Err(JobError::Configuration("queue capacity must be > 0".into()));
        }

        let (task_tx, task_rx) = bounded::<QueuedTask>(queue_capacity);
        let (completion_tx, completion_rx) = unbounded::<Completion>();
        let counters = Arc::new(PoolCounters::default());
        let aborted = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            workers.push(spawn_worker(
                worker_id,
                task_rx.clone(),
                completion_tx.clone(),
                Arc::clone(&counters),
                Arc::clone(&aborted),
            )?);
        }

        info!(worker_count, queue_capacity, "worker pool started");

        Ok(Self {
            worker_count,
            task_tx: Mutex::new(Some(task_tx)),
            completion_rx,
            counters,
            aborted,
            workers: Mutex::new(workers),
        })
    }

    /// Admit one task, blocking while the queue is saturated.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Internal`] once the pool has been shut down or
    /// all workers have exited.
    pub fn submit(&self, item: &str, task: Box<dyn Task>) -> Result<(), JobError> {
        if self.aborted.load(Ordering::Acquire) {
            return Err(JobError::Internal("pool is shut down".into()));
        }
        // Clone the sender out of the lock: a blocking send must never hold
        // the mutex, or shutdown could not drop the channel.
        let tx = self
            .task_tx
            .lock()
            .as_ref()
            .cloned()
            .ok_or_else(|| JobError::Internal("pool is shut down".into()))?;

        self.counters.queued_tasks.fetch_add(1, Ordering::Relaxed);
        let queued = QueuedTask {
            item: item.to_string(),
            task,
        };
        if tx.send(queued).is_err() {
            self.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
            return Err(JobError::Internal("admission queue closed".into()));
        }
        self.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// The completion stream. Only the monitor thread consumes it.
    #[must_use]
    pub fn completions(&self) -> Receiver<Completion> {
        self.completion_rx.clone()
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.worker_count)
    }

    /// Number of tasks currently executing.
    #[must_use]
    pub fn active_tasks(&self) -> u64 {
        self.counters.active_tasks.load(Ordering::Relaxed)
    }

    /// Graceful shutdown: close the queue, let workers drain, and join each
    /// with `grace` as the per-worker timeout. Workers that do not exit in
    /// time are detached.
    pub fn shutdown(&self, grace: Duration) {
        {
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
        }

        let mut workers = self.workers.lock();
        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = std::sync::mpsc::channel();
            let join_thread = thread::spawn(move || {
                let joined = worker.join();
                let _ = tx.send(joined.is_ok());
            });

            match rx.recv_timeout(grace) {
                Ok(true) => debug!(worker_id = idx, "worker joined"),
                Ok(false) => warn!(worker_id = idx, "worker panicked"),
                Err(_) => warn!(worker_id = idx, "worker did not exit in time, detaching"),
            }
            let _ = join_thread.join();
        }
    }

    /// Immediate shutdown: queued-but-unstarted tasks are abandoned and
    /// in-flight tasks finish or fail naturally. Idempotent.
    pub fn abort(&self) {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("aborting worker pool, abandoning queued work");
        let mut task_tx = self.task_tx.lock();
        *task_tx = None;
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Unblock any worker still waiting on the queue; threads are
        // detached rather than joined here.
        if !self.aborted.swap(true, Ordering::AcqRel) {
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
        }
    }
}

fn spawn_worker(
    worker_id: usize,
    task_rx: Receiver<QueuedTask>,
    completion_tx: Sender<Completion>,
    counters: Arc<PoolCounters>,
    aborted: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, JobError> {
    thread::Builder::new()
        .name(format!("bj-worker-{worker_id}"))
        .spawn(move || {
            // Each worker drives async task invocation on its own
            // single-threaded runtime.
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    warn!(worker_id, error = %e, "worker runtime failed to build");
                    return;
                }
            };

            loop {
                // Blocking recv: the thread sleeps until work arrives; a
                // dropped sender ends the loop.
                let Ok(mut queued) = task_rx.recv() else {
                    debug!(worker_id, "admission queue closed, worker exiting");
                    break;
                };

                if aborted.load(Ordering::Acquire) {
                    debug!(worker_id, item = %queued.item, "abandoning queued task on abort");
                    break;
                }

                counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                counters.active_tasks.fetch_add(1, Ordering::Relaxed);

                let outcome = match catch_unwind(AssertUnwindSafe(|| {
                    rt.block_on(queued.task.invoke())
                })) {
                    Ok(result) => result,
                    Err(_) => Err(JobError::Internal(format!(
                        "task panicked for item `{}`",
                        queued.item
                    ))),
                };

                counters.active_tasks.fetch_sub(1, Ordering::Relaxed);
                if outcome.is_ok() {
                    counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.failed_tasks.fetch_add(1, Ordering::Relaxed);
                }

                // The monitor may already be gone during shutdown.
                let _ = completion_tx.send(Completion {
                    item: queued.item,
                    outcome,
                });
            }

            debug!(worker_id, "worker thread exiting");
        })
        .map_err(|e| JobError::Internal(format!("spawn worker {worker_id}: {e}")))
}
