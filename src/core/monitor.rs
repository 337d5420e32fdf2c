//! Completion supervision, progress telemetry, and job finalization.
//!
//! The monitor runs on its own thread and is the only consumer of the
//! completion stream. It polls with a bounded timeout so an external halt
//! flag is honored promptly, reports throttled progress, detects count
//! anomalies, and on normal completion drains the pool and runs the
//! post-batch hook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::RwLock;
use sysinfo::System;
use tracing::{error, info, warn};

use crate::core::error::JobError;
use crate::core::factory::TaskFactory;
use crate::core::pool::{Completion, WorkerPool};
use crate::core::scheduler::JobState;

/// Available memory below which an operational warning is logged.
const LOW_MEMORY_BYTES: u64 = 64 * 1024 * 1024;

/// Point-in-time progress figures, recomputed on a throttled interval.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Items completed so far.
    pub completed: usize,
    /// Expected total.
    pub total: usize,
    /// Average throughput since the job started, items per second.
    pub avg_per_sec: f64,
    /// Throughput since the previous report, items per second.
    pub cur_per_sec: f64,
    /// Estimated seconds to completion, from the average throughput.
    pub eta_secs: Option<u64>,
    /// Tasks currently executing.
    pub active_workers: u64,
}

impl ProgressSnapshot {
    /// Compute a snapshot from raw counters and timings.
    #[must_use]
    pub fn compute(
        completed: usize,
        total: usize,
        active_workers: u64,
        elapsed: Duration,
        window_completed: usize,
        window: Duration,
    ) -> Self {
        let avg_per_sec = if elapsed.as_secs_f64() > 0.0 {
            completed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let cur_per_sec = if window.as_secs_f64() > 0.0 {
            window_completed as f64 / window.as_secs_f64()
        } else {
            0.0
        };
        let remaining = total.saturating_sub(completed);
        let eta_secs = if remaining == 0 {
            Some(0)
        } else if avg_per_sec > 0.0 {
            Some((remaining as f64 / avg_per_sec).ceil() as u64)
        } else {
            None
        };
        Self {
            completed,
            total,
            avg_per_sec,
            cur_per_sec,
            eta_secs,
            active_workers,
        }
    }
}

/// What the monitor observed by the time it exited normally.
#[derive(Debug)]
pub struct MonitorOutcome {
    /// Items completed.
    pub completed: usize,
    /// Post-batch hook failure, when one occurred.
    pub finalization_error: Option<JobError>,
}

/// Supervises the completion stream for one job run.
pub struct Monitor {
    completions: Receiver<Completion>,
    total: usize,
    halt: Arc<AtomicBool>,
    pool: Arc<WorkerPool>,
    factory: Arc<TaskFactory>,
    state: Arc<RwLock<JobState>>,
    poll_timeout: Duration,
    report_interval: Duration,
    shutdown_grace: Duration,
}

impl Monitor {
    /// Assemble a monitor for `total` expected completions.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        completions: Receiver<Completion>,
        total: usize,
        halt: Arc<AtomicBool>,
        pool: Arc<WorkerPool>,
        factory: Arc<TaskFactory>,
        state: Arc<RwLock<JobState>>,
        poll_timeout: Duration,
        report_interval: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            completions,
            total,
            halt,
            pool,
            factory,
            state,
            poll_timeout,
            report_interval,
            shutdown_grace,
        }
    }

    /// Start the monitor on its own thread.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Internal`] if the thread cannot spawn.
    pub fn spawn(self) -> Result<JoinHandle<Result<MonitorOutcome, JobError>>, JobError> {
        thread::Builder::new()
            .name("bj-monitor".into())
            .spawn(move || self.run())
            .map_err(|e| JobError::Internal(format!("spawn monitor: {e}")))
    }

    fn run(self) -> Result<MonitorOutcome, JobError> {
        let started = Instant::now();
        let mut completed = 0usize;
        let mut last_report = Instant::now();
        let mut last_completed = 0usize;
        let mut system = System::new();

        loop {
            if self.halt.load(Ordering::Acquire) {
                info!(completed, total = self.total, "monitor halted");
                return Ok(MonitorOutcome {
                    completed,
                    finalization_error: None,
                });
            }

            match self.completions.recv_timeout(self.poll_timeout) {
                Ok(completion) => {
                    if let Err(err) = completion.outcome {
                        error!(item = %completion.item, error = %err, "task failed, aborting job");
                        return Err(err);
                    }
                    completed += 1;
                    if completed > self.total {
                        return Err(JobError::Anomaly(format!(
                            "completed {completed} items but expected {}",
                            self.total
                        )));
                    }
                    if completed == self.total {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    if self.halt.load(Ordering::Acquire) {
                        return Ok(MonitorOutcome {
                            completed,
                            finalization_error: None,
                        });
                    }
                    return Err(JobError::Internal(format!(
                        "completion stream closed after {completed} of {} items",
                        self.total
                    )));
                }
            }

            if last_report.elapsed() >= self.report_interval {
                self.report(
                    completed,
                    started.elapsed(),
                    completed - last_completed,
                    last_report.elapsed(),
                    &mut system,
                );
                last_report = Instant::now();
                last_completed = completed;
            }
        }

        info!(completed, "all items completed");
        *self.state.write() = JobState::Draining;
        self.pool.shutdown(self.shutdown_grace);

        let finalization_error = self.run_post_batch();
        Ok(MonitorOutcome {
            completed,
            finalization_error,
        })
    }

    fn report(
        &self,
        completed: usize,
        elapsed: Duration,
        window_completed: usize,
        window: Duration,
        system: &mut System,
    ) {
        let snapshot = ProgressSnapshot::compute(
            completed,
            self.total,
            self.pool.active_tasks(),
            elapsed,
            window_completed,
            window,
        );
        info!(
            completed = snapshot.completed,
            total = snapshot.total,
            avg_per_sec = snapshot.avg_per_sec,
            cur_per_sec = snapshot.cur_per_sec,
            eta_secs = snapshot.eta_secs,
            active_workers = snapshot.active_workers,
            "progress"
        );

        system.refresh_memory();
        let available = system.available_memory();
        if available > 0 && available < LOW_MEMORY_BYTES {
            warn!(available_bytes = available, "available memory is low");
        }
    }

    /// Run the post-batch hook. Its failure is reported as a finalization
    /// error and does not invalidate completed work.
    fn run_post_batch(&self) -> Option<JobError> {
        let task = match self.factory.post_batch_task() {
            Ok(None) => return None,
            Ok(Some(task)) => task,
            Err(err) => return Some(JobError::Finalization(err.to_string())),
        };

        info!("running post-batch task");
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => return Some(JobError::Finalization(format!("hook runtime: {e}"))),
        };

        let mut task = task;
        match rt.block_on(task.invoke()) {
            Ok(_) => None,
            Err(err) => {
                error!(error = %err, "post-batch task failed");
                Some(JobError::Finalization(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_throughput_and_eta() {
        let snapshot = ProgressSnapshot::compute(
            50,
            200,
            4,
            Duration::from_secs(10),
            20,
            Duration::from_secs(2),
        );
        assert!((snapshot.avg_per_sec - 5.0).abs() < f64::EPSILON);
        assert!((snapshot.cur_per_sec - 10.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.eta_secs, Some(30));
        assert_eq!(snapshot.active_workers, 4);
    }

    #[test]
    fn snapshot_without_progress_has_no_eta() {
        let snapshot = ProgressSnapshot::compute(
            0,
            10,
            0,
            Duration::from_secs(5),
            0,
            Duration::from_secs(5),
        );
        assert_eq!(snapshot.eta_secs, None);
        assert!(snapshot.avg_per_sec.abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_complete_job_reports_zero_eta() {
        let snapshot = ProgressSnapshot::compute(
            10,
            10,
            0,
            Duration::from_secs(5),
            1,
            Duration::from_secs(1),
        );
        assert_eq!(snapshot.eta_secs, Some(0));
    }
}
