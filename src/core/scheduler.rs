//! Job lifecycle orchestration.
//!
//! The scheduler owns the control flow of a run: connect, install remote
//! resources, build the worker pool, run the pre-batch hook, stream items
//! from the loader into the pool, then hand supervision to the monitor and
//! wait for it. Any unrecoverable error triggers `stop()` and is returned
//! to the caller as fatal.

use std::fmt;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::JobConfig;
use crate::core::error::JobError;
use crate::core::factory::{TaskFactory, TaskRegistry};
use crate::core::loader::{ItemBuffer, Loader};
use crate::core::monitor::Monitor;
use crate::core::pool::WorkerPool;
use crate::infra::backend::{Backend, Connector};
use crate::infra::file_loader::FileLoader;
use crate::infra::query_loader::QueryLoader;
use crate::util::credential::CredentialResolver;

/// Lifecycle states for a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Built, not yet started.
    Init,
    /// Connecting to the backend.
    Connecting,
    /// Installing server-side modules.
    InstallingResources,
    /// Streaming work items into the pool.
    Populating,
    /// All items dispatched; monitor supervising completions.
    Running,
    /// Normal completion: draining the pool and running finalization.
    Draining,
    /// Finished.
    Done,
    /// Aborted by a fatal error.
    Error,
}

/// Final accounting for a run.
#[derive(Debug)]
pub struct JobSummary {
    /// Items completed.
    pub completed: usize,
    /// Expected total.
    pub total: usize,
    /// Batch reference the loader yielded, when any.
    pub batch_ref: Option<String>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Post-batch hook failure, when one occurred. The run still completed
    /// its primary objective.
    pub finalization_error: Option<JobError>,
}

/// Orchestrates one bulk job from connect to shutdown.
pub struct JobScheduler {
    config: JobConfig,
    connector: Box<dyn Connector>,
    registry: TaskRegistry,
    resolver: CredentialResolver,
    loader_override: Mutex<Option<Box<dyn Loader>>>,
    state: Arc<RwLock<JobState>>,
    halt: Arc<AtomicBool>,
    pool: RwLock<Option<Arc<WorkerPool>>>,
    stopped: AtomicBool,
}

impl fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobScheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobScheduler {
    /// Assemble a scheduler. Prefer
    /// [`JobBuilder`](crate::builders::JobBuilder) for wiring.
    pub(crate) fn assemble(
        config: JobConfig,
        connector: Box<dyn Connector>,
        registry: TaskRegistry,
        resolver: CredentialResolver,
        loader_override: Option<Box<dyn Loader>>,
    ) -> Self {
        Self {
            config,
            connector,
            registry,
            resolver,
            loader_override: Mutex::new(loader_override),
            state: Arc::new(RwLock::new(JobState::Init)),
            halt: Arc::new(AtomicBool::new(false)),
            pool: RwLock::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> JobState {
        *self.state.read()
    }

    /// Run the job to completion.
    ///
    /// # Errors
    ///
    /// Any fatal error, after best-effort shutdown: configuration and
    /// transport failures, a failed task (fail-fast), or a count anomaly.
    pub fn run(&self) -> Result<JobSummary, JobError> {
        let job_id = Uuid::new_v4();
        info!(job_id = %job_id, "starting job");
        let started = Instant::now();
        match self.execute(started) {
            Ok(summary) => {
                *self.state.write() = JobState::Done;
                info!(
                    completed = summary.completed,
                    elapsed_secs = summary.elapsed.as_secs(),
                    "job finished"
                );
                Ok(summary)
            }
            Err(err) => {
                *self.state.write() = JobState::Error;
                self.stop();
                Err(err)
            }
        }
    }

    /// Idempotent shutdown: abandons queued-but-unstarted work and signals
    /// the monitor to halt at its next poll.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("stopping job");
        self.halt.store(true, Ordering::Release);
        if let Some(pool) = self.pool.read().as_ref() {
            pool.abort();
        }
    }

    fn execute(&self, started: Instant) -> Result<JobSummary, JobError> {
        // Control-plane runtime for connect/install; workers own theirs.
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| JobError::Internal(format!("control runtime: {e}")))?;

        *self.state.write() = JobState::Connecting;
        let uri = self.resolver.resolve(&self.config.connection_uri)?;
        let backend = rt
            .block_on(self.connector.connect(&uri))
            .map_err(|e| JobError::Transport(format!("connect: {e}")))?;
        info!(collection = %self.config.target, "connected to backend");

        let factory = Arc::new(TaskFactory::new(
            &self.config,
            Arc::clone(&backend),
            self.registry.clone(),
        )?);

        if self.config.install_modules {
            *self.state.write() = JobState::InstallingResources;
            self.install_modules(&rt, backend.as_ref(), &factory)?;
        }

        let pool = Arc::new(WorkerPool::new(
            self.config.thread_count,
            self.config.queue_capacity,
        )?);
        *self.pool.write() = Some(Arc::clone(&pool));

        *self.state.write() = JobState::Populating;
        if let Some(mut task) = factory.pre_batch_task()? {
            info!("running pre-batch task");
            rt.block_on(task.invoke())?;
        }

        let mut loader = self.build_loader(&backend, &factory)?;
        let open_result = self.populate(&pool, &factory, loader.as_mut());
        loader.close();
        let info = open_result?;

        if info.total == 0 {
            info!("no items to process");
            pool.shutdown(Duration::from_secs(self.config.shutdown_grace_secs));
            return Ok(JobSummary {
                completed: 0,
                total: 0,
                batch_ref: info.batch_ref,
                elapsed: started.elapsed(),
                finalization_error: None,
            });
        }

        *self.state.write() = JobState::Running;
        let monitor = Monitor::new(
            pool.completions(),
            info.total,
            Arc::clone(&self.halt),
            Arc::clone(&pool),
            Arc::clone(&factory),
            Arc::clone(&self.state),
            Duration::from_millis(self.config.poll_timeout_millis),
            Duration::from_secs(self.config.progress_interval_secs),
            Duration::from_secs(self.config.shutdown_grace_secs),
        );
        let handle = monitor.spawn()?;
        let outcome = handle
            .join()
            .map_err(|_| JobError::Internal("monitor thread panicked".into()))??;

        if let Some(finalization) = &outcome.finalization_error {
            warn!(error = %finalization, "job completed with a finalization error");
        }

        Ok(JobSummary {
            completed: outcome.completed,
            total: info.total,
            batch_ref: info.batch_ref,
            elapsed: started.elapsed(),
            finalization_error: outcome.finalization_error,
        })
    }

    /// Open the loader and stream its items into the pool.
    ///
    /// The first enumerated item is dispatched immediately, smoke-testing
    /// the remote procedure without waiting for a potentially very long
    /// enumeration. The remainder is buffered compactly and dispatched in
    /// enumeration order afterwards.
    fn populate(
        &self,
        pool: &Arc<WorkerPool>,
        factory: &Arc<TaskFactory>,
        loader: &mut dyn Loader,
    ) -> Result<crate::core::loader::LoaderInfo, JobError> {
        let info = loader.open()?;
        factory.set_batch_ref(info.batch_ref.clone());
        info!(total = info.total, batch_ref = ?info.batch_ref, "loader opened");

        if info.total == 0 {
            return Ok(info);
        }

        let total = info.total;
        let mut buffer = ItemBuffer::with_capacity(total.saturating_sub(1));
        let mut first_dispatched = false;
        while let Some(item) = loader.next_item()? {
            if !first_dispatched {
                first_dispatched = true;
                self.dispatch(pool, factory, &item)?;
                debug!(item = %item, "first item dispatched ahead of enumeration");
                continue;
            }
            if 1 + buffer.len() >= total {
                return Err(JobError::Anomaly(format!(
                    "loader yielded more than the expected {total} items"
                )));
            }
            buffer.push(&item);
        }

        let enumerated = usize::from(first_dispatched) + buffer.len();
        if enumerated != total {
            return Err(JobError::Anomaly(format!(
                "loader yielded {enumerated} items but declared {total}"
            )));
        }

        for item in buffer.iter() {
            self.dispatch(pool, factory, item)?;
        }
        debug!(dispatched = total, "all items dispatched");
        Ok(info)
    }

    fn dispatch(
        &self,
        pool: &Arc<WorkerPool>,
        factory: &Arc<TaskFactory>,
        item: &str,
    ) -> Result<(), JobError> {
        let task = factory.process_task(item)?;
        pool.submit(item, task)
    }

    /// Install stage modules on the backend. A backend that cannot host
    /// installed modules is warned about and assumed to already have them.
    fn install_modules(
        &self,
        rt: &tokio::runtime::Runtime,
        backend: &dyn Backend,
        factory: &TaskFactory,
    ) -> Result<(), JobError> {
        if !backend.supports_module_install() {
            warn!("backend cannot host installed modules; assuming resources are present");
            return Ok(());
        }
        for (server_path, local_path) in factory.installable_modules(&self.config) {
            let source = fs::read_to_string(&local_path).map_err(|e| {
                JobError::Configuration(format!(
                    "module source `{}`: {e}",
                    local_path.display()
                ))
            })?;
            rt.block_on(backend.install_module(&server_path, &source))
                .map_err(|e| JobError::Transport(format!("install `{server_path}`: {e}")))?;
            info!(module = %server_path, "installed module");
        }
        Ok(())
    }

    /// Pick the enumeration source: an injected loader takes precedence,
    /// then the query module, then the local items file.
    fn build_loader(
        &self,
        backend: &Arc<dyn Backend>,
        factory: &TaskFactory,
    ) -> Result<Box<dyn Loader>, JobError> {
        if let Some(loader) = self.loader_override.lock().take() {
            return Ok(loader);
        }
        if let Some(module) = factory.uris_module() {
            return Ok(Box::new(QueryLoader::new(
                Arc::clone(backend),
                self.config.target.clone(),
                module.clone(),
                self.config
                    .query_params
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                self.config.uri_rewrite.clone(),
            )));
        }
        if let Some(path) = &self.config.uris_file {
            return Ok(Box::new(FileLoader::new(
                path.clone(),
                self.config.uri_rewrite.clone(),
            )));
        }
        Err(JobError::Configuration(
            "a uris module or uris file is required".into(),
        ))
    }
}
