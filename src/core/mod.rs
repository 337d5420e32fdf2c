//! Core orchestration: errors, tasks, loaders, the worker pool, the
//! monitor, and the scheduler.

pub mod error;
pub mod factory;
pub mod loader;
pub mod monitor;
pub mod pool;
pub mod scheduler;
pub mod task;

pub use error::{AppResult, JobError};
pub use factory::{TaskFactory, TaskRegistry};
pub use loader::{ItemBuffer, Loader, LoaderInfo, UriRewriter, WorkItem};
pub use monitor::{Monitor, MonitorOutcome, ProgressSnapshot};
pub use pool::{Completion, PoolStats, WorkerPool};
pub use scheduler::{JobScheduler, JobState, JobSummary};
pub use task::{
    resolve_module_ref, InvokeTask, ModuleRef, PerItemExportTask, PostBatchExportTask,
    PreBatchExportTask, SharedExportTask, Task, TaskContext,
};
