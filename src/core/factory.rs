//! Task construction and the named-task registry.
//!
//! Pluggable task kinds are factory closures registered under a name;
//! building a task is a registry lookup followed by `setup` with a wired
//! context. The process task is mandatory; pre- and post-batch hooks are
//! optional.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::JobConfig;
use crate::core::error::JobError;
use crate::core::task::{
    resolve_module_ref, InvokeTask, ModuleRef, PerItemExportTask, PostBatchExportTask,
    PreBatchExportTask, SharedExportTask, Task, TaskContext,
};
use crate::infra::backend::Backend;

/// Builds one unwired task instance.
pub type TaskFactoryFn = Arc<dyn Fn() -> Box<dyn Task> + Send + Sync>;

/// Registry of named task constructors.
///
/// Extension point for pluggable task kinds: register a factory under a
/// name and reference that name from configuration.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactoryFn>,
}

/// Name of the plain invocation task.
pub const TASK_INVOKE: &str = "invoke";
/// Name of the per-item export task.
pub const TASK_EXPORT_PER_ITEM: &str = "export-per-item";
/// Name of the accumulated shared-file export task.
pub const TASK_EXPORT_SHARED: &str = "export-shared";
/// Name of the pre-batch framing export task.
pub const TASK_EXPORT_PRE_BATCH: &str = "export-pre-batch";
/// Name of the post-batch framing export task.
pub const TASK_EXPORT_POST_BATCH: &str = "export-post-batch";

impl TaskRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in task kinds registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(TASK_INVOKE, || Box::new(InvokeTask::new()));
        registry.register(TASK_EXPORT_PER_ITEM, || Box::new(PerItemExportTask::new()));
        registry.register(TASK_EXPORT_SHARED, || Box::new(SharedExportTask::new()));
        registry.register(TASK_EXPORT_PRE_BATCH, || Box::new(PreBatchExportTask::new()));
        registry.register(TASK_EXPORT_POST_BATCH, || {
            Box::new(PostBatchExportTask::new())
        });
        registry
    }

    /// Register a factory under `name`, replacing any previous entry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn Task> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build an unwired task by name.
    #[must_use]
    pub fn build(&self, name: &str) -> Option<Box<dyn Task>> {
        self.factories.get(name).map(|factory| factory())
    }
}

/// Resolved module references for the job's stages.
struct StageModules {
    uris: Option<ModuleRef>,
    process: Option<ModuleRef>,
    pre_batch: Option<ModuleRef>,
    post_batch: Option<ModuleRef>,
}

/// Builds wired task instances for every stage of a job.
pub struct TaskFactory {
    backend: Arc<dyn Backend>,
    registry: TaskRegistry,
    modules: StageModules,
    process_task: Option<String>,
    pre_batch_task: Option<String>,
    post_batch_task: Option<String>,
    target: String,
    vars: Vec<(String, String)>,
    export_dir: PathBuf,
    export_file_name: Option<String>,
    top_content: String,
    bottom_content: String,
    export_lock: Arc<Mutex<()>>,
    batch_ref: RwLock<Option<String>>,
}

impl fmt::Debug for TaskFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFactory")
            .field("target", &self.target)
            .field("process_task", &self.process_task)
            .field("pre_batch_task", &self.pre_batch_task)
            .field("post_batch_task", &self.post_batch_task)
            .finish_non_exhaustive()
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl TaskFactory {
    /// Wire a factory from configuration.
    ///
    /// Module references are resolved eagerly (adhoc scripts are read here),
    /// and the mandatory process stage is validated: configuring neither a
    /// task name nor a process module is a configuration error.
    pub fn new(
        config: &JobConfig,
        backend: Arc<dyn Backend>,
        registry: TaskRegistry,
    ) -> Result<Self, JobError> {
        let script_dir = Path::new(&config.script_dir);
        let resolve = |raw: &Option<String>| -> Result<Option<ModuleRef>, JobError> {
            non_blank(raw)
                .map(|r| resolve_module_ref(&r, &config.module_root, script_dir))
                .transpose()
        };

        let modules = StageModules {
            uris: resolve(&config.uris_module)?,
            process: resolve(&config.process_module)?,
            pre_batch: resolve(&config.pre_batch_module)?,
            post_batch: resolve(&config.post_batch_module)?,
        };

        let process_task = non_blank(&config.process_task);
        if process_task.is_none() && modules.process.is_none() {
            return Err(JobError::Configuration(
                "a process task or process module is required".into(),
            ));
        }
        for name in [
            &process_task,
            &non_blank(&config.pre_batch_task),
            &non_blank(&config.post_batch_task),
        ]
        .into_iter()
        .flatten()
        {
            if !registry.contains(name) {
                return Err(JobError::Configuration(format!(
                    "task `{name}` is not registered"
                )));
            }
        }

        Ok(Self {
            backend,
            registry,
            modules,
            process_task,
            pre_batch_task: non_blank(&config.pre_batch_task),
            post_batch_task: non_blank(&config.post_batch_task),
            target: config.target.clone(),
            vars: config
                .query_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            export_dir: PathBuf::from(&config.export_dir),
            export_file_name: non_blank(&config.export_file_name),
            top_content: config.export_file_top_content.clone(),
            bottom_content: config.export_file_bottom_content.clone(),
            export_lock: Arc::new(Mutex::new(())),
            batch_ref: RwLock::new(None),
        })
    }

    /// Record the batch reference once the loader has opened.
    pub fn set_batch_ref(&self, batch_ref: Option<String>) {
        *self.batch_ref.write() = batch_ref;
    }

    /// The uris-stage module, when the job enumerates through a query.
    #[must_use]
    pub fn uris_module(&self) -> Option<&ModuleRef> {
        self.modules.uris.as_ref()
    }

    /// Server paths of stage modules that require installation, paired with
    /// the local file they are read from. Inline adhoc scripts need none.
    #[must_use]
    pub fn installable_modules(&self, config: &JobConfig) -> Vec<(String, PathBuf)> {
        let script_dir = Path::new(&config.script_dir);
        let mut out = Vec::new();
        for raw in [
            &config.uris_module,
            &config.process_module,
            &config.pre_batch_module,
            &config.post_batch_module,
        ]
        .into_iter()
        .filter_map(|raw| non_blank(raw))
        {
            if raw.ends_with(crate::core::task::ADHOC_SUFFIX) {
                continue;
            }
            let root = config.module_root.trim_end_matches('/');
            let rel = raw.trim_start_matches('/');
            out.push((format!("{root}/{rel}"), script_dir.join(rel)));
        }
        out
    }

    fn context(&self, module: Option<ModuleRef>, item: &str) -> TaskContext {
        let batch_ref = self.batch_ref.read().clone();
        let shared_export_path = self
            .export_file_name
            .clone()
            .or_else(|| batch_ref.clone())
            .map(|name| {
                self.export_dir
                    .join(name.trim_start_matches(['/', '\\']))
            });
        TaskContext {
            backend: Arc::clone(&self.backend),
            module,
            target: self.target.clone(),
            vars: self.vars.clone(),
            item: item.to_string(),
            batch_ref,
            export_dir: self.export_dir.clone(),
            shared_export_path,
            top_content: self.top_content.clone(),
            bottom_content: self.bottom_content.clone(),
            export_lock: Arc::clone(&self.export_lock),
        }
    }

    fn build_named(&self, name: &str) -> Result<Box<dyn Task>, JobError> {
        self.registry
            .build(name)
            .ok_or_else(|| JobError::Configuration(format!("task `{name}` is not registered")))
    }

    /// Build the wired process task for one work item. Mandatory stage.
    pub fn process_task(&self, item: &str) -> Result<Box<dyn Task>, JobError> {
        let name = self.process_task.as_deref().unwrap_or(TASK_INVOKE);
        let mut task = self.build_named(name)?;
        task.setup(self.context(self.modules.process.clone(), item))?;
        Ok(task)
    }

    fn hook_task(
        &self,
        name: &Option<String>,
        module: &Option<ModuleRef>,
    ) -> Result<Option<Box<dyn Task>>, JobError> {
        if name.is_none() && module.is_none() {
            return Ok(None);
        }
        let mut task = self.build_named(name.as_deref().unwrap_or(TASK_INVOKE))?;
        task.setup(self.context(module.clone(), ""))?;
        Ok(Some(task))
    }

    /// Build the optional pre-batch hook task.
    pub fn pre_batch_task(&self) -> Result<Option<Box<dyn Task>>, JobError> {
        self.hook_task(&self.pre_batch_task, &self.modules.pre_batch)
    }

    /// Build the optional post-batch hook task.
    pub fn post_batch_task(&self) -> Result<Option<Box<dyn Task>>, JobError> {
        self.hook_task(&self.post_batch_task, &self.modules.post_batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::MemoryBackend;

    fn base_config() -> JobConfig {
        JobConfig {
            process_module: Some("/m/process.xqy".into()),
            ..JobConfig::default()
        }
    }

    fn backend() -> Arc<dyn Backend> {
        MemoryBackend::echo() as Arc<dyn Backend>
    }

    #[test]
    fn process_stage_is_mandatory() {
        let mut config = base_config();
        config.process_module = None;
        config.process_task = None;
        let err =
            TaskFactory::new(&config, backend(), TaskRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, JobError::Configuration(_)));
    }

    #[test]
    fn unknown_task_name_is_rejected() {
        let mut config = base_config();
        config.process_task = Some("no-such-task".into());
        let err =
            TaskFactory::new(&config, backend(), TaskRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, JobError::Configuration(_)));
    }

    #[test]
    fn hooks_default_to_none() {
        let factory =
            TaskFactory::new(&base_config(), backend(), TaskRegistry::with_builtins()).unwrap();
        assert!(factory.pre_batch_task().unwrap().is_none());
        assert!(factory.post_batch_task().unwrap().is_none());
    }

    #[test]
    fn module_only_hook_builds_plain_invoke() {
        let mut config = base_config();
        config.post_batch_module = Some("/m/cleanup.xqy".into());
        let factory =
            TaskFactory::new(&config, backend(), TaskRegistry::with_builtins()).unwrap();
        assert!(factory.post_batch_task().unwrap().is_some());
    }

    #[test]
    fn shared_export_without_name_or_batch_ref_fails_fast() {
        let mut config = base_config();
        config.process_task = Some(TASK_EXPORT_SHARED.into());
        let factory =
            TaskFactory::new(&config, backend(), TaskRegistry::with_builtins()).unwrap();
        let err = factory.process_task("/a.xml").unwrap_err();
        assert!(matches!(err, JobError::Configuration(_)));
    }

    #[test]
    fn shared_export_name_falls_back_to_batch_ref() {
        let mut config = base_config();
        config.process_task = Some(TASK_EXPORT_SHARED.into());
        let factory =
            TaskFactory::new(&config, backend(), TaskRegistry::with_builtins()).unwrap();
        factory.set_batch_ref(Some("batch-42".into()));
        assert!(factory.process_task("/a.xml").is_ok());
    }

    #[test]
    fn custom_registration_extends_the_registry() {
        let mut registry = TaskRegistry::with_builtins();
        registry.register("noop", || Box::new(InvokeTask::new()));
        assert!(registry.contains("noop"));

        let mut config = base_config();
        config.process_task = Some("noop".into());
        let factory = TaskFactory::new(&config, backend(), registry).unwrap();
        assert!(factory.process_task("/a.xml").is_ok());
    }
}
