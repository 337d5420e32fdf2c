//! Task capability set and built-in task variants.
//!
//! A task is the unit of work: a resolved module reference, the shared
//! configuration bag, a backend handle, and (for process tasks) exactly one
//! work item. Variants differ only in result handling: plain invoke,
//! per-item file export, and accumulated shared-file export with optional
//! pre/post framing.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::core::error::JobError;
use crate::infra::backend::{Backend, InvokeRequest};

/// Variable name under which the current work item is passed to the backend.
pub const ITEM_VAR: &str = "ITEM";
/// Variable name under which the batch-reference token is passed, when set.
pub const BATCH_REF_VAR: &str = "BATCH-REF";
/// Literal suffix marking a module reference as inline adhoc script text.
pub const ADHOC_SUFFIX: &str = "|ADHOC";

/// A resolved reference to server-side code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleRef {
    /// Path of a pre-installed module, relative to the backend module root.
    Path(String),
    /// Inline script text executed directly without installation.
    Inline(String),
}

/// Resolve a raw module reference string.
///
/// A reference carrying the literal `|ADHOC` suffix has the portion before
/// the separator read as inline script text from the local filesystem
/// (absolute, or relative to `script_dir`) and the suffix stripped. Anything
/// else is a module path joined under the server-side `module_root`.
pub fn resolve_module_ref(
    raw: &str,
    module_root: &str,
    script_dir: &Path,
) -> Result<ModuleRef, JobError> {
    if let Some(stripped) = raw.strip_suffix(ADHOC_SUFFIX) {
        let candidate = Path::new(stripped.trim());
        let path = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            script_dir.join(candidate)
        };
        let text = fs::read_to_string(&path).map_err(|e| {
            JobError::Configuration(format!(
                "adhoc script `{}` is unreadable: {e}",
                path.display()
            ))
        })?;
        Ok(ModuleRef::Inline(text))
    } else {
        let root = module_root.trim_end_matches('/');
        let rel = raw.trim_start_matches('/');
        Ok(ModuleRef::Path(format!("{root}/{rel}")))
    }
}

/// Everything a task needs at invocation time.
///
/// Built once per task by the factory; export-oriented fields are shared
/// across all tasks of a run.
#[derive(Clone)]
pub struct TaskContext {
    /// Connected backend handle.
    pub backend: Arc<dyn Backend>,
    /// Resolved module reference, absent for registered tasks that carry
    /// their own behavior.
    pub module: Option<ModuleRef>,
    /// Collection or selector the session is opened against.
    pub target: String,
    /// Custom named variables forwarded to every invocation.
    pub vars: Vec<(String, String)>,
    /// The bound work item; empty string for batch-level hooks.
    pub item: String,
    /// Opaque token correlating this run's shared artifacts.
    pub batch_ref: Option<String>,
    /// Directory receiving exported files.
    pub export_dir: PathBuf,
    /// Resolved shared export file, when one could be derived.
    pub shared_export_path: Option<PathBuf>,
    /// Fixed content the pre-batch export variant writes at the top.
    pub top_content: String,
    /// Fixed content the post-batch export variant appends at the bottom.
    pub bottom_content: String,
    /// Guards the shared export file's append critical section.
    pub export_lock: Arc<Mutex<()>>,
}

/// The closed capability set every task implements.
///
/// Extension is by registering a factory under a name in the
/// [`TaskRegistry`](crate::core::factory::TaskRegistry), never by reflective
/// instantiation.
#[async_trait]
pub trait Task: Send + fmt::Debug {
    /// Wire the task with its execution context. Export variants resolve
    /// their output target here and fail fast on misconfiguration.
    fn setup(&mut self, ctx: TaskContext) -> Result<(), JobError>;

    /// Invoke the remote procedure and handle its result.
    async fn invoke(&mut self) -> Result<String, JobError>;
}

fn exec_err(ctx: &TaskContext, reason: impl std::fmt::Display) -> JobError {
    JobError::TaskExecution {
        item: ctx.item.clone(),
        reason: reason.to_string(),
    }
}

/// Open a session, invoke the context's module, and drain the result stream.
/// Returns no lines when the context carries no module (module-less hooks).
async fn invoke_module(ctx: &TaskContext) -> Result<Vec<String>, JobError> {
    let Some(module) = &ctx.module else {
        return Ok(Vec::new());
    };
    let mut session = ctx
        .backend
        .new_session(&ctx.target)
        .await
        .map_err(|e| exec_err(ctx, format!("session open failed: {e}")))?;

    let mut request = InvokeRequest::new().var(ITEM_VAR, &ctx.item);
    if let Some(batch_ref) = &ctx.batch_ref {
        request = request.var(BATCH_REF_VAR, batch_ref);
    }
    for (name, value) in &ctx.vars {
        request = request.var(name, value);
    }

    let mut stream = session
        .invoke(module, request)
        .await
        .map_err(|e| exec_err(ctx, format!("invoke failed: {e}")))?;

    let mut lines = Vec::new();
    loop {
        match stream.next_line().await {
            Ok(Some(line)) => lines.push(line),
            Ok(None) => break,
            Err(e) => return Err(exec_err(ctx, format!("result read failed: {e}"))),
        }
    }
    let _ = session.close().await;
    Ok(lines)
}

fn ctx_or_internal(ctx: &Option<TaskContext>) -> Result<&TaskContext, JobError> {
    ctx.as_ref()
        .ok_or_else(|| JobError::Internal("task invoked before setup".into()))
}

/// Plain invocation task: returns the remote result text unchanged.
#[derive(Default)]
pub struct InvokeTask {
    ctx: Option<TaskContext>,
}

impl fmt::Debug for InvokeTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeTask").finish_non_exhaustive()
    }
}

impl InvokeTask {
    /// New, unwired task.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Task for InvokeTask {
    fn setup(&mut self, ctx: TaskContext) -> Result<(), JobError> {
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn invoke(&mut self) -> Result<String, JobError> {
        let ctx = ctx_or_internal(&self.ctx)?;
        let lines = invoke_module(ctx).await?;
        Ok(lines.join("\n"))
    }
}

/// Strip leading path separators so exported files stay inside the export dir.
fn export_file_name(item: &str) -> &str {
    item.trim_start_matches(['/', '\\'])
}

/// Writes each item's result to its own file under the export directory,
/// named after the item, creating parent directories as needed.
#[derive(Default)]
pub struct PerItemExportTask {
    ctx: Option<TaskContext>,
}

impl fmt::Debug for PerItemExportTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerItemExportTask").finish_non_exhaustive()
    }
}

impl PerItemExportTask {
    /// New, unwired task.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Task for PerItemExportTask {
    fn setup(&mut self, ctx: TaskContext) -> Result<(), JobError> {
        if ctx.item.trim().is_empty() {
            return Err(JobError::Configuration(
                "per-item export requires a work item".into(),
            ));
        }
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn invoke(&mut self) -> Result<String, JobError> {
        let ctx = ctx_or_internal(&self.ctx)?;
        let lines = invoke_module(ctx).await?;
        let path = ctx.export_dir.join(export_file_name(&ctx.item));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| exec_err(ctx, format!("mkdir `{}`: {e}", parent.display())))?;
        }
        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs::write(&path, body).map_err(|e| exec_err(ctx, format!("write `{}`: {e}", path.display())))?;
        debug!(item = %ctx.item, path = %path.display(), "exported item result");
        Ok(lines.join("\n"))
    }
}

/// Resolve the shared export file from the wired context, failing fast when
/// no non-blank name could be derived.
fn shared_path(ctx: &TaskContext) -> Result<PathBuf, JobError> {
    ctx.shared_export_path.clone().ok_or_else(|| {
        JobError::Configuration(
            "shared export requires an export file name or a batch reference".into(),
        )
    })
}

fn append_lines(path: &Path, lines: &[String], ctx: &TaskContext) -> Result<(), JobError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| exec_err(ctx, format!("mkdir `{}`: {e}", parent.display())))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| exec_err(ctx, format!("open `{}`: {e}", path.display())))?;
    for line in lines {
        writeln!(file, "{line}").map_err(|e| exec_err(ctx, format!("append `{}`: {e}", path.display())))?;
    }
    file.flush()
        .map_err(|e| exec_err(ctx, format!("flush `{}`: {e}", path.display())))?;
    Ok(())
}

/// Appends each item's result lines to one shared file. The append is the
/// one critical section of the run and is guarded by the context's lock, so
/// concurrent completions never interleave bytes.
#[derive(Default)]
pub struct SharedExportTask {
    ctx: Option<TaskContext>,
}

impl fmt::Debug for SharedExportTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedExportTask").finish_non_exhaustive()
    }
}

impl SharedExportTask {
    /// New, unwired task.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Task for SharedExportTask {
    fn setup(&mut self, ctx: TaskContext) -> Result<(), JobError> {
        shared_path(&ctx)?;
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn invoke(&mut self) -> Result<String, JobError> {
        let ctx = ctx_or_internal(&self.ctx)?;
        let path = shared_path(ctx)?;
        let lines = invoke_module(ctx).await?;
        {
            let _guard = ctx.export_lock.lock();
            append_lines(&path, &lines, ctx)?;
        }
        Ok(lines.join("\n"))
    }
}

/// Pre-batch framing variant: deletes any stale target file, writes the
/// fixed top content, then appends the hook module's result (if any).
#[derive(Default)]
pub struct PreBatchExportTask {
    ctx: Option<TaskContext>,
}

impl fmt::Debug for PreBatchExportTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreBatchExportTask").finish_non_exhaustive()
    }
}

impl PreBatchExportTask {
    /// New, unwired task.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Task for PreBatchExportTask {
    fn setup(&mut self, ctx: TaskContext) -> Result<(), JobError> {
        shared_path(&ctx)?;
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn invoke(&mut self) -> Result<String, JobError> {
        let ctx = ctx_or_internal(&self.ctx)?;
        let path = shared_path(ctx)?;
        let lines = invoke_module(ctx).await?;
        let _guard = ctx.export_lock.lock();
        // Stale output from a prior run must not leak into this one.
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| exec_err(ctx, format!("remove `{}`: {e}", path.display())))?;
        }
        let mut framing = Vec::new();
        if !ctx.top_content.is_empty() {
            framing.push(ctx.top_content.clone());
        }
        framing.extend(lines.iter().cloned());
        append_lines(&path, &framing, ctx)?;
        Ok(lines.join("\n"))
    }
}

/// Post-batch framing variant: appends the hook module's result (if any),
/// then the fixed bottom content.
#[derive(Default)]
pub struct PostBatchExportTask {
    ctx: Option<TaskContext>,
}

impl fmt::Debug for PostBatchExportTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostBatchExportTask").finish_non_exhaustive()
    }
}

impl PostBatchExportTask {
    /// New, unwired task.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Task for PostBatchExportTask {
    fn setup(&mut self, ctx: TaskContext) -> Result<(), JobError> {
        shared_path(&ctx)?;
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn invoke(&mut self) -> Result<String, JobError> {
        let ctx = ctx_or_internal(&self.ctx)?;
        let path = shared_path(ctx)?;
        let lines = invoke_module(ctx).await?;
        let _guard = ctx.export_lock.lock();
        let mut framing = lines.clone();
        if !ctx.bottom_content.is_empty() {
            framing.push(ctx.bottom_content.clone());
        }
        append_lines(&path, &framing, ctx)?;
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adhoc_suffix_reads_inline_text() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("probe.txt"), "return 42").unwrap();

        let resolved = resolve_module_ref("probe.txt|ADHOC", "/modules", dir.path()).unwrap();
        assert_eq!(resolved, ModuleRef::Inline("return 42".into()));
    }

    #[test]
    fn adhoc_missing_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_module_ref("absent.txt|ADHOC", "/", dir.path()).unwrap_err();
        assert!(matches!(err, JobError::Configuration(_)));
    }

    #[test]
    fn plain_reference_joins_module_root() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_module_ref("/ext/process.xqy", "/modules/", dir.path()).unwrap();
        assert_eq!(resolved, ModuleRef::Path("/modules/ext/process.xqy".into()));
    }

    #[test]
    fn export_file_name_strips_leading_separators() {
        assert_eq!(export_file_name("/a/b.xml"), "a/b.xml");
        assert_eq!(export_file_name("\\a.xml"), "a.xml");
        assert_eq!(export_file_name("plain.xml"), "plain.xml");
    }
}
