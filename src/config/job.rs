//! Job configuration and layered value resolution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::error::JobError;

/// Configuration for one bulk job run.
///
/// Outer surfaces (argument vectors, properties files) are parsed elsewhere;
/// this is the validated shape the engine consumes. Unknown values fall back
/// to defaults via `#[serde(default)]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Backend connection URI. May be wrapped as `ENC(...)`.
    pub connection_uri: String,
    /// Collection or selector sessions are opened against.
    pub target: String,
    /// Module enumerating work items (query-backed loader).
    pub uris_module: Option<String>,
    /// Local newline-delimited file of work items (file-backed loader).
    pub uris_file: Option<String>,
    /// Module invoked once per work item.
    pub process_module: Option<String>,
    /// Registered task name for the process stage.
    pub process_task: Option<String>,
    /// Module invoked by the pre-batch hook.
    pub pre_batch_module: Option<String>,
    /// Registered task name for the pre-batch hook.
    pub pre_batch_task: Option<String>,
    /// Module invoked by the post-batch hook.
    pub post_batch_module: Option<String>,
    /// Registered task name for the post-batch hook.
    pub post_batch_task: Option<String>,
    /// Fixed worker pool size.
    pub thread_count: usize,
    /// Bounded admission queue capacity.
    pub queue_capacity: usize,
    /// Whether to install stage modules on the backend before running.
    pub install_modules: bool,
    /// Server-side root under which module paths resolve.
    pub module_root: String,
    /// Local directory holding module sources and adhoc scripts.
    pub script_dir: String,
    /// Directory receiving exported files.
    pub export_dir: String,
    /// Explicit shared export file name; falls back to the batch reference.
    pub export_file_name: Option<String>,
    /// Fixed content the pre-batch export variant writes at the top.
    pub export_file_top_content: String,
    /// Fixed content the post-batch export variant appends at the bottom.
    pub export_file_bottom_content: String,
    /// Flat comma-separated `pattern,replacement,...` rewrite-rule list.
    pub uri_rewrite: String,
    /// Custom named variables forwarded to every invocation.
    pub query_params: HashMap<String, String>,
    /// Seconds between throttled progress reports.
    pub progress_interval_secs: u64,
    /// Monitor completion-poll timeout in milliseconds.
    pub poll_timeout_millis: u64,
    /// Per-worker join timeout during graceful shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            connection_uri: String::new(),
            target: String::new(),
            uris_module: None,
            uris_file: None,
            process_module: None,
            process_task: None,
            pre_batch_module: None,
            pre_batch_task: None,
            post_batch_module: None,
            post_batch_task: None,
            thread_count: num_cpus::get(),
            queue_capacity: 1000,
            install_modules: false,
            module_root: "/".into(),
            script_dir: ".".into(),
            export_dir: ".".into(),
            export_file_name: None,
            export_file_top_content: String::new(),
            export_file_bottom_content: String::new(),
            uri_rewrite: String::new(),
            query_params: HashMap::new(),
            progress_interval_secs: 10,
            poll_timeout_millis: 200,
            shutdown_grace_secs: 2,
        }
    }
}

impl JobConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Configuration`] describing the first violation.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.connection_uri.trim().is_empty() {
            return Err(JobError::Configuration("connection URI is required".into()));
        }
        if self.thread_count == 0 {
            return Err(JobError::Configuration("thread count must be > 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(JobError::Configuration("queue capacity must be > 0".into()));
        }
        if self.progress_interval_secs == 0 {
            return Err(JobError::Configuration(
                "progress interval must be > 0".into(),
            ));
        }
        let has_process = blank_to_none(self.process_task.as_deref()).is_some()
            || blank_to_none(self.process_module.as_deref()).is_some();
        if !has_process {
            return Err(JobError::Configuration(
                "a process task or process module is required".into(),
            ));
        }
        let has_source = blank_to_none(self.uris_module.as_deref()).is_some()
            || blank_to_none(self.uris_file.as_deref()).is_some();
        if !has_source {
            return Err(JobError::Configuration(
                "a uris module or uris file is required".into(),
            ));
        }
        Ok(())
    }

    /// Parse a configuration from a JSON string and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Configuration`] on parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, JobError> {
        let config: Self = serde_json::from_str(input)
            .map_err(|e| JobError::Configuration(format!("parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

fn blank_to_none(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Load `.env` overrides into the process environment, when a file exists.
/// Call before [`resolve_layered`] so dotenv values participate in the
/// environment layer.
pub fn load_env_overrides() {
    let _ = dotenvy::dotenv();
}

/// Resolve one configuration value by precedence: positional argument first,
/// then an environment override, then a properties entry.
///
/// Blank values at any layer are treated as absent so a lower layer can
/// still supply the value.
#[must_use]
pub fn resolve_layered(
    positional: Option<&str>,
    env_key: &str,
    props: &HashMap<String, String>,
    prop_key: &str,
) -> Option<String> {
    if let Some(value) = blank_to_none(positional) {
        return Some(value.to_string());
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return Some(value.trim().to_string());
        }
    }
    props
        .get(prop_key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> JobConfig {
        JobConfig {
            connection_uri: "backend://localhost:8000".into(),
            uris_file: Some("items.txt".into()),
            process_module: Some("/m/process.xqy".into()),
            ..JobConfig::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        valid().validate().unwrap();
    }

    #[test]
    fn missing_uri_fails() {
        let mut config = valid();
        config.connection_uri = "  ".into();
        assert!(matches!(
            config.validate().unwrap_err(),
            JobError::Configuration(_)
        ));
    }

    #[test]
    fn missing_process_stage_fails() {
        let mut config = valid();
        config.process_module = None;
        config.process_task = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_item_source_fails() {
        let mut config = valid();
        config.uris_file = None;
        config.uris_module = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_threads_fails() {
        let mut config = valid();
        config.thread_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_round_trip() {
        let config = JobConfig::from_json_str(
            r#"{
                "connection_uri": "backend://h:1",
                "uris_file": "items.txt",
                "process_module": "/m/p.xqy",
                "thread_count": 4,
                "queue_capacity": 16
            }"#,
        )
        .unwrap();
        assert_eq!(config.thread_count, 4);
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.module_root, "/");
    }

    #[test]
    fn bad_json_is_configuration_error() {
        assert!(matches!(
            JobConfig::from_json_str("{nope").unwrap_err(),
            JobError::Configuration(_)
        ));
    }

    #[test]
    fn layered_resolution_prefers_positional_then_env_then_props() {
        let mut props = HashMap::new();
        props.insert("thread-count".to_string(), "8".to_string());

        let got = resolve_layered(Some("4"), "BULKJOB_TEST_UNSET", &props, "thread-count");
        assert_eq!(got.as_deref(), Some("4"));

        let got = resolve_layered(None, "BULKJOB_TEST_UNSET", &props, "thread-count");
        assert_eq!(got.as_deref(), Some("8"));

        std::env::set_var("BULKJOB_TEST_THREADS", "6");
        let got = resolve_layered(None, "BULKJOB_TEST_THREADS", &props, "thread-count");
        assert_eq!(got.as_deref(), Some("6"));
        std::env::remove_var("BULKJOB_TEST_THREADS");

        let got = resolve_layered(Some("  "), "BULKJOB_TEST_UNSET", &props, "absent");
        assert_eq!(got, None);
    }
}
