//! Builder wiring a scheduler from configuration and collaborators.

use crate::config::JobConfig;
use crate::core::error::JobError;
use crate::core::factory::TaskRegistry;
use crate::core::loader::Loader;
use crate::core::scheduler::JobScheduler;
use crate::core::task::Task;
use crate::infra::backend::Connector;
use crate::util::credential::{CredentialResolver, Decrypter};

/// Fluent wiring for a [`JobScheduler`].
///
/// The connector is mandatory; the task registry starts with the built-in
/// kinds, credentials default to passthrough, and the enumeration source
/// defaults to what configuration names (query module or items file).
pub struct JobBuilder {
    config: JobConfig,
    connector: Option<Box<dyn Connector>>,
    registry: TaskRegistry,
    resolver: CredentialResolver,
    loader: Option<Box<dyn Loader>>,
}

impl JobBuilder {
    /// Start from a configuration.
    #[must_use]
    pub fn new(config: JobConfig) -> Self {
        Self {
            config,
            connector: None,
            registry: TaskRegistry::with_builtins(),
            resolver: CredentialResolver::passthrough(),
            loader: None,
        }
    }

    /// Set the backend connector.
    #[must_use]
    pub fn connector(mut self, connector: Box<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Register an additional task kind under `name`.
    #[must_use]
    pub fn register_task(
        mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn Task> + Send + Sync + 'static,
    ) -> Self {
        self.registry.register(name, factory);
        self
    }

    /// Use a credential decrypter for configuration values.
    #[must_use]
    pub fn decrypter(mut self, decrypter: Box<dyn Decrypter>) -> Self {
        self.resolver = CredentialResolver::with_decrypter(decrypter);
        self
    }

    /// Override the enumeration source with a custom loader.
    #[must_use]
    pub fn loader(mut self, loader: Box<dyn Loader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Validate configuration and assemble the scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Configuration`] for invalid configuration or a
    /// missing connector.
    pub fn build(self) -> Result<JobScheduler, JobError> {
        self.config.validate()?;
        let connector = self
            .connector
            .ok_or_else(|| JobError::Configuration("a backend connector is required".into()))?;
        Ok(JobScheduler::assemble(
            self.config,
            connector,
            self.registry,
            self.resolver,
            self.loader,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::{MemoryBackend, MemoryConnector};

    fn config() -> JobConfig {
        JobConfig {
            connection_uri: "backend://localhost:8000".into(),
            uris_file: Some("items.txt".into()),
            process_module: Some("/m/process.xqy".into()),
            ..JobConfig::default()
        }
    }

    #[test]
    fn missing_connector_is_rejected() {
        let err = JobBuilder::new(config()).build().unwrap_err();
        assert!(matches!(err, JobError::Configuration(_)));
    }

    #[test]
    fn invalid_config_is_rejected_before_wiring() {
        let mut bad = config();
        bad.connection_uri = String::new();
        let err = JobBuilder::new(bad)
            .connector(Box::new(MemoryConnector::new(MemoryBackend::echo())))
            .build()
            .unwrap_err();
        assert!(matches!(err, JobError::Configuration(_)));
    }

    #[test]
    fn wires_a_scheduler() {
        let scheduler = JobBuilder::new(config())
            .connector(Box::new(MemoryConnector::new(MemoryBackend::echo())))
            .build()
            .unwrap();
        assert_eq!(scheduler.state(), crate::core::scheduler::JobState::Init);
    }
}
