//! Backend collaborator traits for the remote execution service.
//!
//! The wire protocol and session mechanics live behind these traits. The
//! orchestration engine only needs to connect, open sessions against a target
//! collection, invoke a module (or adhoc script) with named variables, and
//! pull result lines from a stream.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::error::JobError;
use crate::core::task::ModuleRef;

/// Failure raised by a backend implementation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct BackendError(
    /// Human-readable failure description.
    pub String,
);

impl From<BackendError> for JobError {
    fn from(err: BackendError) -> Self {
        Self::Transport(err.0)
    }
}

/// Named variables and options accompanying one invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Named variables visible to the invoked module.
    pub vars: Vec<(String, String)>,
    /// Whether the server may cache or buffer the full result set. Loaders
    /// enumerating unbounded result sets must turn this off.
    pub cache_results: bool,
}

impl Default for InvokeRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl InvokeRequest {
    /// New request with caching allowed and no variables.
    #[must_use]
    pub fn new() -> Self {
        Self {
            vars: Vec::new(),
            cache_results: true,
        }
    }

    /// Add a named variable.
    #[must_use]
    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.push((name.into(), value.into()));
        self
    }

    /// Disallow server-side result caching/buffering.
    #[must_use]
    pub fn uncached(mut self) -> Self {
        self.cache_results = false;
        self
    }
}

/// A pull-based stream of result lines from one invocation.
#[async_trait]
pub trait ResultStream: Send {
    /// Pull the next result line; `None` at end of stream.
    async fn next_line(&mut self) -> Result<Option<String>, BackendError>;
}

/// One open session against a backend target (collection or selector).
#[async_trait]
pub trait Session: Send {
    /// Invoke a module or adhoc script with the given request.
    async fn invoke(
        &mut self,
        module: &ModuleRef,
        request: InvokeRequest,
    ) -> Result<Box<dyn ResultStream>, BackendError>;

    /// Release the session.
    async fn close(&mut self) -> Result<(), BackendError>;
}

/// A connected backend handle, shared across workers.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Open a new session against `target`.
    async fn new_session(&self, target: &str) -> Result<Box<dyn Session>, BackendError>;

    /// Whether this backend can host modules installed by the client. A
    /// filesystem-configured backend cannot; callers warn and proceed
    /// assuming the resources are already present.
    fn supports_module_install(&self) -> bool;

    /// Install server-side code at `path`.
    async fn install_module(&self, path: &str, source: &str) -> Result<(), BackendError>;
}

/// Establishes the connection to a backend.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to the backend at `uri`.
    async fn connect(&self, uri: &str) -> Result<Arc<dyn Backend>, BackendError>;
}
