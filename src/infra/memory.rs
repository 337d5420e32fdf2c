//! In-memory backend for development and testing.
//!
//! Invocations are answered by a caller-supplied handler closure; installed
//! modules and observed invocations are recorded so tests can assert on
//! exactly-once dispatch and variable wiring.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::core::task::{ModuleRef, ITEM_VAR};
use crate::infra::backend::{
    Backend, BackendError, Connector, InvokeRequest, ResultStream, Session,
};

/// Answers one invocation with result lines or a failure.
pub type InvokeHandler =
    dyn Fn(&ModuleRef, &InvokeRequest) -> Result<Vec<String>, BackendError> + Send + Sync;

/// One recorded invocation: the item variable (when present) and the request.
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    /// Value of the item variable, empty for batch-level hooks.
    pub item: String,
    /// All variables passed with the request.
    pub vars: Vec<(String, String)>,
    /// Whether server-side caching was allowed.
    pub cache_results: bool,
}

/// In-memory backend handle.
pub struct MemoryBackend {
    handler: Arc<InvokeHandler>,
    installed: RwLock<HashMap<String, String>>,
    invocations: Arc<Mutex<Vec<RecordedInvocation>>>,
    supports_install: bool,
}

impl MemoryBackend {
    /// Backend answering every invocation through `handler`.
    pub fn new(
        handler: impl Fn(&ModuleRef, &InvokeRequest) -> Result<Vec<String>, BackendError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Arc::new(handler),
            installed: RwLock::new(HashMap::new()),
            invocations: Arc::new(Mutex::new(Vec::new())),
            supports_install: true,
        })
    }

    /// Backend that echoes the item variable back as the single result line.
    pub fn echo() -> Arc<Self> {
        Self::new(|_, request| {
            let item = request
                .vars
                .iter()
                .find(|(name, _)| name == ITEM_VAR)
                .map(|(_, value)| value.clone())
                .unwrap_or_default();
            Ok(vec![item])
        })
    }

    /// Same backend, reporting that it cannot host installed modules.
    #[must_use]
    pub fn without_install_support(&self) -> Arc<Self> {
        Arc::new(Self {
            handler: Arc::clone(&self.handler),
            installed: RwLock::new(HashMap::new()),
            invocations: Arc::clone(&self.invocations),
            supports_install: false,
        })
    }

    /// Modules installed through this handle.
    pub fn installed_modules(&self) -> Vec<String> {
        self.installed.read().keys().cloned().collect()
    }

    /// Item values observed across all invocations, in completion order.
    pub fn invoked_items(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .map(|inv| inv.item.clone())
            .collect()
    }

    /// Snapshot of all recorded invocations.
    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.lock().clone()
    }

}

fn record(log: &Mutex<Vec<RecordedInvocation>>, request: &InvokeRequest) {
    let item = request
        .vars
        .iter()
        .find(|(name, _)| name == ITEM_VAR)
        .map(|(_, value)| value.clone())
        .unwrap_or_default();
    log.lock().push(RecordedInvocation {
        item,
        vars: request.vars.clone(),
        cache_results: request.cache_results,
    });
}

struct MemorySession {
    handler: Arc<InvokeHandler>,
    invocations: Arc<Mutex<Vec<RecordedInvocation>>>,
}

struct MemoryResultStream {
    lines: VecDeque<String>,
}

#[async_trait]
impl ResultStream for MemoryResultStream {
    async fn next_line(&mut self) -> Result<Option<String>, BackendError> {
        Ok(self.lines.pop_front())
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn invoke(
        &mut self,
        module: &ModuleRef,
        request: InvokeRequest,
    ) -> Result<Box<dyn ResultStream>, BackendError> {
        record(&self.invocations, &request);
        let lines = (self.handler)(module, &request)?;
        Ok(Box::new(MemoryResultStream {
            lines: lines.into(),
        }))
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn new_session(&self, _target: &str) -> Result<Box<dyn Session>, BackendError> {
        Ok(Box::new(MemorySession {
            handler: Arc::clone(&self.handler),
            invocations: Arc::clone(&self.invocations),
        }))
    }

    fn supports_module_install(&self) -> bool {
        self.supports_install
    }

    async fn install_module(&self, path: &str, source: &str) -> Result<(), BackendError> {
        if !self.supports_install {
            return Err(BackendError("backend is filesystem-configured".into()));
        }
        self.installed
            .write()
            .insert(path.to_string(), source.to_string());
        Ok(())
    }
}

/// Connector handing out a pre-built in-memory backend for any URI.
pub struct MemoryConnector {
    backend: Arc<MemoryBackend>,
    /// When set, `connect` fails with this message (transport-failure tests).
    refuse: Option<String>,
}

impl MemoryConnector {
    /// Connector for the given backend.
    #[must_use]
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self {
            backend,
            refuse: None,
        }
    }

    /// Connector that refuses every connection attempt.
    #[must_use]
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            backend: MemoryBackend::echo(),
            refuse: Some(reason.into()),
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _uri: &str) -> Result<Arc<dyn Backend>, BackendError> {
        if let Some(reason) = &self.refuse {
            return Err(BackendError(reason.clone()));
        }
        Ok(Arc::clone(&self.backend) as Arc<dyn Backend>)
    }
}
