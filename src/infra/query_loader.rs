//! Loader that enumerates items by invoking a query module on the backend.

use std::sync::Arc;

use tracing::debug;

use crate::core::error::JobError;
use crate::core::loader::{Loader, LoaderInfo, UriRewriter, WorkItem};
use crate::core::task::ModuleRef;
use crate::infra::backend::{Backend, InvokeRequest, ResultStream, Session};

/// Streams identifiers from a query module invocation.
///
/// The result stream is expected to yield an optional non-numeric
/// batch-reference line, then the total count, then one identifier per line.
/// Result sets may be unbounded, so the invocation always disallows
/// server-side caching/buffering. Custom named parameters from configuration
/// are forwarded to the query.
pub struct QueryLoader {
    backend: Arc<dyn Backend>,
    target: String,
    module: ModuleRef,
    params: Vec<(String, String)>,
    rewrite_rules: String,
    rewriter: UriRewriter,
    rt: Option<tokio::runtime::Runtime>,
    session: Option<Box<dyn Session>>,
    stream: Option<Box<dyn ResultStream>>,
}

impl QueryLoader {
    /// Loader invoking `module` against `target` on the given backend.
    pub fn new(
        backend: Arc<dyn Backend>,
        target: impl Into<String>,
        module: ModuleRef,
        params: Vec<(String, String)>,
        rewrite_rules: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            target: target.into(),
            module,
            params,
            rewrite_rules: rewrite_rules.into(),
            rewriter: UriRewriter::default(),
            rt: None,
            session: None,
            stream: None,
        }
    }

    fn next_raw_line(&mut self) -> Result<Option<String>, JobError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        let rt = self
            .rt
            .as_ref()
            .ok_or_else(|| JobError::Internal("query loader used before open".into()))?;
        rt.block_on(stream.next_line())
            .map_err(|e| JobError::ItemRead(format!("query result stream: {e}")))
    }
}

impl Loader for QueryLoader {
    fn open(&mut self) -> Result<LoaderInfo, JobError> {
        self.rewriter = UriRewriter::parse(&self.rewrite_rules)?;

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| JobError::Internal(format!("loader runtime: {e}")))?;

        let mut request = InvokeRequest::new().uncached();
        for (name, value) in &self.params {
            request = request.var(name, value);
        }

        let (session, stream) = rt
            .block_on(async {
                let mut session = self.backend.new_session(&self.target).await?;
                let stream = session.invoke(&self.module, request).await?;
                Ok::<_, crate::infra::backend::BackendError>((session, stream))
            })
            .map_err(|e| JobError::Transport(format!("query loader open: {e}")))?;

        self.rt = Some(rt);
        self.session = Some(session);
        self.stream = Some(stream);

        // Header: an optional batch-reference line, then the count.
        let mut batch_ref = None;
        let first = self
            .next_raw_line()?
            .ok_or_else(|| JobError::ItemRead("query returned no count".into()))?;
        let total = match first.trim().parse::<usize>() {
            Ok(count) => count,
            Err(_) => {
                batch_ref = Some(first.trim().to_string());
                let second = self
                    .next_raw_line()?
                    .ok_or_else(|| JobError::ItemRead("query returned no count".into()))?;
                second.trim().parse::<usize>().map_err(|_| {
                    JobError::ItemRead(format!("expected item count, got `{second}`"))
                })?
            }
        };
        debug!(total, batch_ref = ?batch_ref, "query loader opened");

        Ok(LoaderInfo { total, batch_ref })
    }

    fn next_item(&mut self) -> Result<Option<WorkItem>, JobError> {
        loop {
            match self.next_raw_line()? {
                None => return Ok(None),
                Some(raw) => {
                    let trimmed = raw.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Ok(Some(self.rewriter.apply(trimmed)));
                }
            }
        }
    }

    fn close(&mut self) {
        self.stream = None;
        if let Some(mut session) = self.session.take() {
            if let Some(rt) = self.rt.as_ref() {
                let _ = rt.block_on(session.close());
            }
        }
        self.rt = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::MemoryBackend;

    fn loader_for(lines: Vec<&'static str>) -> QueryLoader {
        let backend =
            MemoryBackend::new(move |_, _| Ok(lines.iter().map(|s| (*s).to_string()).collect()));
        QueryLoader::new(
            backend as Arc<dyn Backend>,
            "docs",
            ModuleRef::Path("/m/uris.xqy".into()),
            Vec::new(),
            "",
        )
    }

    #[test]
    fn header_with_batch_ref_and_count() {
        let mut loader = loader_for(vec!["batch-7", "2", "/a.xml", "/b.xml"]);
        let info = loader.open().unwrap();
        assert_eq!(info.total, 2);
        assert_eq!(info.batch_ref.as_deref(), Some("batch-7"));
        assert_eq!(loader.next_item().unwrap().unwrap(), "/a.xml");
        assert_eq!(loader.next_item().unwrap().unwrap(), "/b.xml");
        assert!(loader.next_item().unwrap().is_none());
        loader.close();
    }

    #[test]
    fn header_without_batch_ref() {
        let mut loader = loader_for(vec!["1", "/only.xml"]);
        let info = loader.open().unwrap();
        assert_eq!(info.total, 1);
        assert!(info.batch_ref.is_none());
    }

    #[test]
    fn blank_result_lines_are_skipped() {
        let mut loader = loader_for(vec!["2", "", "/a.xml", "   ", "/b.xml"]);
        loader.open().unwrap();
        assert_eq!(loader.next_item().unwrap().unwrap(), "/a.xml");
        assert_eq!(loader.next_item().unwrap().unwrap(), "/b.xml");
    }

    #[test]
    fn invocation_disallows_result_caching() {
        let backend = MemoryBackend::new(|_, request| {
            assert!(!request.cache_results);
            Ok(vec!["0".to_string()])
        });
        let mut loader = QueryLoader::new(
            Arc::clone(&backend) as Arc<dyn Backend>,
            "docs",
            ModuleRef::Path("/m/uris.xqy".into()),
            Vec::new(),
            "",
        );
        let info = loader.open().unwrap();
        assert_eq!(info.total, 0);
        let recorded = backend.invocations();
        assert_eq!(recorded.len(), 1);
        assert!(!recorded[0].cache_results);
    }

    #[test]
    fn custom_params_are_forwarded() {
        let backend = MemoryBackend::new(|_, request| {
            let has = request
                .vars
                .iter()
                .any(|(name, value)| name == "depth" && value == "3");
            assert!(has, "expected custom parameter to be forwarded");
            Ok(vec!["0".to_string()])
        });
        let mut loader = QueryLoader::new(
            backend as Arc<dyn Backend>,
            "docs",
            ModuleRef::Path("/m/uris.xqy".into()),
            vec![("depth".into(), "3".into())],
            "",
        );
        loader.open().unwrap();
    }
}
