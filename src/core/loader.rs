//! Work-item enumeration: the loader contract, identifier rewriting, and the
//! compact enumeration buffer.

use regex::Regex;

use crate::core::error::JobError;

/// One unit of work: an opaque string identifier.
pub type WorkItem = String;

/// What `open()` learns about the run.
#[derive(Debug, Clone, Default)]
pub struct LoaderInfo {
    /// Expected total number of items. Fixed for the job's duration.
    pub total: usize,
    /// Opaque token correlating this run's shared artifacts.
    pub batch_ref: Option<String>,
}

/// Streams work-item identifiers from some source.
///
/// `open()` establishes any connection needed, computes the total count T
/// (possibly via a dedicated round trip), and may yield a batch-reference
/// token. The sequence is lazy, finite, and forward-only; it cannot be
/// restarted. Blank and whitespace-only raw lines are skipped transparently;
/// genuine read failures surface as [`JobError::ItemRead`].
pub trait Loader: Send {
    /// Open the source and learn the run's totals.
    fn open(&mut self) -> Result<LoaderInfo, JobError>;

    /// Next rewritten identifier, or `None` when the sequence is exhausted.
    fn next_item(&mut self) -> Result<Option<WorkItem>, JobError>;

    /// Release resources. Idempotent.
    fn close(&mut self);
}

/// Ordered (pattern, replacement) rewrite rules applied to every identifier
/// before it leaves the loader.
#[derive(Debug, Clone, Default)]
pub struct UriRewriter {
    rules: Vec<(Regex, String)>,
}

impl UriRewriter {
    /// Parse a flat comma-separated `pattern,replacement,...` sequence.
    ///
    /// # Errors
    ///
    /// An odd element count or an unparsable pattern is a
    /// [`JobError::Configuration`].
    pub fn parse(list: &str) -> Result<Self, JobError> {
        let list = list.trim();
        if list.is_empty() {
            return Ok(Self::default());
        }
        let parts: Vec<&str> = list.split(',').collect();
        if parts.len() % 2 != 0 {
            return Err(JobError::Configuration(format!(
                "rewrite rule list has {} elements; patterns and replacements must pair up",
                parts.len()
            )));
        }
        let mut rules = Vec::with_capacity(parts.len() / 2);
        for pair in parts.chunks(2) {
            let pattern = Regex::new(pair[0].trim()).map_err(|e| {
                JobError::Configuration(format!("bad rewrite pattern `{}`: {e}", pair[0]))
            })?;
            rules.push((pattern, pair[1].trim().to_string()));
        }
        Ok(Self { rules })
    }

    /// Apply every rule, in order, to one identifier.
    #[must_use]
    pub fn apply(&self, item: &str) -> String {
        let mut out = item.to_string();
        for (pattern, replacement) in &self.rules {
            out = pattern.replace_all(&out, replacement.as_str()).into_owned();
        }
        out
    }

    /// Whether any rules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Compact buffer for enumerated identifiers.
///
/// Items are stored as one contiguous character region plus an offset table,
/// not one heap allocation per item, so buffering millions of identifiers
/// stays cheap while enumeration continues.
#[derive(Debug, Default)]
pub struct ItemBuffer {
    data: String,
    ends: Vec<usize>,
}

impl ItemBuffer {
    /// Buffer sized for roughly `items` identifiers.
    #[must_use]
    pub fn with_capacity(items: usize) -> Self {
        Self {
            data: String::with_capacity(items.saturating_mul(32)),
            ends: Vec::with_capacity(items),
        }
    }

    /// Append one identifier.
    pub fn push(&mut self, item: &str) {
        self.data.push_str(item);
        self.ends.push(self.data.len());
    }

    /// Number of buffered identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ends.len()
    }

    /// Whether the buffer holds no identifiers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    /// The identifier at `index`, if present.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        let end = *self.ends.get(index)?;
        let start = if index == 0 { 0 } else { self.ends[index - 1] };
        Some(&self.data[start..end])
    }

    /// Iterate identifiers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewriter_empty_list_is_noop() {
        let rw = UriRewriter::parse("").unwrap();
        assert!(rw.is_empty());
        assert_eq!(rw.apply("/a.xml"), "/a.xml");
    }

    #[test]
    fn rewriter_applies_rules_in_order() {
        let rw = UriRewriter::parse("^/stage,/live,\\.tmp$,.xml").unwrap();
        assert_eq!(rw.apply("/stage/doc.tmp"), "/live/doc.xml");
    }

    #[test]
    fn rewriter_odd_list_is_configuration_error() {
        let err = UriRewriter::parse("a,b,c").unwrap_err();
        assert!(matches!(err, JobError::Configuration(_)));
    }

    #[test]
    fn rewriter_bad_pattern_is_configuration_error() {
        let err = UriRewriter::parse("[,x").unwrap_err();
        assert!(matches!(err, JobError::Configuration(_)));
    }

    #[test]
    fn item_buffer_preserves_order_and_bounds() {
        let mut buf = ItemBuffer::with_capacity(3);
        buf.push("/a.xml");
        buf.push("/bb.xml");
        buf.push("/c.xml");

        assert_eq!(buf.len(), 3);
        assert_eq!(buf.get(0), Some("/a.xml"));
        assert_eq!(buf.get(1), Some("/bb.xml"));
        assert_eq!(buf.get(2), Some("/c.xml"));
        assert_eq!(buf.get(3), None);

        let collected: Vec<&str> = buf.iter().collect();
        assert_eq!(collected, vec!["/a.xml", "/bb.xml", "/c.xml"]);
    }

    #[test]
    fn item_buffer_empty() {
        let buf = ItemBuffer::default();
        assert!(buf.is_empty());
        assert_eq!(buf.get(0), None);
    }
}
