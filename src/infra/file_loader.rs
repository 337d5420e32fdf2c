//! Loader reading newline-delimited identifiers from a local file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use tracing::debug;

use crate::core::error::JobError;
use crate::core::loader::{Loader, LoaderInfo, UriRewriter, WorkItem};

/// Streams identifiers from a newline-delimited UTF-8 file.
///
/// The total is computed by a separate line-count pre-pass over the file;
/// blank and whitespace-only lines are skipped in both passes so the count
/// matches what iteration delivers.
pub struct FileLoader {
    path: PathBuf,
    rewrite_rules: String,
    rewriter: UriRewriter,
    reader: Option<BufReader<File>>,
}

impl FileLoader {
    /// Loader over `path`, with an optional flat rewrite-rule list (parsed
    /// and validated at `open()`).
    pub fn new(path: impl Into<PathBuf>, rewrite_rules: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            rewrite_rules: rewrite_rules.into(),
            rewriter: UriRewriter::default(),
            reader: None,
        }
    }

    fn open_file(&self) -> Result<File, JobError> {
        File::open(&self.path).map_err(|e| {
            JobError::Configuration(format!("items file `{}`: {e}", self.path.display()))
        })
    }
}

impl Loader for FileLoader {
    fn open(&mut self) -> Result<LoaderInfo, JobError> {
        self.rewriter = UriRewriter::parse(&self.rewrite_rules)?;

        // Pre-pass: count the non-blank lines.
        let mut total = 0usize;
        for line in BufReader::new(self.open_file()?).lines() {
            let line = line.map_err(|e| {
                JobError::ItemRead(format!("counting `{}`: {e}", self.path.display()))
            })?;
            if !line.trim().is_empty() {
                total += 1;
            }
        }
        self.reader = Some(BufReader::new(self.open_file()?));
        debug!(path = %self.path.display(), total, "file loader opened");

        Ok(LoaderInfo {
            total,
            batch_ref: None,
        })
    }

    fn next_item(&mut self) -> Result<Option<WorkItem>, JobError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let mut raw = String::new();
        loop {
            raw.clear();
            let read = reader.read_line(&mut raw).map_err(|e| {
                JobError::ItemRead(format!("reading `{}`: {e}", self.path.display()))
            })?;
            if read == 0 {
                return Ok(None);
            }
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(self.rewriter.apply(trimmed)));
        }
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn items_file(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.txt");
        let mut file = File::create(&path).unwrap();
        write!(file, "{contents}").unwrap();
        (dir, path)
    }

    #[test]
    fn counts_and_yields_non_blank_lines() {
        let (_dir, path) = items_file("/a.xml\n\n  \n/b.xml\n/c.xml\n");
        let mut loader = FileLoader::new(&path, "");

        let info = loader.open().unwrap();
        assert_eq!(info.total, 3);
        assert!(info.batch_ref.is_none());

        let mut items = Vec::new();
        while let Some(item) = loader.next_item().unwrap() {
            items.push(item);
        }
        assert_eq!(items, vec!["/a.xml", "/b.xml", "/c.xml"]);
        loader.close();
    }

    #[test]
    fn rewrite_rules_apply_to_every_item() {
        let (_dir, path) = items_file("/old/a.xml\n/old/b.xml\n");
        let mut loader = FileLoader::new(&path, "^/old,/new");

        loader.open().unwrap();
        assert_eq!(loader.next_item().unwrap().unwrap(), "/new/a.xml");
        assert_eq!(loader.next_item().unwrap().unwrap(), "/new/b.xml");
    }

    #[test]
    fn odd_rewrite_list_fails_at_open() {
        let (_dir, path) = items_file("/a.xml\n");
        let mut loader = FileLoader::new(&path, "only-one");
        assert!(matches!(
            loader.open().unwrap_err(),
            JobError::Configuration(_)
        ));
    }

    #[test]
    fn missing_file_fails_at_open() {
        let mut loader = FileLoader::new("/no/such/items.txt", "");
        assert!(matches!(
            loader.open().unwrap_err(),
            JobError::Configuration(_)
        ));
    }
}
