//! Persisted analysis context store
//!
//! One JSON document per scope holds the ordered log of prior analysis
//! results. Records are only ever appended; retention is someone else's
//! problem. Reads tolerate an absent or corrupt document by degrading to an
//! empty store; a broken store must never kill an analysis run.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default file name of the context document within a scope folder.
pub const CONTEXT_FILE_NAME: &str = "analysis-context.json";

/// A single prior analysis result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredContext {
    /// Hex digest of the normalized stack trace.
    pub stack_trace_hash: String,
    pub normalized_stack_trace: String,
    pub stack_trace: String,
    /// Folder the analyzed trace came from.
    pub folder_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    /// The LLM's explanation of the failure.
    pub explanation: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContextDocument {
    contexts: Vec<StoredContext>,
}

/// Append-only store of [`StoredContext`] records, backed by one JSON
/// document.
#[derive(Debug)]
pub struct ContextStore {
    path: PathBuf,
    contexts: Vec<StoredContext>,
}

impl ContextStore {
    /// Load the store at `path`, treating a missing or unparseable document
    /// as empty.
    pub fn load(path: &Path) -> Self {
        let contexts = match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<ContextDocument>(&text) {
                Ok(doc) => doc.contexts,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Context store is corrupt, treating as empty"
                    );
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            path: path.to_path_buf(),
            contexts,
        }
    }

    /// Store document path for a scope folder.
    pub fn path_for_scope(scope: &Path) -> PathBuf {
        scope.join(CONTEXT_FILE_NAME)
    }

    /// All records, oldest first.
    pub fn contexts(&self) -> &[StoredContext] {
        &self.contexts
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Append a record and rewrite the document.
    ///
    /// The document is staged in a sibling temp file and swapped in with a
    /// rename, so a reader never observes a partial document and a crash
    /// mid-write keeps the previous one intact.
    pub fn append(&mut self, context: StoredContext) -> Result<()> {
        self.contexts.push(context);
        let doc = ContextDocument {
            contexts: self.contexts.clone(),
        };
        let text = serde_json::to_string_pretty(&doc)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.write_all(text.as_bytes())?;
        staged.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
