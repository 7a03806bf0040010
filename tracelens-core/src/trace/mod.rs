//! Trace container handling and reconstruction pipeline
//!
//! ```text
//! ┌──────────────┐     ┌─────────┐     ┌──────────────┐     ┌────────────┐
//! │ trace.zip or │ ──► │ decode  │ ──► │ action tree  │ ──► │ correlated │
//! │    folder    │     │ streams │     │ construction │     │    tree    │
//! └──────────────┘     └─────────┘     └──────────────┘     └────────────┘
//! ```
//!
//! Zip containers extract into a scoped temporary directory that is removed
//! when the [`TraceContainer`] drops, on every exit path. Everything a
//! caller keeps ([`ParsedTrace`]) is fully owned in-memory data.

pub mod correlate;
pub mod decode;
pub mod failure;
pub mod tree;

use crate::error::{Error, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tree::ActionTree;

/// An opened trace container: either an extracted zip or a plain folder.
#[derive(Debug)]
pub struct TraceContainer {
    root: PathBuf,
    // Keeps the extraction directory alive; dropped (and removed) with self.
    _extracted: Option<TempDir>,
}

/// Fully-owned reconstruction output; independent of the container.
pub struct ParsedTrace {
    /// The action forest with network events correlated in.
    pub tree: ActionTree,
    /// Composed stack trace of the first failure, or the no-error sentinel.
    pub stack_trace: String,
}

impl TraceContainer {
    /// Open a `trace.zip` or an already-extracted trace folder.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ContainerNotFound(path.display().to_string()));
        }
        if path.is_dir() {
            return Ok(Self {
                root: path.to_path_buf(),
                _extracted: None,
            });
        }

        let extracted = TempDir::with_prefix("pw-trace-")?;
        tracing::debug!(
            zip = %path.display(),
            dir = %extracted.path().display(),
            "Extracting trace container"
        );
        let mut archive = zip::ZipArchive::new(File::open(path)?)?;
        archive.extract(extracted.path())?;

        Ok(Self {
            root: extracted.path().to_path_buf(),
            _extracted: Some(extracted),
        })
    }

    /// Root directory of the (possibly extracted) container.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Raw text of the primary stream.
    ///
    /// Prefers `trace.trace`, else the first `*.trace` entry. A container
    /// with no `.trace` entry is a hard failure; nothing downstream can
    /// proceed without the primary stream.
    pub fn trace_text(&self) -> Result<String> {
        let preferred = self.root.join("trace.trace");
        let trace_path = if preferred.exists() {
            preferred
        } else {
            self.entries_with_extension("trace")
                .into_iter()
                .next()
                .ok_or_else(|| Error::MissingTrace(self.root.display().to_string()))?
        };
        Ok(std::fs::read_to_string(trace_path)?)
    }

    /// Raw texts of all auxiliary `.network` streams.
    pub fn network_texts(&self) -> Vec<String> {
        self.entries_with_extension("network")
            .into_iter()
            .filter_map(|path| std::fs::read_to_string(path).ok())
            .collect()
    }

    /// Look up a resource blob by identifier (attachment path basename or
    /// screencast frame sha1).
    pub fn resource(&self, id: &str) -> Option<Vec<u8>> {
        let name = Path::new(id).file_name()?;
        std::fs::read(self.root.join("resources").join(name)).ok()
    }

    /// Run the full reconstruction pipeline: decode both stream classes,
    /// build the action tree, correlate network activity, and compose the
    /// first-failure stack trace.
    pub fn parse(&self) -> Result<ParsedTrace> {
        let events = decode::decode_events(&self.trace_text()?);
        let pool = decode::decode_network(&self.network_texts());

        let stack_trace = failure::compose_first_error_stack_trace(&events);
        let mut tree = tree::build_action_tree(events);
        correlate::correlate_network(&mut tree, &pool);

        tracing::debug!(
            actions = tree.len(),
            network_events = pool.len(),
            "Reconstructed trace"
        );
        Ok(ParsedTrace { tree, stack_trace })
    }
}

/// Convenience: decode a primary stream and build its action tree.
pub fn build_action_tree_from_text(trace_text: &str) -> ActionTree {
    tree::build_action_tree(decode::decode_events(trace_text))
}

/// Convenience: enrich a built tree from raw `.network` stream texts.
pub fn correlate_network_from_texts(tree: &mut ActionTree, network_texts: &[String]) {
    let pool = decode::decode_network(network_texts);
    correlate::correlate_network(tree, &pool);
}

/// Convenience: compose the first-failure stack trace from raw stream text.
pub fn compose_first_error_stack_trace_from_text(trace_text: &str) -> String {
    failure::compose_first_error_stack_trace(&decode::decode_events(trace_text))
}

/// Compose the first-failure stack trace for a container path, degrading to
/// the [`failure::TRACE_NOT_FOUND`] sentinel when the container or its
/// primary stream cannot be located.
pub fn compose_stack_trace_for_container(path: &Path) -> String {
    match TraceContainer::open(path).and_then(|container| container.trace_text()) {
        Ok(text) => compose_first_error_stack_trace_from_text(&text),
        Err(_) => failure::TRACE_NOT_FOUND.to_string(),
    }
}

impl TraceContainer {
    fn entries_with_extension(&self, extension: &str) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&self.root)
            .ok()
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(extension))
            .collect();
        entries.sort();
        entries
    }
}
