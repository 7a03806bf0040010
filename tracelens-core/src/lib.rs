//! # tracelens-core
//!
//! Core library for tracelens - a Playwright trace analyzer with failure
//! deduplication.
//!
//! This library provides:
//! - Decoding of the newline-delimited trace and network streams
//! - Action tree reconstruction and temporal network correlation
//! - First-failure stack trace composition
//! - Fingerprinting and similarity search over prior failures
//! - A persisted analysis context store and the LLM analysis workflow
//!
//! ## Architecture
//!
//! Data flows in two strands from the decoded streams:
//! - **Reconstruction:** decoder → action tree builder → temporal
//!   correlator, producing the navigable tree consumed by reporting
//! - **Deduplication:** decoder → stack trace composer → fingerprint
//!   engine → context store, producing the skip-vs-analyze decision
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use tracelens_core::trace::TraceContainer;
//!
//! let container = TraceContainer::open(Path::new("trace.zip")).expect("open trace");
//! let parsed = container.parse().expect("parse trace");
//! println!("{} actions, first failure:\n{}", parsed.tree.len(), parsed.stack_trace);
//! ```

// Re-export commonly used items at the crate root
pub use analysis::{create_llm_client, AnalysisOutcome, FolderEntry, LlmClient, TraceAnalyzer};
pub use config::Config;
pub use error::{Error, Result};
pub use fingerprint::{
    find_similar, fingerprint, normalize, similarity, MatchKind, SimilarMatch,
    DEFAULT_SIMILARITY_THRESHOLD,
};
pub use store::{ContextStore, StoredContext};
pub use trace::{ParsedTrace, TraceContainer};
pub use types::*;

// Public modules
pub mod analysis;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod format;
pub mod logging;
pub mod store;
pub mod trace;
pub mod types;
