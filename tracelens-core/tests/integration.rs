//! Integration tests for the tracelens reconstruction and analysis pipeline
//!
//! These tests build real trace.zip containers on the fly and run the full
//! flow: extraction, decoding, tree building, network correlation, stack
//! trace composition, fingerprinting, and store-backed deduplication.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tracelens_core::analysis::{LlmClient, TraceAnalyzer};
use tracelens_core::store::ContextStore;
use tracelens_core::trace::tree::TreeChild;
use tracelens_core::trace::TraceContainer;
use tracelens_core::{MatchKind, Result};

struct CountingClient {
    response: String,
    calls: AtomicUsize,
}

impl CountingClient {
    fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl LlmClient for CountingClient {
    fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// Write a trace.zip with the given .trace stream and an optional .network
/// stream into `dir`.
fn write_trace_zip(dir: &Path, trace: &str, network: Option<&str>) {
    std::fs::create_dir_all(dir).unwrap();
    let file = std::fs::File::create(dir.join("trace.zip")).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    writer.start_file("trace.trace", options).unwrap();
    writer.write_all(trace.as_bytes()).unwrap();
    if let Some(network) = network {
        writer.start_file("0-trace.network", options).unwrap();
        writer.write_all(network.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

fn timeout_trace(call_id: u32, duration: u32, selector: &str) -> String {
    format!(
        concat!(
            r#"{{"type":"before","callId":"call@{id}","apiName":"locator.click","startTime":0,"params":{{"selector":"{sel}"}}}}"#,
            "\n",
            r#"{{"type":"after","callId":"call@{id}","endTime":{end},"error":{{"message":"locator.click: Timeout {end}ms exceeded"}}}}"#,
            "\n"
        ),
        id = call_id,
        sel = selector,
        end = duration
    )
}

const PASSING_TRACE: &str = concat!(
    r#"{"type":"before","callId":"call@1","apiName":"page.goto","startTime":0,"params":{"url":"https://example.test"}}"#,
    "\n",
    r#"{"type":"before","callId":"call@2","parentId":"call@1","apiName":"page.waitForLoadState","startTime":2}"#,
    "\n",
    r#"{"type":"stdout","timestamp":3,"text":"loaded"}"#,
    "\n",
    r#"{"type":"after","callId":"call@2","endTime":8}"#,
    "\n",
    r#"{"type":"after","callId":"call@1","endTime":10}"#,
    "\n"
);

// ============================================
// Container round trips
// ============================================

#[test]
fn zip_round_trip_reconstructs_the_nested_tree() {
    let dir = TempDir::new().unwrap();
    let sub = dir.path().join("run-1");
    write_trace_zip(
        &sub,
        PASSING_TRACE,
        Some(concat!(
            r#"{"type":"resource-snapshot","monotonicTime":5.0,"snapshot":{"url":"https://example.test/app.js"}}"#,
            "\n",
            r#"{"type":"resource-snapshot","monotonicTime":99.0}"#,
            "\n"
        )),
    );

    let container = TraceContainer::open(&sub.join("trace.zip")).unwrap();
    let parsed = container.parse().unwrap();

    assert_eq!(parsed.tree.roots.len(), 1);
    let outer = match &parsed.tree.roots[0] {
        TreeChild::Action(id) => parsed.tree.node(*id),
        other => panic!("expected action root, got {:?}", other),
    };
    assert_eq!(outer.title, "page.goto");
    assert_eq!(outer.duration, Some(10.0));

    // Nested action plus its stdout leaf, in emission order.
    assert_eq!(outer.children.len(), 1);
    let inner = match &outer.children[0] {
        TreeChild::Action(id) => parsed.tree.node(*id),
        other => panic!("expected nested action, got {:?}", other),
    };
    assert_eq!(inner.title, "page.waitForLoadState");
    assert!(matches!(inner.children[0], TreeChild::Event(_)));

    // The 5.0ms network event falls in both intervals; 99.0 in neither.
    assert_eq!(outer.network.len(), 1);
    assert_eq!(inner.network.len(), 1);
}

// ============================================
// Folder analysis and deduplication
// ============================================

#[test]
fn folder_scan_deduplicates_recurring_failures() {
    let dir = TempDir::new().unwrap();
    write_trace_zip(
        &dir.path().join("login-retry-1"),
        &timeout_trace(1, 30000, "#submit"),
        None,
    );
    write_trace_zip(
        &dir.path().join("login-retry-2"),
        &timeout_trace(7, 15000, "#submit-alt"),
        None,
    );
    write_trace_zip(&dir.path().join("healthy"), PASSING_TRACE, None);

    let client = CountingClient::new("the submit button never became clickable");
    let analyzer = TraceAnalyzer::new(Some(&client), 0.8);
    let store_path = ContextStore::path_for_scope(dir.path());
    let mut store = ContextStore::load(&store_path);

    let entries = analyzer.analyze_folder(dir.path(), &mut store).unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.error.is_none()));

    // One LLM call for the first failure; the rerun reuses it, the healthy
    // run never reaches the LLM.
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.len(), 1);

    let reused: Vec<_> = entries
        .iter()
        .filter_map(|e| e.outcome.as_ref())
        .filter_map(|o| o.reused.as_ref())
        .collect();
    assert_eq!(reused.len(), 1);
    assert_eq!(reused[0].kind, MatchKind::Identical);

    // The store document survives a reload with the same decision.
    let reloaded = ContextStore::load(&store_path);
    assert_eq!(reloaded.len(), 1);
    assert_eq!(
        reloaded.contexts()[0].explanation,
        "the submit button never became clickable"
    );
}

#[test]
fn corrupt_store_does_not_block_analysis() {
    let dir = TempDir::new().unwrap();
    write_trace_zip(
        &dir.path().join("run-1"),
        &timeout_trace(1, 30000, "#submit"),
        None,
    );
    let store_path = ContextStore::path_for_scope(dir.path());
    std::fs::write(&store_path, "{ definitely not json").unwrap();

    let client = CountingClient::new("fresh analysis");
    let analyzer = TraceAnalyzer::new(Some(&client), 0.8);
    let mut store = ContextStore::load(&store_path);
    let entries = analyzer.analyze_folder(dir.path(), &mut store).unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].outcome.as_ref().unwrap().explanation,
        "fresh analysis"
    );
    // The rewritten document is valid again.
    assert_eq!(ContextStore::load(&store_path).len(), 1);
}

#[test]
fn broken_zip_is_recorded_not_fatal() {
    let dir = TempDir::new().unwrap();
    let sub = dir.path().join("truncated");
    std::fs::create_dir_all(&sub).unwrap();
    std::fs::write(sub.join("trace.zip"), b"not a zip at all").unwrap();
    write_trace_zip(&dir.path().join("healthy"), PASSING_TRACE, None);

    let analyzer = TraceAnalyzer::new(None, 0.8);
    let mut store = ContextStore::load(&ContextStore::path_for_scope(dir.path()));
    let entries = analyzer.analyze_folder(dir.path(), &mut store).unwrap();

    assert_eq!(entries.len(), 2);
    let healthy = entries
        .iter()
        .find(|e| e.subfolder.ends_with("healthy"))
        .unwrap();
    assert!(healthy.outcome.is_some());
    let broken = entries
        .iter()
        .find(|e| e.subfolder.ends_with("truncated"))
        .unwrap();
    assert!(broken.error.is_some());
}
