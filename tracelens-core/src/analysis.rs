//! Failure analysis workflow
//!
//! Ties the reconstruction pipeline to the deduplication store and the LLM:
//! parse the container, compose the first-failure stack trace, fingerprint
//! it, and either reuse a sufficiently similar prior explanation or ask the
//! LLM for a fresh one and append it to the store.

use crate::config::{LlmConfig, LlmProvider};
use crate::error::{Error, Result};
use crate::fingerprint::{self, MatchKind};
use crate::format::render_action_summary;
use crate::store::{ContextStore, StoredContext};
use crate::trace::failure::NO_ERROR_FOUND;
use crate::trace::TraceContainer;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are an expert Playwright test analyst. Given the reconstructed test actions and the failure stack trace, determine whether the failure is caused by the test code or by the application under test. Provide a concise explanation and actionable fixes if it is test code, or further analysis steps if it is an application issue.";

/// LLM completion interface for failure explanations.
pub trait LlmClient: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Create the default HTTP-backed LLM client.
pub fn create_llm_client(llm: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    Ok(Box::new(HttpLlmClient::new(llm)?))
}

/// Result of analyzing one trace container.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    /// Folder the trace container lives in.
    pub folder_path: PathBuf,
    /// Composed first-failure stack trace (or the no-error sentinel).
    pub stack_trace: String,
    pub normalized_stack_trace: String,
    pub stack_trace_hash: String,
    /// Indented action summary of the reconstructed tree.
    pub action_summary: String,
    pub explanation: String,
    /// Present when a prior context was reused instead of calling the LLM.
    pub reused: Option<ReusedContext>,
}

/// Reference to the prior context whose explanation was reused.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReusedContext {
    pub score: f64,
    pub kind: MatchKind,
    /// Folder the matching context originally came from.
    pub source_folder: PathBuf,
}

/// Outcome of one subfolder during a folder scan.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderEntry {
    pub subfolder: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AnalysisOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Drives analysis of trace containers against a context store.
pub struct TraceAnalyzer<'a> {
    client: Option<&'a dyn LlmClient>,
    similarity_threshold: f64,
    max_prompt_chars: usize,
}

impl<'a> TraceAnalyzer<'a> {
    pub fn new(client: Option<&'a dyn LlmClient>, similarity_threshold: f64) -> Self {
        Self {
            client,
            similarity_threshold,
            max_prompt_chars: crate::config::AnalysisConfig::default().max_prompt_chars,
        }
    }

    pub fn with_max_prompt_chars(mut self, max_prompt_chars: usize) -> Self {
        self.max_prompt_chars = max_prompt_chars;
        self
    }

    /// Analyze one trace container (zip or folder).
    ///
    /// A missing container or a container without a primary stream is a
    /// hard failure; everything else degrades to a partial result. The
    /// store is consulted before the LLM and appended to afterwards, one
    /// record per non-skipped analysis.
    pub fn analyze_trace(
        &self,
        path: &Path,
        store: &mut ContextStore,
    ) -> Result<AnalysisOutcome> {
        let folder_path = if path.is_dir() {
            path.to_path_buf()
        } else {
            path.parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| path.to_path_buf())
        };

        let parsed = {
            let container = TraceContainer::open(path)?;
            container.parse()?
        };
        let action_summary = render_action_summary(&parsed.tree);
        let stack_trace = parsed.stack_trace;

        if stack_trace == NO_ERROR_FOUND {
            return Ok(AnalysisOutcome {
                folder_path,
                normalized_stack_trace: String::new(),
                stack_trace_hash: String::new(),
                action_summary,
                explanation: "No errors found in trace; nothing to analyze.".to_string(),
                reused: None,
                stack_trace,
            });
        }

        let normalized_stack_trace = fingerprint::normalize(&stack_trace);
        let stack_trace_hash = fingerprint::hash_normalized(&normalized_stack_trace);

        if let Some(m) = fingerprint::find_similar(
            &normalized_stack_trace,
            store.contexts(),
            self.similarity_threshold,
        ) {
            tracing::info!(
                folder = %folder_path.display(),
                score = m.score,
                source = %m.context.folder_path.display(),
                "Reusing prior analysis for a known failure"
            );
            return Ok(AnalysisOutcome {
                folder_path,
                stack_trace,
                normalized_stack_trace,
                stack_trace_hash,
                action_summary,
                explanation: m.context.explanation.clone(),
                reused: Some(ReusedContext {
                    score: m.score,
                    kind: m.kind,
                    source_folder: m.context.folder_path.clone(),
                }),
            });
        }

        let Some(client) = self.client else {
            return Ok(AnalysisOutcome {
                folder_path,
                stack_trace,
                normalized_stack_trace,
                stack_trace_hash,
                action_summary,
                explanation: "LLM analysis disabled; stack trace composed only.".to_string(),
                reused: None,
            });
        };

        let prompt = build_prompt(&action_summary, &stack_trace, self.max_prompt_chars);
        let explanation = client.complete(&prompt)?;

        store.append(StoredContext {
            stack_trace_hash: stack_trace_hash.clone(),
            normalized_stack_trace: normalized_stack_trace.clone(),
            stack_trace: stack_trace.clone(),
            folder_path: folder_path.clone(),
            timestamp: Utc::now(),
            explanation: explanation.clone(),
        })?;

        Ok(AnalysisOutcome {
            folder_path,
            stack_trace,
            normalized_stack_trace,
            stack_trace_hash,
            action_summary,
            explanation,
            reused: None,
        })
    }

    /// Analyze every `*/trace.zip` under `folder`, sequentially, sharing
    /// one context store. Per-trace failures are recorded, not fatal to the
    /// batch.
    pub fn analyze_folder(
        &self,
        folder: &Path,
        store: &mut ContextStore,
    ) -> Result<Vec<FolderEntry>> {
        let pattern = folder.join("*/trace.zip");
        let entries = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::Config(format!("invalid folder pattern: {}", e)))?;

        let mut results = Vec::new();
        for zip_path in entries.flatten() {
            let subfolder = zip_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| zip_path.clone());
            match self.analyze_trace(&zip_path, store) {
                Ok(outcome) => results.push(FolderEntry {
                    subfolder,
                    outcome: Some(outcome),
                    error: None,
                }),
                Err(e) => {
                    tracing::warn!(
                        trace = %zip_path.display(),
                        error = %e,
                        "Failed to analyze trace"
                    );
                    results.push(FolderEntry {
                        subfolder,
                        outcome: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(results)
    }
}

fn build_prompt(action_summary: &str, stack_trace: &str, max_chars: usize) -> String {
    let mut summary = action_summary.to_string();
    if summary.len() > max_chars {
        let mut cut = max_chars;
        while !summary.is_char_boundary(cut) {
            cut -= 1;
        }
        summary.truncate(cut);
        summary.push_str("\n...[truncated]");
    }

    format!(
        "{SYSTEM_PROMPT}\n\nActions:\n{}\n\nFailure stack trace:\n{}\n",
        summary, stack_trace
    )
}

struct HttpLlmClient {
    model: String,
    provider: LlmProvider,
    endpoint: String,
    api_key: Option<String>,
    runtime: tokio::runtime::Runtime,
    http: reqwest::Client,
}

impl HttpLlmClient {
    fn new(config: &LlmConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| config.provider.default_endpoint().to_string());
        let api_key = match config.provider {
            LlmProvider::Ollama => None,
            LlmProvider::OpenAI => config
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok()),
        };

        if config.provider == LlmProvider::OpenAI && api_key.is_none() {
            return Err(Error::Config(
                "llm.api_key (or OPENAI_API_KEY) is required".to_string(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Llm(format!("failed to build tokio runtime: {e}")))?;
        let timeout_secs = config.timeout_secs.max(1);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            model: config.model.clone(),
            provider: config.provider,
            endpoint,
            api_key,
            runtime,
            http,
        })
    }
}

impl LlmClient for HttpLlmClient {
    fn complete(&self, prompt: &str) -> Result<String> {
        self.runtime.block_on(async {
            match self.provider {
                LlmProvider::Ollama => {
                    let url = format!("{}/api/generate", self.endpoint.trim_end_matches('/'));
                    let resp = self
                        .http
                        .post(url)
                        .json(&json!({
                            "model": self.model,
                            "prompt": prompt,
                            "stream": false,
                        }))
                        .send()
                        .await
                        .map_err(|e| Error::Llm(format!("ollama request failed: {e}")))?;
                    let status = resp.status();
                    let body = resp
                        .text()
                        .await
                        .map_err(|e| Error::Llm(format!("ollama read body failed: {e}")))?;
                    if !status.is_success() {
                        return Err(Error::Llm(format!(
                            "ollama returned {}: {}",
                            status.as_u16(),
                            body
                        )));
                    }
                    let json: serde_json::Value = serde_json::from_str(&body)?;
                    json.get("response")
                        .and_then(|v| v.as_str())
                        .map(ToString::to_string)
                        .ok_or_else(|| {
                            Error::Llm("ollama response missing string field `response`".to_string())
                        })
                }
                LlmProvider::OpenAI => {
                    let url = format!(
                        "{}/v1/chat/completions",
                        self.endpoint.trim_end_matches('/')
                    );
                    let mut headers = HeaderMap::new();
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                    headers.insert(
                        AUTHORIZATION,
                        HeaderValue::from_str(&format!(
                            "Bearer {}",
                            self.api_key.as_deref().unwrap_or_default()
                        ))
                        .map_err(|e| Error::Llm(format!("invalid auth header: {e}")))?,
                    );

                    let resp = self
                        .http
                        .post(url)
                        .headers(headers)
                        .json(&json!({
                            "model": self.model,
                            "temperature": 0,
                            "messages": [
                                { "role": "system", "content": SYSTEM_PROMPT },
                                { "role": "user", "content": prompt }
                            ]
                        }))
                        .send()
                        .await
                        .map_err(|e| Error::Llm(format!("openai request failed: {e}")))?;
                    let status = resp.status();
                    let body = resp
                        .text()
                        .await
                        .map_err(|e| Error::Llm(format!("openai read body failed: {e}")))?;
                    if !status.is_success() {
                        return Err(Error::Llm(format!(
                            "openai returned {}: {}",
                            status.as_u16(),
                            body
                        )));
                    }
                    let json: serde_json::Value = serde_json::from_str(&body)?;
                    json.get("choices")
                        .and_then(|v| v.as_array())
                        .and_then(|arr| arr.first())
                        .and_then(|v| v.get("message"))
                        .and_then(|v| v.get("content"))
                        .and_then(|v| v.as_str())
                        .map(ToString::to_string)
                        .ok_or_else(|| {
                            Error::Llm(
                                "openai response missing choices[0].message.content".to_string(),
                            )
                        })
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CONTEXT_FILE_NAME;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct MockClient {
        response: String,
        calls: AtomicUsize,
    }

    impl MockClient {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl LlmClient for MockClient {
        fn complete(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    fn failing_trace(duration: u32, selector: &str) -> String {
        format!(
            concat!(
                r#"{{"type":"before","callId":"call@1","apiName":"locator.click","startTime":0,"params":{{"selector":"{sel}"}}}}"#,
                "\n",
                r#"{{"type":"after","callId":"call@1","endTime":{end},"error":{{"message":"locator.click: Timeout {end}ms exceeded"}}}}"#,
                "\n"
            ),
            sel = selector,
            end = duration
        )
    }

    fn write_subfolder(root: &Path, name: &str, trace: &str) {
        let sub = root.join(name);
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("trace.trace"), trace).unwrap();
    }

    fn analyze_dir(
        analyzer: &TraceAnalyzer,
        root: &Path,
        name: &str,
        store: &mut ContextStore,
    ) -> AnalysisOutcome {
        analyzer
            .analyze_trace(&root.join(name), store)
            .expect("analysis should succeed")
    }

    #[test]
    fn fresh_failure_calls_llm_and_appends_context() {
        let dir = TempDir::new().unwrap();
        write_subfolder(dir.path(), "run-1", &failing_trace(30000, "#submit"));
        let mut store = ContextStore::load(&dir.path().join(CONTEXT_FILE_NAME));

        let client = MockClient::new("flaky selector");
        let analyzer = TraceAnalyzer::new(Some(&client), 0.8);
        let outcome = analyze_dir(&analyzer, dir.path(), "run-1", &mut store);

        assert_eq!(client.call_count(), 1);
        assert_eq!(outcome.explanation, "flaky selector");
        assert!(outcome.reused.is_none());
        assert_eq!(store.len(), 1);
        assert!(outcome
            .stack_trace
            .starts_with("TimeoutError: locator.click: Timeout 30000ms exceeded."));
    }

    #[test]
    fn recurring_failure_reuses_prior_explanation() {
        let dir = TempDir::new().unwrap();
        write_subfolder(dir.path(), "run-1", &failing_trace(30000, "#submit"));
        // Same failure class, different volatile details.
        write_subfolder(dir.path(), "run-2", &failing_trace(15000, "#cancel"));
        let mut store = ContextStore::load(&dir.path().join(CONTEXT_FILE_NAME));

        let client = MockClient::new("flaky selector");
        let analyzer = TraceAnalyzer::new(Some(&client), 0.8);
        let first = analyze_dir(&analyzer, dir.path(), "run-1", &mut store);
        let second = analyze_dir(&analyzer, dir.path(), "run-2", &mut store);

        assert_eq!(client.call_count(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(second.explanation, first.explanation);
        let reused = second.reused.expect("second run should reuse context");
        assert_eq!(reused.kind, MatchKind::Identical);
        assert_eq!(reused.score, 1.0);
    }

    #[test]
    fn passing_trace_skips_fingerprinting_and_llm() {
        let dir = TempDir::new().unwrap();
        write_subfolder(
            dir.path(),
            "run-1",
            concat!(
                r#"{"type":"before","callId":"call@1","apiName":"page.goto","startTime":0}"#,
                "\n",
                r#"{"type":"after","callId":"call@1","endTime":5}"#,
                "\n"
            ),
        );
        let mut store = ContextStore::load(&dir.path().join(CONTEXT_FILE_NAME));

        let client = MockClient::new("unused");
        let analyzer = TraceAnalyzer::new(Some(&client), 0.8);
        let outcome = analyze_dir(&analyzer, dir.path(), "run-1", &mut store);

        assert_eq!(client.call_count(), 0);
        assert_eq!(outcome.stack_trace, NO_ERROR_FOUND);
        assert!(store.is_empty());
    }

    #[test]
    fn no_client_composes_without_storing() {
        let dir = TempDir::new().unwrap();
        write_subfolder(dir.path(), "run-1", &failing_trace(30000, "#submit"));
        let mut store = ContextStore::load(&dir.path().join(CONTEXT_FILE_NAME));

        let analyzer = TraceAnalyzer::new(None, 0.8);
        let outcome = analyze_dir(&analyzer, dir.path(), "run-1", &mut store);

        assert!(store.is_empty());
        assert!(!outcome.stack_trace_hash.is_empty());
    }

    #[test]
    fn missing_container_is_a_hard_failure() {
        let dir = TempDir::new().unwrap();
        let mut store = ContextStore::load(&dir.path().join(CONTEXT_FILE_NAME));
        let analyzer = TraceAnalyzer::new(None, 0.8);
        let err = analyzer
            .analyze_trace(&dir.path().join("missing/trace.zip"), &mut store)
            .unwrap_err();
        assert!(matches!(err, Error::ContainerNotFound(_)));
    }

    #[test]
    fn prompt_truncates_on_a_char_boundary() {
        let summary = "é".repeat(100);
        let prompt = build_prompt(&summary, "Error: x", 51);
        assert!(prompt.contains("...[truncated]"));
    }
}
