//! Core domain types for tracelens
//!
//! These types model the two event streams found inside a Playwright trace
//! container and the reconstructed action tree built from them.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Trace** | The primary `.trace` stream: one JSON object per line |
//! | **Network stream** | Auxiliary `.network` streams, pooled after decode |
//! | **Action** | A call unit bounded by a `before`/`after` event pair |
//! | **Leaf event** | A non-call event (stdio, screencast frame) attached to the open action |
//! | **Fingerprint** | Normalized-text hash used to recognize a previously seen failure |
//!
//! Timestamps inside a trace are monotonic clock values in milliseconds,
//! kept as `f64` exactly as emitted. Wall-clock time (`chrono`) only appears
//! on persisted analysis records.

use serde::{Deserialize, Serialize};

// ============================================
// Raw trace events
// ============================================

/// A decoded line from either stream.
///
/// Lines whose `type` tag is recognized decode into [`TraceEvent`]; anything
/// else is preserved opaquely so leaf rendering and error scanning can still
/// see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawEvent {
    Known(TraceEvent),
    Other(serde_json::Value),
}

impl RawEvent {
    /// The `type` tag of this event, if present.
    pub fn kind(&self) -> Option<&str> {
        match self {
            RawEvent::Known(ev) => Some(ev.kind()),
            RawEvent::Other(value) => value.get("type").and_then(|v| v.as_str()),
        }
    }

    /// Error payload carried by this event, if any.
    ///
    /// `after` events carry errors in a typed field; opaque events are
    /// probed for an `error.message` path so producer variants still
    /// surface their failure.
    pub fn error(&self) -> Option<ErrorPayload> {
        match self {
            RawEvent::Known(TraceEvent::After(after)) => after.error.clone(),
            RawEvent::Known(_) => None,
            RawEvent::Other(value) => {
                let error = value.get("error")?;
                serde_json::from_value(error.clone()).ok()
            }
        }
    }
}

/// Recognized trace event variants, discriminated by the `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TraceEvent {
    #[serde(rename = "before")]
    Before(BeforeEvent),
    #[serde(rename = "after")]
    After(AfterEvent),
    #[serde(rename = "stdout")]
    Stdout(StdioEvent),
    #[serde(rename = "stderr")]
    Stderr(StdioEvent),
    #[serde(rename = "screencast-frame")]
    ScreencastFrame(FrameEvent),
}

impl TraceEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TraceEvent::Before(_) => "before",
            TraceEvent::After(_) => "after",
            TraceEvent::Stdout(_) => "stdout",
            TraceEvent::Stderr(_) => "stderr",
            TraceEvent::ScreencastFrame(_) => "screencast-frame",
        }
    }
}

/// Call entry event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeEvent {
    pub call_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Explicit API name (e.g. `page.goto`); preferred for the title.
    #[serde(default)]
    pub api_name: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub start_time: f64,
    /// Call-site frames captured at entry, innermost first.
    #[serde(default)]
    pub stack: Vec<StackFrame>,
}

impl BeforeEvent {
    /// Display title: prefer the explicit API name, else `{class}.{method}`.
    /// An empty `apiName` counts as absent.
    pub fn title(&self) -> String {
        if let Some(api_name) = self.api_name.as_deref().filter(|s| !s.is_empty()) {
            return api_name.to_string();
        }
        format!(
            "{}.{}",
            self.class.as_deref().unwrap_or("unknown"),
            self.method.as_deref().unwrap_or("unknown")
        )
    }

    /// The `selector` parameter, when the call carries one.
    pub fn selector(&self) -> Option<&str> {
        self.params.get("selector").and_then(|v| v.as_str())
    }
}

/// Call exit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AfterEvent {
    pub call_id: String,
    #[serde(default)]
    pub end_time: f64,
    #[serde(default)]
    pub error: Option<ErrorPayload>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Stdout/stderr line captured during the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StdioEvent {
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Periodic screen capture; `sha1` identifies the blob in `resources/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameEvent {
    pub sha1: String,
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Failure information attached to a call exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(default)]
    pub message: String,
    /// Raw stack text as emitted, including any embedded call log.
    #[serde(default)]
    pub stack: Option<String>,
}

/// Attachment descriptor on a call exit (screenshots, downloads, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Path whose basename resolves inside the container's `resources/`.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub sha1: Option<String>,
}

/// A structured call frame from a `before` event's stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
    #[serde(default)]
    pub function: Option<String>,
}

impl StackFrame {
    /// Render the frame as a standard `at ...` line.
    pub fn to_frame_line(&self) -> String {
        let location = format!(
            "{}:{}:{}",
            self.file,
            self.line.unwrap_or(0),
            self.column.unwrap_or(0)
        );
        match self.function.as_deref() {
            Some(function) if !function.is_empty() => {
                format!("    at {} ({})", function, location)
            }
            _ => format!("    at {}", location),
        }
    }
}

// ============================================
// Network events
// ============================================

/// A pooled record from the auxiliary `.network` streams.
///
/// Only the timestamp is interpreted; everything else rides along opaquely
/// for the reporting layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEvent {
    #[serde(rename = "monotonicTime", default)]
    pub monotonic_time: Option<f64>,
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn before_event_decodes_with_camel_case_fields() {
        let line = r#"{"type":"before","callId":"call@1","parentId":"call@0","apiName":"page.goto","startTime":12.5,"params":{"url":"https://x"}}"#;
        let event: RawEvent = serde_json::from_str(line).unwrap();
        match event {
            RawEvent::Known(TraceEvent::Before(before)) => {
                assert_eq!(before.call_id, "call@1");
                assert_eq!(before.parent_id.as_deref(), Some("call@0"));
                assert_eq!(before.title(), "page.goto");
                assert_eq!(before.start_time, 12.5);
            }
            other => panic!("expected before event, got {:?}", other),
        }
    }

    #[test]
    fn title_falls_back_to_class_and_method() {
        let line = r#"{"type":"before","callId":"call@2","class":"Frame","method":"click","startTime":1}"#;
        let event: RawEvent = serde_json::from_str(line).unwrap();
        match event {
            RawEvent::Known(TraceEvent::Before(before)) => {
                assert_eq!(before.title(), "Frame.click");
            }
            other => panic!("expected before event, got {:?}", other),
        }
    }

    #[test]
    fn empty_api_name_falls_back_to_class_and_method() {
        let line = r#"{"type":"before","callId":"call@3","apiName":"","class":"Frame","method":"goto","startTime":1}"#;
        let event: RawEvent = serde_json::from_str(line).unwrap();
        match event {
            RawEvent::Known(TraceEvent::Before(before)) => {
                assert_eq!(before.title(), "Frame.goto");
            }
            other => panic!("expected before event, got {:?}", other),
        }
    }

    #[test]
    fn unrecognized_type_is_preserved_opaquely() {
        let line = r#"{"type":"context-options","browserName":"chromium"}"#;
        let event: RawEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.kind(), Some("context-options"));
        assert!(matches!(event, RawEvent::Other(_)));
    }

    #[test]
    fn opaque_event_error_is_probed() {
        let line = r#"{"type":"event","error":{"message":"boom","stack":"Error: boom"}}"#;
        let event: RawEvent = serde_json::from_str(line).unwrap();
        let error = event.error().expect("error payload");
        assert_eq!(error.message, "boom");
    }

    #[test]
    fn network_event_keeps_payload_opaque() {
        let line = r#"{"type":"resource-snapshot","monotonicTime":42.0,"snapshot":{"url":"https://x/app.js"}}"#;
        let event: NetworkEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.monotonic_time, Some(42.0));
        assert!(event.data.contains_key("snapshot"));
    }
}
