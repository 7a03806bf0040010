//! First-failure stack trace composition
//!
//! Scans the decoded primary stream in order for the first event carrying a
//! non-empty error message and composes a clean, human-readable stack trace
//! from it: cleaned message, call-log block, filtered frame list. Each
//! section has a fallback source because trace producers differ in which
//! fields they populate: the composer degrades instead of failing.

use crate::types::{RawEvent, StackFrame, TraceEvent};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Returned when no event in the trace carries an error. A passing test is
/// a valid, common outcome, so this is a sentinel, not an error.
pub const NO_ERROR_FOUND: &str = "No errors found in trace";

/// Returned by the analysis workflow when the trace container itself cannot
/// be located.
pub const TRACE_NOT_FOUND: &str = "Trace file not found";

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());
static TIMEOUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Timeout (\d+)ms exceeded").unwrap());

/// Call-site context remembered from `before` events, keyed by call id.
struct CallInfo {
    api_name: Option<String>,
    selector: Option<String>,
    frames: Vec<StackFrame>,
}

/// Compose the stack trace of the first error in the primary stream.
///
/// Returns [`NO_ERROR_FOUND`] when the stream contains no error.
pub fn compose_first_error_stack_trace(events: &[RawEvent]) -> String {
    let mut calls: HashMap<String, CallInfo> = HashMap::new();

    for event in events {
        if let RawEvent::Known(TraceEvent::Before(before)) = event {
            calls.insert(
                before.call_id.clone(),
                CallInfo {
                    api_name: before.api_name.clone(),
                    selector: before.selector().map(str::to_string),
                    frames: before.stack.clone(),
                },
            );
        }

        let Some(error) = event.error() else {
            continue;
        };
        if error.message.trim().is_empty() {
            continue;
        }

        let info = match event {
            RawEvent::Known(TraceEvent::After(after)) => calls.get(&after.call_id),
            _ => None,
        };
        return compose(
            &error.message,
            error.stack.as_deref(),
            info.and_then(|i| i.api_name.as_deref()),
            info.and_then(|i| i.selector.as_deref()),
            info.map(|i| i.frames.as_slice()).unwrap_or(&[]),
        );
    }

    NO_ERROR_FOUND.to_string()
}

fn compose(
    message: &str,
    raw_stack: Option<&str>,
    api_name: Option<&str>,
    selector: Option<&str>,
    frames: &[StackFrame],
) -> String {
    let message = clean_message(message, api_name);

    let mut call_log = raw_stack.map(extract_call_log).unwrap_or_default();
    if call_log.is_empty() {
        if let Some(selector) = selector {
            call_log.push(format!("waiting for locator('{}')", selector));
        }
    }

    let mut frame_lines = raw_stack.map(extract_frame_lines).unwrap_or_default();
    if frame_lines.is_empty() {
        frame_lines = frames
            .iter()
            .filter(|f| !is_internal_location(&f.file))
            .map(StackFrame::to_frame_line)
            .collect();
    }

    let mut sections = vec![message];
    if !call_log.is_empty() {
        sections.push(call_log.join("\n"));
    }
    if !frame_lines.is_empty() {
        sections.push(frame_lines.join("\n"));
    }
    sections.join("\n\n")
}

/// Strip terminal color codes and canonicalize timeout-class messages.
fn clean_message(message: &str, api_name: Option<&str>) -> String {
    let cleaned = ANSI_RE.replace_all(message, "").into_owned();
    if let (Some(api), Some(caps)) = (api_name, TIMEOUT_RE.captures(&cleaned)) {
        return format!("TimeoutError: {}: Timeout {}ms exceeded.", api, &caps[1]);
    }
    cleaned.trim_end().to_string()
}

/// Pull the embedded `Call log:` section out of a raw error stack.
///
/// The section runs from the marker line to the first frame line or blank
/// line, whichever comes first.
fn extract_call_log(raw_stack: &str) -> Vec<String> {
    let mut in_log = false;
    let mut lines = Vec::new();
    for line in raw_stack.lines() {
        let trimmed = line.trim();
        if !in_log {
            if trimmed.starts_with("Call log:") {
                in_log = true;
            }
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with("at ") {
            break;
        }
        lines.push(trimmed.trim_start_matches("- ").to_string());
    }
    lines
}

/// Frame lines (`at ...`) from a raw error stack, implementation-internal
/// frames excluded.
fn extract_frame_lines(raw_stack: &str) -> Vec<String> {
    raw_stack
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            trimmed.starts_with("at ") && !is_internal_location(trimmed)
        })
        .map(|line| line.trim_end().to_string())
        .collect()
}

/// Playwright's own frames carry no signal for the reader.
fn is_internal_location(location: &str) -> bool {
    location.contains("node_modules/playwright")
        || location.contains("playwright-core")
        || location.contains("node:internal")
}
