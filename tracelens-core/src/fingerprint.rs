//! Failure fingerprinting and similarity
//!
//! Two traces of the same failure class differ in volatile details:
//! timeout durations, selector strings, absolute file paths, line numbers.
//! Normalization replaces those with fixed placeholders so the same failure
//! produces the same text, and the SHA-256 digest of that text is the
//! fingerprint used for exact-duplicate lookup. Near-duplicates are found
//! with a positional line-similarity score over the normalized text.

use crate::store::StoredContext;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Default similarity threshold for [`find_similar`].
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Partial line scores at or above this count as a full line match.
const PARTIAL_MATCH_CUTOFF: f64 = 0.7;

static ERROR_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[A-Za-z]+Error|Error)\b").unwrap());
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+\s*ms").unwrap());
static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"'[^']*'|"[^"]*""#).unwrap());
static LOCATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"locator\((?:'[^']*'|"[^"]*")\)"#).unwrap());
static LINE_COL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":\d+:\d+").unwrap());
static PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w.\-~]*(?:/[\w.\-~<>]+)+").unwrap());
static FRAME_CALLEE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*at\s+([^\s(]+)").unwrap());

/// Normalize a composed stack trace into its canonical, comparable form.
///
/// Per line: blanks drop; error-message lines get durations and quoted
/// literals replaced; waiting/call-log lines get selector expressions
/// replaced; frame lines get quoted literals, `:line:column` pairs and path
/// segments replaced. The function is idempotent: placeholders never match
/// the patterns that produce them.
pub fn normalize(stack_trace: &str) -> String {
    let mut out = Vec::new();
    for line in stack_trace.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let normalized = if ERROR_LINE_RE.is_match(line) {
            let line = DURATION_RE.replace_all(line, "<duration>");
            QUOTED_RE.replace_all(&line, "<str>").into_owned()
        } else if is_wait_line(trimmed) {
            let line = LOCATOR_RE.replace_all(line, "locator(<selector>)");
            QUOTED_RE.replace_all(&line, "<selector>").into_owned()
        } else if trimmed.starts_with("at ") {
            let line = QUOTED_RE.replace_all(line, "<str>");
            let line = LINE_COL_RE.replace_all(&line, ":<line>:<col>");
            PATH_RE.replace_all(&line, "<path>").into_owned()
        } else {
            line.to_string()
        };
        out.push(normalized);
    }
    out.join("\n")
}

/// Content digest of the normalized form of `stack_trace`.
pub fn fingerprint(stack_trace: &str) -> String {
    hash_normalized(&normalize(stack_trace))
}

/// Digest of an already-normalized text.
pub fn hash_normalized(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Positional similarity of two normalized stack traces in [0.0, 1.0].
///
/// For each line index up to the shorter length: an exact match scores 1.0;
/// otherwise the key-part overlap of the two lines counts as a full match
/// when it reaches [`PARTIAL_MATCH_CUTOFF`]. The sum divides by the longer
/// line count, so the measure is not symmetric-by-construction in any
/// deeper sense than this exact formula.
pub fn similarity(a: &str, b: &str) -> f64 {
    let lines_a: Vec<&str> = a.lines().collect();
    let lines_b: Vec<&str> = b.lines().collect();
    let longer = lines_a.len().max(lines_b.len());
    if longer == 0 {
        return 1.0;
    }

    let mut score = 0.0;
    for (line_a, line_b) in lines_a.iter().zip(lines_b.iter()) {
        if line_a == line_b {
            score += 1.0;
        } else if partial_line_score(line_a, line_b) >= PARTIAL_MATCH_CUTOFF {
            score += 1.0;
        }
    }
    score / longer as f64
}

/// Token-overlap score of two mismatched lines over their "key parts".
fn partial_line_score(a: &str, b: &str) -> f64 {
    let parts_a = key_parts(a);
    let parts_b = key_parts(b);
    let denom = parts_a.len().max(parts_b.len());
    if denom == 0 {
        return 0.0;
    }
    let intersection = parts_a.intersection(&parts_b).count();
    intersection as f64 / denom as f64
}

/// Extract the identity-bearing tokens of a normalized line: the leading
/// error-type token, the callee of an `at` frame, and a marker for generic
/// waiting lines.
fn key_parts(line: &str) -> HashSet<String> {
    let mut parts = HashSet::new();
    let trimmed = line.trim();

    if let Some(m) = ERROR_LINE_RE.find(line) {
        parts.insert(format!("error:{}", m.as_str().trim()));
    }
    if let Some(caps) = FRAME_CALLEE_RE.captures(line) {
        parts.insert(format!("at:{}", &caps[1]));
    }
    if is_wait_line(trimmed) {
        parts.insert("waiting".to_string());
    }
    parts
}

fn is_wait_line(trimmed: &str) -> bool {
    trimmed.contains("waiting for") || trimmed.starts_with("- ") || trimmed.starts_with("locator")
}

/// How a stored context matched the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Normalized texts hash identically, or score exactly 1.0.
    Identical,
    /// Score met the threshold but stayed below 1.0.
    Similar,
}

/// A stored context that cleared the similarity threshold.
#[derive(Debug)]
pub struct SimilarMatch<'a> {
    pub context: &'a StoredContext,
    pub score: f64,
    pub kind: MatchKind,
}

/// Find the first stored context similar to `normalized`.
///
/// Exact duplicates are recognized by digest comparison, near-duplicates by
/// [`similarity`] against `threshold`. Lookup is linear and first-match-wins
/// rather than best-match.
pub fn find_similar<'a>(
    normalized: &str,
    contexts: &'a [StoredContext],
    threshold: f64,
) -> Option<SimilarMatch<'a>> {
    let digest = hash_normalized(normalized);
    for context in contexts {
        if context.stack_trace_hash == digest {
            return Some(SimilarMatch {
                context,
                score: 1.0,
                kind: MatchKind::Identical,
            });
        }
        let score = similarity(normalized, &context.normalized_stack_trace);
        if score >= threshold {
            let kind = if score >= 1.0 {
                MatchKind::Identical
            } else {
                MatchKind::Similar
            };
            return Some(SimilarMatch {
                context,
                score,
                kind,
            });
        }
    }
    None
}
