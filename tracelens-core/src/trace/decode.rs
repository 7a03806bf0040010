//! Newline-delimited event decoding
//!
//! Both stream classes decode the same way: split on newlines, skip blanks,
//! parse each remaining line independently. A line that fails to parse is
//! dropped without surfacing an error; trace producers truncate files and
//! interleave non-JSON noise, so best-effort is the stated policy.

use crate::types::{NetworkEvent, RawEvent};

/// Decode the primary `.trace` stream into an ordered event sequence.
pub fn decode_events(text: &str) -> Vec<RawEvent> {
    decode_lines(text)
}

/// Decode and pool any number of auxiliary `.network` streams.
///
/// Source stream identity is not retained; the correlator only needs one
/// flat pool.
pub fn decode_network(texts: &[String]) -> Vec<NetworkEvent> {
    texts
        .iter()
        .flat_map(|text| decode_lines::<NetworkEvent>(text))
        .collect()
}

fn decode_lines<T: serde::de::DeserializeOwned>(text: &str) -> Vec<T> {
    let mut decoded = Vec::new();
    let mut dropped = 0usize;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(value) => decoded.push(value),
            Err(_) => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::debug!(dropped, "Skipped undecodable trace lines");
    }
    decoded
}
