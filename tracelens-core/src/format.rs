//! Plain-text rendering of a reconstructed action tree.
//!
//! Used for the CLI's text output and as the trace summary handed to the
//! LLM. One line per action: indentation mirrors nesting, followed by the
//! selector param when present, the duration, and markers for errors and
//! correlated network activity.

use crate::trace::tree::{ActionNode, ActionTree, TreeChild};
use crate::types::{RawEvent, TraceEvent};

/// Render the tree as an indented text summary, in emission order.
pub fn render_action_summary(tree: &ActionTree) -> String {
    let mut out = String::new();
    for child in &tree.roots {
        render_child(tree, child, 0, &mut out);
    }
    out
}

fn render_child(tree: &ActionTree, child: &TreeChild, depth: usize, out: &mut String) {
    match child {
        TreeChild::Action(id) => {
            let node = tree.node(*id);
            render_action_line(node, depth, out);
            for child in &node.children {
                render_child(tree, child, depth + 1, out);
            }
        }
        TreeChild::Event(event) => render_leaf_line(event, depth, out),
    }
}

fn render_action_line(node: &ActionNode, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    out.push_str(&indent);
    out.push_str(&node.title);

    if let Some(selector) = node.params.get("selector").and_then(|v| v.as_str()) {
        out.push_str(&format!(" {}", selector));
    }
    match node.duration {
        Some(duration) => out.push_str(&format!(" ({:.2}ms)", duration)),
        None => out.push_str(" (unfinished)"),
    }
    if node.error.is_some() {
        out.push_str(" [ERROR]");
    }
    if !node.network.is_empty() {
        out.push_str(&format!(" [network: {}]", node.network.len()));
    }
    out.push('\n');

    if let Some(error) = &node.error {
        out.push_str(&format!("{}  !! {}\n", indent, error.message.trim_end()));
    }
}

fn render_leaf_line(event: &RawEvent, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    match event {
        RawEvent::Known(TraceEvent::Stdout(stdio)) => {
            out.push_str(&format!(
                "{}[stdout] {}\n",
                indent,
                stdio.text.as_deref().unwrap_or("").trim_end()
            ));
        }
        RawEvent::Known(TraceEvent::Stderr(stdio)) => {
            out.push_str(&format!(
                "{}[stderr] {}\n",
                indent,
                stdio.text.as_deref().unwrap_or("").trim_end()
            ));
        }
        RawEvent::Known(TraceEvent::ScreencastFrame(frame)) => {
            out.push_str(&format!("{}[frame {}]\n", indent, frame.sha1));
        }
        other => {
            let kind = other.kind().unwrap_or("unknown");
            out.push_str(&format!("{}[{}]\n", indent, kind));
        }
    }
}
