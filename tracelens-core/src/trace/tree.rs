//! Action tree reconstruction
//!
//! Rebuilds the nested call structure from the flat primary stream. Nodes
//! live in one owned arena ([`ActionTree::nodes`]) and relate to each other
//! through [`ActionId`] indices, so the tree needs no recursive ownership.
//!
//! Two structures drive the build: a call id → node lookup for parenting and
//! completion, and an explicit stack of currently-open actions for attaching
//! leaf events in emission order.

use crate::types::{AfterEvent, Attachment, BeforeEvent, ErrorPayload, NetworkEvent, RawEvent, StackFrame, TraceEvent};
use std::collections::HashMap;

/// Index of a node inside [`ActionTree::nodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(pub usize);

/// A reconstructed call unit.
#[derive(Debug, Clone)]
pub struct ActionNode {
    pub call_id: String,
    pub parent_id: Option<String>,
    /// Explicit API name when present, else `{class}.{method}`.
    pub title: String,
    pub params: serde_json::Value,
    pub start_time: f64,
    /// Absent while the call is still open.
    pub end_time: Option<f64>,
    /// `end_time - start_time`, set when the call completes.
    pub duration: Option<f64>,
    pub error: Option<ErrorPayload>,
    pub attachments: Vec<Attachment>,
    /// Call-site frames captured at entry.
    pub stack: Vec<StackFrame>,
    /// Sub-actions and leaf events, in emission order.
    pub children: Vec<TreeChild>,
    /// Network events correlated by the temporal correlator.
    pub network: Vec<NetworkEvent>,
}

impl ActionNode {
    fn from_before(event: BeforeEvent) -> Self {
        let title = event.title();
        Self {
            call_id: event.call_id,
            parent_id: event.parent_id,
            title,
            params: event.params,
            start_time: event.start_time,
            end_time: None,
            duration: None,
            error: None,
            attachments: Vec::new(),
            stack: event.stack,
            children: Vec::new(),
            network: Vec::new(),
        }
    }

    fn complete(&mut self, event: AfterEvent) {
        self.end_time = Some(event.end_time);
        self.duration = Some(event.end_time - self.start_time);
        self.error = event.error;
        self.attachments = event.attachments;
    }
}

/// A child slot: either a nested action or an interleaved leaf event.
#[derive(Debug, Clone)]
pub enum TreeChild {
    Action(ActionId),
    Event(RawEvent),
}

/// The reconstructed forest: an arena of nodes plus the root slots.
#[derive(Debug, Clone, Default)]
pub struct ActionTree {
    nodes: Vec<ActionNode>,
    /// Top-level actions and leaf events, in emission order.
    pub roots: Vec<TreeChild>,
}

impl ActionTree {
    pub fn node(&self, id: ActionId) -> &ActionNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: ActionId) -> &mut ActionNode {
        &mut self.nodes[id.0]
    }

    /// All nodes in creation (stream) order.
    pub fn actions(&self) -> impl Iterator<Item = &ActionNode> {
        self.nodes.iter()
    }

    pub fn actions_mut(&mut self) -> impl Iterator<Item = &mut ActionNode> {
        self.nodes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, node: ActionNode) -> ActionId {
        let id = ActionId(self.nodes.len());
        self.nodes.push(node);
        id
    }
}

/// Build the action tree from the decoded primary stream.
///
/// - `before`: new node; parented under its `parentId` when that call is
///   already known, else a root. Pushed onto the open stack.
/// - `after`: completes the node if the call id is known; an unknown call id
///   is absorbed without effect. The open stack pops only when its top is
///   the completing call; a non-nested completion leaves the stack as-is,
///   so stale entries can shadow later leaf attachment.
/// - anything else: attached as a leaf child of the open-stack top, or to
///   the roots when no action is open.
pub fn build_action_tree(events: Vec<RawEvent>) -> ActionTree {
    let mut tree = ActionTree::default();
    let mut by_call_id: HashMap<String, ActionId> = HashMap::new();
    let mut open_stack: Vec<ActionId> = Vec::new();

    for event in events {
        match event {
            RawEvent::Known(TraceEvent::Before(before)) => {
                let node = ActionNode::from_before(before);
                let parent = node
                    .parent_id
                    .as_ref()
                    .and_then(|pid| by_call_id.get(pid))
                    .copied();
                let call_id = node.call_id.clone();
                let id = tree.push(node);
                by_call_id.insert(call_id, id);
                match parent {
                    Some(parent_id) => tree.node_mut(parent_id).children.push(TreeChild::Action(id)),
                    None => tree.roots.push(TreeChild::Action(id)),
                }
                open_stack.push(id);
            }
            RawEvent::Known(TraceEvent::After(after)) => {
                let completed = by_call_id.get(&after.call_id).copied();
                if open_stack
                    .last()
                    .is_some_and(|top| tree.node(*top).call_id == after.call_id)
                {
                    open_stack.pop();
                }
                match completed {
                    Some(id) => tree.node_mut(id).complete(after),
                    None => {
                        tracing::debug!(call_id = %after.call_id, "Ignoring after event with no matching before");
                    }
                }
            }
            leaf => match open_stack.last() {
                Some(top) => tree.node_mut(*top).children.push(TreeChild::Event(leaf)),
                None => tree.roots.push(TreeChild::Event(leaf)),
            },
        }
    }

    tree
}
