//! Temporal correlation of network activity
//!
//! Network records carry no call ids, only monotonic timestamps, so the only
//! available linkage is interval containment: a network event belongs to
//! every completed action whose [start, end] interval contains it. The scan
//! is O(actions × events), which is fine at single-test-run volume.

use crate::trace::tree::ActionTree;
use crate::types::NetworkEvent;

/// Attach pooled network events to every action whose interval contains
/// them.
///
/// Bounds are inclusive at both ends. Attachment is many-to-many: overlapping intervals each get their own
/// copy, and events falling outside every interval attach to none. Relative
/// order within the pool is preserved per node. Open actions (no end time)
/// never match.
pub fn correlate_network(tree: &mut ActionTree, pool: &[NetworkEvent]) {
    for node in tree.actions_mut() {
        let Some(end_time) = node.end_time else {
            continue;
        };
        let matched: Vec<NetworkEvent> = pool
            .iter()
            .filter(|event| {
                event
                    .monotonic_time
                    .is_some_and(|ts| ts >= node.start_time && ts <= end_time)
            })
            .cloned()
            .collect();
        if !matched.is_empty() {
            node.network = matched;
        }
    }
}
