//! Attach protocol
//!
//! Moves routing authority through the tree. [`propagate`] runs whenever a subtree gains an
//! authority (a child added under an attached parent, or [`Node::start`]); [`detach`] runs when
//! a subtree is removed from its parent
//!
//! Both walk the subtree pre-order: a node is fully settled before any of its children is
//! visited

use itertools::Itertools;
use tracing::{debug, error, trace};

use crate::id::NodeId;
use crate::node::Node;
use crate::registry::Entry;

/// Gives `node` and its whole subtree `authority` as their routing authority
///
/// For each node: record the authority, flush the pending queue into the authority's registry,
/// then, if the node had been acting as an authority itself, merge its own registry into the
/// authority's. Subscriptions the authority rejects go back to the pending queue of the node
/// that made them
pub(crate) fn propagate(node: &Node, authority: &Node) {
    node.set_authority(authority);

    let pending = node.take_pending();
    let flushed = pending.len();
    let mut rejected = Vec::new();
    for entry in pending {
        if let Err((entry, err)) = authority.director().insert(entry) {
            error!(node = %node, subscription = %entry.id(), %err, "pending subscription rejected");
            rejected.push(entry);
        }
    }

    if !node.ptr_eq(authority) && !node.director().is_empty() {
        let merged = authority.director().merge(node.director());
        debug!(node = %node, authority = %authority, merged, "merged local registry");
        return_to_owners(node, node.director().drain());
    }

    trace!(node = %node, authority = %authority, flushed, rejected = rejected.len(), "attached");
    node.requeue(rejected);

    for child in node.children() {
        propagate(&child, authority);
    }
}

/// Queues entries a merge left behind on the nodes that subscribed them, so they can still be
/// cancelled or detached by their owner. Owners that left the subtree fall back to `node`
fn return_to_owners(node: &Node, entries: Vec<Entry>) {
    let by_owner = entries
        .into_iter()
        .into_group_map_by(|entry| entry.handler.owner);

    for (owner, entries) in by_owner {
        let owner = find_by_id(node, owner).unwrap_or_else(|| node.clone());
        trace!(node = %owner, returned = entries.len(), "entries returned after merge");
        owner.requeue(entries);
    }
}

fn find_by_id(node: &Node, id: NodeId) -> Option<Node> {
    if node.id() == id {
        return Some(node.clone());
    }
    node.children().iter().find_map(|child| find_by_id(child, id))
}

/// Takes a removed subtree out of the routing of its former authority
///
/// Every node of the subtree that was routed through that authority loses it, and the
/// authority's entries owned by that node return to the node's pending queue, ready for the
/// next attach. A subtree that routes through an authority of its own is left as is
pub(crate) fn detach(node: &Node) {
    let Some(outer) = node.authority() else {
        trace!(node = %node, "detached node had no routing authority");
        return;
    };
    if outer.ptr_eq(node) || node.is_ancestor_of(&outer) {
        trace!(node = %node, "detached subtree routes through its own authority");
        return;
    }

    debug!(node = %node, authority = %outer, "releasing subtree from routing authority");
    release(node, &outer);
}

fn release(node: &Node, outer: &Node) {
    if node.authority().is_some_and(|authority| authority.ptr_eq(outer)) {
        node.clear_authority();
        let owned = outer.director().extract_owned_by(node.id());
        trace!(node = %node, released = owned.len(), "subscriptions returned to pending");
        node.requeue(owned);
    }

    for child in node.children() {
        release(&child, outer);
    }
}
