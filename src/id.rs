//! Identifiers
//!
//! Process-unique ids for nodes and subscriptions

use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};

/// A `NodeId` uniquely identifies a single node for the lifetime of the process
///
/// Registry entries record the `NodeId` of the node that subscribed them, which is how a
/// detached subtree finds its own entries again
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(u64);

/// A `SubscriptionId` identifies a single registered callback
///
/// Ids are handed out in increasing order, so comparing two ids compares the order in which
/// their subscriptions were made
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SubscriptionId(u64);

#[derive(Debug)]
struct IdAllocator {
    count: AtomicU64,
}

impl IdAllocator {
    const fn new() -> Self {
        Self {
            count: AtomicU64::new(1),
        }
    }

    fn alloc(&self) -> u64 {
        self.count.fetch_add(1u64, Ordering::SeqCst)
    }
}

static NODE_IDS: IdAllocator = IdAllocator::new();
static SUBSCRIPTION_IDS: IdAllocator = IdAllocator::new();

// `NodeId`
impl NodeId {
    pub(crate) fn next() -> Self {
        NodeId(NODE_IDS.alloc())
    }

    pub fn raw_id(&self) -> u64 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N[{}]", self.0)
    }
}

// `SubscriptionId`
impl SubscriptionId {
    pub(crate) fn next() -> Self {
        SubscriptionId(SUBSCRIPTION_IDS.alloc())
    }

    pub fn raw_id(&self) -> u64 {
        self.0
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S[{}]", self.0)
    }
}

#[test]
fn test_ids_are_ordered() {
    let first = SubscriptionId::next();
    let second = SubscriptionId::next();
    assert!(first < second);

    let a = NodeId::next();
    let b = NodeId::next();
    assert_ne!(a, b);
    assert_eq!(format!("{}", NodeId(7)), "N[7]");
}
