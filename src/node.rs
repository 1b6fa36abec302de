//! Node
//!
//! Nodes form the component tree. A [`Node`] is a cheap, clonable handle; clones refer to the
//! same node. Parents own their children, children only hold weak links back up the tree and
//! to their routing authority
//!
//! A node can subscribe to `(name, event)` routes and emit events under its own name. While no
//! routing authority has reached it, its subscriptions wait in a pending queue and are flushed
//! into the authority's registry by the attach protocol

use std::fmt::{self, Debug, Display};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace};

use crate::attach;
use crate::config::{RouterConfig, UnattachedEmit};
use crate::error::RoutingError;
use crate::event::EventKind;
use crate::id::{NodeId, SubscriptionId};
use crate::registry::{Delivery, Entry, Handler, HandlerOutcome, Registry};

pub(crate) struct NodeInner {
    id: NodeId,
    name: RwLock<String>,
    parent: RwLock<Weak<NodeInner>>,
    children: RwLock<Vec<Node>>,
    authority: RwLock<Weak<NodeInner>>,
    pending: Mutex<Vec<Entry>>,
    director: Registry,
}

#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

/// A non-owning reference to a [`Node`]
#[derive(Clone, Default)]
pub struct WeakNode {
    inner: Weak<NodeInner>,
}

/// Returned by [`Node::on`] and [`Node::subscribe_to`], consumed by [`Node::off`]
#[derive(Debug)]
#[must_use = "dropping a subscription keeps it active, pass it to `Node::off` to cancel it"]
pub struct Subscription {
    id: SubscriptionId,
    owner: WeakNode,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Node {
    pub fn new() -> Self {
        Node {
            inner: Arc::new(NodeInner {
                id: NodeId::next(),
                name: RwLock::new(String::new()),
                parent: RwLock::new(Weak::new()),
                children: RwLock::new(Vec::new()),
                authority: RwLock::new(Weak::new()),
                pending: Mutex::new(Vec::new()),
                director: Registry::new(),
            }),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        let node = Self::new();
        node.set_name(name);
        node
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn name(&self) -> String {
        self.inner.name.read().clone()
    }

    /// Renames the node
    ///
    /// Subscriptions already made keep the name they were made under
    pub fn set_name(&self, name: impl Into<String>) -> &Self {
        *self.inner.name.write() = name.into();
        self
    }

    /// Sets the configuration this node uses when it is, or emits without, a routing authority
    pub fn configure(&self, config: RouterConfig) -> &Self {
        self.inner.director.configure(config);
        self
    }

    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakNode {
        WeakNode {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // tree

    pub fn parent(&self) -> Option<Node> {
        self.inner.parent.read().upgrade().map(|inner| Node { inner })
    }

    /// A snapshot of the children, in insertion order
    pub fn children(&self) -> Vec<Node> {
        self.inner.children.read().clone()
    }

    /// The topmost ancestor, or the node itself when it has no parent
    pub fn root(&self) -> Node {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    pub fn is_ancestor_of(&self, other: &Node) -> bool {
        let mut current = other.parent();
        while let Some(node) = current {
            if node.ptr_eq(self) {
                return true;
            }
            current = node.parent();
        }
        false
    }

    /// Finds the first node named `name` in this subtree, searching pre-order
    pub fn find(&self, name: &str) -> Option<Node> {
        if *self.inner.name.read() == name {
            return Some(self.clone());
        }
        self.children().iter().find_map(|child| child.find(name))
    }

    /// Appends `child` and, when this node has a routing authority, attaches the child's
    /// subtree to it
    ///
    /// A child still held by another parent is removed from it first. Adding a node that is
    /// already a child of this node adds it a second time
    pub fn add_child(&self, child: &Node) -> &Self {
        if child.ptr_eq(self) || child.is_ancestor_of(self) {
            error!(parent = %self, child = %child, "refusing to add an ancestor as a child");
            return self;
        }

        if let Some(previous) = child.parent() {
            if !previous.ptr_eq(self) {
                previous.remove_child(child);
            }
        }

        *child.inner.parent.write() = Arc::downgrade(&self.inner);
        self.inner.children.write().push(child.clone());

        match self.authority() {
            Some(authority) => attach::propagate(child, &authority),
            None => trace!(parent = %self, child = %child, "parent has no routing authority yet"),
        }
        self
    }

    /// Removes every occurrence of `child` and takes its subtree out of routing
    pub fn remove_child(&self, child: &Node) -> &Self {
        let removed = {
            let mut children = self.inner.children.write();
            let before = children.len();
            children.retain(|node| !node.ptr_eq(child));
            before != children.len()
        };

        if removed {
            {
                let mut parent = child.inner.parent.write();
                if std::ptr::eq(parent.as_ptr(), Arc::as_ptr(&self.inner)) {
                    *parent = Weak::new();
                }
            }
            attach::detach(child);
        }
        self
    }

    /// Removes this node from its parent, if it has one
    pub fn detach(&self) -> &Self {
        if let Some(parent) = self.parent() {
            parent.remove_child(self);
        }
        self
    }

    // routing

    /// Makes the root of this node's tree the routing authority of the whole tree
    pub fn start(&self) -> &Self {
        let root = self.root();
        debug!(root = %root, "starting routing authority");
        attach::propagate(&root, &root);
        self
    }

    pub fn authority(&self) -> Option<Node> {
        self.inner.authority.read().upgrade().map(|inner| Node { inner })
    }

    pub fn is_attached(&self) -> bool {
        self.authority().is_some()
    }

    pub fn is_authority(&self) -> bool {
        self.authority().is_some_and(|authority| authority.ptr_eq(self))
    }

    /// This node's own registry. Only consulted for dispatch while the node is its own
    /// authority
    pub fn director(&self) -> &Registry {
        &self.inner.director
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Subscribes to `event` emitted by this node
    pub fn on<P, F, R>(
        &self,
        event: &EventKind<P>,
        callback: F,
    ) -> Result<Subscription, RoutingError>
    where
        P: 'static,
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        let name = self.name();
        self.subscribe_to(&name, event, callback)
    }

    /// Subscribes to `event` emitted by whichever node is named `source`
    ///
    /// The subscription is registered with the routing authority right away when there is
    /// one, and queued until the attach protocol reaches this node otherwise
    pub fn subscribe_to<P, F, R>(
        &self,
        source: &str,
        event: &EventKind<P>,
        callback: F,
    ) -> Result<Subscription, RoutingError>
    where
        P: 'static,
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        if source.is_empty() {
            return Err(RoutingError::EmptyName {
                node: self.to_string(),
            });
        }
        if event.name().is_empty() {
            return Err(RoutingError::EmptyEvent);
        }

        let entry = Entry::new(source, event, Handler::new(self.id(), callback));
        let subscription = Subscription {
            id: entry.id(),
            owner: self.downgrade(),
        };

        match self.authority() {
            Some(authority) => authority.director().insert(entry).map_err(|(_, err)| err)?,
            None => {
                trace!(node = %self, source, event = event.name(), "subscription queued");
                self.inner.pending.lock().push(entry);
            }
        }
        Ok(subscription)
    }

    /// Cancels a subscription, pending or registered, returning whether it was still active
    ///
    /// Cancelling from inside a callback only affects later dispatches
    pub fn off(&self, subscription: Subscription) -> bool {
        match subscription.owner.upgrade() {
            Some(owner) => owner.cancel(subscription.id),
            None => self.cancel(subscription.id),
        }
    }

    fn cancel(&self, id: SubscriptionId) -> bool {
        {
            let mut pending = self.inner.pending.lock();
            if let Some(position) = pending.iter().position(|entry| entry.id() == id) {
                pending.remove(position);
                trace!(node = %self, subscription = %id, "pending subscription cancelled");
                return true;
            }
        }

        let cancelled = self
            .authority()
            .is_some_and(|authority| authority.director().unsubscribe(id));
        trace!(node = %self, subscription = %id, cancelled, "subscription cancelled");
        cancelled
    }

    /// Emits `event` under this node's name
    ///
    /// Every callback subscribed to `(name, event)` at the routing authority runs before this
    /// returns. Without an authority the configured [`UnattachedEmit`] policy applies
    pub fn emit<P: 'static>(
        &self,
        event: &EventKind<P>,
        payload: P,
    ) -> Result<Delivery, RoutingError> {
        let name = self.check_routable(event)?;
        match self.authority() {
            Some(authority) => authority.director().dispatch(&name, event, &payload),
            None => match self.inner.director.config().unattached_emit {
                UnattachedEmit::Ignore => {
                    debug!(node = %self, event = event.name(), "no routing authority, dropped");
                    Ok(Delivery::unrouted())
                }
                UnattachedEmit::Fail => Err(RoutingError::Unattached {
                    entity: name,
                    event: event.name().to_string(),
                }),
            },
        }
    }

    /// Checks that an emit of `event` from this node would not be refused outright, returning
    /// the name it would be routed under
    ///
    /// Covers an empty node or event name and, under [`UnattachedEmit::Fail`], a missing
    /// routing authority. Failures raised by the callbacks themselves can only surface on emit
    pub fn check_routable<P>(&self, event: &EventKind<P>) -> Result<String, RoutingError> {
        let name = self.name();
        if name.is_empty() {
            return Err(RoutingError::EmptyName {
                node: self.to_string(),
            });
        }
        if event.name().is_empty() {
            return Err(RoutingError::EmptyEvent);
        }
        let policy = self.inner.director.config().unattached_emit;
        if policy == UnattachedEmit::Fail && !self.is_attached() {
            return Err(RoutingError::Unattached {
                entity: name,
                event: event.name().to_string(),
            });
        }
        Ok(name)
    }

    // attach protocol plumbing

    pub(crate) fn set_authority(&self, authority: &Node) {
        *self.inner.authority.write() = Arc::downgrade(&authority.inner);
    }

    pub(crate) fn clear_authority(&self) {
        *self.inner.authority.write() = Weak::new();
    }

    pub(crate) fn take_pending(&self) -> Vec<Entry> {
        std::mem::take(&mut *self.inner.pending.lock())
    }

    /// Puts entries back in the pending queue, keeping the queue in subscription order
    pub(crate) fn requeue(&self, entries: Vec<Entry>) {
        if entries.is_empty() {
            return;
        }
        let mut pending = self.inner.pending.lock();
        pending.extend(entries);
        pending.sort_by_key(Entry::id);
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Node {}

impl Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", *self.inner.name.read(), self.inner.id)
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("name", &*self.inner.name.read())
            .field("children", &self.inner.children.read().len())
            .field("attached", &self.is_attached())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl WeakNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upgrade(&self) -> Option<Node> {
        self.inner.upgrade().map(|inner| Node { inner })
    }
}

impl Debug for WeakNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(node) => write!(f, "WeakNode({})", node),
            None => write!(f, "WeakNode(dropped)"),
        }
    }
}
