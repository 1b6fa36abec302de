//! Router
//!
//! The [`Router`] owns the root of a tree and is its routing authority from the moment it is
//! created

use std::ops::Deref;

use tracing::debug;

use crate::config::RouterConfig;
use crate::node::Node;
use crate::registry::Registry;

#[derive(Clone, Debug)]
pub struct Router {
    root: Node,
}

impl Router {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, RouterConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: RouterConfig) -> Self {
        let root = Node::named(name);
        root.configure(config);
        root.start();
        debug!(root = %root, ?config, "router created");
        Router { root }
    }

    pub fn node(&self) -> &Node {
        &self.root
    }

    pub fn registry(&self) -> &Registry {
        self.root.director()
    }
}

impl Deref for Router {
    type Target = Node;

    fn deref(&self) -> &Self::Target {
        &self.root
    }
}

impl AsRef<Node> for Router {
    fn as_ref(&self) -> &Node {
        &self.root
    }
}
