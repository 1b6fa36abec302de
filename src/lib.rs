//!
//! Director is a small component-tree core: named nodes arranged in a tree, and an event router
//! that lets any node publish and subscribe to `(name, event)` routes without holding references
//! to the other side
//!
//! The root of a tree is its routing authority and owns the registry every route is resolved
//! against. Nodes may subscribe before any authority has reached them; those subscriptions wait
//! on the node and are flushed when the node is attached to a started tree
//!
//! ```
//! use director::{EventKind, Node, Router};
//!
//! const PING: EventKind<u32> = EventKind::new("ping");
//!
//! let router = Router::new("app");
//! let button = Node::named("button");
//! let _subscription = button.on(&PING, |value: &u32| println!("ping {}", value)).unwrap();
//!
//! router.add_child(&button);
//! assert_eq!(button.emit(&PING, 42).unwrap().invoked, 1);
//! ```
//!

pub mod bridge;
pub mod config;
pub mod error;
pub mod event;
pub mod id;
pub mod model;
pub mod node;
pub mod registry;
pub mod router;

pub(crate) mod attach;

pub use bridge::{EmitOptions, EventBridge, NativeEvent};
pub use config::{RouterConfig, UnattachedEmit};
pub use error::{HandlerError, HandlerFailure, HandlerResult, ModelError, RoutingError};
pub use event::{EventId, EventKind};
pub use id::{NodeId, SubscriptionId};
pub use model::{ArrayEvents, ArrayModel, ObjectModel, Property};
pub use node::{Node, Subscription, WeakNode};
pub use registry::{Delivery, HandlerOutcome, Registry, RouteKey};
pub use router::Router;
