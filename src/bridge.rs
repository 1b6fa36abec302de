//! Native event bridge
//!
//! The seam between a host UI layer and the routing core. The host calls [`EventBridge::fire`]
//! whenever one of its own events happens; the bridge applies the bound options to the event
//! and emits it from its node under the bound event name

use tracing::{debug, trace, warn};

use crate::error::RoutingError;
use crate::event::EventKind;
use crate::node::{Node, WeakNode};
use crate::registry::Delivery;

/// What the bridge needs from a host event
pub trait NativeEvent {
    fn prevent_default(&mut self);
    fn stop_propagation(&mut self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitOptions {
    pub prevent_default: bool,
    pub stop_propagation: bool,
}

impl EmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prevent_default(mut self) -> Self {
        self.prevent_default = true;
        self
    }

    pub fn stop_propagation(mut self) -> Self {
        self.stop_propagation = true;
        self
    }
}

struct Binding<E> {
    native: String,
    event: EventKind<E>,
    options: EmitOptions,
}

pub struct EventBridge<E> {
    node: WeakNode,
    bindings: Vec<Binding<E>>,
}

impl<E: NativeEvent + Clone + 'static> EventBridge<E> {
    pub fn new(node: &Node) -> Self {
        EventBridge {
            node: node.downgrade(),
            bindings: Vec::new(),
        }
    }

    /// Emits `event` whenever the native event `native` fires
    ///
    /// Binding one native event several times emits once per binding, in bind order
    pub fn bind(
        &mut self,
        native: impl Into<String>,
        event: EventKind<E>,
        options: EmitOptions,
    ) -> &mut Self {
        self.bindings.push(Binding {
            native: native.into(),
            event,
            options,
        });
        self
    }

    /// Drops every binding of `native`, returning how many there were
    pub fn unbind(&mut self, native: &str) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|binding| binding.native != native);
        before - self.bindings.len()
    }

    /// `(native, emitted)` name pairs, in bind order
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.bindings
            .iter()
            .map(|binding| (binding.native.as_str(), binding.event.name()))
    }

    /// Handles one native event
    ///
    /// Returns `Ok(None)` when nothing is bound to `native` or the bridge's node is gone,
    /// otherwise the combined delivery of every bound emit. A failing emit does not stop the
    /// remaining bindings; the failures are returned together as
    /// [`RoutingError::BindingFailures`]
    pub fn fire(&self, native: &str, mut event: E) -> Result<Option<Delivery>, RoutingError> {
        let Some(node) = self.node.upgrade() else {
            debug!(native, "bridge node dropped, native event ignored");
            return Ok(None);
        };

        let mut combined: Option<Delivery> = None;
        let mut bindings = 0;
        let mut failures = Vec::new();
        for binding in self.bindings.iter().filter(|binding| binding.native == native) {
            bindings += 1;
            if binding.options.prevent_default {
                event.prevent_default();
            }
            if binding.options.stop_propagation {
                event.stop_propagation();
            }

            trace!(node = %node, native, event = binding.event.name(), "bridging native event");
            match node.emit(&binding.event, event.clone()) {
                Ok(delivery) => {
                    let total = combined.get_or_insert_with(Delivery::default);
                    total.routed |= delivery.routed;
                    total.invoked += delivery.invoked;
                }
                Err(err) => {
                    warn!(
                        node = %node,
                        native,
                        event = binding.event.name(),
                        %err,
                        "binding failed"
                    );
                    failures.push(err);
                }
            }
        }

        if failures.is_empty() {
            Ok(combined)
        } else {
            Err(RoutingError::BindingFailures {
                native: native.to_string(),
                bindings,
                failures,
            })
        }
    }
}
