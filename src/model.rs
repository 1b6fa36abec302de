//! Models
//!
//! Data holders that announce their mutations as events. Each model owns a [`Node`]; name it
//! and add it to a tree, and any node can subscribe to the model's events by that name
//!
//! Events are emitted after the mutation is applied and after the model's lock is released, so
//! callbacks are free to read (or mutate) the model again

use std::collections::HashMap;
use std::fmt::{self, Debug};

use itertools::Itertools;
use parking_lot::RwLock;

use crate::error::ModelError;
use crate::event::EventKind;
use crate::node::Node;
use crate::registry::Delivery;

/// The events an [`ArrayModel`] emits
pub struct ArrayEvents<T> {
    /// Emitted by `push` with the pushed item
    pub push: EventKind<T>,

    /// Emitted by `pop` with the popped item, if there was one
    pub pop: EventKind<Option<T>>,

    /// Emitted by `remove` with the index that was removed
    pub remove: EventKind<usize>,

    /// Emitted by `announce` with every item
    pub init: EventKind<Vec<T>>,
}

impl<T> Default for ArrayEvents<T> {
    fn default() -> Self {
        ArrayEvents {
            push: EventKind::new("push"),
            pop: EventKind::new("pop"),
            remove: EventKind::new("remove"),
            init: EventKind::new("init"),
        }
    }
}

impl<T> Clone for ArrayEvents<T> {
    fn clone(&self) -> Self {
        ArrayEvents {
            push: self.push.clone(),
            pop: self.pop.clone(),
            remove: self.remove.clone(),
            init: self.init.clone(),
        }
    }
}

impl<T> Debug for ArrayEvents<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayEvents")
            .field("push", &self.push.name())
            .field("pop", &self.pop.name())
            .field("remove", &self.remove.name())
            .field("init", &self.init.name())
            .finish()
    }
}

/// A list that announces `push`, `pop` and `remove` through its node
///
/// Mutations that emit are refused, leaving the items untouched, when the node could not route
/// the event at all (see [`Node::check_routable`]). Failures of the subscribed callbacks are
/// reported after the mutation has been applied
pub struct ArrayModel<T> {
    node: Node,
    items: RwLock<Vec<T>>,
    events: ArrayEvents<T>,
}

impl<T: Clone + 'static> ArrayModel<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self::with_events(items, ArrayEvents::default())
    }

    pub fn with_events(items: Vec<T>, events: ArrayEvents<T>) -> Self {
        ArrayModel {
            node: Node::new(),
            items: RwLock::new(items),
            events,
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn events(&self) -> &ArrayEvents<T> {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.items.read().get(index).cloned()
    }

    pub fn items(&self) -> Vec<T> {
        self.items.read().clone()
    }

    pub fn push(&self, item: T) -> Result<Delivery, ModelError> {
        self.node.check_routable(&self.events.push)?;
        self.items.write().push(item.clone());
        Ok(self.node.emit(&self.events.push, item)?)
    }

    pub fn pop(&self) -> Result<Option<T>, ModelError> {
        self.node.check_routable(&self.events.pop)?;
        let popped = self.items.write().pop();
        self.node.emit(&self.events.pop, popped.clone())?;
        Ok(popped)
    }

    pub fn remove(&self, index: usize) -> Result<T, ModelError> {
        self.node.check_routable(&self.events.remove)?;
        let removed = {
            let mut items = self.items.write();
            if index >= items.len() {
                return Err(ModelError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            items.remove(index)
        };
        self.node.emit(&self.events.remove, index)?;
        Ok(removed)
    }

    /// Replaces the item at `index` without emitting, returning the old item
    pub fn set(&self, index: usize, item: T) -> Result<T, ModelError> {
        let mut items = self.items.write();
        let len = items.len();
        items
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, item))
            .ok_or(ModelError::IndexOutOfBounds { index, len })
    }

    /// Inserts without emitting
    pub fn insert(&self, index: usize, item: T) -> Result<(), ModelError> {
        let mut items = self.items.write();
        if index > items.len() {
            return Err(ModelError::IndexOutOfBounds {
                index,
                len: items.len(),
            });
        }
        items.insert(index, item);
        Ok(())
    }

    /// Emits the `init` event with every item, for subscribers that render the whole model
    pub fn announce(&self) -> Result<Delivery, ModelError> {
        self.node.check_routable(&self.events.init)?;
        let items = self.items();
        Ok(self.node.emit(&self.events.init, items)?)
    }
}

impl<T: Debug> Debug for ArrayModel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayModel")
            .field("node", &self.node)
            .field("items", &*self.items.read())
            .field("events", &self.events)
            .finish()
    }
}

/// A single property of an [`ObjectModel`]
pub struct Property<V> {
    value: V,
    on_set: Option<EventKind<V>>,
    on_change: Option<EventKind<V>>,
    allowed: Option<Vec<V>>,
}

impl<V> Property<V> {
    pub fn new(value: V) -> Self {
        Property {
            value,
            on_set: None,
            on_change: None,
            allowed: None,
        }
    }

    pub fn on_set(mut self, event: EventKind<V>) -> Self {
        self.on_set = Some(event);
        self
    }

    pub fn on_change(mut self, event: EventKind<V>) -> Self {
        self.on_change = Some(event);
        self
    }

    /// Restricts `set` and `change` to the given values. The initial value is not checked
    pub fn allowed_values(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.allowed = Some(values.into_iter().collect());
        self
    }
}

#[derive(Clone, Copy)]
enum Mutation {
    Set,
    Change,
}

/// A set of named properties, each of which may announce `set` and `change` mutations
pub struct ObjectModel<V> {
    node: Node,
    props: RwLock<HashMap<String, Property<V>>>,
}

impl<V: Clone + PartialEq + Debug + 'static> ObjectModel<V> {
    /// Creates the model with its initial values, which must respect each property's allowed
    /// values. Nothing is emitted
    pub fn new<K: Into<String>>(
        props: impl IntoIterator<Item = (K, Property<V>)>,
    ) -> Result<Self, ModelError> {
        let props = props
            .into_iter()
            .map(|(key, prop)| {
                let key = key.into();
                check_allowed(&key, &prop, &prop.value)?;
                Ok::<_, ModelError>((key, prop))
            })
            .collect::<Result<HashMap<_, _>, ModelError>>()?;

        Ok(ObjectModel {
            node: Node::new(),
            props: RwLock::new(props),
        })
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.props.read().get(key).map(|prop| prop.value.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.props.read().keys().cloned().sorted().collect()
    }

    /// Stores `value` and emits the property's `on_set` event, if it has one
    pub fn set(&self, key: &str, value: V) -> Result<Delivery, ModelError> {
        self.update(key, value, Mutation::Set)
    }

    /// Stores `value` and emits the property's `on_change` event, if it has one
    pub fn change(&self, key: &str, value: V) -> Result<Delivery, ModelError> {
        self.update(key, value, Mutation::Change)
    }

    fn update(&self, key: &str, value: V, mutation: Mutation) -> Result<Delivery, ModelError> {
        let event = {
            let mut props = self.props.write();
            let prop = props
                .get_mut(key)
                .ok_or_else(|| ModelError::UnknownProperty(key.to_string()))?;

            check_allowed(key, prop, &value)?;

            let event = match mutation {
                Mutation::Set => prop.on_set.clone(),
                Mutation::Change => prop.on_change.clone(),
            };
            if let Some(event) = &event {
                self.node.check_routable(event)?;
            }

            prop.value = value.clone();
            event
        };

        match event {
            Some(event) => Ok(self.node.emit(&event, value)?),
            None => Ok(Delivery::unrouted()),
        }
    }
}

fn check_allowed<V: PartialEq + Debug>(
    key: &str,
    prop: &Property<V>,
    value: &V,
) -> Result<(), ModelError> {
    match &prop.allowed {
        Some(allowed) if !allowed.contains(value) => Err(ModelError::DisallowedValue {
            property: key.to_string(),
            value: format!("{:?}", value),
            allowed: format!("{:?}", allowed),
        }),
        _ => Ok(()),
    }
}

impl<V: Debug> Debug for ObjectModel<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let props = self.props.read();
        let values: Vec<_> = props
            .iter()
            .map(|(key, prop)| (key.as_str(), &prop.value))
            .sorted_by_key(|(key, _)| *key)
            .collect();
        f.debug_struct("ObjectModel")
            .field("node", &self.node)
            .field("props", &values)
            .finish()
    }
}
