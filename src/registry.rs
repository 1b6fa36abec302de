//! Registry
//!
//! The registry (the "director") maps `(entity name, event)` routes to the callbacks subscribed
//! to them. Every node carries one, but only a node acting as the routing authority of its
//! tree dispatches from it
//!
//! Callbacks are stored type-erased next to a description of their payload type. The first
//! subscription made on a route fixes the payload type of that route

use std::any::Any;
use std::cell::Cell;
use std::fmt::{self, Debug};
use std::sync::Arc;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use itertools::Itertools;
use parking_lot::RwLock;
use tracing::{debug_span, error, trace, warn};

use crate::config::RouterConfig;
use crate::error::{HandlerError, HandlerFailure, HandlerResult, RoutingError};
use crate::event::{EventId, EventKind, PayloadType};
use crate::id::{NodeId, SubscriptionId};

/// Anything a callback may return
///
/// Callbacks either return nothing, or a `Result` whose error is reported back through the
/// dispatch that invoked them
pub trait HandlerOutcome {
    fn into_result(self) -> HandlerResult;
}

impl HandlerOutcome for () {
    fn into_result(self) -> HandlerResult {
        Ok(())
    }
}

impl<E> HandlerOutcome for Result<(), E>
where
    E: Into<HandlerError>,
{
    fn into_result(self) -> HandlerResult {
        self.map_err(Into::into)
    }
}

/// The `(entity name, event)` pair callbacks are registered under
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct RouteKey {
    entity: Arc<str>,
    event: EventId,
}

impl RouteKey {
    pub fn new<P>(entity: &str, event: &EventKind<P>) -> Self {
        RouteKey {
            entity: Arc::from(entity),
            event: event.id(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn event(&self) -> EventId {
        self.event
    }
}

type Callback<P> = dyn Fn(&P) -> HandlerResult + Send + Sync;

/// A type-erased callback
#[derive(Clone)]
pub(crate) struct Handler {
    pub(crate) id: SubscriptionId,
    pub(crate) owner: NodeId,
    payload: PayloadType,
    callback: Arc<dyn Any + Send + Sync>,
}

impl Handler {
    pub(crate) fn new<P, F, R>(owner: NodeId, callback: F) -> Self
    where
        P: 'static,
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        let callback: Box<Callback<P>> =
            Box::new(move |payload: &P| callback(payload).into_result());

        Handler {
            id: SubscriptionId::next(),
            owner,
            payload: PayloadType::of::<P>(),
            callback: Arc::new(callback),
        }
    }

    fn invoke<P: 'static>(&self, payload: &P) -> Option<HandlerResult> {
        self.callback
            .downcast_ref::<Box<Callback<P>>>()
            .map(|callback| callback(payload))
    }
}

impl Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({} of {} <{}>)", self.id, self.owner, self.payload.name())
    }
}

/// A subscription that has left (or not yet reached) a registry, together with its route
#[derive(Clone, Debug)]
pub(crate) struct Entry {
    pub(crate) key: RouteKey,
    pub(crate) event: Arc<str>,
    pub(crate) handler: Handler,
}

impl Entry {
    pub(crate) fn new<P>(entity: &str, event: &EventKind<P>, handler: Handler) -> Self {
        Entry {
            key: RouteKey::new(entity, event),
            event: Arc::from(event.name()),
            handler,
        }
    }

    pub(crate) fn id(&self) -> SubscriptionId {
        self.handler.id
    }
}

#[derive(Debug)]
struct Slot {
    event: Arc<str>,
    payload: PayloadType,
    handlers: Vec<Handler>,
}

/// The outcome of a successful emit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Whether the event reached a routing authority at all
    pub routed: bool,

    /// How many callbacks were invoked
    pub invoked: usize,
}

impl Delivery {
    pub(crate) fn unrouted() -> Self {
        Delivery::default()
    }

    pub(crate) fn routed(invoked: usize) -> Self {
        Delivery {
            routed: true,
            invoked,
        }
    }
}

thread_local! {
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts nested dispatches on the current thread while alive
struct DispatchDepth;

impl DispatchDepth {
    fn enter(limit: usize) -> Option<Self> {
        DISPATCH_DEPTH.with(|depth| {
            if depth.get() >= limit {
                None
            } else {
                depth.set(depth.get() + 1);
                Some(DispatchDepth)
            }
        })
    }
}

impl Drop for DispatchDepth {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

pub struct Registry {
    slots: DashMap<RouteKey, Slot>,
    config: RwLock<RouterConfig>,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    pub fn with_config(config: RouterConfig) -> Self {
        Registry {
            slots: DashMap::new(),
            config: RwLock::new(config),
        }
    }

    pub fn config(&self) -> RouterConfig {
        *self.config.read()
    }

    pub fn configure(&self, config: RouterConfig) {
        *self.config.write() = config;
    }

    /// Appends `callback` to the route `(entity, event)`
    ///
    /// Subscribing the same callback twice delivers every event to it twice
    pub fn subscribe<P, F, R>(
        &self,
        owner: NodeId,
        entity: &str,
        event: &EventKind<P>,
        callback: F,
    ) -> Result<SubscriptionId, RoutingError>
    where
        P: 'static,
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        let entry = Entry::new(entity, event, Handler::new(owner, callback));
        let id = entry.id();
        self.insert(entry).map_err(|(_, err)| err)?;
        Ok(id)
    }

    /// Inserts an entry at the back of its route, handing it back if the payload types clash
    pub(crate) fn insert(&self, entry: Entry) -> Result<(), (Entry, RoutingError)> {
        match self.slots.entry(entry.key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if slot.payload != entry.handler.payload {
                    let err = RoutingError::PayloadMismatch {
                        entity: entry.key.entity().to_string(),
                        event: entry.event.to_string(),
                        expected: slot.payload.name(),
                        found: entry.handler.payload.name(),
                    };
                    return Err((entry, err));
                }
                slot.handlers.push(entry.handler);
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Slot {
                    event: entry.event,
                    payload: entry.handler.payload,
                    handlers: vec![entry.handler],
                });
            }
        }
        Ok(())
    }

    /// Invokes every callback of `(entity, event)` in subscription order
    ///
    /// The callback list is copied before the first callback runs; subscriptions made or
    /// cancelled by the callbacks apply from the next dispatch on. A failing callback does not
    /// stop the ones after it, all failures are returned together once every callback ran
    pub fn dispatch<P: 'static>(
        &self,
        entity: &str,
        event: &EventKind<P>,
        payload: &P,
    ) -> Result<Delivery, RoutingError> {
        let limit = self.config().max_dispatch_depth;
        let Some(_depth) = DispatchDepth::enter(limit) else {
            return Err(RoutingError::DispatchDepthExceeded {
                entity: entity.to_string(),
                event: event.name().to_string(),
                limit,
            });
        };

        let key = RouteKey::new(entity, event);
        let handlers = match self.slots.get(&key) {
            Some(slot) if slot.payload != PayloadType::of::<P>() => {
                return Err(RoutingError::PayloadMismatch {
                    entity: entity.to_string(),
                    event: event.name().to_string(),
                    expected: slot.payload.name(),
                    found: std::any::type_name::<P>(),
                });
            }
            Some(slot) => slot.handlers.clone(),
            None => {
                trace!(entity, event = event.name(), "no subscribers");
                return Ok(Delivery::routed(0));
            }
        };

        let span = debug_span!("dispatch", entity, event = event.name());
        let _enter = span.enter();

        let mut failures = Vec::new();
        for handler in &handlers {
            match handler.invoke(payload) {
                Some(Ok(())) => {}
                Some(Err(error)) => {
                    warn!(
                        subscription = %handler.id,
                        owner = %handler.owner,
                        %error,
                        "handler failed"
                    );
                    failures.push(HandlerFailure {
                        subscription: handler.id,
                        error,
                    });
                }
                None => {
                    error!(subscription = %handler.id, "handler payload does not match its route");
                    failures.push(HandlerFailure {
                        subscription: handler.id,
                        error: format!(
                            "handler does not accept `{}`",
                            std::any::type_name::<P>()
                        )
                        .into(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(Delivery::routed(handlers.len()))
        } else {
            Err(RoutingError::HandlerFailures {
                entity: entity.to_string(),
                event: event.name().to_string(),
                invoked: handlers.len(),
                failures,
            })
        }
    }

    /// Moves every entry of `other` into this registry, returning how many were moved
    ///
    /// Routes are taken in the order of their earliest subscription and each route's callbacks
    /// are appended behind the ones already here. Entries whose payload type clashes with the
    /// route here stay behind in `other`
    pub fn merge(&self, other: &Registry) -> usize {
        if std::ptr::eq(self, other) {
            return 0;
        }

        let mut merged = 0;
        for entry in other.drain() {
            match self.insert(entry) {
                Ok(()) => merged += 1,
                Err((entry, err)) => {
                    error!(%err, subscription = %entry.id(), "entry left out of merge");
                    if let Err((_, err)) = other.insert(entry) {
                        error!(%err, "unable to return entry to its registry");
                    }
                }
            }
        }
        merged
    }

    /// Removes a single callback, returning whether it was found
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut found = false;
        let mut emptied = None;

        for mut slot in self.slots.iter_mut() {
            if let Some(position) = slot.handlers.iter().position(|handler| handler.id == id) {
                slot.handlers.remove(position);
                found = true;
                if slot.handlers.is_empty() {
                    emptied = Some(slot.key().clone());
                }
                break;
            }
        }

        if let Some(key) = emptied {
            self.slots.remove_if(&key, |_, slot| slot.handlers.is_empty());
        }
        found
    }

    /// Empties the registry, routes ordered by their earliest subscription
    pub(crate) fn drain(&self) -> Vec<Entry> {
        let keys: Vec<RouteKey> = self.slots.iter().map(|slot| slot.key().clone()).collect();

        keys.into_iter()
            .filter_map(|key| self.slots.remove(&key))
            .sorted_by_key(|(_, slot)| slot.handlers.first().map(|handler| handler.id))
            .flat_map(|(key, slot)| {
                let event = slot.event;
                slot.handlers.into_iter().map(move |handler| Entry {
                    key: key.clone(),
                    event: event.clone(),
                    handler,
                })
            })
            .collect()
    }

    /// Removes every entry subscribed by `owner`, in subscription order
    pub(crate) fn extract_owned_by(&self, owner: NodeId) -> Vec<Entry> {
        let mut extracted = Vec::new();
        let mut emptied = Vec::new();

        for mut guard in self.slots.iter_mut() {
            let key = guard.key().clone();
            let slot = guard.value_mut();
            if !slot.handlers.iter().any(|handler| handler.owner == owner) {
                continue;
            }

            let (owned, kept): (Vec<Handler>, Vec<Handler>) = std::mem::take(&mut slot.handlers)
                .into_iter()
                .partition(|handler| handler.owner == owner);
            slot.handlers = kept;

            extracted.extend(owned.into_iter().map(|handler| Entry {
                key: key.clone(),
                event: slot.event.clone(),
                handler,
            }));

            if slot.handlers.is_empty() {
                emptied.push(key);
            }
        }

        for key in emptied {
            self.slots.remove_if(&key, |_, slot| slot.handlers.is_empty());
        }

        extracted.sort_by_key(Entry::id);
        extracted
    }

    /// Total number of callbacks across all routes
    pub fn len(&self) -> usize {
        self.slots.iter().map(|slot| slot.handlers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn subscriber_count<P>(&self, entity: &str, event: &EventKind<P>) -> usize {
        self.slots
            .get(&RouteKey::new(entity, event))
            .map_or(0, |slot| slot.handlers.len())
    }

    /// Every `(entity, event)` route with at least one subscriber, sorted
    pub fn routes(&self) -> Vec<(String, String)> {
        self.slots
            .iter()
            .map(|slot| (slot.key().entity().to_string(), slot.event.to_string()))
            .sorted()
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("routes", &self.routes())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    const PING: EventKind<u32> = EventKind::new("ping");
    const NOTE: EventKind<&'static str> = EventKind::new("note");

    fn owner() -> NodeId {
        NodeId::next()
    }

    #[test]
    fn dispatch_runs_callbacks_in_order() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let log = log.clone();
            registry
                .subscribe(owner(), "a", &PING, move |value: &u32| {
                    log.lock().push((tag, *value))
                })
                .unwrap();
        }

        let delivery = registry.dispatch("a", &PING, &7).unwrap();
        assert_eq!(delivery, Delivery::routed(3));
        assert_eq!(
            *log.lock(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn missing_route_is_a_no_op() {
        let registry = Registry::new();
        let delivery = registry.dispatch("nobody", &PING, &1).unwrap();
        assert!(delivery.routed);
        assert_eq!(delivery.invoked, 0);
    }

    #[test]
    fn duplicate_subscriptions_deliver_twice() {
        let registry = Registry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let id = owner();

        for _ in 0..2 {
            let count = count.clone();
            registry
                .subscribe(id, "d", &PING, move |_: &u32| {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        registry.dispatch("d", &PING, &0).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn failing_handler_does_not_stop_the_rest() {
        let registry = Registry::new();
        let count = Arc::new(AtomicUsize::new(0));

        registry
            .subscribe(owner(), "f", &PING, |_: &u32| -> Result<(), HandlerError> {
                Err("first fails".into())
            })
            .unwrap();
        let later = count.clone();
        registry
            .subscribe(owner(), "f", &PING, move |_: &u32| {
                later.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        match registry.dispatch("f", &PING, &0) {
            Err(RoutingError::HandlerFailures {
                invoked, failures, ..
            }) => {
                assert_eq!(invoked, 2);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].error.to_string(), "first fails");
            }
            other => panic!("expected handler failures, got {:?}", other),
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn payload_type_is_fixed_by_first_subscription() {
        let registry = Registry::new();
        let shared_name = EventKind::<String>::named("ping");

        registry.subscribe(owner(), "p", &PING, |_: &u32| {}).unwrap();
        let err = registry
            .subscribe(owner(), "p", &shared_name, |_: &String| {})
            .unwrap_err();
        assert!(matches!(err, RoutingError::PayloadMismatch { .. }));

        let err = registry
            .dispatch("p", &shared_name, &String::from("x"))
            .unwrap_err();
        assert!(matches!(err, RoutingError::PayloadMismatch { .. }));
    }

    #[test]
    fn subscriptions_made_during_dispatch_apply_next_time() {
        let registry = Arc::new(Registry::new());
        let count = Arc::new(AtomicUsize::new(0));

        let inner_registry = registry.clone();
        let inner_count = count.clone();
        registry
            .subscribe(owner(), "r", &PING, move |_: &u32| {
                let count = inner_count.clone();
                inner_registry
                    .subscribe(owner(), "r", &PING, move |_: &u32| {
                        count.fetch_add(1, Ordering::SeqCst);
                    })
                    .map(|_| ())
            })
            .unwrap();

        assert_eq!(registry.dispatch("r", &PING, &0).unwrap().invoked, 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert_eq!(registry.dispatch("r", &PING, &0).unwrap().invoked, 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_during_dispatch_keeps_the_snapshot() {
        let registry = Arc::new(Registry::new());
        let count = Arc::new(AtomicUsize::new(0));
        let victim = Arc::new(Mutex::new(None));

        let inner_registry = registry.clone();
        let inner_victim = victim.clone();
        registry
            .subscribe(owner(), "u", &PING, move |_: &u32| {
                if let Some(id) = inner_victim.lock().take() {
                    assert!(inner_registry.unsubscribe(id));
                }
            })
            .unwrap();

        let later = count.clone();
        let id = registry
            .subscribe(owner(), "u", &PING, move |_: &u32| {
                later.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        *victim.lock() = Some(id);

        assert_eq!(registry.dispatch("u", &PING, &0).unwrap().invoked, 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert_eq!(registry.dispatch("u", &PING, &0).unwrap().invoked, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!registry.unsubscribe(id));
    }

    #[test]
    fn empty_routes_release_their_payload_type() {
        let registry = Registry::new();
        let id = registry.subscribe(owner(), "e", &PING, |_: &u32| {}).unwrap();
        assert!(registry.unsubscribe(id));
        assert!(registry.is_empty());

        let as_string = EventKind::<String>::named("ping");
        registry
            .subscribe(owner(), "e", &as_string, |_: &String| {})
            .unwrap();
    }

    #[test]
    fn merge_appends_behind_existing_entries() {
        let authority = Registry::new();
        let local = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let subscribe = |registry: &Registry, tag: &'static str| {
            let log = log.clone();
            registry
                .subscribe(owner(), "m", &NOTE, move |note: &&'static str| {
                    log.lock().push(format!("{}:{}", tag, note))
                })
                .unwrap();
        };

        subscribe(&local, "local-1");
        subscribe(&authority, "authority");
        subscribe(&local, "local-2");
        local.subscribe(owner(), "other", &PING, |_: &u32| {}).unwrap();

        assert_eq!(authority.merge(&local), 3);
        assert!(local.is_empty());
        assert_eq!(authority.subscriber_count("m", &NOTE), 3);
        assert_eq!(authority.subscriber_count("other", &PING), 1);

        authority.dispatch("m", &NOTE, &"hi").unwrap();
        assert_eq!(
            *log.lock(),
            vec!["authority:hi", "local-1:hi", "local-2:hi"]
        );
    }

    #[test]
    fn extract_owned_by_takes_only_that_owner() {
        let registry = Registry::new();
        let mine = owner();
        let theirs = owner();

        let first = registry.subscribe(mine, "x", &PING, |_: &u32| {}).unwrap();
        registry.subscribe(theirs, "x", &PING, |_: &u32| {}).unwrap();
        let second = registry.subscribe(mine, "y", &NOTE, |_: &&'static str| {}).unwrap();

        let extracted = registry.extract_owned_by(mine);
        let ids: Vec<_> = extracted.iter().map(Entry::id).collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.routes(), vec![("x".to_string(), "ping".to_string())]);
    }

    #[test]
    fn nested_dispatch_is_bounded() {
        let registry = Arc::new(Registry::with_config(
            RouterConfig::new().max_dispatch_depth(3),
        ));
        let depth = Arc::new(AtomicUsize::new(0));

        let inner_registry = registry.clone();
        let inner_depth = depth.clone();
        registry
            .subscribe(owner(), "loop", &PING, move |value: &u32| {
                inner_depth.fetch_add(1, Ordering::SeqCst);
                inner_registry.dispatch("loop", &PING, &(value + 1)).map(|_| ())
            })
            .unwrap();

        let err = registry.dispatch("loop", &PING, &0).unwrap_err();
        assert!(matches!(err, RoutingError::HandlerFailures { .. }));
        assert_eq!(depth.load(Ordering::SeqCst), 3);

        // the guard unwinds, so a fresh dispatch gets the full depth again
        let err = registry.dispatch("loop", &PING, &0).unwrap_err();
        assert!(matches!(err, RoutingError::HandlerFailures { .. }));
        assert_eq!(depth.load(Ordering::SeqCst), 6);
    }
}
