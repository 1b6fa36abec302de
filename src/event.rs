//! Event kinds
//!
//! An [`EventKind`] names an event and fixes the type of payload it carries. Kinds are
//! identified by an FNV-1a hash of their name, which can be computed at compile time, so
//! kinds are usually declared as constants next to the component that emits them
//!
//! ```
//! use director::EventKind;
//!
//! const CLICKED: EventKind<(i32, i32)> = EventKind::new("clicked");
//! assert_eq!(CLICKED.name(), "clicked");
//! ```

use std::any::TypeId;
use std::borrow::Cow;
use std::fmt::{self, Debug, Display};
use std::marker::PhantomData;

/// The hashed name of an event
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EventId(u64);

impl EventId {
    pub const fn of(name: &str) -> Self {
        EventId(const_fnv1a_hash::fnv1a_hash_str_64(name))
    }

    pub fn raw_id(&self) -> u64 {
        self.0
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A named event carrying a payload of type `P`
///
/// Subscribing and emitting both go through the same `EventKind`, so the payload type a
/// callback expects is the payload type it will be handed
pub struct EventKind<P> {
    name: Cow<'static, str>,
    id: EventId,
    _payload: PhantomData<fn(&P)>,
}

impl<P> EventKind<P> {
    pub const fn new(name: &'static str) -> Self {
        EventKind {
            name: Cow::Borrowed(name),
            id: EventId::of(name),
            _payload: PhantomData,
        }
    }

    /// Creates a kind from a name only known at runtime, such as a mapped native event
    pub fn named(name: impl Into<String>) -> Self {
        let name: String = name.into();
        let id = EventId::of(&name);
        EventKind {
            name: Cow::Owned(name),
            id,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> EventId {
        self.id
    }
}

impl<P> Clone for EventKind<P> {
    fn clone(&self) -> Self {
        EventKind {
            name: self.name.clone(),
            id: self.id,
            _payload: PhantomData,
        }
    }
}

impl<P> Debug for EventKind<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventKind({} <{}>)", self.name, std::any::type_name::<P>())
    }
}

impl<P> Display for EventKind<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Runtime description of a payload type, kept next to type-erased callbacks
#[derive(Copy, Clone, Debug)]
pub(crate) struct PayloadType {
    id: TypeId,
    name: &'static str,
}

impl PayloadType {
    pub(crate) fn of<P: 'static>() -> Self {
        PayloadType {
            id: TypeId::of::<P>(),
            name: std::any::type_name::<P>(),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for PayloadType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PayloadType {}
