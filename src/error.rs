use std::fmt;

use thiserror::Error;

use crate::id::SubscriptionId;

/// The error type callbacks may fail with
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = Result<(), HandlerError>;

/// A single callback that failed while an event was being dispatched
#[derive(Debug)]
pub struct HandlerFailure {
    pub subscription: SubscriptionId,
    pub error: HandlerError,
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subscription, self.error)
    }
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("node {node} has no name and cannot take part in routing")]
    EmptyName { node: String },

    #[error("event names must not be empty")]
    EmptyEvent,

    #[error("event `{event}` on `{entity}` carries `{expected}`, not `{found}`")]
    PayloadMismatch {
        entity: String,
        event: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("`{entity}` emitted `{event}` without a routing authority")]
    Unattached { entity: String, event: String },

    #[error("dispatching `{event}` on `{entity}` would exceed the dispatch depth limit of {limit}")]
    DispatchDepthExceeded {
        entity: String,
        event: String,
        limit: usize,
    },

    #[error(
        "{} of {} handlers for `{event}` on `{entity}` failed",
        .failures.len(),
        .invoked
    )]
    HandlerFailures {
        entity: String,
        event: String,
        invoked: usize,
        failures: Vec<HandlerFailure>,
    },

    #[error(
        "{} of {} bindings of native event `{native}` failed",
        .failures.len(),
        .bindings
    )]
    BindingFailures {
        native: String,
        bindings: usize,
        failures: Vec<RoutingError>,
    },
}

/// Errors raised by the data models
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("index {index} is out of bounds for a model of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("model has no property named `{0}`")]
    UnknownProperty(String),

    #[error("value {value} is not allowed for property `{property}`, allowed values are {allowed}")]
    DisallowedValue {
        property: String,
        value: String,
        allowed: String,
    },

    #[error(transparent)]
    Routing(#[from] RoutingError),
}

#[test]
fn test_handler_failures_message() {
    let err = RoutingError::HandlerFailures {
        entity: "list".into(),
        event: "push".into(),
        invoked: 3,
        failures: vec![HandlerFailure {
            subscription: SubscriptionId::next(),
            error: "boom".into(),
        }],
    };
    assert_eq!(err.to_string(), "1 of 3 handlers for `push` on `list` failed");
}
