//! Membership change events
//!
//! Raw store watch events are translated into typed [`Event`] records and
//! handed to a caller-supplied [`ChangeListener`].

use crate::store::StoreEvent;

/// Kind of membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// A membership change under a watched service prefix.
///
/// `namespace` and `service` are extracted by splitting the key on `/`;
/// `value` is absent for deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub key: String,
    pub value: Option<String>,
    pub kind: EventKind,
    pub namespace: String,
    pub service: Option<String>,
}

impl Event {
    /// Translate a raw store event into a typed record.
    pub fn from_store(raw: StoreEvent) -> Self {
        let mut tokens = raw.key.split('/');
        let namespace = tokens.next().unwrap_or_default().to_string();
        let service = tokens.next().map(str::to_string);
        Self {
            key: raw.key,
            value: raw.value,
            kind: raw.kind,
            namespace,
            service,
        }
    }
}

/// Trait for receiving membership change events.
///
/// Implement this to be notified of PUTs and DELETEs under a watched
/// service prefix. Invoked in the watch delivery task, in store emission
/// order.
pub trait ChangeListener: Send + Sync + 'static {
    fn on_event(&self, event: Event);
}

/// A listener that invokes a closure.
pub struct FnListener<F>
where
    F: Fn(Event) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(Event) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ChangeListener for FnListener<F>
where
    F: Fn(Event) + Send + Sync + 'static,
{
    fn on_event(&self, event: Event) {
        (self.f)(event);
    }
}
