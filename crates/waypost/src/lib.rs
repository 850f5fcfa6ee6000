//! Service discovery over an etcd-style key-value store.
//!
//! A process registers itself as a named node under a service namespace,
//! bound to a store lease that a background task keeps renewed. Peers are
//! listed through the namespace query functions, and membership changes are
//! delivered through prefix watches.
//!
//! The store is abstracted behind the [`NodeStore`] trait; [`EtcdStore`] is
//! the production backend. Keys follow the schema
//! `"<namespace>/<service>/<name>"` and each value is the stringified URI of
//! the node.

pub mod error;
pub mod event;
pub mod node;
pub mod query;
pub mod registry;
pub mod settings;
pub mod store;
pub mod watch;

pub use error::{Error, Result};
pub use event::{ChangeListener, Event, EventKind, FnListener};
pub use node::Node;
pub use query::{clear_namespace, nodes, services};
pub use registry::Registration;
pub use settings::Settings;
pub use store::{etcd::EtcdStore, KeyValue, Lease, NodeStore, StoreEvent, Subscription};
pub use watch::{watch, WatchTask};
