//! Store client abstraction
//!
//! The discovery store is a black box offering KV operations, leases, and
//! prefix watches. [`NodeStore`] is the seam the registration engine, query
//! API, and watcher bind to; [`etcd::EtcdStore`] is the production backend
//! and tests provide an in-memory fake.

pub mod etcd;
mod retry;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::event::EventKind;

/// A lease granted by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub id: i64,
    /// TTL in seconds, as granted (the store may clamp the requested value)
    pub ttl: i64,
}

/// A key-value pair as returned by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    /// Lease the key is bound to; 0 if unbound
    pub lease: i64,
}

/// A raw watch event before parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub kind: EventKind,
    pub key: String,
    /// Absent on delete
    pub value: Option<String>,
}

/// Abstract contract of the discovery store.
///
/// Operations map one-to-one onto the etcd KV/lease/watch surface. Every
/// call is a suspension point; implementations serialize access to a shared
/// transport internally.
#[async_trait]
pub trait NodeStore: Send + Sync + 'static {
    /// Grant a lease with the given TTL in seconds.
    async fn grant(&self, ttl: i64) -> Result<Lease>;

    /// Renew a lease. Returns the new remaining TTL, or `None` if the store
    /// refused the renewal (the lease is gone).
    async fn keep_alive(&self, lease_id: i64) -> Result<Option<i64>>;

    /// Revoke a lease. Returns `false` if the store no longer knows it.
    async fn revoke(&self, lease_id: i64) -> Result<bool>;

    /// Write a key bound to a lease (0 for no lease). Returns `false` if
    /// the store rejected the write.
    async fn put(&self, key: &str, value: &str, lease_id: i64) -> Result<bool>;

    /// Read a single key. At most one KV is returned.
    async fn range(&self, key: &str) -> Result<Vec<KeyValue>>;

    /// Read all keys under a prefix, in the store's range order.
    async fn range_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    /// Delete all keys under a prefix. Returns the number deleted.
    async fn delete_prefix(&self, prefix: &str) -> Result<i64>;

    /// Open a watch on a prefix. Events arrive in store emission order
    /// until the subscription is stopped or dropped.
    async fn watch_prefix(&self, prefix: &str) -> Result<Subscription>;
}

/// A live prefix watch.
///
/// Yields raw events until the watch ends. Dropping the subscription
/// cancels the watch as well.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<StoreEvent>,
    stop: Option<oneshot::Sender<()>>,
}

impl Subscription {
    pub fn new(events: mpsc::UnboundedReceiver<StoreEvent>, stop: oneshot::Sender<()>) -> Self {
        Self {
            events,
            stop: Some(stop),
        }
    }

    /// Receive the next event; `None` once the watch has ended.
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        self.events.recv().await
    }

    /// Stop the watch. Further events are discarded.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
