//! In-memory discovery store for tests
//!
//! Implements the full `NodeStore` contract: lease-bound keys, watch
//! fan-out, and remote lease expiry, plus injection knobs for failure
//! paths.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use waypost::{Error, EventKind, KeyValue, Lease, NodeStore, Result, StoreEvent, Subscription};

#[derive(Default)]
pub struct FakeStore {
    shared: Mutex<Shared>,
}

#[derive(Default)]
struct Shared {
    kvs: BTreeMap<String, Record>,
    leases: HashMap<i64, i64>,
    next_lease: i64,
    grants: u64,
    fail_keep_alive: bool,
    reject_puts: bool,
    lease_history: HashMap<String, Vec<i64>>,
    watchers: Vec<Watcher>,
}

struct Record {
    value: String,
    lease: i64,
}

struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pre-seed a key bound to a lease, as if another process registered it.
    pub fn seed(&self, key: &str, value: &str, lease_id: i64, ttl: i64) {
        let mut shared = self.shared.lock().unwrap();
        shared.leases.insert(lease_id, ttl);
        shared.kvs.insert(
            key.to_string(),
            Record {
                value: value.to_string(),
                lease: lease_id,
            },
        );
        shared
            .lease_history
            .entry(key.to_string())
            .or_default()
            .push(lease_id);
    }

    /// Expire a lease remotely: it vanishes along with its keys, and
    /// watchers see the deletes.
    pub fn expire_lease(&self, lease_id: i64) {
        let mut shared = self.shared.lock().unwrap();
        if shared.leases.remove(&lease_id).is_none() {
            return;
        }
        drop_lease_keys(&mut shared, lease_id);
    }

    pub fn value_for(&self, key: &str) -> Option<String> {
        let shared = self.shared.lock().unwrap();
        shared.kvs.get(key).map(|record| record.value.clone())
    }

    pub fn lease_for(&self, key: &str) -> Option<i64> {
        let shared = self.shared.lock().unwrap();
        shared.kvs.get(key).map(|record| record.lease)
    }

    /// Every lease id ever bound to the key, in binding order.
    pub fn lease_history(&self, key: &str) -> Vec<i64> {
        let shared = self.shared.lock().unwrap();
        shared.lease_history.get(key).cloned().unwrap_or_default()
    }

    pub fn grant_count(&self) -> u64 {
        self.shared.lock().unwrap().grants
    }

    pub fn live_lease_count(&self) -> usize {
        self.shared.lock().unwrap().leases.len()
    }

    pub fn has_lease(&self, lease_id: i64) -> bool {
        self.shared.lock().unwrap().leases.contains_key(&lease_id)
    }

    pub fn set_fail_keep_alive(&self, fail: bool) {
        self.shared.lock().unwrap().fail_keep_alive = fail;
    }

    pub fn set_reject_puts(&self, reject: bool) {
        self.shared.lock().unwrap().reject_puts = reject;
    }
}

fn drop_lease_keys(shared: &mut Shared, lease_id: i64) {
    let doomed: Vec<String> = shared
        .kvs
        .iter()
        .filter(|(_, record)| record.lease == lease_id)
        .map(|(key, _)| key.clone())
        .collect();
    for key in doomed {
        shared.kvs.remove(&key);
        emit(
            shared,
            StoreEvent {
                kind: EventKind::Delete,
                key,
                value: None,
            },
        );
    }
}

fn emit(shared: &mut Shared, event: StoreEvent) {
    shared.watchers.retain(|watcher| {
        if event.key.starts_with(&watcher.prefix) {
            watcher.tx.send(event.clone()).is_ok()
        } else {
            true
        }
    });
}

#[async_trait]
impl NodeStore for FakeStore {
    async fn grant(&self, ttl: i64) -> Result<Lease> {
        let mut shared = self.shared.lock().unwrap();
        shared.grants += 1;
        shared.next_lease += 1;
        let id = 1000 + shared.next_lease;
        shared.leases.insert(id, ttl);
        Ok(Lease { id, ttl })
    }

    async fn keep_alive(&self, lease_id: i64) -> Result<Option<i64>> {
        let shared = self.shared.lock().unwrap();
        if shared.fail_keep_alive {
            return Err(Error::Unavailable(
                "injected keep-alive failure".to_string(),
            ));
        }
        Ok(shared.leases.get(&lease_id).copied())
    }

    async fn revoke(&self, lease_id: i64) -> Result<bool> {
        let mut shared = self.shared.lock().unwrap();
        if shared.leases.remove(&lease_id).is_none() {
            return Ok(false);
        }
        drop_lease_keys(&mut shared, lease_id);
        Ok(true)
    }

    async fn put(&self, key: &str, value: &str, lease_id: i64) -> Result<bool> {
        let mut shared = self.shared.lock().unwrap();
        if shared.reject_puts {
            return Ok(false);
        }
        if lease_id != 0 && !shared.leases.contains_key(&lease_id) {
            return Err(Error::Unavailable(format!("lease {lease_id} not found")));
        }
        shared.kvs.insert(
            key.to_string(),
            Record {
                value: value.to_string(),
                lease: lease_id,
            },
        );
        shared
            .lease_history
            .entry(key.to_string())
            .or_default()
            .push(lease_id);
        emit(
            &mut shared,
            StoreEvent {
                kind: EventKind::Put,
                key: key.to_string(),
                value: Some(value.to_string()),
            },
        );
        Ok(true)
    }

    async fn range(&self, key: &str) -> Result<Vec<KeyValue>> {
        let shared = self.shared.lock().unwrap();
        Ok(shared
            .kvs
            .get(key)
            .map(|record| {
                vec![KeyValue {
                    key: key.to_string(),
                    value: record.value.clone(),
                    lease: record.lease,
                }]
            })
            .unwrap_or_default())
    }

    async fn range_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let shared = self.shared.lock().unwrap();
        Ok(shared
            .kvs
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, record)| KeyValue {
                key: key.clone(),
                value: record.value.clone(),
                lease: record.lease,
            })
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<i64> {
        let mut shared = self.shared.lock().unwrap();
        let doomed: Vec<String> = shared
            .kvs
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        let deleted = doomed.len() as i64;
        for key in doomed {
            shared.kvs.remove(&key);
            emit(
                &mut shared,
                StoreEvent {
                    kind: EventKind::Delete,
                    key,
                    value: None,
                },
            );
        }
        Ok(deleted)
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, _stop_rx) = oneshot::channel();
        self.shared.lock().unwrap().watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(Subscription::new(rx, stop_tx))
    }
}
