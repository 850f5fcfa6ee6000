//! Etcd-backed store adapter
//!
//! Wraps `etcd_client::Client` with the discipline the registration engine
//! relies on: one in-flight request per adapter, lazy reconnection after any
//! client error, and retry-with-backoff on the operations that opt in.
//! `keep_alive` and `watch_prefix` are single-attempt; the renewal loop and
//! the watch caller are their own retry.

use std::future::Future;

use async_trait::async_trait;
use etcd_client::{
    Client, DeleteOptions, EventType, GetOptions, PutOptions, WatchOptions, WatchResponse,
    WatchStream, Watcher,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use super::{retry, KeyValue, Lease, NodeStore, StoreEvent, Subscription};
use crate::error::{Error, Result};
use crate::event::EventKind;

/// Etcd store client with serialized access and lazy reconnection
pub struct EtcdStore {
    endpoints: Vec<String>,
    client: Mutex<Option<Client>>,
}

impl EtcdStore {
    /// Create an adapter that connects on first use.
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            client: Mutex::new(None),
        }
    }

    /// Create an adapter and establish the connection eagerly, retrying
    /// with exponential backoff until the store answers.
    pub async fn connect(endpoints: Vec<String>) -> Result<Self> {
        let store = Self::new(endpoints);
        let client = backoff::future::retry(retry::policy(), || async {
            match Client::connect(store.endpoints.clone(), None).await {
                Ok(client) => {
                    debug!("connected to etcd");
                    Ok(client)
                }
                Err(err) => {
                    warn!(error = %err, "etcd connection failed, retrying");
                    Err(backoff::Error::transient(err))
                }
            }
        })
        .await
        .map_err(Error::Etcd)?;
        *store.client.lock().await = Some(client);
        Ok(store)
    }

    /// Borrow the live client, reconnecting if the previous one was
    /// discarded after an error.
    async fn connected<'a>(
        &self,
        slot: &'a mut Option<Client>,
    ) -> std::result::Result<&'a mut Client, etcd_client::Error> {
        if slot.is_none() {
            debug!("connecting to etcd");
            *slot = Some(Client::connect(self.endpoints.clone(), None).await?);
        }
        match slot.as_mut() {
            Some(client) => Ok(client),
            None => Err(etcd_client::Error::InvalidArgs("no client".to_owned())),
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, etcd_client::Error>>,
    {
        backoff::future::retry(retry::policy(), || {
            let attempt = op();
            async move {
                attempt.await.map_err(|err| {
                    if is_transient(&err) {
                        warn!(error = %err, "store call failed, backing off");
                        backoff::Error::transient(Error::Etcd(err))
                    } else {
                        backoff::Error::permanent(Error::Etcd(err))
                    }
                })
            }
        })
        .await
    }

    async fn try_grant(&self, ttl: i64) -> std::result::Result<Lease, etcd_client::Error> {
        let mut slot = self.client.lock().await;
        let client = self.connected(&mut slot).await?;
        match client.lease_grant(ttl, None).await {
            Ok(resp) => Ok(Lease {
                id: resp.id(),
                ttl: resp.ttl(),
            }),
            Err(err) => {
                *slot = None;
                Err(err)
            }
        }
    }

    async fn try_keep_alive(
        &self,
        lease_id: i64,
    ) -> std::result::Result<Option<i64>, etcd_client::Error> {
        let mut slot = self.client.lock().await;
        let client = self.connected(&mut slot).await?;
        let result = async {
            let (mut keeper, mut stream) = client.lease_keep_alive(lease_id).await?;
            keeper.keep_alive().await?;
            Ok::<_, etcd_client::Error>(stream.message().await?)
        }
        .await;
        match result {
            Ok(Some(resp)) if resp.ttl() > 0 => Ok(Some(resp.ttl())),
            Ok(_) => Ok(None),
            Err(err) => {
                *slot = None;
                Err(err)
            }
        }
    }

    async fn try_revoke(&self, lease_id: i64) -> std::result::Result<bool, etcd_client::Error> {
        let mut slot = self.client.lock().await;
        let client = self.connected(&mut slot).await?;
        match client.lease_revoke(lease_id).await {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => {
                *slot = None;
                Err(err)
            }
        }
    }

    async fn try_put(
        &self,
        key: &str,
        value: &str,
        lease_id: i64,
    ) -> std::result::Result<bool, etcd_client::Error> {
        let mut slot = self.client.lock().await;
        let client = self.connected(&mut slot).await?;
        let options = (lease_id != 0).then(|| PutOptions::new().with_lease(lease_id));
        match client.put(key, value, options).await {
            Ok(_) => Ok(true),
            Err(err) => {
                *slot = None;
                Err(err)
            }
        }
    }

    async fn try_get(
        &self,
        key: &str,
        options: Option<GetOptions>,
    ) -> std::result::Result<Vec<KeyValue>, etcd_client::Error> {
        let mut slot = self.client.lock().await;
        let client = self.connected(&mut slot).await?;
        let resp = match client.get(key, options).await {
            Ok(resp) => resp,
            Err(err) => {
                *slot = None;
                return Err(err);
            }
        };
        let mut kvs = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            kvs.push(KeyValue {
                key: kv.key_str()?.to_string(),
                value: kv.value_str()?.to_string(),
                lease: kv.lease(),
            });
        }
        Ok(kvs)
    }

    async fn try_delete_prefix(
        &self,
        prefix: &str,
    ) -> std::result::Result<i64, etcd_client::Error> {
        let mut slot = self.client.lock().await;
        let client = self.connected(&mut slot).await?;
        match client
            .delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await
        {
            Ok(resp) => Ok(resp.deleted()),
            Err(err) => {
                *slot = None;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl NodeStore for EtcdStore {
    async fn grant(&self, ttl: i64) -> Result<Lease> {
        self.with_retry(|| self.try_grant(ttl)).await
    }

    async fn keep_alive(&self, lease_id: i64) -> Result<Option<i64>> {
        self.try_keep_alive(lease_id).await.map_err(Error::Etcd)
    }

    async fn revoke(&self, lease_id: i64) -> Result<bool> {
        self.with_retry(|| self.try_revoke(lease_id)).await
    }

    async fn put(&self, key: &str, value: &str, lease_id: i64) -> Result<bool> {
        self.with_retry(|| self.try_put(key, value, lease_id)).await
    }

    async fn range(&self, key: &str) -> Result<Vec<KeyValue>> {
        self.with_retry(|| self.try_get(key, None)).await
    }

    async fn range_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        self.with_retry(|| self.try_get(prefix, Some(GetOptions::new().with_prefix())))
            .await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<i64> {
        self.with_retry(|| self.try_delete_prefix(prefix)).await
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<Subscription> {
        let (watcher, stream) = {
            let mut slot = self.client.lock().await;
            let client = self.connected(&mut slot).await.map_err(Error::Etcd)?;
            match client
                .watch(prefix, Some(WatchOptions::new().with_prefix()))
                .await
            {
                Ok(pair) => pair,
                Err(err) => {
                    *slot = None;
                    return Err(Error::Etcd(err));
                }
            }
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(pump(watcher, stream, events_tx, stop_rx));
        Ok(Subscription::new(events_rx, stop_tx))
    }
}

/// Forward raw watch events until the stream ends or the subscriber stops.
async fn pump(
    mut watcher: Watcher,
    mut stream: WatchStream,
    events: mpsc::UnboundedSender<StoreEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => {
                if let Err(err) = watcher.cancel().await {
                    debug!(error = %err, "watch cancel failed");
                }
                break;
            }
            msg = stream.message() => match msg {
                Ok(Some(resp)) => {
                    if resp.canceled() {
                        debug!("watch canceled by the store");
                        break;
                    }
                    if !forward(&resp, &events) {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("watch stream ended");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "watch stream failed");
                    break;
                }
            }
        }
    }
}

/// Returns `false` once the subscriber is gone.
fn forward(resp: &WatchResponse, events: &mpsc::UnboundedSender<StoreEvent>) -> bool {
    for event in resp.events() {
        let Some(kv) = event.kv() else { continue };
        let key = match kv.key_str() {
            Ok(key) => key.to_string(),
            Err(err) => {
                warn!(error = %err, "skipping watch event with non-utf8 key");
                continue;
            }
        };
        let raw = match event.event_type() {
            EventType::Put => {
                let value = match kv.value_str() {
                    Ok(value) => value.to_string(),
                    Err(err) => {
                        warn!(error = %err, key = %key, "skipping watch event with non-utf8 value");
                        continue;
                    }
                };
                StoreEvent {
                    kind: EventKind::Put,
                    key,
                    value: Some(value),
                }
            }
            EventType::Delete => StoreEvent {
                kind: EventKind::Delete,
                key,
                value: None,
            },
        };
        if events.send(raw).is_err() {
            return false;
        }
    }
    true
}

fn is_not_found(err: &etcd_client::Error) -> bool {
    matches!(err, etcd_client::Error::GRpcStatus(status) if status.code() == tonic::Code::NotFound)
}

fn is_transient(err: &etcd_client::Error) -> bool {
    match err {
        etcd_client::Error::IoError(_) | etcd_client::Error::TransportError(_) => true,
        etcd_client::Error::GRpcStatus(status) => matches!(
            status.code(),
            tonic::Code::Unavailable | tonic::Code::DeadlineExceeded | tonic::Code::Aborted
        ),
        _ => false,
    }
}
