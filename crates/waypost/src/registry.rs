//! Node registration engine
//!
//! A [`Registration`] owns one `(service, name, uri)` binding. `register`
//! grants a lease (or adopts a matching existing one), writes the node key
//! bound to it, and spawns a renewal loop that keeps the lease alive until
//! `unregister` clears it. Every adopted lease id is published on the
//! registration signal so observers can track re-registrations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::Uri;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::event::ChangeListener;
use crate::node;
use crate::settings::{self, Settings};
use crate::store::{Lease, NodeStore};
use crate::watch::{watch, WatchTask};

/// A node's registration in the discovery namespace
pub struct Registration<S: NodeStore> {
    store: Arc<S>,
    namespace: String,
    service: String,
    name: String,
    uri: Uri,
    /// Exact string written as the node's value
    uri_value: String,
    node_key: String,
    state: Arc<Mutex<State>>,
}

struct State {
    lease_id: Option<i64>,
    signal_tx: Option<mpsc::UnboundedSender<i64>>,
    signal_rx: Option<mpsc::UnboundedReceiver<i64>>,
    keepalive: Option<JoinHandle<()>>,
    watch: Option<WatchTask>,
}

impl State {
    fn signal_closed(&self) -> bool {
        match &self.signal_tx {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}

impl<S: NodeStore> Registration<S> {
    /// Create a binding for `<namespace>/<service>/<name> → uri`.
    ///
    /// No store traffic happens until [`register`](Self::register).
    pub fn new(
        store: Arc<S>,
        settings: &Settings,
        service: &str,
        name: &str,
        uri: &str,
    ) -> Result<Self> {
        settings::validate_namespace(&settings.namespace)?;
        node::validate_service(service)?;
        node::validate_name(name)?;
        let parsed = node::parse_uri(uri)?;
        let node_key = node::node_key(&settings.namespace, service, name);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Ok(Self {
            store,
            namespace: settings.namespace.clone(),
            service: service.to_string(),
            name: name.to_string(),
            uri: parsed,
            uri_value: uri.to_string(),
            node_key,
            state: Arc::new(Mutex::new(State {
                lease_id: None,
                signal_tx: Some(signal_tx),
                signal_rx: Some(signal_rx),
                keepalive: None,
                watch: None,
            })),
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn node_key(&self) -> &str {
        &self.node_key
    }

    /// Register the node under a lease with the given TTL in seconds.
    ///
    /// Idempotent while registered. If the store already holds this key
    /// with the same value, its lease is adopted instead of granting a new
    /// one. On success the lease id is published on the signal and the
    /// renewal loop is running.
    pub async fn register(&self, ttl: i64) -> Result<()> {
        if ttl < 1 {
            return Err(Error::InvalidTtl(ttl));
        }
        let mut state = self.state.lock().await;
        if state.lease_id.is_some() {
            debug!(key = %self.node_key, "already registered");
            return Ok(());
        }
        if state.signal_closed() {
            let (tx, rx) = mpsc::unbounded_channel();
            state.signal_tx = Some(tx);
            state.signal_rx = Some(rx);
        }
        let existing = self.store.range(&self.node_key).await?.into_iter().next();
        let lease = match existing {
            Some(kv) if kv.value == self.uri_value && kv.lease != 0 => {
                info!(lease_id = kv.lease, key = %self.node_key, "adopting existing registration");
                Lease { id: kv.lease, ttl }
            }
            _ => new_lease(self.store.as_ref(), &self.node_key, &self.uri_value, ttl).await?,
        };
        state.lease_id = Some(lease.id);
        if let Some(tx) = &state.signal_tx {
            let _ = tx.send(lease.id);
        }
        let task = tokio::spawn(keepalive_loop(
            Arc::clone(&self.store),
            Arc::clone(&self.state),
            self.node_key.clone(),
            self.uri_value.clone(),
            lease.ttl,
        ));
        state.keepalive = Some(task);
        info!(lease_id = lease.id, key = %self.node_key, ttl = lease.ttl, "registered");
        Ok(())
    }

    /// Revoke the lease and clear the registration.
    ///
    /// Idempotent while unregistered. If the store rejects the revoke the
    /// binding stays registered so a retry is meaningful.
    pub async fn unregister(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(lease_id) = state.lease_id else {
            debug!(key = %self.node_key, "not registered");
            return Ok(());
        };
        if !self.store.revoke(lease_id).await? {
            warn!(lease_id, key = %self.node_key, "store rejected lease revoke");
            return Err(Error::RevokeRejected(lease_id));
        }
        state.lease_id = None;
        state.signal_tx = None;
        state.signal_rx = None;
        if let Some(task) = state.keepalive.take() {
            task.abort();
        }
        info!(lease_id, key = %self.node_key, "unregistered");
        Ok(())
    }

    pub async fn is_registered(&self) -> bool {
        self.state.lock().await.lease_id.is_some()
    }

    /// Take the registration signal receiver.
    ///
    /// Single consumer: yields each adopted lease id in adoption order and
    /// closes on unregister. Returns `None` once taken for the current
    /// registration epoch.
    pub async fn signal(&self) -> Option<mpsc::UnboundedReceiver<i64>> {
        self.state.lock().await.signal_rx.take()
    }

    /// Watch this binding's service prefix, delivering parsed events to
    /// the listener. A previous monitor on this binding is stopped first.
    pub async fn monitor(&self, listener: Arc<dyn ChangeListener>) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(task) = state.watch.take() {
            task.stop().await;
        }
        let task = watch(self.store.as_ref(), &self.namespace, &self.service, listener).await?;
        state.watch = Some(task);
        Ok(())
    }

    /// Stop the current monitor, if any.
    pub async fn unmonitor(&self) {
        let task = self.state.lock().await.watch.take();
        if let Some(task) = task {
            task.stop().await;
        }
    }
}

/// Grant a lease and bind the node key to it. A put failure is fatal; the
/// fresh lease is revoked best-effort before the error surfaces.
async fn new_lease<S: NodeStore + ?Sized>(
    store: &S,
    key: &str,
    value: &str,
    ttl: i64,
) -> Result<Lease> {
    let lease = store.grant(ttl).await?;
    match store.put(key, value, lease.id).await {
        Ok(true) => {
            debug!(lease_id = lease.id, key = %key, "bound key to lease");
            Ok(lease)
        }
        Ok(false) => {
            revoke_orphan(store, lease.id).await;
            Err(Error::RegistrationFailed(key.to_string()))
        }
        Err(err) => {
            revoke_orphan(store, lease.id).await;
            Err(err)
        }
    }
}

async fn revoke_orphan<S: NodeStore + ?Sized>(store: &S, lease_id: i64) {
    if store.revoke(lease_id).await.is_err() {
        debug!(lease_id, "orphan lease left to expire");
    }
}

/// Three renewals per TTL window; fractional so a 1s TTL still renews.
fn renewal_period(ttl: i64) -> Duration {
    Duration::from_secs_f64(ttl.max(1) as f64 / 3.0)
}

/// Renewal loop. Exits when the lease is cleared by unregister; every
/// other failure is logged and retried on the next tick.
async fn keepalive_loop<S: NodeStore>(
    store: Arc<S>,
    state: Arc<Mutex<State>>,
    node_key: String,
    uri_value: String,
    mut ttl: i64,
) {
    debug!(key = %node_key, ttl, "renewal loop started");
    loop {
        let start = Instant::now();
        tokio::time::sleep(renewal_period(ttl)).await;
        let lease_id = { state.lock().await.lease_id };
        let Some(lease_id) = lease_id else {
            debug!(key = %node_key, "lease cleared, stopping renewal loop");
            break;
        };
        let elapsed = start.elapsed();
        if elapsed.as_secs_f64() > ttl as f64 {
            // The scheduler starved us past the point the lease could have
            // survived; renewing is pointless, re-register instead.
            warn!(
                lease_id,
                key = %node_key,
                elapsed_ms = elapsed.as_millis() as u64,
                "renewal timer overslept the lease ttl, re-registering"
            );
            match regrant(store.as_ref(), &state, &node_key, &uri_value, ttl).await {
                Regrant::Adopted(new_ttl) => ttl = new_ttl,
                Regrant::Stopped => break,
                Regrant::Failed => {}
            }
            continue;
        }
        match store.keep_alive(lease_id).await {
            Ok(Some(remaining)) => {
                let still_held = { state.lock().await.lease_id == Some(lease_id) };
                if still_held {
                    ttl = remaining;
                }
            }
            Ok(None) => {
                warn!(lease_id, key = %node_key, "lease expired at the store, re-registering");
                match regrant(store.as_ref(), &state, &node_key, &uri_value, ttl).await {
                    Regrant::Adopted(new_ttl) => ttl = new_ttl,
                    Regrant::Stopped => break,
                    Regrant::Failed => {}
                }
            }
            Err(err) => {
                warn!(
                    lease_id,
                    key = %node_key,
                    error = %err,
                    "lease renewal failed, will retry next tick"
                );
            }
        }
    }
}

enum Regrant {
    Adopted(i64),
    Stopped,
    Failed,
}

/// Re-establish the registration under a fresh lease after lease loss.
async fn regrant<S: NodeStore + ?Sized>(
    store: &S,
    state: &Mutex<State>,
    node_key: &str,
    uri_value: &str,
    ttl: i64,
) -> Regrant {
    let lease = match new_lease(store, node_key, uri_value, ttl).await {
        Ok(lease) => lease,
        Err(err) => {
            error!(key = %node_key, error = %err, "re-registration failed, will retry next tick");
            return Regrant::Failed;
        }
    };
    let mut state = state.lock().await;
    if state.lease_id.is_none() {
        // Unregister won the race; don't leave a second live lease behind.
        drop(state);
        revoke_orphan(store, lease.id).await;
        return Regrant::Stopped;
    }
    state.lease_id = Some(lease.id);
    if let Some(tx) = &state.signal_tx {
        let _ = tx.send(lease.id);
    }
    info!(lease_id = lease.id, key = %node_key, "re-registered under a fresh lease");
    Regrant::Adopted(lease.ttl)
}
