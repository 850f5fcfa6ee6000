//! Service prefix watches
//!
//! [`watch`] opens a prefix subscription on the store and pumps raw events
//! through the parser to a [`ChangeListener`] until stopped. Watches are not
//! auto-restarted: when the store side disconnects, the pump ends and the
//! caller decides whether to watch again.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::Result;
use crate::event::{ChangeListener, Event};
use crate::store::NodeStore;

/// Handle to a running watch
pub struct WatchTask {
    stop: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl WatchTask {
    /// Stop the watch and wait for the delivery task to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = self.join.await;
    }
}

/// Watch a service prefix, delivering parsed events to the listener in
/// store emission order.
pub async fn watch<S: NodeStore + ?Sized>(
    store: &S,
    namespace: &str,
    service: &str,
    listener: Arc<dyn ChangeListener>,
) -> Result<WatchTask> {
    let prefix = format!("{namespace}/{service}");
    let mut subscription = store.watch_prefix(&prefix).await?;
    let (stop_tx, mut stop_rx) = oneshot::channel();
    let join = tokio::spawn(async move {
        debug!(prefix = %prefix, "watch started");
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                raw = subscription.recv() => match raw {
                    Some(raw) => listener.on_event(Event::from_store(raw)),
                    None => {
                        debug!(prefix = %prefix, "watch stream closed");
                        break;
                    }
                }
            }
        }
        subscription.stop();
    });
    Ok(WatchTask {
        stop: Some(stop_tx),
        join,
    })
}
