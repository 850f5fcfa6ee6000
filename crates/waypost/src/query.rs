//! Namespace queries
//!
//! Stateless helpers over the registry keyspace. These can share an adapter
//! distinct from a registration's, so listing peers never contends with a
//! busy renewal loop.

use http::Uri;
use tracing::warn;

use crate::error::Result;
use crate::node::{name_from_key, Node};
use crate::store::NodeStore;

/// List the nodes registered under a service.
///
/// Keys with empty values are dropped; values that do not parse as URIs are
/// logged and skipped. Order mirrors the store's range order.
pub async fn nodes<S: NodeStore + ?Sized>(
    store: &S,
    namespace: &str,
    service: &str,
) -> Result<Vec<Node>> {
    let prefix = format!("{namespace}/{service}/");
    let kvs = store.range_prefix(&prefix).await?;
    let mut nodes = Vec::with_capacity(kvs.len());
    for kv in kvs {
        if kv.value.is_empty() {
            continue;
        }
        let uri: Uri = match kv.value.parse() {
            Ok(uri) => uri,
            Err(err) => {
                warn!(key = %kv.key, value = %kv.value, error = %err, "skipping node with invalid uri");
                continue;
            }
        };
        nodes.push(Node {
            name: name_from_key(&kv.key).to_string(),
            uri,
        });
    }
    Ok(nodes)
}

/// Enumerate the services with at least one key under the namespace,
/// deduplicated in first-seen order.
pub async fn services<S: NodeStore + ?Sized>(store: &S, namespace: &str) -> Result<Vec<String>> {
    let prefix = format!("{namespace}/");
    let kvs = store.range_prefix(&prefix).await?;
    let mut seen: Vec<String> = Vec::new();
    for kv in kvs {
        let Some(service) = kv.key.split('/').nth(1) else {
            continue;
        };
        if !seen.iter().any(|s| s == service) {
            seen.push(service.to_string());
        }
    }
    Ok(seen)
}

/// Delete every key under the namespace. Returns the number deleted.
pub async fn clear_namespace<S: NodeStore + ?Sized>(store: &S, namespace: &str) -> Result<i64> {
    store.delete_prefix(namespace).await
}
