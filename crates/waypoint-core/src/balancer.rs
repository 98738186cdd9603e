//! Round-robin balancer over a mutable, ordered set of backend URLs.
//!
//! The server list is the single mutable piece of a route's pipeline:
//! reconciling a route updates this list in place so in-flight retries and
//! the circuit breaker's learned state survive backend churn.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

/// Returns true if `urls` contains a URL equal to `target` (string equality
/// of the normalized URL, per the data model).
pub fn contains(urls: &[Url], target: &Url) -> bool {
    urls.iter().any(|u| u == target)
}

/// An ordered, mutable set of backend URLs with round-robin selection.
///
/// Order is meaningful: it is the rotation order, and is preserved across
/// updates. Survivors keep their slot, new members append, removed members
/// vacate without reordering the rest.
#[derive(Debug, Default)]
pub struct ServerList {
    servers: Mutex<Vec<Url>>,
    cursor: AtomicUsize,
}

impl ServerList {
    pub fn new() -> Self {
        Self {
            servers: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Snapshot of the currently installed servers, in rotation order.
    ///
    /// Taken under the same lock `pick`/`upsert`/`remove` use, so callers
    /// never observe a torn list.
    pub fn servers(&self) -> Vec<Url> {
        self.servers.lock().expect("server list lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.servers.lock().expect("server list lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `url` if it is not already present. Idempotent: upserting an
    /// already-present URL is a no-op. New members always append.
    pub fn upsert(&self, url: Url) {
        let mut servers = self.servers.lock().expect("server list lock poisoned");
        if !contains(&servers, &url) {
            servers.push(url);
        }
    }

    /// Removes `url` if present, compacting the list while preserving the
    /// relative order of survivors.
    pub fn remove(&self, url: &Url) {
        let mut servers = self.servers.lock().expect("server list lock poisoned");
        servers.retain(|existing| existing != url);
    }

    /// Advances the rotation cursor and returns the next server, or `None`
    /// if the list is empty.
    pub fn pick(&self) -> Option<Url> {
        let servers = self.servers.lock().expect("server list lock poisoned");
        if servers.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % servers.len();
        Some(servers[index].clone())
    }

    /// Reconciles the installed list toward `desired`, in input order: any
    /// URL in `desired` not currently installed is upserted, and any
    /// installed URL not in `desired` is removed. Exposed here (rather than
    /// only inlined in the reconciler) so both it and tests can drive a
    /// balancer directly.
    pub fn reconcile(&self, desired: &[Url]) {
        let (to_add, to_remove) = {
            let servers = self.servers.lock().expect("server list lock poisoned");
            let to_add: Vec<Url> = desired
                .iter()
                .filter(|u| !contains(&servers, u))
                .cloned()
                .collect();
            let to_remove: Vec<Url> = servers
                .iter()
                .filter(|u| !contains(desired, u))
                .cloned()
                .collect();
            (to_add, to_remove)
        };
        for url in to_add {
            self.upsert(url);
        }
        for url in to_remove {
            self.remove(&url);
        }
    }
}
