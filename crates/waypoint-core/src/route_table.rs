//! The route table: route key -> installed pipeline.
//!
//! Mutated only by the reconciler, which holds the write lock for one
//! reconcile pass; the HTTP router and `/status` take a read lock, released
//! before invoking a pipeline so upstream latency never blocks
//! reconciliation.

use crate::pipeline::RoutePipeline;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

/// One installed route: its key and the pipeline serving it.
///
/// There is no separately-tracked "installed backend set": the pipeline's
/// balancer server list *is* the backend set, so the two can never drift.
pub struct ProxyRoute {
    pub key: String,
    pub pipeline: Arc<RoutePipeline>,
}

impl ProxyRoute {
    pub fn backends(&self) -> Vec<Url> {
        self.pipeline.servers().servers()
    }
}

/// Insertion-ordered so `/status` returns routes in a stable order across
/// calls without intervening reconciles.
#[derive(Clone)]
pub struct RouteTable {
    routes: Arc<RwLock<IndexMap<String, Arc<ProxyRoute>>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            routes: Arc::new(RwLock::new(IndexMap::new())),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<ProxyRoute>> {
        self.routes.read().await.get(key).cloned()
    }

    pub async fn insert(&self, route: Arc<ProxyRoute>) {
        self.routes.write().await.insert(route.key.clone(), route);
    }

    pub async fn snapshot(&self) -> Vec<Arc<ProxyRoute>> {
        self.routes.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
