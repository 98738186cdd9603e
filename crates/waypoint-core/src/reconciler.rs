//! Diffs a discovery snapshot against the installed route table and applies
//! the minimum set of insertions, in-place updates, and drains.

use crate::discovery::Snapshot;
use crate::error::{PipelineBuildError, ReconcileError};
use crate::pipeline::RoutePipeline;
use crate::route_table::{ProxyRoute, RouteTable};
use log::{info, warn};
use reqwest::Client;
use std::sync::Arc;

pub struct Reconciler {
    table: RouteTable,
    client: Client,
}

impl Reconciler {
    pub fn new(table: RouteTable, client: Client) -> Self {
        Self { table, client }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Applies one snapshot to the route table. Add/update/drain are
    /// attempted independently per route; a failure on one is logged and
    /// wrapped with its key, and reconciliation continues for the rest. The
    /// first wrapped error encountered, if any, is returned.
    pub async fn reconcile(&self, desired: &Snapshot) -> Result<(), ReconcileError> {
        let mut first_error = None;

        for (key, backends) in desired {
            if let Err(error) = self.apply_route(key, backends).await {
                warn!("reconcile failed for route {}: {}", key, error);
                first_error.get_or_insert_with(|| ReconcileError {
                    key: key.clone(),
                    source: error,
                });
            }
        }

        let installed_keys: Vec<String> = self
            .table
            .snapshot()
            .await
            .into_iter()
            .map(|route| route.key.clone())
            .collect();
        for key in installed_keys {
            if !desired.contains_key(&key) {
                self.drain(&key).await;
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn apply_route(&self, key: &str, backends: &[url::Url]) -> Result<(), PipelineBuildError> {
        match self.table.get(key).await {
            Some(route) => {
                route.pipeline.servers().reconcile(backends);
            }
            None => {
                let pipeline = Arc::new(RoutePipeline::new(key, self.client.clone()));
                pipeline.servers().reconcile(backends);
                let route = Arc::new(ProxyRoute {
                    key: key.to_string(),
                    pipeline,
                });
                self.table.insert(route).await;
                info!("installed route {} with {} backend(s)", key, backends.len());
            }
        }
        Ok(())
    }

    /// Drains a vanished service's balancer to empty. The pipeline and its
    /// route table entry remain; the bad-gateway guard turns future requests
    /// into a clean 502 rather than racing a physical route removal against
    /// in-flight dispatch.
    async fn drain(&self, key: &str) {
        if let Some(route) = self.table.get(key).await {
            if !route.pipeline.servers().is_empty() {
                info!("draining route {}: no longer present in discovery snapshot", key);
                route.pipeline.servers().reconcile(&[]);
            }
        }
    }
}
