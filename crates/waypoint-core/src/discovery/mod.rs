//! Service discovery abstraction.
//!
//! The gateway depends only on the [`ServiceDiscovery`] contract, never on a
//! specific registry product. [`consul`] provides the reference
//! implementation against a Consul-compatible catalog API.

pub mod consul;

use std::collections::HashMap;
use url::Url;

/// Tag that marks a service as eligible for gateway routing.
///
/// Only services carrying this literal tag are resolved into a route by the
/// watcher; backends registered without it are invisible to the gateway.
pub const GATEWAY_TAG: &str = "mag";

/// Full desired state emitted by a watcher: service name to live backend URLs.
///
/// Absence of a name means "remove that route"; an empty `Vec` means "route
/// exists but has no live targets" (see `route_table` for how this becomes a
/// drained route).
pub type Snapshot = HashMap<String, Vec<Url>>;

/// Callback invoked with a full snapshot whenever the registry reports a
/// change. Invoked at most once concurrently (serially) by the watcher.
pub type Watcher = Box<dyn Fn(Snapshot) + Send + Sync>;

/// Parameters for registering one service instance.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistrationRequest {
    /// Unique instance id. A UUID is generated if left empty.
    pub id: String,
    /// Service name backends of the same kind share.
    pub name: String,
    /// Address to register. Auto-detected (first non-loopback IPv4) if empty.
    pub address: String,
    pub port: u16,
    /// If greater than zero, the registry expects a heartbeat every `ttl`
    /// seconds (a background task drives this, see `waypoint-registry-client`).
    pub ttl: u32,
    /// If set, the registry polls this path itself instead of expecting a
    /// heartbeat.
    pub health_check_path: Option<String>,
    pub enable_shutdown_hook: bool,
}

/// Contract the reconciler and registration side depend on. Any registry
/// implementing this is an acceptable backend for the gateway.
#[async_trait::async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Registers a service instance, returning its final (possibly
    /// generated) id.
    async fn register(&self, request: ServiceRegistrationRequest) -> Result<String, crate::error::DiscoveryError>;

    /// Deregisters a previously-registered instance.
    async fn unregister(&self, id: &str) -> Result<(), crate::error::DiscoveryError>;

    /// Installs a long-running observer. Begins watching immediately; runs
    /// until the process exits or [`ServiceDiscovery::close`] is called.
    /// Errors are internal to the watcher: logged and retried, never
    /// propagated to the caller.
    fn watch(&self, watcher: Watcher);

    /// Stops background tasks (heartbeat, shutdown hook, watcher).
    fn close(&self);
}
