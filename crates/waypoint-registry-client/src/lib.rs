//! Reference self-registration client for services behind the Waypoint
//! gateway: registers with the discovery registry, keeps a TTL check alive
//! with a background heartbeat, and optionally deregisters on shutdown
//! signals.

use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use waypoint_core::discovery::consul::ConsulServiceDiscovery;
use waypoint_core::discovery::ServiceRegistrationRequest;
use waypoint_core::error::DiscoveryError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("registry error: {0}")]
    Registry(#[from] DiscoveryError),
}

/// Parameters a service supplies to register itself.
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub ttl: u32,
    pub health_check_path: Option<String>,
    pub enable_shutdown_hook: bool,
}

/// Wraps a [`ConsulServiceDiscovery`] with the self-registration plumbing a
/// sample backend needs: a heartbeat task for TTL-mode checks, and a
/// shutdown hook that deregisters on SIGINT/SIGTERM/SIGQUIT/SIGHUP.
pub struct RegistryClient {
    discovery: ConsulServiceDiscovery,
    closed: Arc<AtomicBool>,
}

impl RegistryClient {
    pub fn new(consul_uri: &str) -> Result<Self, ClientError> {
        Ok(Self {
            discovery: ConsulServiceDiscovery::new(consul_uri)?,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Registers the service and returns its final id. If `address` is
    /// empty, the first non-loopback IPv4 address of the host is used.
    pub async fn register(&self, mut options: RegisterOptions) -> Result<String, ClientError> {
        if options.address.is_empty() {
            options.address = local_ipv4().unwrap_or_else(|| "127.0.0.1".to_string());
        }

        let id = self
            .discovery
            .register(ServiceRegistrationRequest {
                id: options.id,
                name: options.name,
                address: options.address,
                port: options.port,
                ttl: options.ttl,
                health_check_path: options.health_check_path,
                enable_shutdown_hook: options.enable_shutdown_hook,
            })
            .await?;

        if options.ttl > 0 {
            self.spawn_heartbeat(id.clone(), options.ttl);
        }

        if options.enable_shutdown_hook {
            self.spawn_shutdown_hook(id.clone());
        }

        info!("registered service {}", id);
        Ok(id)
    }

    pub async fn unregister(&self, id: &str) -> Result<(), ClientError> {
        self.discovery.unregister(id).await?;
        Ok(())
    }

    /// Stops the heartbeat and shutdown-hook tasks.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.discovery.close();
    }

    fn spawn_heartbeat(&self, id: String, ttl: u32) {
        let discovery = self.discovery.clone();
        let closed = self.closed.clone();
        tokio::spawn(async move {
            let interval = Duration::from_secs(ttl as u64);
            while !closed.load(Ordering::Relaxed) {
                tokio::time::sleep(interval).await;
                if closed.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = discovery.heartbeat(&id).await {
                    warn!("failed to heartbeat service {}: {}", id, e);
                }
            }
        });
    }

    fn spawn_shutdown_hook(&self, id: String) {
        let discovery = self.discovery.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut hangup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
                let mut interrupt = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
                let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
                let mut quit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");

                tokio::select! {
                    _ = hangup.recv() => {}
                    _ = interrupt.recv() => {}
                    _ = terminate.recv() => {}
                    _ = quit.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }

            info!("shutdown signal received, deregistering {}", id);
            if let Err(e) = discovery.unregister(&id).await {
                error!("failed to deregister {} on shutdown: {}", id, e);
            }
            discovery.close();
        });
    }
}

fn local_ipv4() -> Option<String> {
    use std::net::UdpSocket;
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}
