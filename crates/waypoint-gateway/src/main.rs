//! Waypoint gateway server entry point.
//!
//! Wires a Consul-backed discovery watcher into the route reconciler and
//! serves `/status` plus the catch-all proxy handler over the configured
//! listen address.

use actix_web::{middleware::Logger, web, App, HttpServer};
use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use waypoint_core::config::GatewayConfig;
use waypoint_core::discovery::consul::ConsulServiceDiscovery;
use waypoint_core::discovery::ServiceDiscovery;
use waypoint_core::logs::logger::configure_logger;
use waypoint_core::middleware::request_id::RequestId;
use waypoint_core::reconciler::Reconciler;
use waypoint_core::route_table::RouteTable;
use waypoint_core::routes::{proxy, status};

#[derive(Parser, Debug)]
#[command(name = "waypoint-gateway", version, about = "Dynamic HTTP reverse-proxy gateway")]
struct Cli {
    /// URI of the discovery registry, e.g. consul://consul:8500
    #[arg(long, default_value = "consul://consul:8500")]
    consul: String,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let cli = Cli::parse();
    let config = GatewayConfig::from_env();
    let addr = config
        .socket_addr()
        .unwrap_or_else(|e| panic!("invalid listen address {}:{}: {}", config.host, config.port, e));

    info!("starting waypoint gateway on {}", addr);

    let discovery: Arc<dyn ServiceDiscovery> = match ConsulServiceDiscovery::new(&cli.consul) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("invalid registry uri {}: {}", cli.consul, e);
            std::process::exit(1);
        }
    };

    let table = RouteTable::new();
    let reconciler = Arc::new(Reconciler::new(table.clone(), reqwest::Client::new()));

    let watch_reconciler = reconciler.clone();
    discovery.watch(Box::new(move |snapshot| {
        let reconciler = watch_reconciler.clone();
        tokio::spawn(async move {
            if let Err(e) = reconciler.reconcile(&snapshot).await {
                error!("reconcile error: {}", e);
            }
        });
    }));

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(RequestId)
            .app_data(web::Data::new(table.clone()))
            .route("/status", web::get().to(status::status))
            .default_service(web::route().to(proxy::dispatch))
    })
    .bind(addr)?
    .run();

    let server_handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, draining connections");
            discovery.close();
            server_handle.stop(true).await;
        }
    });

    server.await
}
