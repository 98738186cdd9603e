//! Minimal backend that self-registers with the discovery registry so it
//! becomes visible to the gateway, demonstrating the registry client crate.

use actix_web::{web, App, HttpResponse, HttpServer};
use clap::Parser;
use log::{error, info};
use serde_json::json;
use std::net::TcpListener;
use uuid::Uuid;
use waypoint_registry_client::{RegisterOptions, RegistryClient};

#[derive(Parser, Debug)]
#[command(name = "sample-service")]
struct Cli {
    #[arg(long, default_value = "consul://consul:8500")]
    consul: String,
    #[arg(long, default_value = "sample")]
    service: String,
}

async fn identify(id: web::Data<String>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "id": id.get_ref() }))
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

fn free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let id = Uuid::new_v4().to_string();
    let port = free_port()?;

    let client = match RegistryClient::new(&cli.consul) {
        Ok(client) => client,
        Err(e) => {
            error!("could not create registry client: {}", e);
            std::process::exit(1);
        }
    };

    info!("registering {} with consul", cli.service);
    let registered_id = client
        .register(RegisterOptions {
            id: id.clone(),
            name: cli.service.clone(),
            port,
            ttl: 10,
            enable_shutdown_hook: true,
            ..Default::default()
        })
        .await
        .unwrap_or_else(|e| {
            error!("could not register service: {}", e);
            std::process::exit(1);
        });

    let server_id = registered_id.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(server_id.clone()))
            .route("/health", web::get().to(health))
            .route("/", web::get().to(identify))
    })
    .bind(("127.0.0.1", port))?
    .run()
    .await
}
