use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::process;

#[derive(Parser)]
#[command(name = "waypoint", version, about = "Command-line client for inspecting a running Waypoint gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the installed route table from a gateway's /status endpoint
    Status {
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,
    },
}

#[derive(Debug, Deserialize)]
struct RouteStatus {
    name: String,
    backends: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status { url } => {
            if let Err(e) = print_status(&url).await {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        }
    }
}

async fn print_status(base_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("{}/status", base_url.trim_end_matches('/'));
    let routes: Vec<RouteStatus> = reqwest::get(&url).await?.error_for_status()?.json().await?;

    if routes.is_empty() {
        println!("no routes installed");
        return Ok(());
    }

    for route in routes {
        println!("{} ({} backend(s))", route.name, route.backends.len());
        for backend in route.backends {
            println!("  - {}", backend);
        }
    }
    Ok(())
}
