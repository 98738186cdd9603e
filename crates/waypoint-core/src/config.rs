//! Gateway listen-address configuration, sourced from environment variables
//! with sane defaults so the binary runs unconfigured in a dev environment.

use std::env;
use std::net::SocketAddr;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl GatewayConfig {
    /// Reads `WAYPOINT_HOST`/`WAYPOINT_PORT`, falling back to
    /// `0.0.0.0:8080` if unset or an unparsable port is given.
    pub fn from_env() -> Self {
        let host = env::var("WAYPOINT_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = env::var("WAYPOINT_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Self { host, port }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}
