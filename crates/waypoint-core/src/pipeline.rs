//! Per-route request pipeline: bad-gateway guard -> circuit breaker -> retry
//! stream -> round-robin balancer -> forwarder.
//!
//! One [`RoutePipeline`] is built per route and reused across reconciles;
//! only its balancer's server list mutates in place (see `route_table`).

use crate::balancer::ServerList;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::error::{ForwardError, GatewayError};
use crate::forwarder::Forwarder;
use crate::retry::with_retry;
use actix_web::{web, HttpRequest, HttpResponse};
use reqwest::Client;

pub struct RoutePipeline {
    servers: ServerList,
    breaker: CircuitBreaker,
    forwarder: Forwarder,
}

impl RoutePipeline {
    pub fn new(route_key: &str, client: Client) -> Self {
        Self {
            servers: ServerList::new(),
            breaker: CircuitBreaker::new(route_key.to_string(), CircuitBreakerConfig::default()),
            forwarder: Forwarder::new(client),
        }
    }

    pub fn servers(&self) -> &ServerList {
        &self.servers
    }

    /// Dispatches one inbound request through the full chain.
    pub async fn dispatch(&self, req: &HttpRequest, body: web::Bytes) -> Result<HttpResponse, GatewayError> {
        if self.servers.is_empty() {
            return Err(GatewayError::BadGateway);
        }

        let result = self
            .breaker
            .call(
                with_retry(&self.servers, |backend, _attempt| {
                    self.forwarder.forward(req, &backend, body.clone())
                }),
                ForwardError::is_network,
            )
            .await;

        match result {
            Ok(response) => Ok(response),
            Err(CircuitBreakerError::CircuitOpen) => Err(GatewayError::CircuitOpen),
            Err(CircuitBreakerError::OperationFailed(forward_error)) => Err(forward_error.into()),
        }
    }
}
