//! Catch-all proxy dispatch handler.
//!
//! Matching an inbound path to a route key is the URL router's job and is
//! explicitly out of scope for this design; this handler uses the simplest
//! possible mapping (the first path segment is the route key) so the
//! gateway binary is runnable end to end. A real deployment would plug in a
//! richer matcher ahead of this handler without touching the pipeline.

use crate::error::GatewayError;
use crate::route_table::RouteTable;
use actix_web::{web, HttpRequest, HttpResponse};

fn route_key(path: &str) -> Option<&str> {
    path.trim_start_matches('/').split('/').next().filter(|s| !s.is_empty())
}

pub async fn dispatch(
    req: HttpRequest,
    body: web::Bytes,
    table: web::Data<RouteTable>,
) -> Result<HttpResponse, GatewayError> {
    let key = route_key(req.path()).ok_or(GatewayError::NotFound)?;
    let route = table.get(key).await.ok_or(GatewayError::NotFound)?;
    route.pipeline.dispatch(&req, body).await
}
