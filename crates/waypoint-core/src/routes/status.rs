//! `GET /status`: the installed route table as JSON, in insertion order.

use crate::route_table::RouteTable;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct RouteStatus {
    name: String,
    backends: Vec<String>,
}

pub async fn status(table: web::Data<RouteTable>) -> HttpResponse {
    let routes = table.snapshot().await;
    let body: Vec<RouteStatus> = routes
        .iter()
        .map(|route| RouteStatus {
            name: route.key.clone(),
            backends: route.backends().iter().map(|u| u.to_string()).collect(),
        })
        .collect();
    HttpResponse::Ok().json(body)
}
