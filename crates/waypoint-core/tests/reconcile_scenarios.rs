//! End-to-end scenarios against a reconciler wired to wiremock backends,
//! covering the route lifecycle from first appearance through backend
//! churn, disappearance, transient failure, and a tripped circuit breaker.

use actix_web::error::ResponseError;
use actix_web::test::TestRequest;
use actix_web::web;
use reqwest::Client;
use std::collections::HashMap;
use url::Url;
use waypoint_core::reconciler::Reconciler;
use waypoint_core::route_table::RouteTable;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn snapshot(service: &str, backends: &[&Url]) -> HashMap<String, Vec<Url>> {
    let mut map = HashMap::new();
    map.insert(service.to_string(), backends.iter().map(|u| (*u).clone()).collect());
    map
}

async fn get(table: &RouteTable, key: &str, path_str: &str) -> actix_web::HttpResponse {
    let route = table.get(key).await.expect("route installed");
    let req = TestRequest::get().uri(path_str).to_http_request();
    match route.pipeline.dispatch(&req, web::Bytes::new()).await {
        Ok(resp) => resp,
        Err(e) => e.error_response(),
    }
}

#[tokio::test]
async fn scenario_1_new_service_appears() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&backend)
        .await;

    let reconciler = Reconciler::new(RouteTable::new(), Client::new());
    let backend_url = Url::parse(&backend.uri()).unwrap();
    reconciler.reconcile(&snapshot("api", &[&backend_url])).await.unwrap();

    let response = get(reconciler.table(), "api", "/api").await;
    assert_eq!(response.status(), actix_web::http::StatusCode::OK);
}

#[tokio::test]
async fn scenario_2_backend_churn_preserves_pipeline_and_continues_rotation() {
    let b1 = MockServer::start().await;
    let b2 = MockServer::start().await;
    let b3 = MockServer::start().await;
    for backend in [&b1, &b2, &b3] {
        Mock::given(method("GET"))
            .and(path("/api"))
            .respond_with(ResponseTemplate::new(200))
            .mount(backend)
            .await;
    }

    let reconciler = Reconciler::new(RouteTable::new(), Client::new());
    let u1 = Url::parse(&b1.uri()).unwrap();
    let u2 = Url::parse(&b2.uri()).unwrap();
    let u3 = Url::parse(&b3.uri()).unwrap();

    reconciler.reconcile(&snapshot("api", &[&u1, &u2])).await.unwrap();
    let pipeline_before = reconciler.table().get("api").await.unwrap().pipeline.clone();

    reconciler.reconcile(&snapshot("api", &[&u2, &u3])).await.unwrap();
    let route = reconciler.table().get("api").await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&route.pipeline, &pipeline_before));
    assert_eq!(route.backends(), vec![u2, u3]);
}

#[tokio::test]
async fn scenario_3_service_disappears_then_502() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&backend)
        .await;

    let reconciler = Reconciler::new(RouteTable::new(), Client::new());
    let backend_url = Url::parse(&backend.uri()).unwrap();
    reconciler.reconcile(&snapshot("api", &[&backend_url])).await.unwrap();

    reconciler.reconcile(&HashMap::new()).await.unwrap();

    let route = reconciler.table().get("api").await.unwrap();
    assert!(route.backends().is_empty());

    let response = get(reconciler.table(), "api", "/api").await;
    assert_eq!(response.status(), actix_web::http::StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn scenario_4_connection_refused_then_retry_to_second_backend_succeeds() {
    let healthy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&healthy)
        .await;

    // Nothing listens on this port: the first attempt is a connection
    // refusal, a network error, and the retry picks the next server.
    let unreachable = Url::parse("http://127.0.0.1:1/").unwrap();
    let healthy_url = Url::parse(&healthy.uri()).unwrap();

    let reconciler = Reconciler::new(RouteTable::new(), Client::new());
    reconciler
        .reconcile(&snapshot("api", &[&unreachable, &healthy_url]))
        .await
        .unwrap();

    let response = get(reconciler.table(), "api", "/api").await;
    assert_eq!(response.status(), actix_web::http::StatusCode::OK);
}

#[tokio::test]
async fn scenario_4b_upstream_500_passes_through_verbatim_and_is_not_retried() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&backend)
        .await;

    let reconciler = Reconciler::new(RouteTable::new(), Client::new());
    let backend_url = Url::parse(&backend.uri()).unwrap();
    reconciler.reconcile(&snapshot("api", &[&backend_url])).await.unwrap();

    // A 500 is a received response, not a network error: it is forwarded
    // to the client as-is (the mock's `expect(1)` asserts no retry attempt
    // was made against it).
    let response = get(reconciler.table(), "api", "/api").await;
    assert_eq!(response.status(), actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn zero_backend_route_returns_502_without_upstream_attempt() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let table = RouteTable::new();
    let reconciler = Reconciler::new(table, Client::new());
    reconciler.reconcile(&snapshot("api", &[])).await.unwrap();

    let response = get(reconciler.table(), "api", "/api").await;
    assert_eq!(response.status(), actix_web::http::StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn scenario_5_breaker_trips_after_repeated_network_errors() {
    // Both backends are unreachable: every dispatch exhausts its two
    // attempts as connection refusals, pushing the breaker's window past
    // the trip ratio. Once open, a request fails fast with 503 rather than
    // dialing upstream.
    let unreachable_a = Url::parse("http://127.0.0.1:1/").unwrap();
    let unreachable_b = Url::parse("http://127.0.0.1:2/").unwrap();

    let reconciler = Reconciler::new(RouteTable::new(), Client::new());
    reconciler
        .reconcile(&snapshot("api", &[&unreachable_a, &unreachable_b]))
        .await
        .unwrap();

    let mut saw_circuit_open = false;
    for _ in 0..12 {
        let response = get(reconciler.table(), "api", "/api").await;
        if response.status() == actix_web::http::StatusCode::SERVICE_UNAVAILABLE {
            saw_circuit_open = true;
            break;
        }
    }
    assert!(saw_circuit_open, "breaker never tripped open under sustained network errors");
}

#[tokio::test]
async fn reconcile_is_idempotent_across_repeated_snapshots() {
    let backend = MockServer::start().await;
    let reconciler = Reconciler::new(RouteTable::new(), Client::new());
    let backend_url = Url::parse(&backend.uri()).unwrap();
    let desired = snapshot("api", &[&backend_url]);

    reconciler.reconcile(&desired).await.unwrap();
    let first = reconciler.table().get("api").await.unwrap().backends();
    reconciler.reconcile(&desired).await.unwrap();
    let second = reconciler.table().get("api").await.unwrap().backends();

    assert_eq!(first, second);
}
