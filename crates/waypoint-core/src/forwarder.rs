//! Issues the upstream HTTP request to a chosen backend and streams the
//! response back without buffering the body.

use crate::error::ForwardError;
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use reqwest::Client;
use url::Url;

/// Headers that are connection-specific and must not be copied across a hop,
/// per RFC 7230 §6.1 plus the de-facto `Connection`-listed extensions.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str())
}

/// Forwards an inbound request to `backend`, streaming the body both ways.
pub struct Forwarder {
    client: Client,
}

impl Forwarder {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Rewrites `req`'s target to `backend` (same path and query) and issues
    /// it upstream, returning the upstream response streamed back verbatim.
    pub async fn forward(
        &self,
        req: &HttpRequest,
        backend: &Url,
        body: web::Bytes,
    ) -> Result<HttpResponse, ForwardError> {
        let mut target = backend.clone();
        target.set_path(req.uri().path());
        target.set_query(req.uri().query());

        let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
            .unwrap_or(reqwest::Method::GET);

        let mut upstream_req = self.client.request(method, target.as_str());
        for (name, value) in req.headers().iter() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            upstream_req = upstream_req.header(name.as_str(), value.as_bytes());
        }
        upstream_req = upstream_req.body(body.to_vec());

        let response = upstream_req.send().await.map_err(classify_send_error)?;

        let status = actix_web::http::StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
        let mut builder = HttpResponse::build(status);
        for (name, value) in response.headers().iter() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                builder.insert_header((name, value));
            }
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        });
        Ok(builder.streaming(stream))
    }
}

fn classify_send_error(error: reqwest::Error) -> ForwardError {
    if error.is_timeout() {
        ForwardError::Timeout
    } else if error.is_connect() {
        ForwardError::Connect(error.to_string())
    } else if error.is_request() || error.is_body() {
        ForwardError::Reset(error.to_string())
    } else {
        ForwardError::Connect(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_recognized_case_insensitively() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("X-Request-Id"));
    }
}
