//! Reverse-proxy handler

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::Target;

/// Headers that describe a single hop and are never forwarded
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

/// Shared forwarding state
pub struct ForwardState {
    pub client: reqwest::Client,
    pub target: Target,
}

/// Create the proxy router: every path is forwarded
pub fn create_router(state: Arc<ForwardState>) -> Router {
    Router::new()
        .fallback(forward)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Forward a request to the target and relay the answer
async fn forward(State(state): State<Arc<ForwardState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let body = match to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("fakerpc: reading request body: {e}"))
                .into_response()
        }
    };

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = state.target.url_for(path);

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    match HeaderValue::from_str(&state.target.authority) {
        Ok(host) => {
            headers.insert(header::HOST, host);
        }
        Err(_) => {
            headers.remove(header::HOST);
        }
    }

    tracing::debug!(method = %parts.method, url = %url, "Forwarding request");

    let upstream = state
        .client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    let upstream = match upstream {
        Ok(res) => res,
        Err(e) => return bad_gateway(&url, e),
    };

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    match upstream.bytes().await {
        Ok(bytes) => relay(status, headers, bytes),
        Err(e) => bad_gateway(&url, e),
    }
}

fn relay(status: StatusCode, headers: HeaderMap, body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn bad_gateway(url: &str, e: reqwest::Error) -> Response {
    tracing::warn!(url = %url, error = %e, "Upstream request failed");
    (StatusCode::BAD_GATEWAY, format!("fakerpc: upstream request failed: {e}")).into_response()
}

/// Remove hop-by-hop headers, including any named by `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    for name in HOP_BY_HOP.iter().copied().chain(named.iter().map(String::as_str)) {
        headers.remove(name);
    }
}
