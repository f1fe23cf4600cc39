//! Request metrics middleware
//!
//! Records count and latency per route template, so `/v1/chat/{session_id}`
//! is one series no matter how many sessions exist.

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use docsage_common::metrics::RequestMetrics;

pub async fn track_metrics(request: Request, next: Next) -> Response {
    let endpoint = endpoint_label(
        request.extensions().get::<MatchedPath>().map(MatchedPath::as_str),
        request.uri().path(),
    );
    let metrics = RequestMetrics::start(request.method().as_str(), &endpoint);

    let response = next.run(request).await;

    metrics.finish(response.status().as_u16());
    response
}

fn endpoint_label(matched: Option<&str>, path: &str) -> String {
    matched.unwrap_or(path).to_string()
}
