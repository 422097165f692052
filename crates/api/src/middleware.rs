use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};

/// Log every request with method, path, status, and latency.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let resp = next.run(req).await;

    tracing::debug!(
        %method,
        path,
        status = resp.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request processed"
    );

    resp
}
