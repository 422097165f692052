//! HTTP API application wiring (Axum router + service wiring).
//!
//! The folder is structured like:
//! - `routes/`: HTTP routes + handlers (the orchestration layer)
//! - `dto.rs`: request/response DTOs and domain mapping (the boundary
//!   validation layer)
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use tally_store::LedgerStore;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub fn build_app(ledger: Arc<dyn LedgerStore>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router().layer(Extension(ledger)))
        .layer(axum::middleware::from_fn(middleware::log_requests))
}
