use axum::Router;

pub mod balances;
pub mod system;

/// Router for all ledger endpoints.
pub fn router() -> Router {
    Router::new().merge(balances::router())
}
