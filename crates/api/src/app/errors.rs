use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use tally_core::DomainError;
use tally_store::StoreError;

/// Boundary validation failures are always invalid-argument.
pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_argument", err.to_string())
}

/// Map a store failure to the externally visible error category.
///
/// `operation` names the attempted call for the log line and the opaque
/// internal message; backend detail never reaches the caller.
pub fn store_error_to_response(operation: &'static str, err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        StoreError::AlreadyExists => {
            json_error(StatusCode::CONFLICT, "already_exists", "already exists")
        }
        StoreError::NegativeBalance => {
            json_error(StatusCode::BAD_REQUEST, "invalid_argument", "negative balance")
        }
        StoreError::Backend(..) => {
            tracing::error!(error = %err, operation, "store operation failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                format!("failed to {operation}"),
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
