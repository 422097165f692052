//! Ledger endpoints: open/read balances, record/cancel/list transactions.
//!
//! Handlers orchestrate only: validate at the boundary via `dto`, call the
//! store, and translate failures via `errors`. No business rules live here.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use tally_store::LedgerStore;

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/balances", post(open_balance))
        .route("/balances/:balance_id", get(get_balance))
        .route("/balances/:balance_id/txs", post(record_tx).get(list_txs))
        .route("/balances/:balance_id/txs/cancel", post(cancel_txs))
}

pub async fn open_balance(
    Extension(ledger): Extension<Arc<dyn LedgerStore>>,
    Json(body): Json<dto::OpenBalanceRequest>,
) -> axum::response::Response {
    let balance_id = match dto::parse_balance_id(&body.balance_id) {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match ledger.open_balance(balance_id).await {
        Ok(()) => (StatusCode::OK, Json(json!({}))).into_response(),
        Err(e) => errors::store_error_to_response("open balance", e),
    }
}

pub async fn get_balance(
    Extension(ledger): Extension<Arc<dyn LedgerStore>>,
    Path(balance_id): Path<String>,
) -> axum::response::Response {
    let balance_id = match dto::parse_balance_id(&balance_id) {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match ledger.balance(balance_id).await {
        Ok(balance) => (StatusCode::OK, Json(dto::balance_to_json(&balance))).into_response(),
        Err(e) => errors::store_error_to_response("get balance", e),
    }
}

pub async fn record_tx(
    Extension(ledger): Extension<Arc<dyn LedgerStore>>,
    Path(balance_id): Path<String>,
    Json(body): Json<dto::RecordTxRequest>,
) -> axum::response::Response {
    let balance_id = match dto::parse_balance_id(&balance_id) {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let tx = match dto::to_tx(balance_id, &body) {
        Ok(tx) => tx,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match ledger.record_tx(tx).await {
        Ok(()) => (StatusCode::OK, Json(json!({}))).into_response(),
        Err(e) => errors::store_error_to_response("record transaction", e),
    }
}

pub async fn cancel_txs(
    Extension(ledger): Extension<Arc<dyn LedgerStore>>,
    Path(balance_id): Path<String>,
    Json(body): Json<dto::CancelTxsRequest>,
) -> axum::response::Response {
    if body.tx_ids.is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_argument",
            "no transaction ids provided",
        );
    }

    let balance_id = match dto::parse_balance_id(&balance_id) {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let tx_ids = match dto::parse_tx_ids(&body.tx_ids) {
        Ok(ids) => ids,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match ledger.cancel_txs(balance_id, &tx_ids).await {
        Ok(()) => (StatusCode::OK, Json(json!({}))).into_response(),
        Err(e) => errors::store_error_to_response("cancel transactions", e),
    }
}

pub async fn list_txs(
    Extension(ledger): Extension<Arc<dyn LedgerStore>>,
    Path(balance_id): Path<String>,
    Query(query): Query<dto::ListTxsQuery>,
) -> axum::response::Response {
    let balance_id = match dto::parse_balance_id(&balance_id) {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let include_deleted = query.include_deleted.unwrap_or(false);
    let limit = dto::clamp_page_size(query.page_size);

    let result = match query.page_token.as_deref() {
        None | Some("") => ledger.recent_txs(balance_id, include_deleted, limit).await,
        Some(token) => {
            let before = match dto::parse_tx_id(token) {
                Ok(id) => id,
                Err(e) => return errors::domain_error_to_response(e),
            };
            ledger
                .previous_txs(balance_id, include_deleted, before, limit)
                .await
        }
    };

    let txs = match result {
        Ok(txs) => txs,
        Err(e) => return errors::store_error_to_response("list transactions", e),
    };

    // Keyset cursor: the last returned id. An under-full page is the final
    // one, signalled by an empty token.
    let next_page_token = match txs.last() {
        Some(last) if txs.len() as i64 == limit => last.tx_id.to_string(),
        _ => String::new(),
    };

    (
        StatusCode::OK,
        Json(json!({
            "txs": txs.iter().map(dto::tx_to_json).collect::<Vec<_>>(),
            "next_page_token": next_page_token,
        })),
    )
        .into_response()
}
