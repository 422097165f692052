//! Request/response DTOs and their mapping to domain types.
//!
//! Conversions are pure: string-encoded identifiers, decimal amounts, and
//! enum tags are validated here, before anything touches the store. The
//! wire-level "unspecified" tag (and any unknown tag) is rejected.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use tally_core::{Balance, BalanceId, DomainError, Tx, TxId};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 500;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct OpenBalanceRequest {
    pub balance_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordTxRequest {
    pub tx_id: String,
    pub source: String,
    pub state: String,
    pub amount: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelTxsRequest {
    pub tx_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListTxsQuery {
    pub page_size: Option<i64>,
    pub page_token: Option<String>,
    pub include_deleted: Option<bool>,
}

// -------------------------
// Domain mapping
// -------------------------

pub fn parse_balance_id(s: &str) -> Result<BalanceId, DomainError> {
    s.parse()
}

pub fn parse_tx_id(s: &str) -> Result<TxId, DomainError> {
    s.parse()
}

pub fn parse_tx_ids(ids: &[String]) -> Result<Vec<TxId>, DomainError> {
    ids.iter().map(|id| parse_tx_id(id)).collect()
}

/// Parse a wire amount. Amounts are signed-magnitude: the sign lives in the
/// tx state, so the magnitude itself must be strictly positive.
pub fn parse_amount(s: &str) -> Result<Decimal, DomainError> {
    let amount: Decimal = s
        .parse()
        .map_err(|e| DomainError::invalid_amount(format!("{s:?}: {e}")))?;

    if amount <= Decimal::ZERO {
        return Err(DomainError::invalid_amount("amount must be positive"));
    }

    Ok(amount)
}

/// Build the domain tx from a record request. `created_at`/`deleted_at` are
/// placeholders here; the store assigns them.
pub fn to_tx(balance_id: BalanceId, req: &RecordTxRequest) -> Result<Tx, DomainError> {
    Ok(Tx {
        tx_id: parse_tx_id(&req.tx_id)?,
        balance_id,
        source: req.source.parse()?,
        state: req.state.parse()?,
        amount: parse_amount(&req.amount)?,
        created_at: Utc::now(),
        deleted_at: None,
    })
}

/// Clamp a requested page size into `[1, MAX_PAGE_SIZE]`, defaulting when
/// absent or non-positive.
pub fn clamp_page_size(requested: Option<i64>) -> i64 {
    match requested {
        Some(n) if n > 0 => n.min(MAX_PAGE_SIZE),
        _ => DEFAULT_PAGE_SIZE,
    }
}

// -------------------------
// Response JSON
// -------------------------

pub fn balance_to_json(balance: &Balance) -> JsonValue {
    json!({
        "balance_id": balance.balance_id.to_string(),
        "amount": balance.amount.to_string(),
    })
}

pub fn tx_to_json(tx: &Tx) -> JsonValue {
    json!({
        "tx_id": tx.tx_id.to_string(),
        "balance_id": tx.balance_id.to_string(),
        "source": tx.source.as_str(),
        "state": tx.state.as_str(),
        "amount": tx.amount.to_string(),
        "created_at": tx.created_at.to_rfc3339(),
        "deleted_at": tx.deleted_at.map(|t| t.to_rfc3339()),
    })
}
