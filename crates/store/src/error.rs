//! Store error model and sqlx error classification.
//!
//! Constraint violations are classified by the structured Postgres error
//! code, never by message matching. The code constants and the helpers that
//! inspect them live only in this module; call sites decide what a violation
//! means in context (a unique violation on the tx insert is `AlreadyExists`,
//! a check violation on the balance update is `NegativeBalance`).

use thiserror::Error;

/// Unique constraint violation (duplicate balance row or tx id).
const UNIQUE_VIOLATION: &str = "23505";

/// Check constraint violation (balance would go negative).
const CHECK_VIOLATION: &str = "23514";

/// Failure of a ledger store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The balance (or, for cancellation, any matching active tx) is absent.
    #[error("not found")]
    NotFound,

    /// The balance is already open, or the tx id was already recorded.
    #[error("already exists")]
    AlreadyExists,

    /// The mutation would drive the balance below zero.
    #[error("negative balance")]
    NegativeBalance,

    /// Unexpected backing-store failure. Never exposed to callers verbatim.
    #[error("storage error in {0}: {1}")]
    Backend(&'static str, String),
}

/// Map an unclassified sqlx error to [`StoreError::Backend`].
pub(crate) fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    StoreError::Backend(operation, err.to_string())
}

/// Check if an error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    has_pg_code(err, UNIQUE_VIOLATION)
}

/// Check if an error is a check constraint violation.
pub(crate) fn is_check_violation(err: &sqlx::Error) -> bool {
    has_pg_code(err, CHECK_VIOLATION)
}

fn has_pg_code(err: &sqlx::Error, code: &str) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(c) = db_err.code() {
            return c.as_ref() == code;
        }
    }
    false
}
