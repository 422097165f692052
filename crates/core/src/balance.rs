//! Balance value type.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::id::BalanceId;

/// One ledger subject holding a single non-negative amount.
///
/// The non-negativity invariant is enforced by the store on every mutation;
/// this type only carries the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub balance_id: BalanceId,
    pub amount: Decimal,
}
