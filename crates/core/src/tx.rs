//! Ledger transaction value type.

use chrono::{DateTime, Utc};
use core::str::FromStr;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{BalanceId, TxId};

/// Where a transaction originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Game,
    Payment,
    Service,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Game => "game",
            Self::Payment => "payment",
            Self::Service => "service",
        }
    }
}

impl FromStr for Source {
    type Err = DomainError;

    /// The wire-level "unspecified" sentinel is deliberately not accepted:
    /// every recorded transaction must declare a concrete source.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "game" => Ok(Self::Game),
            "payment" => Ok(Self::Payment),
            "service" => Ok(Self::Service),
            other => Err(DomainError::invalid_source(format!(
                "source must be one of: game, payment, service (got {other:?})"
            ))),
        }
    }
}

impl core::fmt::Display for Source {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a transaction's effect on the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Deposit,
    Withdraw,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
        }
    }
}

impl FromStr for State {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "withdraw" => Ok(Self::Withdraw),
            other => Err(DomainError::invalid_state(format!(
                "state must be one of: deposit, withdraw (got {other:?})"
            ))),
        }
    }
}

impl core::fmt::Display for State {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One signed ledger entry affecting exactly one balance.
///
/// `amount` is the signed-magnitude convention: always a positive decimal,
/// with the sign implied by `state`. `deleted_at` implements soft deletes;
/// a cancelled transaction stays in the ledger but is excluded from default
/// reads and from further cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub tx_id: TxId,
    pub balance_id: BalanceId,
    pub source: Source,
    pub state: State,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tx {
    /// Signed effect of recording this transaction on the owning balance.
    pub fn delta(&self) -> Decimal {
        match self.state {
            State::Deposit => self.amount,
            State::Withdraw => -self.amount,
        }
    }

    /// Exact inverse of [`Tx::delta`], applied when the transaction is
    /// cancelled.
    pub fn reversal(&self) -> Decimal {
        -self.delta()
    }

    /// Whether this transaction has been cancelled.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(state: State, amount: &str) -> Tx {
        Tx {
            tx_id: TxId::new(),
            balance_id: BalanceId::new(),
            source: Source::Game,
            state,
            amount: amount.parse().unwrap(),
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn deposit_delta_is_positive() {
        let t = tx(State::Deposit, "100");
        assert_eq!(t.delta(), "100".parse::<Decimal>().unwrap());
    }

    #[test]
    fn withdraw_delta_is_negative() {
        let t = tx(State::Withdraw, "30");
        assert_eq!(t.delta(), "-30".parse::<Decimal>().unwrap());
    }

    #[test]
    fn reversal_cancels_delta_exactly() {
        // Decimal-exact: a fractional amount must reverse with no drift.
        let t = tx(State::Withdraw, "0.0000001");
        assert_eq!(t.delta() + t.reversal(), Decimal::ZERO);
    }

    #[test]
    fn source_rejects_unspecified() {
        assert!(matches!(
            "unspecified".parse::<Source>(),
            Err(DomainError::InvalidSource(_))
        ));
        assert!(matches!("".parse::<Source>(), Err(DomainError::InvalidSource(_))));
    }

    #[test]
    fn state_round_trips_through_str() {
        for s in [State::Deposit, State::Withdraw] {
            assert_eq!(s.as_str().parse::<State>().unwrap(), s);
        }
    }

    #[test]
    fn tx_serializes_amount_as_string() {
        let t = tx(State::Deposit, "12.34");
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["amount"], serde_json::json!("12.34"));
        assert_eq!(json["state"], serde_json::json!("deposit"));
    }
}
