//! Ledger storage: the transactional engine behind balances and transactions.
//!
//! All serialization correctness lives here. Mutating operations against one
//! balance are serialized by a per-balance advisory lock inside a single
//! database transaction; different balances proceed fully in parallel. The
//! process itself holds no locks and no in-memory account state.

pub mod error;
pub mod in_memory;
pub mod ledger;
pub mod postgres;

pub use error::StoreError;
pub use in_memory::InMemoryLedger;
pub use ledger::LedgerStore;
pub use postgres::PostgresLedger;
