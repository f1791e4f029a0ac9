//! `wallet-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the fixed-point monetary amount, and the ledger error taxonomy.

pub mod error;
pub mod id;
pub mod money;

pub use error::{ErrorKind, LedgerError, LedgerResult, TransferSide};
pub use id::{AccountId, CorrelationId, InvalidAccountId, TransactionId};
pub use money::Amount;
