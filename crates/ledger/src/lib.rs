//! Wallet ledger domain (accounts, transaction records, offline audits).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod account;
pub mod audit;
pub mod transaction;

pub use account::Account;
pub use audit::{AuditError, net_flow, verify_balance_chain, verify_pairing};
pub use transaction::{NewTransaction, TransactionKind, TransactionRecord, UnknownTransactionKind};
