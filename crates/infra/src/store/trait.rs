use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use wallet_core::{AccountId, Amount, LedgerError};
use wallet_ledger::{Account, NewTransaction, TransactionRecord};

use super::query::HistoryQuery;

/// Storage operation error.
///
/// These are **infrastructure errors** as opposed to ledger rule violations. The
/// engine surfaces every one of them as `LedgerError::StorageUnavailable`: the
/// unit of work that produced it is discarded, so retrying is always safe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Conditional write lost (stale version, serialization failure, deadlock
    /// victim, duplicate create).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A row lock could not be obtained within the configured bound.
    #[error("lock timeout: {0}")]
    LockTimeout(String),

    /// Backend unreachable, pool exhausted or closed, IO failure.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The store refused the data (constraint violation, undecodable row,
    /// unit used after it finished).
    #[error("invalid storage operation: {0}")]
    Invalid(String),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        LedgerError::StorageUnavailable(value.to_string())
    }
}

/// Account Store half of a unit of work.
///
/// All reads and writes happen inside the enclosing unit; nothing is visible to
/// other readers until the unit commits.
#[async_trait::async_trait]
pub trait AccountStore: Send {
    /// Read an account for modification. Durable backends take an exclusive row
    /// lock held until the unit finishes. `None` means "never seen", which is
    /// distinct from an account with a zero balance.
    async fn get_for_update(&mut self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Return the account, creating it with a zero balance (version 0) if absent.
    async fn create_if_absent(
        &mut self,
        id: AccountId,
        at: DateTime<Utc>,
    ) -> Result<Account, StoreError>;

    /// Set the balance if the stored version still equals `expected_version`.
    ///
    /// On success the version is incremented and the updated account returned;
    /// a mismatch is `StoreError::Conflict` and nothing changes.
    async fn update_balance(
        &mut self,
        id: AccountId,
        expected_version: u64,
        balance: Amount,
        at: DateTime<Utc>,
    ) -> Result<Account, StoreError>;
}

/// Ledger Store half of a unit of work (append-only).
#[async_trait::async_trait]
pub trait LedgerStore: Send {
    /// Append one row. The store assigns a unique, monotonically increasing id
    /// and a timestamp that never goes backwards for the same account.
    async fn append(&mut self, tx: NewTransaction) -> Result<TransactionRecord, StoreError>;
}

/// One atomic unit spanning both stores.
///
/// Either `commit` makes every staged balance change and ledger row durable
/// together, or nothing happens: `rollback`, a failed `commit`, and dropping an
/// unfinished unit all discard the unit's effects.
#[async_trait::async_trait]
pub trait UnitOfWork: AccountStore + LedgerStore {
    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Durable backend for accounts and ledger rows.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Open a new unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Committed snapshot of one account.
    async fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// One keyset page of an account's rows, newest first.
    async fn history(
        &self,
        id: AccountId,
        query: HistoryQuery,
    ) -> Result<Vec<TransactionRecord>, StoreError>;
}

#[async_trait::async_trait]
impl<S> Storage for Arc<S>
where
    S: Storage + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        (**self).begin().await
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        (**self).account(id).await
    }

    async fn history(
        &self,
        id: AccountId,
        query: HistoryQuery,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        (**self).history(id, query).await
    }
}
