//! Ledger engine (the sole writer of balances and ledger rows).
//!
//! Every mutating operation runs the same pipeline:
//!
//! ```text
//! validate amount
//!   ↓
//! 1. Acquire per-account locks (ascending AccountId, bounded wait)
//!   ↓
//! 2. Open a unit of work
//!   ↓
//! 3. Read accounts under the unit (row locks, ascending order)
//!   ↓
//! 4. Check rules against the values just read (never a stale snapshot)
//!   ↓
//! 5. Conditional balance update(s) + ledger append(s)
//!   ↓
//! 6. Commit on success, roll back on any error
//! ```
//!
//! ## Cancellation
//!
//! If the calling future is dropped mid-operation, the unit of work and the
//! lock set are dropped with it. An unfinished unit never commits, so the
//! operation either completed durably or left no trace.
//!
//! ## Error Semantics
//!
//! - **Rule violations**: `InvalidAmount`, `AccountNotFound`, `InsufficientFunds`,
//!   `SameAccount`, logged at `warn`
//! - **Storage failures**: any `StoreError` or lock timeout becomes
//!   `StorageUnavailable`, logged at `error`; nothing was applied, retry is safe

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use wallet_core::{AccountId, Amount, CorrelationId, LedgerError, LedgerResult, TransferSide};
use wallet_ledger::{Account, NewTransaction, TransactionRecord};

use crate::history::{History, HistoryPage};
use crate::locks::{AccountLocks, LockSet};
use crate::store::{DEFAULT_PAGE_SIZE, HistoryQuery, MAX_PAGE_SIZE, Storage, UnitOfWork};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on waiting for account locks (in-process and row locks).
    pub lock_timeout: Duration,
    /// Rows fetched per page by [`History`] sequences.
    pub history_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            history_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

pub struct LedgerEngine<S: Storage + ?Sized> {
    storage: Arc<S>,
    locks: AccountLocks,
    config: EngineConfig,
}

impl<S: Storage + ?Sized> std::fmt::Debug for LedgerEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerEngine")
            .field("locks", &self.locks)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: Storage + ?Sized> LedgerEngine<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self::with_config(storage, EngineConfig::default())
    }

    pub fn with_config(storage: Arc<S>, config: EngineConfig) -> Self {
        let config = EngineConfig {
            history_page_size: config.history_page_size.clamp(1, MAX_PAGE_SIZE),
            ..config
        };
        Self {
            storage,
            locks: AccountLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Credit `amount` to `account`, creating the account on first deposit.
    pub async fn deposit(&self, account: AccountId, amount: Amount) -> LedgerResult<TransactionRecord> {
        const OP: &str = "deposit";
        let amount = self.validate(OP, amount)?;

        let _locks = self.lock(OP, &[account]).await?;
        let mut uow = self.begin(OP).await?;
        let outcome = apply_deposit(uow.as_mut(), account, amount).await;
        let record = self.finish(OP, uow, outcome).await?;

        info!(
            op = OP,
            account = %account,
            amount = %amount,
            balance = %record.balance_after,
            transaction_id = %record.id,
            "ledger mutation committed"
        );
        Ok(record)
    }

    /// Debit `amount` from an existing `account`.
    pub async fn withdraw(&self, account: AccountId, amount: Amount) -> LedgerResult<TransactionRecord> {
        const OP: &str = "withdraw";
        let amount = self.validate(OP, amount)?;

        let _locks = self.lock(OP, &[account]).await?;
        let mut uow = self.begin(OP).await?;
        let outcome = apply_withdrawal(uow.as_mut(), account, amount).await;
        let record = self.finish(OP, uow, outcome).await?;

        info!(
            op = OP,
            account = %account,
            amount = %amount,
            balance = %record.balance_after,
            transaction_id = %record.id,
            "ledger mutation committed"
        );
        Ok(record)
    }

    /// Move `amount` from `from` to `to` as one atomic unit.
    ///
    /// Returns the `(transfer_out, transfer_in)` rows, which share a fresh
    /// correlation id.
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Amount,
    ) -> LedgerResult<(TransactionRecord, TransactionRecord)> {
        const OP: &str = "transfer";
        let amount = self.validate(OP, amount)?;
        if from == to {
            return Err(self.reject(OP, LedgerError::SameAccount(from)));
        }

        let _locks = self.lock(OP, &[from, to]).await?;
        let mut uow = self.begin(OP).await?;
        let outcome = apply_transfer(uow.as_mut(), from, to, amount).await;
        let (debit, credit) = self.finish(OP, uow, outcome).await?;

        info!(
            op = OP,
            from = %from,
            to = %to,
            amount = %amount,
            from_balance = %debit.balance_after,
            to_balance = %credit.balance_after,
            correlation_id = ?debit.correlation_id,
            "ledger mutation committed"
        );
        Ok((debit, credit))
    }

    /// Current committed balance. `AccountNotFound` for an account never seen,
    /// which is distinct from an existing account with a zero balance.
    pub async fn balance(&self, account: AccountId) -> LedgerResult<Amount> {
        self.account(account)
            .await?
            .map(|acc| acc.balance)
            .ok_or_else(|| LedgerError::account_not_found(account))
    }

    /// Committed snapshot of the account, if it exists.
    pub async fn account(&self, account: AccountId) -> LedgerResult<Option<Account>> {
        self.storage
            .account(account)
            .await
            .map_err(|e| self.reject("account", e.into()))
    }

    /// Lazy, restartable newest-first sequence of the account's ledger rows.
    pub fn history(&self, account: AccountId) -> History<S> {
        History::new(
            Arc::clone(&self.storage),
            account,
            self.config.history_page_size,
        )
    }

    /// One keyset page of the account's ledger rows, newest first.
    pub async fn history_page(&self, account: AccountId, query: HistoryQuery) -> LedgerResult<HistoryPage> {
        let query = HistoryQuery::new(query.before, Some(query.limit));
        let items = self
            .storage
            .history(account, query)
            .await
            .map_err(|e| self.reject("history", e.into()))?;
        Ok(HistoryPage::from_rows(items, query.limit))
    }

    fn validate(&self, op: &'static str, amount: Amount) -> LedgerResult<Amount> {
        amount.ensure_positive().map_err(|e| self.reject(op, e))
    }

    async fn lock(&self, op: &'static str, accounts: &[AccountId]) -> LedgerResult<LockSet> {
        self.locks
            .acquire(accounts, self.config.lock_timeout)
            .await
            .map_err(|e| self.reject(op, LedgerError::storage(e.to_string())))
    }

    async fn begin(&self, op: &'static str) -> LedgerResult<Box<dyn UnitOfWork>> {
        self.storage
            .begin()
            .await
            .map_err(|e| self.reject(op, e.into()))
    }

    /// Commit on success, roll back otherwise.
    async fn finish<T>(
        &self,
        op: &'static str,
        mut uow: Box<dyn UnitOfWork>,
        outcome: LedgerResult<T>,
    ) -> LedgerResult<T> {
        match outcome {
            Ok(value) => match uow.commit().await {
                Ok(()) => Ok(value),
                Err(e) => Err(self.reject(op, e.into())),
            },
            Err(err) => {
                if let Err(rollback) = uow.rollback().await {
                    // The unit is discarded on drop either way.
                    warn!(op, error = %rollback, "rollback failed");
                }
                Err(self.reject(op, err))
            }
        }
    }

    fn reject(&self, op: &'static str, err: LedgerError) -> LedgerError {
        if err.is_retryable() {
            error!(op, error = %err, "ledger operation failed");
        } else {
            warn!(op, kind = err.kind().as_str(), error = %err, "ledger operation rejected");
        }
        err
    }
}

async fn apply_deposit(
    uow: &mut dyn UnitOfWork,
    account: AccountId,
    amount: Amount,
) -> LedgerResult<TransactionRecord> {
    let now = Utc::now();
    let current = uow.create_if_absent(account, now).await?;
    let balance = current.balance_after_credit(amount)?;

    uow.update_balance(account, current.version, balance, now).await?;
    Ok(uow.append(NewTransaction::deposit(account, amount, balance)).await?)
}

async fn apply_withdrawal(
    uow: &mut dyn UnitOfWork,
    account: AccountId,
    amount: Amount,
) -> LedgerResult<TransactionRecord> {
    let current = uow
        .get_for_update(account)
        .await?
        .ok_or_else(|| LedgerError::account_not_found(account))?;
    let balance = current.balance_after_debit(amount)?;

    uow.update_balance(account, current.version, balance, Utc::now()).await?;
    Ok(uow.append(NewTransaction::withdrawal(account, amount, balance)).await?)
}

async fn apply_transfer(
    uow: &mut dyn UnitOfWork,
    from: AccountId,
    to: AccountId,
    amount: Amount,
) -> LedgerResult<(TransactionRecord, TransactionRecord)> {
    // Row locks in the same ascending order as the in-process locks.
    let (low, high) = if from < to { (from, to) } else { (to, from) };
    let low_account = uow.get_for_update(low).await?;
    let high_account = uow.get_for_update(high).await?;
    let (source, destination) = if from < to {
        (low_account, high_account)
    } else {
        (high_account, low_account)
    };

    let source = source.ok_or(LedgerError::AccountNotFound {
        account: from,
        side: Some(TransferSide::Source),
    })?;
    let destination = destination.ok_or(LedgerError::AccountNotFound {
        account: to,
        side: Some(TransferSide::Destination),
    })?;

    let source_balance = source.balance_after_debit(amount)?;
    let destination_balance = destination.balance_after_credit(amount)?;

    let now = Utc::now();
    uow.update_balance(from, source.version, source_balance, now).await?;
    uow.update_balance(to, destination.version, destination_balance, now).await?;

    let correlation = CorrelationId::new();
    let debit = uow
        .append(NewTransaction::transfer_out(from, to, amount, source_balance, correlation))
        .await?;
    let credit = uow
        .append(NewTransaction::transfer_in(to, from, amount, destination_balance, correlation))
        .await?;
    Ok((debit, credit))
}
