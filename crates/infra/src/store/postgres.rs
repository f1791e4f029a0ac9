//! Postgres-backed account and ledger storage.
//!
//! Every unit of work is one database transaction. Balance checks and writes
//! happen under `SELECT ... FOR UPDATE` row locks held until commit/rollback,
//! and the ledger rows are inserted in the same transaction, so a balance
//! change without its ledger row can never become visible.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (lock not available) | `55P03` | `LockTimeout` | `lock_timeout` expired waiting for a row lock |
//! | Database (serialization failure) | `40001` | `Conflict` | Concurrent transaction won |
//! | Database (deadlock detected) | `40P01` | `Conflict` | Chosen as deadlock victim |
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate key from a racing create |
//! | Database (check / foreign key) | `23514` / `23503` | `Invalid` | Negative balance, non-positive amount, unknown account |
//! | Database (other) | Any other | `Unavailable` | Other database errors |
//! | PoolTimedOut / PoolClosed / Io | N/A | `Unavailable` | Backend unreachable |
//!
//! ## Lock Ordering
//!
//! The engine requests row locks in ascending account id order, the same order
//! as its in-process locks, so concurrent transfers across processes cannot
//! form a wait-for cycle. `lock_timeout` bounds every wait regardless.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use wallet_core::{AccountId, Amount, CorrelationId, TransactionId};
use wallet_ledger::{Account, NewTransaction, TransactionKind, TransactionRecord};

use super::query::HistoryQuery;
use super::r#trait::{AccountStore, LedgerStore, Storage, StoreError, UnitOfWork};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id            BIGINT PRIMARY KEY CHECK (id > 0),
        balance       BIGINT NOT NULL CHECK (balance >= 0),
        version       BIGINT NOT NULL DEFAULT 0,
        created_at    TIMESTAMPTZ NOT NULL,
        last_modified TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id              BIGSERIAL PRIMARY KEY,
        account_id      BIGINT NOT NULL REFERENCES accounts (id),
        kind            TEXT NOT NULL
                        CHECK (kind IN ('deposit', 'withdrawal', 'transfer_out', 'transfer_in')),
        amount          BIGINT NOT NULL CHECK (amount > 0),
        balance_after   BIGINT NOT NULL CHECK (balance_after >= 0),
        counterparty_id BIGINT NULL,
        correlation_id  UUID NULL,
        created_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS transactions_account_id_idx ON transactions (account_id, id DESC)",
    "CREATE INDEX IF NOT EXISTS transactions_correlation_id_idx ON transactions (correlation_id) WHERE correlation_id IS NOT NULL",
];

/// Floor for the per-transaction `lock_timeout`; Postgres treats `0` as no limit.
const MIN_LOCK_TIMEOUT: Duration = Duration::from_millis(1);

/// Postgres-backed storage.
///
/// `Send + Sync` and cheap to clone; all work goes through the SQLx pool.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresStorage {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout: lock_timeout.max(MIN_LOCK_TIMEOUT),
        }
    }

    /// Open a connection pool and verify connectivity.
    #[instrument(skip(url), err)]
    pub async fn connect(
        url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, lock_timeout))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for PostgresStorage {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(lock_timeout_setting(self.lock_timeout))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        Ok(Box::new(PostgresUnit { tx: Some(tx) }))
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, balance, version, created_at, last_modified
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("account", e))?;

        row.map(|row| decode_account(&row)).transpose()
    }

    #[instrument(skip(self), fields(account_id = %id, before = ?query.before, limit = query.limit), err)]
    async fn history(
        &self,
        id: AccountId,
        query: HistoryQuery,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id,
                account_id,
                kind,
                amount,
                balance_after,
                counterparty_id,
                correlation_id,
                created_at
            FROM transactions
            WHERE account_id = $1
                AND ($2::bigint IS NULL OR id < $2)
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(id.get())
        .bind(query.before.map(TransactionId::get))
        .bind(i64::from(query.limit))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("history", e))?;

        rows.iter().map(decode_transaction).collect()
    }
}

/// One Postgres transaction. Dropping it unfinished rolls back.
struct PostgresUnit {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresUnit {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        self.tx
            .as_mut()
            .ok_or_else(|| StoreError::Invalid("unit of work already finished".to_string()))
    }

    fn take(&mut self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.tx
            .take()
            .ok_or_else(|| StoreError::Invalid("unit of work already finished".to_string()))
    }
}

#[async_trait::async_trait]
impl AccountStore for PostgresUnit {
    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn get_for_update(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let tx = self.tx()?;
        let row = sqlx::query(
            r#"
            SELECT id, balance, version, created_at, last_modified
            FROM accounts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.get())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("get_for_update", e))?;

        row.map(|row| decode_account(&row)).transpose()
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn create_if_absent(
        &mut self,
        id: AccountId,
        at: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let tx = self.tx()?;
        sqlx::query(
            r#"
            INSERT INTO accounts (id, balance, version, created_at, last_modified)
            VALUES ($1, 0, 0, $2, $2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id.get())
        .bind(at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("create_if_absent", e))?;

        let row = sqlx::query(
            r#"
            SELECT id, balance, version, created_at, last_modified
            FROM accounts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.get())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("create_if_absent", e))?;

        decode_account(&row)
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn update_balance(
        &mut self,
        id: AccountId,
        expected_version: u64,
        balance: Amount,
        at: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let tx = self.tx()?;
        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $3, version = version + 1, last_modified = $4
            WHERE id = $1 AND version = $2
            RETURNING id, balance, version, created_at, last_modified
            "#,
        )
        .bind(id.get())
        .bind(expected_version as i64)
        .bind(balance.minor())
        .bind(at)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_balance", e))?;

        match row {
            Some(row) => decode_account(&row),
            None => Err(StoreError::Conflict(format!(
                "account {id}: version {expected_version} is no longer current"
            ))),
        }
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresUnit {
    #[instrument(skip(self, tx), fields(account_id = %tx.account_id, kind = %tx.kind, amount = %tx.amount), err)]
    async fn append(&mut self, tx: NewTransaction) -> Result<TransactionRecord, StoreError> {
        let db = self.tx()?;
        let row = sqlx::query(
            r#"
            INSERT INTO transactions (
                account_id,
                kind,
                amount,
                balance_after,
                counterparty_id,
                correlation_id,
                created_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6,
                GREATEST(
                    clock_timestamp(),
                    COALESCE(
                        (SELECT MAX(created_at) FROM transactions WHERE account_id = $1),
                        '-infinity'::timestamptz
                    )
                )
            )
            RETURNING id, created_at
            "#,
        )
        .bind(tx.account_id.get())
        .bind(tx.kind.as_str())
        .bind(tx.amount.minor())
        .bind(tx.balance_after.minor())
        .bind(tx.counterparty_id.map(AccountId::get))
        .bind(tx.correlation_id.map(|c| *c.as_uuid()))
        .fetch_one(&mut **db)
        .await
        .map_err(|e| map_sqlx_error("append", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::Invalid(format!("failed to read transaction id: {e}")))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| StoreError::Invalid(format!("failed to read created_at: {e}")))?;

        Ok(tx.into_record(TransactionId::new(id), created_at))
    }
}

#[async_trait::async_trait]
impl UnitOfWork for PostgresUnit {
    async fn commit(&mut self) -> Result<(), StoreError> {
        self.take()?
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.take()?
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

/// `lock_timeout` value for `set_config`, never below [`MIN_LOCK_TIMEOUT`].
fn lock_timeout_setting(timeout: Duration) -> String {
    format!("{}ms", timeout.max(MIN_LOCK_TIMEOUT).as_millis())
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("55P03") => StoreError::LockTimeout(msg),
                Some("40001") | Some("40P01") | Some("23505") => StoreError::Conflict(msg),
                Some("23514") | Some("23503") => StoreError::Invalid(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => {
            StoreError::Invalid(format!("unexpected row not found in {operation}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct AccountRow {
    id: i64,
    balance: i64,
    version: i64,
    created_at: DateTime<Utc>,
    last_modified: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AccountRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            balance: row.try_get("balance")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            last_modified: row.try_get("last_modified")?,
        })
    }
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: decode_account_id(row.id)?,
            balance: Amount::from_minor(row.balance),
            version: row.version as u64,
            created_at: row.created_at,
            last_modified: row.last_modified,
        })
    }
}

#[derive(Debug)]
struct TransactionRow {
    id: i64,
    account_id: i64,
    kind: String,
    amount: i64,
    balance_after: i64,
    counterparty_id: Option<i64>,
    correlation_id: Option<uuid::Uuid>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for TransactionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            kind: row.try_get("kind")?,
            amount: row.try_get("amount")?,
            balance_after: row.try_get("balance_after")?,
            counterparty_id: row.try_get("counterparty_id")?,
            correlation_id: row.try_get("correlation_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let kind: TransactionKind = row
            .kind
            .parse()
            .map_err(|e| StoreError::Invalid(format!("{e}")))?;
        Ok(TransactionRecord {
            id: TransactionId::new(row.id),
            account_id: decode_account_id(row.account_id)?,
            kind,
            amount: Amount::from_minor(row.amount),
            balance_after: Amount::from_minor(row.balance_after),
            counterparty_id: row.counterparty_id.map(decode_account_id).transpose()?,
            correlation_id: row.correlation_id.map(CorrelationId::from_uuid),
            timestamp: row.created_at,
        })
    }
}

fn decode_account_id(raw: i64) -> Result<AccountId, StoreError> {
    AccountId::new(raw).ok_or_else(|| StoreError::Invalid(format!("stored account id {raw} is not positive")))
}

fn decode_account(row: &PgRow) -> Result<Account, StoreError> {
    AccountRow::from_row(row)
        .map_err(|e| StoreError::Invalid(format!("failed to deserialize account row: {e}")))?
        .try_into()
}

fn decode_transaction(row: &PgRow) -> Result<TransactionRecord, StoreError> {
    TransactionRow::from_row(row)
        .map_err(|e| StoreError::Invalid(format!("failed to deserialize transaction row: {e}")))?
        .try_into()
}

#[cfg(test)]
mod tests {
    //! Require a disposable Postgres database:
    //! `DATABASE_URL=postgres://... cargo test -p wallet-infra -- --ignored`

    use super::*;
    use crate::engine::{EngineConfig, LedgerEngine};
    use futures::future::join_all;
    use wallet_core::LedgerError;

    fn id(raw: i64) -> AccountId {
        AccountId::new(raw).unwrap()
    }

    async fn storage() -> PostgresStorage {
        storage_with_timeout(Duration::from_millis(500)).await
    }

    async fn storage_with_timeout(lock_timeout: Duration) -> PostgresStorage {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for Postgres tests");
        let storage = PostgresStorage::connect(&url, 5, lock_timeout)
            .await
            .expect("connect");
        storage.ensure_schema().await.expect("schema");
        storage
    }

    #[test]
    fn lock_timeout_setting_is_never_unbounded() {
        assert_eq!(lock_timeout_setting(Duration::ZERO), "1ms");
        assert_eq!(lock_timeout_setting(Duration::from_micros(300)), "1ms");
        assert_eq!(lock_timeout_setting(Duration::from_secs(5)), "5000ms");
    }

    #[tokio::test]
    async fn zero_lock_timeout_is_raised_to_the_floor() {
        // Lazy pool: nothing connects until first use.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://wallet@localhost/wallet")
            .unwrap();
        let storage = PostgresStorage::new(pool, Duration::ZERO);
        assert_eq!(storage.lock_timeout, MIN_LOCK_TIMEOUT);
    }

    /// Account ids unlikely to collide across test runs on a shared database.
    fn fresh_id() -> AccountId {
        let raw = (uuid::Uuid::now_v7().as_u128() % 1_000_000_000_000) as i64 + 1;
        id(raw)
    }

    #[tokio::test]
    #[ignore]
    async fn committed_unit_persists_account_and_row() {
        let storage = storage().await;
        let account = fresh_id();

        let mut uow = storage.begin().await.unwrap();
        let acc = uow.create_if_absent(account, Utc::now()).await.unwrap();
        assert_eq!(acc.version, 0);
        let amount = Amount::from_minor(10_000);
        uow.update_balance(account, 0, amount, Utc::now()).await.unwrap();
        let record = uow
            .append(NewTransaction::deposit(account, amount, amount))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let stored = storage.account(account).await.unwrap().unwrap();
        assert_eq!(stored.balance, amount);
        assert_eq!(stored.version, 1);

        let history = storage.history(account, HistoryQuery::default()).await.unwrap();
        assert_eq!(history, vec![record]);
    }

    #[tokio::test]
    #[ignore]
    async fn rolled_back_unit_leaves_nothing_behind() {
        let storage = storage().await;
        let account = fresh_id();

        let mut uow = storage.begin().await.unwrap();
        uow.create_if_absent(account, Utc::now()).await.unwrap();
        uow.rollback().await.unwrap();

        assert!(storage.account(account).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn negative_balance_is_rejected_by_the_schema() {
        let storage = storage().await;
        let account = fresh_id();

        let mut uow = storage.begin().await.unwrap();
        uow.create_if_absent(account, Utc::now()).await.unwrap();
        let err = uow
            .update_balance(account, 0, Amount::from_minor(-1), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    #[ignore]
    async fn second_locker_times_out() {
        let storage = storage().await;
        let account = fresh_id();

        let mut setup = storage.begin().await.unwrap();
        setup.create_if_absent(account, Utc::now()).await.unwrap();
        setup.commit().await.unwrap();

        let mut holder = storage.begin().await.unwrap();
        holder.get_for_update(account).await.unwrap();

        let mut waiter = storage.begin().await.unwrap();
        let err = waiter.get_for_update(account).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));

        holder.rollback().await.unwrap();
    }

    /// Two engines stand in for two processes: their in-process locks are
    /// separate, so only the ascending `FOR UPDATE` row locks serialize them.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn engines_sharing_a_database_serialize_on_row_locks() {
        let storage = Arc::new(storage_with_timeout(Duration::from_secs(5)).await);
        let config = EngineConfig {
            lock_timeout: Duration::from_secs(5),
            ..EngineConfig::default()
        };
        let engines = [
            Arc::new(LedgerEngine::with_config(Arc::clone(&storage), config)),
            Arc::new(LedgerEngine::with_config(Arc::clone(&storage), config)),
        ];
        let (a, b) = (fresh_id(), fresh_id());
        assert_ne!(a, b);

        engines[0].deposit(a, Amount::from_minor(1_000)).await.unwrap();
        engines[1].deposit(b, Amount::from_minor(1_000)).await.unwrap();

        // Racing withdrawals: exactly ten of twenty 1.00 debits fit in 10.00.
        let withdrawals = (0..20).map(|i| {
            let engine = Arc::clone(&engines[i % 2]);
            tokio::spawn(async move { engine.withdraw(a, Amount::from_minor(100)).await })
        });
        let results: Vec<_> = join_all(withdrawals)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();
        let accepted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 10);
        assert!(results.iter().all(|r| matches!(
            r,
            Ok(_) | Err(LedgerError::InsufficientFunds { .. })
        )));
        assert_eq!(engines[0].balance(a).await.unwrap(), Amount::ZERO);

        // Opposite-direction transfers from both engines: no deadlock victims.
        engines[0].deposit(a, Amount::from_minor(1_000)).await.unwrap();
        let transfers = (0..40).map(|i| {
            let engine = Arc::clone(&engines[i % 2]);
            let (from, to) = if i % 4 < 2 { (a, b) } else { (b, a) };
            tokio::spawn(async move { engine.transfer(from, to, Amount::from_minor(1)).await })
        });
        for joined in join_all(transfers).await {
            joined.unwrap().unwrap();
        }

        let total = engines[1].balance(a).await.unwrap().minor() + engines[1].balance(b).await.unwrap().minor();
        assert_eq!(total, 2_000);
        assert_eq!(engines[1].balance(a).await.unwrap(), Amount::from_minor(1_000));
    }
}
