use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use wallet_core::{AccountId, Amount, TransactionId};
use wallet_ledger::{Account, NewTransaction, TransactionRecord};

use super::query::HistoryQuery;
use super::r#trait::{AccountStore, LedgerStore, Storage, StoreError, UnitOfWork};

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    rows: HashMap<AccountId, BTreeMap<TransactionId, TransactionRecord>>,
}

impl State {
    fn latest_timestamp(&self, account: AccountId) -> Option<DateTime<Utc>> {
        self.rows
            .get(&account)
            .and_then(|rows| rows.last_key_value())
            .map(|(_, row)| row.timestamp)
    }
}

/// In-memory account and ledger storage.
///
/// Intended for tests/dev. Committed state lives behind one `RwLock`; units
/// stage their writes privately and apply them in a single critical section
/// at commit, after re-checking every account version they touched.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<RwLock<State>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    /// Every committed account, ordered by id.
    pub fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let state = self.read()?;
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    /// Every committed ledger row, ordered by id.
    pub fn transactions(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        let state = self.read()?;
        let mut rows: Vec<TransactionRecord> = state
            .rows
            .values()
            .flat_map(|rows| rows.values().cloned())
            .collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl Storage for InMemoryStorage {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(InMemoryUnit {
            state: Arc::clone(&self.state),
            next_id: Arc::clone(&self.next_id),
            staged_accounts: BTreeMap::new(),
            staged_rows: Vec::new(),
            finished: false,
        }))
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    async fn history(
        &self,
        id: AccountId,
        query: HistoryQuery,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let state = self.read()?;
        let Some(rows) = state.rows.get(&id) else {
            return Ok(Vec::new());
        };

        let page = match query.before {
            Some(before) => rows
                .range(..before)
                .rev()
                .take(query.limit as usize)
                .map(|(_, r)| r.clone())
                .collect(),
            None => rows
                .values()
                .rev()
                .take(query.limit as usize)
                .cloned()
                .collect(),
        };
        Ok(page)
    }
}

#[derive(Debug)]
struct StagedAccount {
    /// Committed version this unit started from; `None` if the unit created it.
    base_version: Option<u64>,
    account: Account,
}

/// Unit of work over [`InMemoryStorage`]. Dropping it unfinished discards it.
#[derive(Debug)]
struct InMemoryUnit {
    state: Arc<RwLock<State>>,
    next_id: Arc<AtomicI64>,
    staged_accounts: BTreeMap<AccountId, StagedAccount>,
    staged_rows: Vec<TransactionRecord>,
    finished: bool,
}

impl InMemoryUnit {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Invalid("unit of work already finished".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    /// The account as this unit sees it: staged copy first, then committed state.
    fn current(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        if let Some(staged) = self.staged_accounts.get(&id) {
            return Ok(Some(staged.account.clone()));
        }
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    fn latest_timestamp(&self, account: AccountId) -> Result<Option<DateTime<Utc>>, StoreError> {
        let staged = self
            .staged_rows
            .iter()
            .filter(|r| r.account_id == account)
            .map(|r| r.timestamp)
            .max();
        let committed = self.read()?.latest_timestamp(account);
        Ok(staged.max(committed))
    }
}

#[async_trait::async_trait]
impl AccountStore for InMemoryUnit {
    async fn get_for_update(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.ensure_open()?;
        self.current(id)
    }

    async fn create_if_absent(
        &mut self,
        id: AccountId,
        at: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        self.ensure_open()?;
        if let Some(existing) = self.current(id)? {
            return Ok(existing);
        }

        let account = Account::open(id, at);
        self.staged_accounts.insert(
            id,
            StagedAccount {
                base_version: None,
                account: account.clone(),
            },
        );
        Ok(account)
    }

    async fn update_balance(
        &mut self,
        id: AccountId,
        expected_version: u64,
        balance: Amount,
        at: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        self.ensure_open()?;
        if balance.is_negative() {
            return Err(StoreError::Invalid(format!(
                "balance of account {id} would become {balance}"
            )));
        }

        let current = self
            .current(id)?
            .ok_or_else(|| StoreError::Invalid(format!("account {id} does not exist")))?;
        if current.version != expected_version {
            return Err(StoreError::Conflict(format!(
                "account {id}: expected version {expected_version}, found {}",
                current.version
            )));
        }

        let base_version = match self.staged_accounts.get(&id) {
            Some(staged) => staged.base_version,
            None => Some(current.version),
        };
        let updated = Account {
            balance,
            version: current.version + 1,
            last_modified: at,
            ..current
        };
        self.staged_accounts.insert(
            id,
            StagedAccount {
                base_version,
                account: updated.clone(),
            },
        );
        Ok(updated)
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryUnit {
    async fn append(&mut self, tx: NewTransaction) -> Result<TransactionRecord, StoreError> {
        self.ensure_open()?;
        if !tx.amount.is_positive() {
            return Err(StoreError::Invalid(format!(
                "ledger amount must be positive, got {}",
                tx.amount
            )));
        }

        let now = Utc::now();
        let timestamp = match self.latest_timestamp(tx.account_id)? {
            Some(latest) if latest > now => latest,
            _ => now,
        };
        let id = TransactionId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);

        let record = tx.into_record(id, timestamp);
        self.staged_rows.push(record.clone());
        Ok(record)
    }
}

#[async_trait::async_trait]
impl UnitOfWork for InMemoryUnit {
    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.finished = true;

        let staged_accounts = std::mem::take(&mut self.staged_accounts);
        let staged_rows = std::mem::take(&mut self.staged_rows);
        let mut state = self.write()?;

        // Validate everything before touching committed state.
        for (id, staged) in &staged_accounts {
            let committed = state.accounts.get(id).map(|a| a.version);
            if committed != staged.base_version {
                return Err(StoreError::Conflict(format!(
                    "account {id} changed concurrently (expected {:?}, found {committed:?})",
                    staged.base_version
                )));
            }
        }

        for (id, staged) in staged_accounts {
            state.accounts.insert(id, staged.account);
        }
        for row in staged_rows {
            state
                .rows
                .entry(row.account_id)
                .or_default()
                .insert(row.id, row);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.finished = true;
        self.staged_accounts.clear();
        self.staged_rows.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallet_ledger::TransactionKind;

    fn id(raw: i64) -> AccountId {
        AccountId::new(raw).unwrap()
    }

    async fn seed(storage: &InMemoryStorage, account: AccountId, minor: i64) {
        let mut uow = storage.begin().await.unwrap();
        let acc = uow.create_if_absent(account, Utc::now()).await.unwrap();
        let balance = Amount::from_minor(minor);
        uow.update_balance(account, acc.version, balance, Utc::now())
            .await
            .unwrap();
        uow.append(NewTransaction::deposit(account, balance, balance))
            .await
            .unwrap();
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible_and_dropped_units_discard() {
        let storage = InMemoryStorage::new();
        {
            let mut uow = storage.begin().await.unwrap();
            uow.create_if_absent(id(1), Utc::now()).await.unwrap();
            uow.append(NewTransaction::deposit(id(1), Amount::from_minor(5), Amount::from_minor(5)))
                .await
                .unwrap();
            assert!(storage.account(id(1)).await.unwrap().is_none());
            // dropped without commit
        }
        assert!(storage.account(id(1)).await.unwrap().is_none());
        assert!(storage.transactions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rollback_discards_staged_rows() {
        let storage = InMemoryStorage::new();
        seed(&storage, id(1), 1_000).await;

        let mut uow = storage.begin().await.unwrap();
        let acc = uow.get_for_update(id(1)).await.unwrap().unwrap();
        uow.update_balance(id(1), acc.version, Amount::ZERO, Utc::now())
            .await
            .unwrap();
        uow.rollback().await.unwrap();

        let acc = storage.account(id(1)).await.unwrap().unwrap();
        assert_eq!(acc.balance, Amount::from_minor(1_000));
        assert_eq!(storage.transactions().unwrap().len(), 1);
        assert!(matches!(uow.commit().await, Err(StoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let storage = InMemoryStorage::new();
        seed(&storage, id(1), 1_000).await;

        let mut uow = storage.begin().await.unwrap();
        let err = uow
            .update_balance(id(1), 0, Amount::from_minor(1), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn commit_rejects_units_that_raced_on_the_same_account() {
        let storage = InMemoryStorage::new();
        seed(&storage, id(1), 1_000).await;

        let mut first = storage.begin().await.unwrap();
        let mut second = storage.begin().await.unwrap();
        for uow in [&mut first, &mut second] {
            let acc = uow.get_for_update(id(1)).await.unwrap().unwrap();
            uow.update_balance(id(1), acc.version, Amount::from_minor(400), Utc::now())
                .await
                .unwrap();
        }

        first.commit().await.unwrap();
        assert!(matches!(second.commit().await, Err(StoreError::Conflict(_))));

        let acc = storage.account(id(1)).await.unwrap().unwrap();
        assert_eq!(acc.version, 2);
    }

    #[tokio::test]
    async fn history_pages_newest_first_with_exclusive_cursor() {
        let storage = InMemoryStorage::new();
        for minor in [100, 200, 300] {
            seed(&storage, id(4), minor).await;
        }
        seed(&storage, id(5), 50).await;

        let first = storage.history(id(4), HistoryQuery::first(2)).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first[0].id > first[1].id);
        assert!(first.iter().all(|r| r.account_id == id(4)));

        let rest = storage
            .history(id(4), HistoryQuery::new(Some(first[1].id), Some(2)))
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].id < first[1].id);
        assert_eq!(rest[0].kind, TransactionKind::Deposit);

        assert!(storage.history(id(99), HistoryQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn timestamps_never_go_backwards_per_account() {
        let storage = InMemoryStorage::new();
        for _ in 0..20 {
            seed(&storage, id(8), 1).await;
        }
        let rows = storage.transactions().unwrap();
        assert!(rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}
