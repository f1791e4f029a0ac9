//! In-process per-account exclusive locks.
//!
//! One async mutex per account, created on demand and pruned once nobody holds
//! or waits on it. Multi-account acquisition always proceeds in ascending
//! `AccountId` order, so two operations over overlapping account sets can never
//! wait on each other in a cycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

use wallet_core::AccountId;

type LockTable = HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out after {0:?} waiting for account locks")]
pub struct LockTimeout(pub Duration);

#[derive(Debug, Default)]
pub struct AccountLocks {
    table: Arc<Mutex<LockTable>>,
}

/// Exclusive hold on a set of accounts. Released on drop.
#[derive(Debug)]
pub struct LockSet {
    guards: Vec<OwnedMutexGuard<()>>,
    accounts: Vec<AccountId>,
    table: Arc<Mutex<LockTable>>,
}

// The table only maps ids to mutexes; a panic while holding it cannot leave
// it half-updated, so a poisoned table is still usable.
fn lock_table(table: &Mutex<LockTable>) -> MutexGuard<'_, LockTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every account in `accounts` (duplicates ignored) in ascending
    /// order, waiting at most `timeout` for the whole set.
    ///
    /// On timeout, locks acquired so far are released before returning.
    pub async fn acquire(
        &self,
        accounts: &[AccountId],
        timeout: Duration,
    ) -> Result<LockSet, LockTimeout> {
        let mut ordered = accounts.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mutexes: Vec<_> = {
            let mut table = lock_table(&self.table);
            ordered
                .iter()
                .map(|id| Arc::clone(table.entry(*id).or_default()))
                .collect()
        };

        let mut set = LockSet {
            guards: Vec::with_capacity(ordered.len()),
            accounts: ordered,
            table: Arc::clone(&self.table),
        };

        let acquire_in_order = async {
            for mutex in mutexes {
                set.guards.push(mutex.lock_owned().await);
            }
        };

        let acquired = tokio::time::timeout(timeout, acquire_in_order).await;
        match acquired {
            Ok(()) => Ok(set),
            Err(_) => Err(LockTimeout(timeout)),
        }
    }

    /// Number of accounts with a live mutex (held or waited on).
    pub fn tracked(&self) -> usize {
        lock_table(&self.table).len()
    }
}

impl LockSet {
    pub fn accounts(&self) -> &[AccountId] {
        &self.accounts
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        self.guards.clear();

        // Clones are only made under the table lock, so a strong count of one
        // (the table's own) means no holder and no waiter.
        let mut table = lock_table(&self.table);
        for id in &self.accounts {
            if table.get(id).is_some_and(|m| Arc::strong_count(m) == 1) {
                table.remove(id);
            }
        }
    }
}
