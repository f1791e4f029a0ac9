//! Lazy, restartable transaction history.
//!
//! A [`History`] does no IO until polled. Each [`History::cursor`] or
//! [`History::stream`] starts again from the newest row and walks older rows
//! by keyset pagination (`id < last seen id`), so rows appended while a walk is
//! in progress never shift or duplicate already-returned items.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use wallet_core::{AccountId, LedgerError, LedgerResult, TransactionId};
use wallet_ledger::TransactionRecord;

use crate::store::{HistoryQuery, Storage};

/// One page of history plus the cursor for the next (older) page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    pub items: Vec<TransactionRecord>,
    /// Pass as `before` to fetch the next page; `None` once the page came back short.
    pub next_before: Option<TransactionId>,
}

impl HistoryPage {
    pub(crate) fn from_rows(items: Vec<TransactionRecord>, limit: u32) -> Self {
        let next_before = if items.len() >= limit as usize {
            items.last().map(|r| r.id)
        } else {
            None
        };
        Self { items, next_before }
    }
}

pub struct History<S: Storage + ?Sized> {
    storage: Arc<S>,
    account: AccountId,
    page_size: u32,
}

impl<S: Storage + ?Sized> Clone for History<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            account: self.account,
            page_size: self.page_size,
        }
    }
}

impl<S: Storage + ?Sized> History<S> {
    pub(crate) fn new(storage: Arc<S>, account: AccountId, page_size: u32) -> Self {
        Self {
            storage,
            account,
            page_size,
        }
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    /// Page-at-a-time walk from the newest row.
    pub fn cursor(&self) -> HistoryCursor<S> {
        HistoryCursor {
            history: self.clone(),
            before: None,
            exhausted: false,
        }
    }

    /// Up to `limit` rows, newest first.
    pub async fn collect(&self, limit: usize) -> LedgerResult<Vec<TransactionRecord>> {
        let mut cursor = self.cursor();
        let mut items = Vec::new();
        while items.len() < limit {
            let Some(page) = cursor.next_page().await? else {
                break;
            };
            items.extend(page);
        }
        items.truncate(limit);
        Ok(items)
    }
}

impl<S: Storage + ?Sized + 'static> History<S> {
    /// Row-at-a-time stream from the newest row; fetches pages on demand.
    pub fn stream(&self) -> BoxStream<'static, LedgerResult<TransactionRecord>> {
        stream::try_unfold(self.cursor(), |mut cursor| async move {
            let page = cursor.next_page().await?;
            Ok::<_, LedgerError>(page.map(|page| (page, cursor)))
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, LedgerError>)))
        .try_flatten()
        .boxed()
    }
}

pub struct HistoryCursor<S: Storage + ?Sized> {
    history: History<S>,
    before: Option<TransactionId>,
    exhausted: bool,
}

impl<S: Storage + ?Sized> HistoryCursor<S> {
    /// Next (older) page, or `None` when there are no more rows.
    pub async fn next_page(&mut self) -> LedgerResult<Option<Vec<TransactionRecord>>> {
        if self.exhausted {
            return Ok(None);
        }

        let query = HistoryQuery::new(self.before, Some(self.history.page_size));
        let page = self
            .history
            .storage
            .history(self.history.account, query)
            .await?;

        if page.len() < query.limit as usize {
            self.exhausted = true;
        }
        match page.last() {
            Some(last) => {
                self.before = Some(last.id);
                Ok(Some(page))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, LedgerEngine};
    use crate::store::InMemoryStorage;
    use std::time::Duration;
    use wallet_core::Amount;

    fn id(raw: i64) -> AccountId {
        AccountId::new(raw).unwrap()
    }

    async fn engine_with_deposits(count: i64, page_size: u32) -> LedgerEngine<InMemoryStorage> {
        let engine = LedgerEngine::with_config(
            Arc::new(InMemoryStorage::new()),
            EngineConfig {
                lock_timeout: Duration::from_secs(1),
                history_page_size: page_size,
            },
        );
        for minor in 1..=count {
            engine.deposit(id(1), Amount::from_minor(minor)).await.unwrap();
        }
        engine
    }

    #[tokio::test]
    async fn cursor_walks_all_rows_newest_first_across_pages() {
        let engine = engine_with_deposits(7, 3).await;
        let mut cursor = engine.history(id(1)).cursor();

        let mut sizes = Vec::new();
        let mut amounts = Vec::new();
        while let Some(page) = cursor.next_page().await.unwrap() {
            sizes.push(page.len());
            amounts.extend(page.iter().map(|r| r.amount.minor()));
        }

        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(amounts, vec![7, 6, 5, 4, 3, 2, 1]);
        assert!(cursor.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stream_is_restartable_and_sees_new_rows() {
        let engine = engine_with_deposits(4, 2).await;
        let history = engine.history(id(1));

        let first: Vec<_> = history.stream().try_collect().await.unwrap();
        assert_eq!(first.len(), 4);

        engine.deposit(id(1), Amount::from_minor(100)).await.unwrap();
        let second: Vec<_> = history.stream().try_collect().await.unwrap();
        assert_eq!(second.len(), 5);
        assert_eq!(second[0].amount, Amount::from_minor(100));
    }

    #[tokio::test]
    async fn empty_history_is_an_empty_sequence() {
        let engine = engine_with_deposits(0, 10).await;
        let history = engine.history(id(77));
        assert!(history.collect(10).await.unwrap().is_empty());
        assert!(history.cursor().next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn collect_stops_at_limit() {
        let engine = engine_with_deposits(10, 4).await;
        let items = engine.history(id(1)).collect(5).await.unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(items[0].amount, Amount::from_minor(10));
        assert_eq!(items[4].amount, Amount::from_minor(6));
    }

    #[test]
    fn page_without_rows_has_no_cursor() {
        assert_eq!(HistoryPage::from_rows(Vec::new(), 10).next_before, None);
    }
}
