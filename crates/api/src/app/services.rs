//! Wallet facade over the ledger engine.
//!
//! Handlers hand raw query-string values to [`WalletService`]; it parses and
//! range-checks them, calls the engine, and returns plain views. No HTTP types
//! leak below this layer except the status mapping on [`WalletError`].

use std::sync::Arc;

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use wallet_core::{AccountId, Amount, CorrelationId, LedgerError, TransactionId};
use wallet_infra::store::MAX_PAGE_SIZE;
use wallet_infra::{AppConfig, EngineConfig, HistoryQuery, InMemoryStorage, LedgerEngine, PostgresStorage, Storage};
use wallet_ledger::TransactionRecord;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("invalid {field} '{value}': must be a positive integer")]
    InvalidAccountId { field: &'static str, value: String },

    #[error("invalid limit '{0}': must be an integer between 1 and {max}", max = MAX_PAGE_SIZE)]
    InvalidLimit(String),

    #[error("invalid before '{0}': must be a transaction id")]
    InvalidCursor(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl WalletError {
    /// Stable machine-readable code, used as the `error` field of responses.
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::InvalidAccountId { .. } => "invalid_account_id",
            WalletError::InvalidLimit(_) => "invalid_limit",
            WalletError::InvalidCursor(_) => "invalid_cursor",
            WalletError::Ledger(err) => err.kind().as_str(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            WalletError::InvalidAccountId { .. }
            | WalletError::InvalidLimit(_)
            | WalletError::InvalidCursor(_) => StatusCode::BAD_REQUEST,
            WalletError::Ledger(err) => match err {
                LedgerError::InvalidAmount(_) | LedgerError::SameAccount(_) => StatusCode::BAD_REQUEST,
                LedgerError::AccountNotFound { .. } => StatusCode::NOT_FOUND,
                LedgerError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                LedgerError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }
}

pub type WalletResult<T> = Result<T, WalletError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceView {
    pub account: AccountId,
    pub balance: Amount,
    /// `false` for an account that has never been credited; its balance reads as zero.
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptView {
    pub record: TransactionRecord,
    pub balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferView {
    pub debit: TransactionRecord,
    pub credit: TransactionRecord,
    pub from_balance: Amount,
    pub to_balance: Amount,
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryView {
    pub account: AccountId,
    pub items: Vec<TransactionRecord>,
    pub next_before: Option<TransactionId>,
}

/// Shared application services (cloned into every handler via `Extension`).
#[derive(Debug, Clone)]
pub struct WalletService {
    engine: Arc<LedgerEngine<dyn Storage>>,
}

impl WalletService {
    pub fn new(storage: Arc<dyn Storage>, config: EngineConfig) -> Self {
        Self {
            engine: Arc::new(LedgerEngine::with_config(storage, config)),
        }
    }

    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(InMemoryStorage::new()), config)
    }

    pub fn engine(&self) -> &LedgerEngine<dyn Storage> {
        &self.engine
    }

    pub async fn deposit(&self, user_id: &str, amount: &str) -> WalletResult<ReceiptView> {
        let account = parse_account("user_id", user_id)?;
        let amount = parse_amount(amount)?;
        let record = self.engine.deposit(account, amount).await?;
        Ok(ReceiptView {
            balance: record.balance_after,
            record,
        })
    }

    pub async fn withdraw(&self, user_id: &str, amount: &str) -> WalletResult<ReceiptView> {
        let account = parse_account("user_id", user_id)?;
        let amount = parse_amount(amount)?;
        let record = self.engine.withdraw(account, amount).await?;
        Ok(ReceiptView {
            balance: record.balance_after,
            record,
        })
    }

    pub async fn transfer(&self, from_user_id: &str, to_user_id: &str, amount: &str) -> WalletResult<TransferView> {
        let from = parse_account("from_user_id", from_user_id)?;
        let to = parse_account("to_user_id", to_user_id)?;
        let amount = parse_amount(amount)?;
        let (debit, credit) = self.engine.transfer(from, to, amount).await?;

        // Both legs carry the id the engine minted for this transfer.
        let correlation_id = debit.correlation_id.or(credit.correlation_id).ok_or_else(|| {
            WalletError::Ledger(LedgerError::storage("transfer rows are missing their correlation id"))
        })?;
        Ok(TransferView {
            from_balance: debit.balance_after,
            to_balance: credit.balance_after,
            correlation_id,
            debit,
            credit,
        })
    }

    pub async fn balance(&self, user_id: &str) -> WalletResult<BalanceView> {
        let account = parse_account("user_id", user_id)?;
        let view = match self.engine.account(account).await? {
            Some(acc) => BalanceView {
                account,
                balance: acc.balance,
                exists: true,
            },
            None => BalanceView {
                account,
                balance: Amount::ZERO,
                exists: false,
            },
        };
        Ok(view)
    }

    /// Newest-first page of the account's rows. Pass the returned
    /// `next_before` back as `before` for the next (older) page.
    pub async fn history(&self, user_id: &str, limit: Option<&str>, before: Option<&str>) -> WalletResult<HistoryView> {
        let account = parse_account("user_id", user_id)?;
        let limit = match limit {
            Some(raw) => parse_limit(raw)?,
            None => self.engine.config().history_page_size,
        };
        let before = before.map(parse_cursor).transpose()?;

        let page = self
            .engine
            .history_page(account, HistoryQuery::new(before, Some(limit)))
            .await?;
        Ok(HistoryView {
            account,
            items: page.items,
            next_before: page.next_before,
        })
    }
}

/// Build services from configuration (in-memory unless persistent stores are enabled).
pub async fn build_services(config: &AppConfig) -> anyhow::Result<WalletService> {
    let engine_config = config.engine_config();
    let database = match (&config.database, config.use_persistent_stores) {
        (Some(database), true) => database,
        _ => {
            tracing::info!("using in-memory storage");
            return Ok(WalletService::in_memory(engine_config));
        }
    };

    let storage = PostgresStorage::connect(&database.url, database.max_connections, config.lock_timeout).await?;
    storage.ensure_schema().await?;
    tracing::info!(max_connections = database.max_connections, "using postgres storage");
    Ok(WalletService::new(Arc::new(storage), engine_config))
}

fn parse_account(field: &'static str, raw: &str) -> WalletResult<AccountId> {
    raw.parse().map_err(|_| WalletError::InvalidAccountId {
        field,
        value: raw.to_string(),
    })
}

fn parse_amount(raw: &str) -> WalletResult<Amount> {
    let amount: Amount = raw.parse()?;
    Ok(amount.ensure_positive()?)
}

fn parse_limit(raw: &str) -> WalletResult<u32> {
    match raw.trim().parse::<u32>() {
        Ok(limit) if (1..=MAX_PAGE_SIZE).contains(&limit) => Ok(limit),
        _ => Err(WalletError::InvalidLimit(raw.to_string())),
    }
}

fn parse_cursor(raw: &str) -> WalletResult<TransactionId> {
    match raw.trim().parse::<i64>() {
        Ok(id) if id > 0 => Ok(TransactionId::new(id)),
        _ => Err(WalletError::InvalidCursor(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wallet_core::TransferSide;
    use wallet_ledger::TransactionKind;

    fn service() -> WalletService {
        WalletService::in_memory(EngineConfig {
            lock_timeout: Duration::from_secs(1),
            history_page_size: 2,
        })
    }

    #[tokio::test]
    async fn deposit_then_withdraw_reports_running_balance() {
        let svc = service();
        let receipt = svc.deposit("1", "100.00").await.unwrap();
        assert_eq!(receipt.balance.to_string(), "100.00");
        assert_eq!(receipt.record.kind, TransactionKind::Deposit);

        let receipt = svc.withdraw("1", "30.50").await.unwrap();
        assert_eq!(receipt.balance.to_string(), "69.50");
        assert_eq!(svc.balance("1").await.unwrap().balance.to_string(), "69.50");
    }

    #[tokio::test]
    async fn unknown_account_reads_as_zero_but_flags_absence() {
        let svc = service();
        let view = svc.balance("42").await.unwrap();
        assert_eq!(view.balance, Amount::ZERO);
        assert!(!view.exists);

        // The engine underneath still distinguishes "missing" from "zero".
        let account = AccountId::new(42).unwrap();
        assert!(matches!(
            svc.engine().balance(account).await,
            Err(LedgerError::AccountNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_inputs_are_rejected_before_the_engine() {
        let svc = service();

        let err = svc.deposit("abc", "1.00").await.unwrap_err();
        assert_eq!(
            err,
            WalletError::InvalidAccountId {
                field: "user_id",
                value: "abc".to_string()
            }
        );
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = svc.transfer("1", "0", "1.00").await.unwrap_err();
        assert_eq!(err.code(), "invalid_account_id");

        for amount in ["0", "-5.00", "1.234", "ten", ""] {
            let err = svc.deposit("1", amount).await.unwrap_err();
            assert_eq!(err.code(), "invalid_amount", "amount {amount:?}");
        }
        assert!(!svc.balance("1").await.unwrap().exists);
    }

    #[tokio::test]
    async fn business_errors_map_to_codes_and_statuses() {
        let svc = service();
        svc.deposit("1", "5.00").await.unwrap();

        let err = svc.withdraw("1", "10.00").await.unwrap_err();
        assert_eq!(err.code(), "insufficient_funds");
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let err = svc.transfer("1", "1", "1.00").await.unwrap_err();
        assert_eq!(err.code(), "same_account");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = svc.transfer("1", "2", "1.00").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(matches!(
            err,
            WalletError::Ledger(LedgerError::AccountNotFound {
                side: Some(TransferSide::Destination),
                ..
            })
        ));

        let err = WalletError::from(LedgerError::storage("down"));
        assert_eq!(err.code(), "storage_unavailable");
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn transfer_view_carries_both_legs() {
        let svc = service();
        svc.deposit("1", "10.00").await.unwrap();
        svc.deposit("2", "1.00").await.unwrap();

        let view = svc.transfer("1", "2", "2.50").await.unwrap();
        assert_eq!(view.from_balance.to_string(), "7.50");
        assert_eq!(view.to_balance.to_string(), "3.50");
        assert_eq!(view.debit.kind, TransactionKind::TransferOut);
        assert_eq!(view.credit.kind, TransactionKind::TransferIn);
        assert_eq!(view.debit.correlation_id, Some(view.correlation_id));
        assert_eq!(view.credit.correlation_id, Some(view.correlation_id));
    }

    #[tokio::test]
    async fn history_pages_with_default_and_explicit_limits() {
        let svc = service();
        for amount in ["1.00", "2.00", "3.00"] {
            svc.deposit("1", amount).await.unwrap();
        }

        let first = svc.history("1", None, None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].amount.to_string(), "3.00");
        let before = first.next_before.unwrap().get().to_string();

        let second = svc.history("1", None, Some(&before)).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].amount.to_string(), "1.00");
        assert_eq!(second.next_before, None);

        let all = svc.history("1", Some("10"), None).await.unwrap();
        assert_eq!(all.items.len(), 3);

        assert_eq!(svc.history("1", Some("0"), None).await.unwrap_err().code(), "invalid_limit");
        let too_many = (MAX_PAGE_SIZE + 1).to_string();
        let err = svc.history("1", Some(&too_many), None).await.unwrap_err();
        assert_eq!(err.code(), "invalid_limit");
        assert!(err.to_string().ends_with(&format!("between 1 and {MAX_PAGE_SIZE}")));
        assert_eq!(svc.history("1", None, Some("x")).await.unwrap_err().code(), "invalid_cursor");
        assert!(svc.history("9", None, None).await.unwrap().items.is_empty());
    }
}
