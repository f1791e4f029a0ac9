//! Ledger error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::AccountId;
use crate::money::Amount;

/// Result type used across the ledger layers.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Which leg of a transfer an error refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferSide {
    Source,
    Destination,
}

impl TransferSide {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferSide::Source => "source",
            TransferSide::Destination => "destination",
        }
    }
}

fn side_suffix(side: &Option<TransferSide>) -> String {
    side.map(|s| format!(" ({} account)", s.as_str()))
        .unwrap_or_default()
}

/// Stable, machine-readable classification of a [`LedgerError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidAmount,
    AccountNotFound,
    InsufficientFunds,
    SameAccount,
    StorageUnavailable,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidAmount => "invalid_amount",
            ErrorKind::AccountNotFound => "account_not_found",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::SameAccount => "same_account",
            ErrorKind::StorageUnavailable => "storage_unavailable",
        }
    }
}

/// Failure of a ledger operation.
///
/// Every failed operation leaves balances and the transaction log exactly as
/// they were before the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount was zero, negative, malformed, or out of range.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The account does not exist. For transfers, `side` names the missing leg.
    #[error("account {account} not found{}", side_suffix(.side))]
    AccountNotFound {
        account: AccountId,
        side: Option<TransferSide>,
    },

    #[error("insufficient funds on account {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        available: Amount,
        requested: Amount,
    },

    /// Source and destination of a transfer are the same account.
    #[error("cannot transfer from account {0} to itself")]
    SameAccount(AccountId),

    /// Persistence failure, lock timeout, or an unrecoverable conflict.
    /// Safe to retry; nothing was applied.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl LedgerError {
    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    pub fn account_not_found(account: AccountId) -> Self {
        Self::AccountNotFound {
            account,
            side: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount(_) => ErrorKind::InvalidAmount,
            LedgerError::AccountNotFound { .. } => ErrorKind::AccountNotFound,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::SameAccount(_) => ErrorKind::SameAccount,
            LedgerError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
        }
    }

    /// Only storage failures are transient; business rejections repeat on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StorageUnavailable(_))
    }
}
