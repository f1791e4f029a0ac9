use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use wallet_core::{AccountId, Amount, CorrelationId, TransactionId};

/// What a ledger row did to its account. Direction is encoded here, never in
/// the sign of the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    TransferOut,
    TransferIn,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown transaction kind '{0}'")]
pub struct UnknownTransactionKind(pub String);

impl TransactionKind {
    /// Stable wire/storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::TransferOut => "transfer_out",
            TransactionKind::TransferIn => "transfer_in",
        }
    }

    /// True when the row increases the account's balance.
    pub fn is_credit(self) -> bool {
        matches!(self, TransactionKind::Deposit | TransactionKind::TransferIn)
    }

    pub fn is_transfer(self) -> bool {
        matches!(self, TransactionKind::TransferOut | TransactionKind::TransferIn)
    }
}

impl FromStr for TransactionKind {
    type Err = UnknownTransactionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "transfer_out" => Ok(TransactionKind::TransferOut),
            "transfer_in" => Ok(TransactionKind::TransferIn),
            other => Err(UnknownTransactionKind(other.to_string())),
        }
    }
}

impl core::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ledger row as handed to the ledger store, before it has an id or timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub account_id: AccountId,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub balance_after: Amount,
    pub counterparty_id: Option<AccountId>,
    pub correlation_id: Option<CorrelationId>,
}

impl NewTransaction {
    pub fn deposit(account_id: AccountId, amount: Amount, balance_after: Amount) -> Self {
        Self {
            account_id,
            kind: TransactionKind::Deposit,
            amount,
            balance_after,
            counterparty_id: None,
            correlation_id: None,
        }
    }

    pub fn withdrawal(account_id: AccountId, amount: Amount, balance_after: Amount) -> Self {
        Self {
            account_id,
            kind: TransactionKind::Withdrawal,
            amount,
            balance_after,
            counterparty_id: None,
            correlation_id: None,
        }
    }

    /// Source leg of a transfer.
    pub fn transfer_out(
        account_id: AccountId,
        counterparty_id: AccountId,
        amount: Amount,
        balance_after: Amount,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            account_id,
            kind: TransactionKind::TransferOut,
            amount,
            balance_after,
            counterparty_id: Some(counterparty_id),
            correlation_id: Some(correlation_id),
        }
    }

    /// Destination leg of a transfer.
    pub fn transfer_in(
        account_id: AccountId,
        counterparty_id: AccountId,
        amount: Amount,
        balance_after: Amount,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            account_id,
            kind: TransactionKind::TransferIn,
            amount,
            balance_after,
            counterparty_id: Some(counterparty_id),
            correlation_id: Some(correlation_id),
        }
    }

    pub fn into_record(self, id: TransactionId, timestamp: DateTime<Utc>) -> TransactionRecord {
        TransactionRecord {
            id,
            account_id: self.account_id,
            kind: self.kind,
            amount: self.amount,
            balance_after: self.balance_after,
            counterparty_id: self.counterparty_id,
            correlation_id: self.correlation_id,
            timestamp,
        }
    }
}

/// Immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub kind: TransactionKind,
    /// Always positive.
    pub amount: Amount,
    /// The account's balance immediately after this row took effect.
    pub balance_after: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_id: Option<AccountId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    pub timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    /// Signed effect of this row on its account, in minor units.
    pub fn signed_minor(&self) -> i128 {
        let amount = i128::from(self.amount.minor());
        if self.kind.is_credit() { amount } else { -amount }
    }
}
