use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wallet_core::{AccountId, Amount, LedgerError, LedgerResult};

/// Current state of one wallet account.
///
/// `version` starts at 0 when the account is created and increments on every
/// balance update; stores use it for the conditional (optimistic) write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Amount,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Account {
    /// A freshly created account with a zero balance.
    pub fn open(id: AccountId, at: DateTime<Utc>) -> Self {
        Self {
            id,
            balance: Amount::ZERO,
            version: 0,
            created_at: at,
            last_modified: at,
        }
    }

    /// Balance after crediting `amount`. Does not mutate the account.
    pub fn balance_after_credit(&self, amount: Amount) -> LedgerResult<Amount> {
        let amount = amount.ensure_positive()?;
        self.balance.checked_add(amount).ok_or_else(|| {
            LedgerError::invalid_amount(format!(
                "crediting {amount} to account {} would overflow its balance",
                self.id
            ))
        })
    }

    /// Balance after debiting `amount`, or `InsufficientFunds` if that would go
    /// below zero. Does not mutate the account.
    pub fn balance_after_debit(&self, amount: Amount) -> LedgerResult<Amount> {
        let amount = amount.ensure_positive()?;
        if self.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                account: self.id,
                available: self.balance,
                requested: amount,
            });
        }
        // balance >= amount > 0, cannot underflow
        Ok(Amount::from_minor(self.balance.minor() - amount.minor()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallet_core::ErrorKind;

    fn account(balance_minor: i64) -> Account {
        let mut acc = Account::open(AccountId::new(7).unwrap(), Utc::now());
        acc.balance = Amount::from_minor(balance_minor);
        acc
    }

    #[test]
    fn open_starts_at_zero_with_version_zero() {
        let acc = Account::open(AccountId::new(1).unwrap(), Utc::now());
        assert_eq!(acc.balance, Amount::ZERO);
        assert_eq!(acc.version, 0);
        assert_eq!(acc.created_at, acc.last_modified);
    }

    #[test]
    fn debit_of_exact_balance_leaves_zero() {
        let acc = account(5_000);
        assert_eq!(
            acc.balance_after_debit(Amount::from_minor(5_000)).unwrap(),
            Amount::ZERO
        );
    }

    #[test]
    fn debit_beyond_balance_is_insufficient_funds() {
        let acc = account(10_000);
        let err = acc.balance_after_debit(Amount::from_minor(10_001)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                account: acc.id,
                available: Amount::from_minor(10_000),
                requested: Amount::from_minor(10_001),
            }
        );
    }

    #[test]
    fn non_positive_amounts_are_rejected_before_balance_checks() {
        let acc = account(0);
        assert_eq!(
            acc.balance_after_debit(Amount::ZERO).unwrap_err().kind(),
            ErrorKind::InvalidAmount
        );
        assert_eq!(
            acc.balance_after_credit(Amount::from_minor(-5)).unwrap_err().kind(),
            ErrorKind::InvalidAmount
        );
    }

    #[test]
    fn credit_overflow_is_invalid_amount() {
        let acc = account(i64::MAX - 1);
        let err = acc.balance_after_credit(Amount::from_minor(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);
    }
}
