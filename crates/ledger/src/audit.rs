//! Offline ledger audits.
//!
//! These checks run over a snapshot of ledger rows and need no storage access.
//! They are what tests (and operators) use to confirm the relationship
//! invariants hold across the whole ledger.

use std::collections::HashMap;

use thiserror::Error;

use wallet_core::{AccountId, Amount, CorrelationId, TransactionId};

use crate::transaction::{TransactionKind, TransactionRecord};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    #[error("transfer row {0} has no correlation id")]
    MissingCorrelation(TransactionId),

    #[error("correlation {correlation}: expected one transfer_out and one transfer_in, found {outs} out / {ins} in")]
    Unpaired {
        correlation: CorrelationId,
        outs: usize,
        ins: usize,
    },

    #[error("correlation {correlation}: leg amounts differ")]
    AmountMismatch { correlation: CorrelationId },

    #[error("correlation {correlation}: both legs on account {account}")]
    SameAccountLegs {
        correlation: CorrelationId,
        account: AccountId,
    },

    #[error("row {record} on account {account}: balance_after {recorded}, replay gives {replayed}")]
    BalanceChainBroken {
        account: AccountId,
        record: TransactionId,
        recorded: Amount,
        replayed: Amount,
    },
}

/// Check that every transfer correlation id has exactly one `transfer_out` and
/// one `transfer_in` row, with equal amounts on distinct accounts.
pub fn verify_pairing(records: &[TransactionRecord]) -> Result<(), AuditError> {
    let mut legs: HashMap<CorrelationId, (Vec<&TransactionRecord>, Vec<&TransactionRecord>)> =
        HashMap::new();

    for record in records.iter().filter(|r| r.kind.is_transfer()) {
        let correlation = record
            .correlation_id
            .ok_or(AuditError::MissingCorrelation(record.id))?;
        let entry = legs.entry(correlation).or_default();
        match record.kind {
            TransactionKind::TransferOut => entry.0.push(record),
            _ => entry.1.push(record),
        }
    }

    for (correlation, (outs, ins)) in legs {
        let (out, inn) = match (outs.as_slice(), ins.as_slice()) {
            ([out], [inn]) => (*out, *inn),
            _ => {
                return Err(AuditError::Unpaired {
                    correlation,
                    outs: outs.len(),
                    ins: ins.len(),
                });
            }
        };
        if out.amount != inn.amount {
            return Err(AuditError::AmountMismatch { correlation });
        }
        if out.account_id == inn.account_id {
            return Err(AuditError::SameAccountLegs {
                correlation,
                account: out.account_id,
            });
        }
    }

    Ok(())
}

/// Net signed flow for one account in minor units:
/// deposits + transfers in - withdrawals - transfers out.
///
/// For a complete ledger this equals the account's current balance.
pub fn net_flow(records: &[TransactionRecord], account: AccountId) -> i128 {
    records
        .iter()
        .filter(|r| r.account_id == account)
        .map(TransactionRecord::signed_minor)
        .sum()
}

/// Replay one account's rows oldest-first from a zero balance and check each
/// row's `balance_after`. Returns the replayed final balance.
///
/// Rows for other accounts are ignored; input order does not matter.
pub fn verify_balance_chain(
    records: &[TransactionRecord],
    account: AccountId,
) -> Result<Amount, AuditError> {
    let mut rows: Vec<&TransactionRecord> =
        records.iter().filter(|r| r.account_id == account).collect();
    rows.sort_by_key(|r| r.id);

    let mut running: i128 = 0;
    for row in rows {
        running += row.signed_minor();
        let replayed = i64::try_from(running)
            .map(Amount::from_minor)
            .unwrap_or(Amount::from_minor(i64::MAX));
        if replayed != row.balance_after {
            return Err(AuditError::BalanceChainBroken {
                account,
                record: row.id,
                recorded: row.balance_after,
                replayed,
            });
        }
    }

    Ok(Amount::from_minor(i64::try_from(running).unwrap_or(i64::MAX)))
}
