//! Fixed-point monetary amounts.
//!
//! Amounts are an integer count of minor units (cents). Binary floating point is
//! never used: every deposit, withdrawal and transfer is exact, so the ledger's
//! conservation checks hold to the cent.

use core::fmt;
use core::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::LedgerError;

/// Number of fractional decimal digits carried by an [`Amount`].
pub const SCALE: u32 = 2;

const MINOR_PER_UNIT: i64 = 10_i64.pow(SCALE);

/// Monetary amount in minor units (scale 2).
///
/// The value is signed so that malformed caller input ("-5.00", "0") can be
/// represented and rejected; balances and ledger amounts are never negative.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Ensure the amount is usable as an operation amount (strictly positive).
    pub fn ensure_positive(self) -> Result<Amount, LedgerError> {
        if self.is_positive() {
            Ok(self)
        } else {
            Err(LedgerError::invalid_amount(format!(
                "amount must be greater than zero, got {self}"
            )))
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per_unit = MINOR_PER_UNIT as u64;
        write!(
            f,
            "{sign}{}.{:0width$}",
            abs / per_unit,
            abs % per_unit,
            width = SCALE as usize
        )
    }
}

impl FromStr for Amount {
    type Err = LedgerError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let malformed = || LedgerError::invalid_amount(format!("malformed amount '{input}'"));
        let out_of_range = || LedgerError::invalid_amount(format!("amount '{input}' is out of range"));

        let s = input.trim();
        let (negative, unsigned) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };

        // `Decimal` also takes "1.", ".5" and "1_000"; plain digits only here.
        let well_formed = match unsigned.split_once('.') {
            Some((whole, fraction)) => is_digits(whole) && is_digits(fraction),
            None => is_digits(unsigned),
        };
        if !well_formed {
            return Err(malformed());
        }

        // Only digit strings reach here, so a parse failure is a range failure.
        let value = Decimal::from_str(unsigned).map_err(|_| out_of_range())?;
        if value.scale() > SCALE {
            return Err(LedgerError::invalid_amount(format!(
                "amount '{input}' has more than {SCALE} decimal places"
            )));
        }

        let minor = value
            .checked_mul(Decimal::from(MINOR_PER_UNIT))
            .and_then(|scaled| scaled.to_i64())
            .ok_or_else(out_of_range)?;
        Ok(Amount(if negative { -minor } else { minor }))
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
