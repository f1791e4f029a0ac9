//! History query parameters.

use wallet_core::TransactionId;

/// Default number of rows per history page.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Hard cap on rows per history page.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Keyset pagination over one account's ledger rows, newest first.
///
/// `before` is exclusive: only rows with `id < before` are returned. `None`
/// starts from the newest row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub before: Option<TransactionId>,
    pub limit: u32,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            before: None,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl HistoryQuery {
    pub fn new(before: Option<TransactionId>, limit: Option<u32>) -> Self {
        Self {
            before,
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// First page (newest rows) of the given size.
    pub fn first(limit: u32) -> Self {
        Self::new(None, Some(limit))
    }
}
