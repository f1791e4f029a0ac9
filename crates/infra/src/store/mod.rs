//! Account and ledger storage boundary.
//!
//! The Account Store and the Ledger Store are exposed together through a
//! [`UnitOfWork`], so a balance change and its ledger row(s) always commit as
//! one storage transaction. Backends:
//!
//! - [`InMemoryStorage`]: tests and development.
//! - [`PostgresStorage`]: durable, row-locking production backend.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryStorage;
pub use postgres::PostgresStorage;
pub use query::{DEFAULT_PAGE_SIZE, HistoryQuery, MAX_PAGE_SIZE};
pub use r#trait::{AccountStore, LedgerStore, Storage, StoreError, UnitOfWork};
