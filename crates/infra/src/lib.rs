//! Infrastructure layer: storage adapters, locking, the ledger engine, config.

pub mod config;
pub mod engine;
pub mod history;
pub mod locks;
pub mod store;


pub use config::{AppConfig, ConfigError, DatabaseConfig};
pub use engine::{EngineConfig, LedgerEngine};
pub use history::{History, HistoryCursor, HistoryPage};
pub use store::{HistoryQuery, InMemoryStorage, PostgresStorage, Storage, StoreError};
