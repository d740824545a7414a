pub mod config;
pub mod csv;
pub mod engine;
pub mod model;
pub mod points;
pub mod store;

pub use config::LedgerConfig;
pub use engine::{AccountSummary, BalanceDrift, Ledger, LedgerError};
pub use model::{LedgerEvent, Transaction, TransactionId, TransactionKind, TransactionStatus, UserId};
pub use points::Points;
pub use store::{LedgerStore, MemoryStore, SqliteStore};
