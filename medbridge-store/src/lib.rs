pub mod error;
mod sqlite_audit;
mod sqlite_records;
pub mod sqlite_store;

pub use error::{Result, StoreError};
pub use sqlite_store::{SqliteStore, TransactionOps};
