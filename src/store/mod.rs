//! Persistence layer: libSQL-backed storage for the ledger and sync state.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::LedgerStore;
