//! Email-to-transaction ingestion pipeline.
//!
//! Every raw message fetched for a user flows through:
//! 1. `normalize::normalize()`: provider payload → `InboundMessage`
//! 2. `ExtractorRegistry::extract()`: `ParsedTransaction` or `ParseFailure`
//! 3. `Categorizer::categorize()`: description → category label
//! 4. `LedgerResolver::resolve_account()`: find or create the account
//! 5. `LedgerStore::insert_transaction()`: insert-or-ignore on the source message id
//!
//! `SyncOrchestrator` drives one user's pass; `scheduler` drives many.

pub mod categorize;
pub mod dates;
pub mod extract;
pub mod hdfc;
pub mod ledger;
pub mod normalize;
pub mod scheduler;
pub mod sync;
pub mod types;
pub mod window;

pub use categorize::{CategoryLabel, Categorizer};
pub use extract::{ExtractorRegistry, TransactionExtractor};
pub use sync::SyncOrchestrator;
