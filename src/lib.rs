//! Inbox Ledger: bank alert emails in, categorized transactions out.

pub mod config;
pub mod error;
pub mod mail;
pub mod pipeline;
pub mod store;
