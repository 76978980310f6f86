//! `LedgerStore` trait: single async interface for all persistence.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::DatabaseError;
use crate::mail::MailIdentity;
use crate::pipeline::types::{
    Account, InsertOutcome, NewAccount, NewTransaction, ParseFailure, StoredParseFailure,
    SyncCheckpoint, Transaction,
};

/// Backend-agnostic store for accounts, transactions, diagnostics and sync state.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Accounts ────────────────────────────────────────────────────

    /// Look up an account by its natural key. `None` token is its own key.
    async fn find_account(
        &self,
        user_id: &str,
        bank_label: &str,
        account_token: Option<&str>,
    ) -> Result<Option<Account>, DatabaseError>;

    /// Overwrite an account's last-known balance.
    async fn update_account_balance(
        &self,
        account_id: &str,
        balance: Decimal,
    ) -> Result<(), DatabaseError>;

    /// Create an account. A natural-key conflict is `DatabaseError::Constraint`.
    async fn create_account(&self, account: &NewAccount) -> Result<Account, DatabaseError>;

    async fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>, DatabaseError>;

    // ── Categories ──────────────────────────────────────────────────

    /// Resolve a category name to its id, preferring a user-owned category
    /// over the global one.
    async fn find_category_id(
        &self,
        name: &str,
        user_id: &str,
    ) -> Result<Option<String>, DatabaseError>;

    // ── Transactions ────────────────────────────────────────────────

    async fn transaction_exists_for_source(
        &self,
        source_message_id: &str,
    ) -> Result<bool, DatabaseError>;

    /// Insert-or-ignore keyed on `source_message_id`.
    async fn insert_transaction(
        &self,
        transaction: &NewTransaction,
    ) -> Result<InsertOutcome, DatabaseError>;

    /// Most recent first.
    async fn list_transactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Transaction>, DatabaseError>;

    // ── Parse failures ──────────────────────────────────────────────

    /// Record a failure. Returns `false` if one already exists for the
    /// same source message.
    async fn insert_parse_failure(
        &self,
        user_id: &str,
        failure: &ParseFailure,
    ) -> Result<bool, DatabaseError>;

    /// Most recent first.
    async fn list_parse_failures(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredParseFailure>, DatabaseError>;

    // ── Sync state ──────────────────────────────────────────────────

    async fn read_checkpoint(&self, user_id: &str)
    -> Result<Option<SyncCheckpoint>, DatabaseError>;

    async fn write_checkpoint(
        &self,
        user_id: &str,
        checkpoint: &SyncCheckpoint,
    ) -> Result<(), DatabaseError>;

    /// Forget a user's checkpoint so the next pass bootstraps.
    async fn clear_checkpoint(&self, user_id: &str) -> Result<(), DatabaseError>;

    // ── Mail identities ─────────────────────────────────────────────

    async fn get_mail_identity(&self, user_id: &str)
    -> Result<Option<MailIdentity>, DatabaseError>;

    async fn upsert_mail_identity(&self, identity: &MailIdentity) -> Result<(), DatabaseError>;

    /// Users with a connected mailbox.
    async fn list_sync_users(&self) -> Result<Vec<String>, DatabaseError>;
}
