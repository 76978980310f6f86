//! libSQL backend: async `LedgerStore` trait implementation.
//!
//! Supports local file and in-memory databases. Decimals are stored as
//! canonical text and timestamps as RFC 3339 text.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::mail::MailIdentity;
use crate::pipeline::types::{
    Account, InsertOutcome, NewAccount, NewTransaction, ParseFailure, StoredParseFailure,
    SyncCheckpoint, SyncStatus, Transaction,
};
use crate::store::migrations;
use crate::store::traits::LedgerStore;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_decimal(s: &str) -> Result<Decimal, DatabaseError> {
    Decimal::from_str(s)
        .map_err(|e| DatabaseError::Serialization(format!("bad decimal '{s}': {e}")))
}

fn parse_optional_decimal(s: Option<String>) -> Result<Option<Decimal>, DatabaseError> {
    s.as_deref().map(parse_decimal).transpose()
}

/// Convert `Option<String>` to libsql Value.
fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn row_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(format!("row parse: {e}"))
}

/// Map a write error, surfacing uniqueness violations as `Constraint`.
fn write_err(op: &str, e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {message}"))
    } else {
        DatabaseError::Query(format!("{op}: {message}"))
    }
}

fn row_to_account(row: &libsql::Row) -> Result<Account, DatabaseError> {
    let token: String = row.get(3).map_err(row_err)?;
    let balance: String = row.get(4).map_err(row_err)?;
    let created: String = row.get(5).map_err(row_err)?;
    let updated: String = row.get(6).map_err(row_err)?;

    Ok(Account {
        id: row.get(0).map_err(row_err)?,
        user_id: row.get(1).map_err(row_err)?,
        bank_label: row.get(2).map_err(row_err)?,
        account_token: (!token.is_empty()).then_some(token),
        current_balance: parse_decimal(&balance)?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_transaction(row: &libsql::Row) -> Result<Transaction, DatabaseError> {
    let direction: String = row.get(4).map_err(row_err)?;
    let amount: String = row.get(5).map_err(row_err)?;
    let occurred: String = row.get(9).map_err(row_err)?;
    let created: String = row.get(11).map_err(row_err)?;

    Ok(Transaction {
        id: row.get(0).map_err(row_err)?,
        user_id: row.get(1).map_err(row_err)?,
        account_id: row.get(2).map_err(row_err)?,
        category_id: row.get(3).ok(),
        direction: direction.parse().map_err(DatabaseError::Serialization)?,
        amount: parse_decimal(&amount)?,
        description: row.get(6).map_err(row_err)?,
        counterparty: row.get(7).ok(),
        balance_after: parse_optional_decimal(row.get(8).ok())?,
        occurred_at: parse_datetime(&occurred),
        source_message_id: row.get(10).map_err(row_err)?,
        created_at: parse_datetime(&created),
    })
}

fn row_to_parse_failure(row: &libsql::Row) -> Result<StoredParseFailure, DatabaseError> {
    let missing: String = row.get(5).map_err(row_err)?;
    let created: String = row.get(8).map_err(row_err)?;
    let missing_fields: Vec<String> = serde_json::from_str(&missing)
        .map_err(|e| DatabaseError::Serialization(format!("missing_fields: {e}")))?;

    Ok(StoredParseFailure {
        id: row.get(0).map_err(row_err)?,
        user_id: row.get(1).map_err(row_err)?,
        failure: ParseFailure {
            source_message_id: row.get(2).map_err(row_err)?,
            sender: row.get(3).map_err(row_err)?,
            reason: row.get(4).map_err(row_err)?,
            missing_fields,
            subject_snapshot: row.get(6).map_err(row_err)?,
            body_snapshot: row.get(7).map_err(row_err)?,
        },
        created_at: parse_datetime(&created),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const ACCOUNT_COLUMNS: &str =
    "id, user_id, bank_label, account_token, current_balance, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, user_id, account_id, category_id, direction, amount, description, counterparty, balance_after, occurred_at, source_message_id, created_at";

const FAILURE_COLUMNS: &str = "id, user_id, source_message_id, sender, reason, missing_fields, subject_snapshot, body_snapshot, created_at";

#[async_trait]
impl LedgerStore for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Accounts ────────────────────────────────────────────────────

    async fn find_account(
        &self,
        user_id: &str,
        bank_label: &str,
        account_token: Option<&str>,
    ) -> Result<Option<Account>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts
                     WHERE user_id = ?1 AND bank_label = ?2 AND account_token = ?3"
                ),
                params![user_id, bank_label, account_token.unwrap_or_default()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_account: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("find_account: {e}")))?
        {
            Some(row) => Ok(Some(row_to_account(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_account_balance(
        &self,
        account_id: &str,
        balance: Decimal,
    ) -> Result<(), DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE accounts SET current_balance = ?1, updated_at = ?2 WHERE id = ?3",
                params![balance.to_string(), Utc::now().to_rfc3339(), account_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_account_balance: {e}")))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "account".into(),
                id: account_id.to_string(),
            });
        }
        Ok(())
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Account, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.conn()
            .execute(
                "INSERT INTO accounts (id, user_id, bank_label, account_token, current_balance,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    id.clone(),
                    account.user_id.as_str(),
                    account.bank_label.as_str(),
                    account.account_token.as_deref().unwrap_or_default(),
                    account.current_balance.to_string(),
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("create_account", e))?;

        debug!(account_id = %id, user_id = %account.user_id, "Account created");
        Ok(Account {
            id,
            user_id: account.user_id.clone(),
            bank_label: account.bank_label.clone(),
            account_token: account.account_token.clone(),
            current_balance: account.current_balance,
            created_at: now,
            updated_at: now,
        })
    }

    async fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = ?1
                     ORDER BY created_at ASC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_accounts: {e}")))?;

        let mut accounts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_accounts: {e}")))?
        {
            accounts.push(row_to_account(&row)?);
        }
        Ok(accounts)
    }

    // ── Categories ──────────────────────────────────────────────────

    async fn find_category_id(
        &self,
        name: &str,
        user_id: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id FROM categories
                 WHERE name = ?1 AND (user_id = ?2 OR user_id IS NULL)
                 ORDER BY user_id IS NULL
                 LIMIT 1",
                params![name, user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_category_id: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("find_category_id: {e}")))?
        {
            Some(row) => Ok(Some(row.get(0).map_err(row_err)?)),
            None => Ok(None),
        }
    }

    // ── Transactions ────────────────────────────────────────────────

    async fn transaction_exists_for_source(
        &self,
        source_message_id: &str,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM transactions WHERE source_message_id = ?1 LIMIT 1",
                params![source_message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("transaction_exists_for_source: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("transaction_exists_for_source: {e}")))?;
        Ok(row.is_some())
    }

    async fn insert_transaction(
        &self,
        tx: &NewTransaction,
    ) -> Result<InsertOutcome, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO transactions (id, user_id, account_id, category_id, direction,
                    amount, description, counterparty, balance_after, occurred_at,
                    source_message_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(source_message_id) DO NOTHING",
                params![
                    id.clone(),
                    tx.user_id.as_str(),
                    tx.account_id.as_str(),
                    opt_text(tx.category_id.clone()),
                    tx.direction.as_str(),
                    tx.amount.to_string(),
                    tx.description.as_str(),
                    opt_text(tx.counterparty.clone()),
                    opt_text(tx.balance_after.map(|b| b.to_string())),
                    tx.occurred_at.to_rfc3339(),
                    tx.source_message_id.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("insert_transaction", e))?;

        if inserted == 0 {
            debug!(source_message_id = %tx.source_message_id, "Transaction already recorded");
            return Ok(InsertOutcome::Duplicate);
        }
        Ok(InsertOutcome::Inserted(id))
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = ?1
                     ORDER BY occurred_at DESC, created_at DESC LIMIT ?2"
                ),
                params![user_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_transactions: {e}")))?;

        let mut transactions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_transactions: {e}")))?
        {
            transactions.push(row_to_transaction(&row)?);
        }
        Ok(transactions)
    }

    // ── Parse failures ──────────────────────────────────────────────

    async fn insert_parse_failure(
        &self,
        user_id: &str,
        failure: &ParseFailure,
    ) -> Result<bool, DatabaseError> {
        let missing = serde_json::to_string(&failure.missing_fields)
            .map_err(|e| DatabaseError::Serialization(format!("missing_fields: {e}")))?;

        let inserted = self
            .conn()
            .execute(
                "INSERT INTO parse_failures (id, user_id, source_message_id, sender, reason,
                    missing_fields, subject_snapshot, body_snapshot, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(source_message_id) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    user_id,
                    failure.source_message_id.as_str(),
                    failure.sender.as_str(),
                    failure.reason.as_str(),
                    missing,
                    failure.subject_snapshot.as_str(),
                    failure.body_snapshot.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("insert_parse_failure", e))?;

        Ok(inserted > 0)
    }

    async fn list_parse_failures(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredParseFailure>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {FAILURE_COLUMNS} FROM parse_failures WHERE user_id = ?1
                     ORDER BY created_at DESC LIMIT ?2"
                ),
                params![user_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_parse_failures: {e}")))?;

        let mut failures = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_parse_failures: {e}")))?
        {
            failures.push(row_to_parse_failure(&row)?);
        }
        Ok(failures)
    }

    // ── Sync state ──────────────────────────────────────────────────

    async fn read_checkpoint(
        &self,
        user_id: &str,
    ) -> Result<Option<SyncCheckpoint>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT last_sync_at, status, last_error FROM sync_state WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("read_checkpoint: {e}")))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("read_checkpoint: {e}")))?
        else {
            return Ok(None);
        };

        let last_sync_at: Option<String> = row.get(0).ok();
        let status: String = row.get(1).map_err(row_err)?;
        Ok(Some(SyncCheckpoint {
            last_sync_at: last_sync_at.as_deref().map(parse_datetime),
            status: SyncStatus::from_str(&status).map_err(DatabaseError::Serialization)?,
            last_error: row.get(2).ok(),
        }))
    }

    async fn write_checkpoint(
        &self,
        user_id: &str,
        checkpoint: &SyncCheckpoint,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO sync_state (user_id, last_sync_at, status, last_error, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                    last_sync_at = excluded.last_sync_at,
                    status = excluded.status,
                    last_error = excluded.last_error,
                    updated_at = excluded.updated_at",
                params![
                    user_id,
                    opt_text(checkpoint.last_sync_at.map(|t| t.to_rfc3339())),
                    checkpoint.status.as_str(),
                    opt_text(checkpoint.last_error.clone()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("write_checkpoint: {e}")))?;
        Ok(())
    }

    async fn clear_checkpoint(&self, user_id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM sync_state WHERE user_id = ?1", params![user_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_checkpoint: {e}")))?;
        Ok(())
    }

    // ── Mail identities ─────────────────────────────────────────────

    async fn get_mail_identity(
        &self,
        user_id: &str,
    ) -> Result<Option<MailIdentity>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT user_id, email_address, refresh_token FROM mail_identities
                 WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_mail_identity: {e}")))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_mail_identity: {e}")))?
        else {
            return Ok(None);
        };

        let refresh_token: String = row.get(2).map_err(row_err)?;
        Ok(Some(MailIdentity {
            user_id: row.get(0).map_err(row_err)?,
            email_address: row.get(1).map_err(row_err)?,
            refresh_token: SecretString::from(refresh_token),
        }))
    }

    async fn upsert_mail_identity(&self, identity: &MailIdentity) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO mail_identities (user_id, email_address, refresh_token,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                    email_address = excluded.email_address,
                    refresh_token = excluded.refresh_token,
                    updated_at = excluded.updated_at",
                params![
                    identity.user_id.as_str(),
                    identity.email_address.as_str(),
                    identity.refresh_token.expose_secret(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_mail_identity: {e}")))?;
        Ok(())
    }

    async fn list_sync_users(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT user_id FROM mail_identities ORDER BY user_id", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_sync_users: {e}")))?;

        let mut users = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_sync_users: {e}")))?
        {
            users.push(row.get(0).map_err(row_err)?);
        }
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Direction;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn new_account(token: Option<&str>) -> NewAccount {
        NewAccount {
            user_id: "u1".into(),
            bank_label: "HDFC".into(),
            account_token: token.map(String::from),
            current_balance: dec!(100.50),
        }
    }

    fn new_tx(account_id: &str, source: &str, day: u32) -> NewTransaction {
        NewTransaction {
            user_id: "u1".into(),
            account_id: account_id.into(),
            category_id: Some("cat-digital-payments".into()),
            direction: Direction::Debit,
            amount: dec!(1250.00),
            description: "Payment to store@okaxis".into(),
            counterparty: Some("store@okaxis".into()),
            balance_after: Some(dec!(8750.00)),
            occurred_at: Utc.with_ymd_and_hms(2026, 1, day, 8, 0, 0).unwrap(),
            source_message_id: source.into(),
        }
    }

    fn failure(source: &str) -> ParseFailure {
        ParseFailure {
            reason: "Missing required fields: amount".into(),
            missing_fields: vec!["amount".into()],
            source_message_id: source.into(),
            sender: "alerts@hdfcbank.net".into(),
            subject_snapshot: "Alert".into(),
            body_snapshot: "Your account was debited".into(),
        }
    }

    // ── Accounts ────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_and_find_account() {
        let db = test_db().await;
        let created = db.create_account(&new_account(Some("XX1234"))).await.unwrap();

        let found = db
            .find_account("u1", "HDFC", Some("XX1234"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.current_balance, dec!(100.50));
        assert_eq!(found.account_token.as_deref(), Some("XX1234"));

        assert!(db.find_account("u1", "HDFC", Some("XX9999")).await.unwrap().is_none());
        assert!(db.find_account("u2", "HDFC", Some("XX1234")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tokenless_account_is_its_own_key() {
        let db = test_db().await;
        let created = db.create_account(&new_account(None)).await.unwrap();
        let found = db.find_account("u1", "HDFC", None).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(found.account_token.is_none());
    }

    #[tokio::test]
    async fn duplicate_account_is_constraint_error() {
        let db = test_db().await;
        db.create_account(&new_account(Some("XX1234"))).await.unwrap();
        let err = db
            .create_account(&new_account(Some("XX1234")))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn balance_is_replaced() {
        let db = test_db().await;
        let account = db.create_account(&new_account(Some("XX1234"))).await.unwrap();
        db.update_account_balance(&account.id, dec!(42.00)).await.unwrap();
        let accounts = db.list_accounts("u1").await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].current_balance, dec!(42.00));
    }

    #[tokio::test]
    async fn update_missing_account_is_not_found() {
        let db = test_db().await;
        let err = db.update_account_balance("nope", dec!(1)).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    // ── Categories ──────────────────────────────────────────────────

    #[tokio::test]
    async fn global_category_lookup() {
        let db = test_db().await;
        let id = db.find_category_id("Digital Payments", "u1").await.unwrap();
        assert_eq!(id.as_deref(), Some("cat-digital-payments"));
        assert!(db.find_category_id("Groceries", "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn user_category_shadows_global() {
        let db = test_db().await;
        db.conn()
            .execute(
                "INSERT INTO categories (id, name, user_id) VALUES ('mine', 'Rent', 'u1')",
                (),
            )
            .await
            .unwrap();
        assert_eq!(
            db.find_category_id("Rent", "u1").await.unwrap().as_deref(),
            Some("mine")
        );
        assert_eq!(
            db.find_category_id("Rent", "u2").await.unwrap().as_deref(),
            Some("cat-rent")
        );
    }

    // ── Transactions ────────────────────────────────────────────────

    #[tokio::test]
    async fn insert_transaction_is_idempotent() {
        let db = test_db().await;
        let account = db.create_account(&new_account(Some("XX1234"))).await.unwrap();

        assert!(!db.transaction_exists_for_source("m1").await.unwrap());
        let first = db.insert_transaction(&new_tx(&account.id, "m1", 9)).await.unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));
        assert!(db.transaction_exists_for_source("m1").await.unwrap());

        let second = db.insert_transaction(&new_tx(&account.id, "m1", 9)).await.unwrap();
        assert_eq!(second, InsertOutcome::Duplicate);
        assert_eq!(db.list_transactions("u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transactions_roundtrip_and_order() {
        let db = test_db().await;
        let account = db.create_account(&new_account(Some("XX1234"))).await.unwrap();
        db.insert_transaction(&new_tx(&account.id, "m1", 5)).await.unwrap();
        db.insert_transaction(&new_tx(&account.id, "m2", 9)).await.unwrap();

        let txs = db.list_transactions("u1", 10).await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].source_message_id, "m2");
        assert_eq!(txs[0].amount, dec!(1250.00));
        assert_eq!(txs[0].balance_after, Some(dec!(8750.00)));
        assert_eq!(txs[0].direction, Direction::Debit);
        assert_eq!(txs[0].counterparty.as_deref(), Some("store@okaxis"));
        assert_eq!(
            txs[0].occurred_at,
            Utc.with_ymd_and_hms(2026, 1, 9, 8, 0, 0).unwrap()
        );

        assert_eq!(db.list_transactions("u1", 1).await.unwrap().len(), 1);
        assert!(db.list_transactions("u2", 10).await.unwrap().is_empty());
    }

    // ── Parse failures ──────────────────────────────────────────────

    #[tokio::test]
    async fn parse_failures_recorded_once() {
        let db = test_db().await;
        assert!(db.insert_parse_failure("u1", &failure("m9")).await.unwrap());
        assert!(!db.insert_parse_failure("u1", &failure("m9")).await.unwrap());

        let stored = db.list_parse_failures("u1", 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].failure, failure("m9"));
    }

    // ── Sync state ──────────────────────────────────────────────────

    #[tokio::test]
    async fn checkpoint_roundtrip() {
        let db = test_db().await;
        assert!(db.read_checkpoint("u1").await.unwrap().is_none());

        let checkpoint = SyncCheckpoint {
            last_sync_at: Some(Utc.with_ymd_and_hms(2026, 1, 9, 10, 0, 0).unwrap()),
            status: SyncStatus::Success,
            last_error: None,
        };
        db.write_checkpoint("u1", &checkpoint).await.unwrap();
        assert_eq!(db.read_checkpoint("u1").await.unwrap(), Some(checkpoint.clone()));

        let failed = SyncCheckpoint {
            status: SyncStatus::Failed,
            last_error: Some("token revoked".into()),
            ..checkpoint
        };
        db.write_checkpoint("u1", &failed).await.unwrap();
        assert_eq!(db.read_checkpoint("u1").await.unwrap(), Some(failed));

        db.clear_checkpoint("u1").await.unwrap();
        assert!(db.read_checkpoint("u1").await.unwrap().is_none());
    }

    // ── Mail identities ─────────────────────────────────────────────

    #[tokio::test]
    async fn mail_identity_upsert_and_list() {
        let db = test_db().await;
        assert!(db.get_mail_identity("u1").await.unwrap().is_none());

        for (user, token) in [("u2", "t2"), ("u1", "t1"), ("u1", "t1-rotated")] {
            db.upsert_mail_identity(&MailIdentity {
                user_id: user.into(),
                email_address: format!("{user}@example.com"),
                refresh_token: SecretString::from(token.to_string()),
            })
            .await
            .unwrap();
        }

        let identity = db.get_mail_identity("u1").await.unwrap().unwrap();
        assert_eq!(identity.refresh_token.expose_secret(), "t1-rotated");
        assert_eq!(db.list_sync_users().await.unwrap(), vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn local_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.create_account(&new_account(None)).await.unwrap();
        }
        let reopened = LibSqlBackend::new_local(&path).await.unwrap();
        assert_eq!(reopened.list_accounts("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn init_schema_is_repeatable() {
        let db = test_db().await;
        db.init_schema().await.unwrap();
    }
}
