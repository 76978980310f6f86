//! Shared types for the ingestion pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Longest subject/body snapshot kept on a `ParseFailure`.
pub const SNAPSHOT_MAX_CHARS: usize = 500;

// ── Inbound message ─────────────────────────────────────────────────

/// Canonical form of a provider message.
///
/// Produced fresh on every fetch by the normalizer and never persisted;
/// only the transactions and failures derived from it are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Provider-unique message id. Doubles as the idempotency key.
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub body_text: String,
    /// Provider receipt time (authoritative over the `Date` header).
    pub received_at: DateTime<Utc>,
}

// ── Direction ───────────────────────────────────────────────────────

/// Money leaving (`Debit`) or entering (`Credit`) the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "DEBIT",
            Self::Credit => "CREDIT",
        }
    }

    /// Prefix used when synthesizing a description from a counterparty.
    pub fn description_prefix(&self) -> &'static str {
        match self {
            Self::Debit => "Payment to",
            Self::Credit => "Payment from",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBIT" => Ok(Self::Debit),
            "CREDIT" => Ok(Self::Credit),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

// ── Extraction results ──────────────────────────────────────────────

/// A transaction recovered from a bank notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedTransaction {
    pub bank_label: String,
    /// Always strictly positive.
    pub amount: Decimal,
    pub direction: Direction,
    pub account_token: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub balance_after: Option<Decimal>,
    pub description: String,
    pub counterparty_token: Option<String>,
}

/// Diagnostic record for a message the extractor could not use.
///
/// Never drives retries; it exists so a human can see why a message
/// produced no transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseFailure {
    pub reason: String,
    /// Required fields that could not be resolved (`amount`, `direction`).
    pub missing_fields: Vec<String>,
    pub source_message_id: String,
    pub sender: String,
    pub subject_snapshot: String,
    pub body_snapshot: String,
}

impl ParseFailure {
    /// Build a failure for `message`, capping the snapshots.
    pub fn for_message(
        message: &InboundMessage,
        reason: impl Into<String>,
        missing_fields: Vec<String>,
    ) -> Self {
        Self {
            reason: reason.into(),
            missing_fields,
            source_message_id: message.id.clone(),
            sender: message.sender.clone(),
            subject_snapshot: snapshot(&message.subject, SNAPSHOT_MAX_CHARS),
            body_snapshot: snapshot(&message.body_text, SNAPSHOT_MAX_CHARS),
        }
    }
}

/// First `max` characters of `s`, on a char boundary.
pub fn snapshot(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ── Ledger entities ─────────────────────────────────────────────────

/// A bank account, keyed by `(user_id, bank_label, account_token)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub bank_label: String,
    pub account_token: Option<String>,
    /// Last-known balance. Replaced, never accumulated.
    pub current_balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a new account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_id: String,
    pub bank_label: String,
    pub account_token: Option<String>,
    pub current_balance: Decimal,
}

/// A persisted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub account_id: String,
    pub category_id: Option<String>,
    pub direction: Direction,
    pub amount: Decimal,
    pub description: String,
    pub counterparty: Option<String>,
    pub balance_after: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
    pub source_message_id: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: String,
    pub account_id: String,
    pub category_id: Option<String>,
    pub direction: Direction,
    pub amount: Decimal,
    pub description: String,
    pub counterparty: Option<String>,
    pub balance_after: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
    pub source_message_id: String,
}

impl NewTransaction {
    pub fn from_parsed(
        user_id: &str,
        account_id: &str,
        category_id: Option<String>,
        source_message_id: &str,
        parsed: &ParsedTransaction,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            account_id: account_id.to_string(),
            category_id,
            direction: parsed.direction,
            amount: parsed.amount,
            description: parsed.description.clone(),
            counterparty: parsed.counterparty_token.clone(),
            balance_after: parsed.balance_after,
            occurred_at: parsed.occurred_at,
            source_message_id: source_message_id.to_string(),
        }
    }
}

/// Outcome of an insert-or-ignore on the `source_message_id` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written; carries its id.
    Inserted(String),
    /// A transaction for this source message already existed.
    Duplicate,
}

/// A stored parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredParseFailure {
    pub id: String,
    pub user_id: String,
    pub failure: ParseFailure,
    pub created_at: DateTime<Utc>,
}

// ── Sync state ──────────────────────────────────────────────────────

/// Outcome of the most recent pass for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncStatus {
    Success,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// Per-user sync checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoint {
    /// Completion time of the last successful pass.
    pub last_sync_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub last_error: Option<String>,
}

/// Summary returned by a sync pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub user_id: String,
    pub messages_seen: usize,
    pub transactions_added: usize,
    pub accounts_created: usize,
    pub parse_failures: usize,
    pub duplicates_skipped: usize,
    pub is_first_sync: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Non-fatal, per-message errors.
    pub errors: Vec<String>,
}

/// Read-only view of a user's sync state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusView {
    pub synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SyncStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Option<SyncCheckpoint>> for SyncStatusView {
    fn from(checkpoint: Option<SyncCheckpoint>) -> Self {
        match checkpoint {
            Some(cp) => Self {
                synced: true,
                last_sync_at: cp.last_sync_at,
                status: Some(cp.status),
                error: cp.last_error,
            },
            None => Self {
                synced: false,
                last_sync_at: None,
                status: None,
                error: None,
            },
        }
    }
}
