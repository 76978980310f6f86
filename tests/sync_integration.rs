//! End-to-end sync passes against a stub mailbox and a real libSQL store.
//!
//! Exercises the public API only: messages go in through `MailSource`,
//! transactions, accounts and parse failures come out of `LedgerStore`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;
use secrecy::SecretString;

use inbox_ledger::error::MailError;
use inbox_ledger::mail::{Header, MailIdentity, MailSource, MessagePart, PartBody, RawMessage};
use inbox_ledger::pipeline::SyncOrchestrator;
use inbox_ledger::pipeline::scheduler::run_batch;
use inbox_ledger::pipeline::types::{Direction, SyncStatus};
use inbox_ledger::store::{LedgerStore, LibSqlBackend};

const DEBIT_BODY: &str = "Dear Customer, Rs. 1,250.00 has been debited from account XX1234 \
                          to VPA store@okaxis on 09-01-26. Avl Bal: Rs. 8,750.00";

/// 2026-01-09T08:00:00Z
const RECEIVED_MILLIS: &str = "1767945600000";

struct FixedMailbox {
    messages: Vec<RawMessage>,
}

#[async_trait]
impl MailSource for FixedMailbox {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch_messages_since(
        &self,
        _identity: &MailIdentity,
        _after: DateTime<Utc>,
    ) -> Result<Vec<RawMessage>, MailError> {
        Ok(self.messages.clone())
    }
}

fn header(name: &str, value: &str) -> Header {
    Header {
        name: name.into(),
        value: value.into(),
    }
}

fn encoded(data: &str) -> Option<PartBody> {
    Some(PartBody { data: Some(URL_SAFE_NO_PAD.encode(data)) })
}

/// Single-part `format=full` message.
fn plain_alert(id: &str, body: &str) -> RawMessage {
    RawMessage {
        id: id.into(),
        internal_date: Some(RECEIVED_MILLIS.into()),
        payload: Some(MessagePart {
            mime_type: "text/plain".into(),
            headers: vec![
                header("From", "HDFC Bank InstaAlerts <alerts@hdfcbank.net>"),
                header("Subject", "You have done a UPI txn. Check details!"),
            ],
            body: encoded(body),
            parts: vec![],
        }),
        raw: None,
    }
}

/// Multipart message whose only readable body is HTML.
fn html_alert(id: &str) -> RawMessage {
    RawMessage {
        id: id.into(),
        internal_date: Some(RECEIVED_MILLIS.into()),
        payload: Some(MessagePart {
            mime_type: "multipart/alternative".into(),
            headers: vec![
                header("From", "alerts@hdfcbank.net"),
                header("Subject", "Account update"),
            ],
            body: None,
            parts: vec![MessagePart {
                mime_type: "text/html".into(),
                headers: vec![],
                body: encoded(
                    "<html><body><p>Rs. 500.00 has been <b>credited</b> to account XX1234 \
                     on 09-01-26.</p></body></html>",
                ),
                parts: vec![],
            }],
        }),
        raw: None,
    }
}

/// `format=raw` message: the whole RFC 822 source, base64url-encoded.
fn rfc822_alert(id: &str, body: &str) -> RawMessage {
    let source = format!(
        "From: HDFC Bank <alerts@hdfcbank.net>\r\n\
         To: user@example.com\r\n\
         Subject: Debit alert\r\n\
         Date: Fri, 09 Jan 2026 10:15:00 +0000\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}\r\n"
    );
    RawMessage {
        id: id.into(),
        raw: Some(URL_SAFE_NO_PAD.encode(source)),
        ..Default::default()
    }
}

async fn connected_store(users: &[&str]) -> Arc<dyn LedgerStore> {
    let store: Arc<dyn LedgerStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    for user in users {
        store
            .upsert_mail_identity(&MailIdentity {
                user_id: user.to_string(),
                email_address: format!("{user}@example.com"),
                refresh_token: SecretString::from(format!("refresh-{user}")),
            })
            .await
            .unwrap();
    }
    store
}

fn orchestrator(store: Arc<dyn LedgerStore>, messages: Vec<RawMessage>) -> SyncOrchestrator {
    SyncOrchestrator::new(store, Arc::new(FixedMailbox { messages }), 3)
}

#[tokio::test]
async fn hdfc_upi_debit_lands_in_digital_payments() {
    let store = connected_store(&["u1"]).await;
    let sync = orchestrator(Arc::clone(&store), vec![plain_alert("m-debit", DEBIT_BODY)]);

    let result = sync.run_sync("u1").await.unwrap();
    assert_eq!(result.transactions_added, 1);
    assert_eq!(result.accounts_created, 1);

    let txs = store.list_transactions("u1", 10).await.unwrap();
    let tx = &txs[0];
    assert_eq!(tx.amount, dec!(1250.00));
    assert_eq!(tx.direction, Direction::Debit);
    assert_eq!(tx.description, "Payment to store@okaxis");
    assert_eq!(tx.counterparty.as_deref(), Some("store@okaxis"));
    assert_eq!(tx.balance_after, Some(dec!(8750.00)));
    assert_eq!(tx.source_message_id, "m-debit");
    assert_eq!(tx.category_id.as_deref(), Some("cat-digital-payments"));
    // Body date matches the receipt day, so the receipt time is kept.
    assert_eq!(tx.occurred_at, Utc.with_ymd_and_hms(2026, 1, 9, 8, 0, 0).unwrap());

    let accounts = store.list_accounts("u1").await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].bank_label, "HDFC");
    assert_eq!(accounts[0].account_token.as_deref(), Some("XX1234"));
    assert_eq!(accounts[0].current_balance, dec!(8750.00));
}

#[tokio::test]
async fn mixed_inbox_shares_one_account() {
    let store = connected_store(&["u1"]).await;
    let sync = orchestrator(
        Arc::clone(&store),
        vec![
            plain_alert("m-debit", DEBIT_BODY),
            html_alert("m-credit"),
            rfc822_alert(
                "m-raw",
                "Rs. 99.00 has been debited from account XX1234 to VPA cafe@okicici on 09-01-26.",
            ),
        ],
    );

    let result = sync.run_sync("u1").await.unwrap();
    assert_eq!(result.messages_seen, 3);
    assert_eq!(result.transactions_added, 3);
    assert_eq!(result.accounts_created, 1);
    assert!(result.errors.is_empty(), "{:?}", result.errors);

    let txs = store.list_transactions("u1", 10).await.unwrap();
    let credit = txs.iter().find(|t| t.source_message_id == "m-credit").unwrap();
    assert_eq!(credit.direction, Direction::Credit);
    assert_eq!(credit.amount, dec!(500.00));
    assert_eq!(credit.description, "Account update");
    assert_eq!(credit.category_id.as_deref(), Some("cat-uncategorized"));

    let from_raw = txs.iter().find(|t| t.source_message_id == "m-raw").unwrap();
    assert_eq!(from_raw.amount, dec!(99.00));
    assert_eq!(from_raw.description, "Payment to cafe@okicici");
    assert_eq!(
        from_raw.occurred_at,
        Utc.with_ymd_and_hms(2026, 1, 9, 10, 15, 0).unwrap()
    );

    // Only the first alert carried a balance.
    let accounts = store.list_accounts("u1").await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].current_balance, dec!(8750.00));
}

#[tokio::test]
async fn second_pass_adds_nothing() {
    let store = connected_store(&["u1"]).await;
    let sync = orchestrator(
        Arc::clone(&store),
        vec![plain_alert("m-debit", DEBIT_BODY), html_alert("m-credit")],
    );

    let first = sync.run_sync("u1").await.unwrap();
    let second = sync.run_sync("u1").await.unwrap();

    assert_eq!(first.transactions_added, 2);
    assert_eq!(second.transactions_added, 0);
    assert_eq!(second.duplicates_skipped, 2);
    assert_eq!(second.accounts_created, 0);
    assert_eq!(store.list_transactions("u1", 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn alert_without_currency_becomes_parse_failure() {
    let store = connected_store(&["u1"]).await;
    let sync = orchestrator(
        Arc::clone(&store),
        vec![plain_alert(
            "m-noamount",
            "Your account XX1234 has been debited. Call us if this was not you.",
        )],
    );

    let result = sync.run_sync("u1").await.unwrap();
    assert_eq!(result.transactions_added, 0);
    assert_eq!(result.parse_failures, 1);

    let failures = store.list_parse_failures("u1", 10).await.unwrap();
    assert_eq!(failures.len(), 1);
    let failure = &failures[0].failure;
    assert!(failure.reason.contains("amount"));
    assert_eq!(failure.source_message_id, "m-noamount");
    assert!(failure.body_snapshot.starts_with("Your account XX1234"));

    // Replaying the same message does not duplicate the failure row.
    sync.run_sync("u1").await.unwrap();
    assert_eq!(store.list_parse_failures("u1", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn status_reflects_last_pass() {
    let store = connected_store(&["u1"]).await;
    let sync = orchestrator(Arc::clone(&store), vec![]);

    assert!(!sync.get_sync_status("u1").await.unwrap().synced);

    let result = sync.run_sync("u1").await.unwrap();
    let status = sync.get_sync_status("u1").await.unwrap();
    assert!(status.synced);
    assert_eq!(status.status, Some(SyncStatus::Success));
    assert_eq!(status.last_sync_at, result.last_sync_at);
    assert!(status.error.is_none());
}

#[tokio::test]
async fn batch_isolates_users() {
    let store = connected_store(&["u1", "u2"]).await;
    let sync = orchestrator(Arc::clone(&store), vec![plain_alert("m-debit", DEBIT_BODY)]);

    let users: Vec<String> = ["u1", "u2", "ghost"].iter().map(|u| u.to_string()).collect();
    let report = run_batch(&sync, &users, 2, Duration::from_secs(10)).await;

    assert_eq!(report.total, 3);
    assert_eq!(report.successful, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].user_id, "ghost");

    // Same source message id under each user: only the first insert wins.
    let u1 = store.list_transactions("u1", 10).await.unwrap().len();
    let u2 = store.list_transactions("u2", 10).await.unwrap().len();
    assert_eq!(u1 + u2, 1);
}

#[tokio::test]
async fn ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");

    {
        let store: Arc<dyn LedgerStore> = Arc::new(LibSqlBackend::new_local(&path).await.unwrap());
        store
            .upsert_mail_identity(&MailIdentity {
                user_id: "u1".into(),
                email_address: "u1@example.com".into(),
                refresh_token: SecretString::from("rt".to_string()),
            })
            .await
            .unwrap();
        let sync = orchestrator(store, vec![plain_alert("m-debit", DEBIT_BODY)]);
        sync.run_sync("u1").await.unwrap();
    }

    let store: Arc<dyn LedgerStore> = Arc::new(LibSqlBackend::new_local(&path).await.unwrap());
    assert_eq!(store.list_transactions("u1", 10).await.unwrap().len(), 1);
    assert_eq!(store.list_sync_users().await.unwrap(), vec!["u1".to_string()]);

    let sync = orchestrator(Arc::clone(&store), vec![plain_alert("m-debit", DEBIT_BODY)]);
    let result = sync.run_sync("u1").await.unwrap();
    assert!(!result.is_first_sync);
    assert_eq!(result.duplicates_skipped, 1);
}
