//! Per-user sync pass.
//!
//! `DETERMINE_WINDOW → FETCH → PROCESS(each message) → FINALIZE`
//!
//! Only a fetch-level failure fails the pass. Everything that goes wrong with
//! a single message becomes data: a stored `ParseFailure` or an entry in
//! `SyncResult::errors`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{MailError, SyncError};
use crate::mail::{MailSource, RawMessage};
use crate::pipeline::categorize::{Categorizer, POLICY_VERSION};
use crate::pipeline::extract::ExtractorRegistry;
use crate::pipeline::ledger::LedgerResolver;
use crate::pipeline::normalize::normalize;
use crate::pipeline::types::{
    InsertOutcome, NewTransaction, SyncCheckpoint, SyncResult, SyncStatus, SyncStatusView,
};
use crate::pipeline::window::SyncWindow;
use crate::store::LedgerStore;

/// Drives sync passes. Passes for different users may run concurrently;
/// two passes for the same user must not.
pub struct SyncOrchestrator {
    store: Arc<dyn LedgerStore>,
    mail: Arc<dyn MailSource>,
    extractors: ExtractorRegistry,
    categorizer: Categorizer,
    ledger: LedgerResolver,
    lookback_months: u32,
}

impl SyncOrchestrator {
    /// Orchestrator with the built-in bank templates and category rules.
    pub fn new(store: Arc<dyn LedgerStore>, mail: Arc<dyn MailSource>, lookback_months: u32) -> Self {
        Self {
            ledger: LedgerResolver::new(Arc::clone(&store)),
            store,
            mail,
            extractors: ExtractorRegistry::with_builtin_templates(),
            categorizer: Categorizer::new(),
            lookback_months,
        }
    }

    pub fn with_extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = extractors;
        self
    }

    pub fn with_categorizer(mut self, categorizer: Categorizer) -> Self {
        self.categorizer = categorizer;
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Run one pass for `user_id`.
    ///
    /// Returns `Err` only when the pass could not fetch; the checkpoint is
    /// then marked FAILED and keeps its previous `last_sync_at`.
    pub async fn run_sync(&self, user_id: &str) -> Result<SyncResult, SyncError> {
        let previous = self.store.read_checkpoint(user_id).await?;
        let window = SyncWindow::determine(previous.as_ref(), Utc::now(), self.lookback_months);
        info!(
            user_id,
            first_sync = window.is_first_sync,
            after = %window.fetch_after,
            policy = POLICY_VERSION,
            "Starting sync pass"
        );

        let raw_messages = match self.fetch(user_id, &window).await {
            Ok(messages) => messages,
            Err(e) => {
                self.mark_failed(user_id, previous.as_ref(), &e).await;
                return Err(e);
            }
        };

        let mut result = SyncResult {
            user_id: user_id.to_string(),
            messages_seen: raw_messages.len(),
            is_first_sync: window.is_first_sync,
            ..Default::default()
        };

        for raw in &raw_messages {
            if let Err(e) = self.process_message(user_id, raw, &mut result).await {
                warn!(user_id, message_id = %raw.id, error = %e, "Message processing failed");
                result.errors.push(format!("{}: {e}", raw.id));
            }
        }

        let completed_at = Utc::now();
        self.store
            .write_checkpoint(
                user_id,
                &SyncCheckpoint {
                    last_sync_at: Some(completed_at),
                    status: SyncStatus::Success,
                    last_error: None,
                },
            )
            .await?;
        result.last_sync_at = Some(completed_at);

        info!(
            user_id,
            seen = result.messages_seen,
            added = result.transactions_added,
            accounts_created = result.accounts_created,
            parse_failures = result.parse_failures,
            duplicates = result.duplicates_skipped,
            errors = result.errors.len(),
            "Sync pass complete"
        );
        Ok(result)
    }

    /// Forget the checkpoint and run a bootstrap pass.
    pub async fn run_full_sync(&self, user_id: &str) -> Result<SyncResult, SyncError> {
        self.store.clear_checkpoint(user_id).await?;
        info!(user_id, "Checkpoint cleared for full resync");
        self.run_sync(user_id).await
    }

    pub async fn get_sync_status(&self, user_id: &str) -> Result<SyncStatusView, SyncError> {
        Ok(SyncStatusView::from(self.store.read_checkpoint(user_id).await?))
    }

    /// Mark a pass that was cut short from outside (e.g. by a deadline) as
    /// FAILED without advancing `last_sync_at`.
    pub async fn record_failure(&self, user_id: &str, error: &SyncError) {
        match self.store.read_checkpoint(user_id).await {
            Ok(previous) => self.mark_failed(user_id, previous.as_ref(), error).await,
            Err(e) => warn!(user_id, error = %e, "Failed to read sync state"),
        }
    }

    async fn fetch(&self, user_id: &str, window: &SyncWindow) -> Result<Vec<RawMessage>, SyncError> {
        let identity = self
            .store
            .get_mail_identity(user_id)
            .await?
            .ok_or_else(|| MailError::NotConnected {
                user_id: user_id.to_string(),
            })?;

        let messages = self
            .mail
            .fetch_messages_since(&identity, window.fetch_after)
            .await?;
        debug!(user_id, provider = self.mail.name(), count = messages.len(), "Fetched messages");
        Ok(messages)
    }

    async fn mark_failed(&self, user_id: &str, previous: Option<&SyncCheckpoint>, error: &SyncError) {
        warn!(user_id, error = %error, "Sync pass failed");
        let checkpoint = SyncCheckpoint {
            last_sync_at: previous.and_then(|c| c.last_sync_at),
            status: SyncStatus::Failed,
            last_error: Some(error.to_string()),
        };
        if let Err(e) = self.store.write_checkpoint(user_id, &checkpoint).await {
            warn!(user_id, error = %e, "Failed to record failed sync state");
        }
    }

    async fn process_message(
        &self,
        user_id: &str,
        raw: &RawMessage,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        let Some(message) = normalize(raw)? else {
            return Ok(());
        };

        let parsed = match self.extractors.extract(&message) {
            Ok(parsed) => parsed,
            Err(failure) => {
                debug!(
                    user_id,
                    message_id = %message.id,
                    reason = %failure.reason,
                    "Recording parse failure"
                );
                self.store.insert_parse_failure(user_id, &failure).await?;
                result.parse_failures += 1;
                return Ok(());
            }
        };

        // Checked before account resolution so a replay never touches balances.
        if self.store.transaction_exists_for_source(&message.id).await? {
            result.duplicates_skipped += 1;
            return Ok(());
        }

        let account = self.ledger.resolve_account(user_id, &parsed).await?;
        if account.created {
            result.accounts_created += 1;
        }

        let label = self.categorizer.categorize(&parsed.description);
        let category_id = self.store.find_category_id(label.as_str(), user_id).await?;

        let transaction = NewTransaction::from_parsed(
            user_id,
            &account.account_id,
            category_id,
            &message.id,
            &parsed,
        );
        match self.store.insert_transaction(&transaction).await? {
            InsertOutcome::Inserted(id) => {
                debug!(
                    user_id,
                    transaction_id = %id,
                    source_message_id = %message.id,
                    category = label.as_str(),
                    "Transaction recorded"
                );
                result.transactions_added += 1;
            }
            InsertOutcome::Duplicate => result.duplicates_skipped += 1,
        }
        Ok(())
    }
}
