//! Account resolution.
//!
//! Accounts are keyed by `(user_id, bank_label, account_token)`. Each
//! distinct token is a distinct account; no merging across token variants.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::types::{Account, NewAccount, ParsedTransaction};
use crate::store::LedgerStore;

/// Result of resolving a transaction's account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountResolution {
    pub account_id: String,
    /// The account did not exist before this call.
    pub created: bool,
}

/// Finds or lazily creates the account a transaction belongs to.
pub struct LedgerResolver {
    store: Arc<dyn LedgerStore>,
}

impl LedgerResolver {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Resolve (or create) the account for `parsed`.
    ///
    /// An existing account has its balance overwritten when the transaction
    /// carries one. A new account starts at the carried balance, or zero.
    pub async fn resolve_account(
        &self,
        user_id: &str,
        parsed: &ParsedTransaction,
    ) -> Result<AccountResolution, DatabaseError> {
        let token = parsed.account_token.as_deref();

        if let Some(account) = self
            .store
            .find_account(user_id, &parsed.bank_label, token)
            .await?
        {
            return self.refresh(account, parsed.balance_after).await;
        }

        let new_account = NewAccount {
            user_id: user_id.to_string(),
            bank_label: parsed.bank_label.clone(),
            account_token: parsed.account_token.clone(),
            current_balance: parsed.balance_after.unwrap_or(Decimal::ZERO),
        };

        match self.store.create_account(&new_account).await {
            Ok(account) => {
                info!(
                    user_id,
                    account_id = %account.id,
                    bank = %account.bank_label,
                    token = token.unwrap_or("-"),
                    "Created account"
                );
                Ok(AccountResolution {
                    account_id: account.id,
                    created: true,
                })
            }
            // Another writer created it between our lookup and insert.
            Err(DatabaseError::Constraint(_)) => {
                let account = self
                    .store
                    .find_account(user_id, &parsed.bank_label, token)
                    .await?
                    .ok_or_else(|| DatabaseError::NotFound {
                        entity: "account".into(),
                        id: format!("{user_id}/{}/{}", parsed.bank_label, token.unwrap_or("")),
                    })?;
                self.refresh(account, parsed.balance_after).await
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh(
        &self,
        account: Account,
        balance: Option<Decimal>,
    ) -> Result<AccountResolution, DatabaseError> {
        if let Some(balance) = balance {
            self.store.update_account_balance(&account.id, balance).await?;
            debug!(account_id = %account.id, %balance, "Account balance updated");
        }
        Ok(AccountResolution {
            account_id: account.id,
            created: false,
        })
    }
}
