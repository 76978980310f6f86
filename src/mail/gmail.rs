//! Gmail REST client.
//!
//! Exchanges the stored refresh token for an access token, searches for bank
//! alerts after a date, and fetches each match. Messages come back oldest
//! first so sequential processing applies balances in chronological order.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::GmailConfig;
use crate::error::MailError;
use crate::mail::{MailIdentity, MailSource, RawMessage};

const PROVIDER: &str = "gmail";

/// Per-request timeout for token, list and detail calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Gmail caps a single list page at 500 ids.
const MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

/// `MailSource` backed by the Gmail API.
pub struct GmailClient {
    config: GmailConfig,
    client: reqwest::Client,
}

impl GmailClient {
    pub fn new(config: GmailConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    /// Search expression for alerts received after `after` (whole days).
    pub fn search_query(&self, after: DateTime<Utc>) -> String {
        build_query(&self.config.bank_senders, after)
    }

    async fn access_token(&self, identity: &MailIdentity) -> Result<String, MailError> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("refresh_token", identity.refresh_token.expose_secret()),
            ("grant_type", "refresh_token"),
        ];

        let resp = self
            .client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(request_error)?;

        let resp = check_status(resp).await?;
        let token: TokenResponse = resp.json().await.map_err(|e| MailError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: format!("token response: {e}"),
        })?;
        Ok(token.access_token)
    }

    async fn list_message_ids(&self, token: &str, query: &str) -> Result<Vec<String>, MailError> {
        let limit = self.config.max_results as usize;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let url = format!("{}/users/me/messages", self.config.api_base);
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page_size = (limit - ids.len()).min(MAX_PAGE_SIZE as usize).to_string();
            let mut params = vec![("q", query.to_string()), ("maxResults", page_size)];
            if let Some(pt) = &page_token {
                params.push(("pageToken", pt.clone()));
            }

            let resp = self
                .client
                .get(&url)
                .bearer_auth(token)
                .query(&params)
                .send()
                .await
                .map_err(request_error)?;

            let page: ListResponse =
                check_status(resp)
                    .await?
                    .json()
                    .await
                    .map_err(|e| MailError::InvalidResponse {
                        provider: PROVIDER.into(),
                        reason: format!("message list: {e}"),
                    })?;

            ids.extend(page.messages.into_iter().map(|m| m.id));

            match page.next_page_token {
                Some(next) if ids.len() < limit => page_token = Some(next),
                _ => break,
            }
        }

        ids.truncate(limit);
        Ok(ids)
    }

    async fn get_message(&self, token: &str, id: &str) -> Result<RawMessage, MailError> {
        let url = format!("{}/users/me/messages/{id}", self.config.api_base);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[("format", self.config.message_format.as_str())])
            .send()
            .await
            .map_err(request_error)?;

        check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| MailError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: format!("message {id}: {e}"),
            })
    }
}

#[async_trait]
impl MailSource for GmailClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn fetch_messages_since(
        &self,
        identity: &MailIdentity,
        after: DateTime<Utc>,
    ) -> Result<Vec<RawMessage>, MailError> {
        let token = self.access_token(identity).await?;
        let query = self.search_query(after);
        tracing::debug!(user_id = %identity.user_id, query = %query, "Searching mailbox");

        let ids = self.list_message_ids(&token, &query).await?;
        tracing::info!(
            user_id = %identity.user_id,
            count = ids.len(),
            "Found candidate bank alerts"
        );

        let token = token.as_str();
        let fetches: Vec<_> = ids.iter().map(|id| self.get_message(token, id)).collect();
        let mut messages: Vec<RawMessage> = futures::stream::iter(fetches)
            .buffered(self.config.fetch_concurrency.max(1))
            .try_collect()
            .await?;

        // The list endpoint returns newest first.
        messages.reverse();
        Ok(messages)
    }
}

/// `(from:a OR from:b) after:YYYY/MM/DD`
pub fn build_query(senders: &[String], after: DateTime<Utc>) -> String {
    let date = after.format("%Y/%m/%d");
    let filters: Vec<String> = senders.iter().map(|s| format!("from:{s}")).collect();
    match filters.len() {
        0 => format!("after:{date}"),
        1 => format!("{} after:{date}", filters[0]),
        _ => format!("({}) after:{date}", filters.join(" OR ")),
    }
}

fn request_error(e: reqwest::Error) -> MailError {
    if e.is_timeout() {
        MailError::Timeout {
            provider: PROVIDER.into(),
            timeout: REQUEST_TIMEOUT,
        }
    } else {
        MailError::RequestFailed {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        }
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, MailError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(classify_failure(status, &body))
}

/// Map a non-success HTTP response to a `MailError`.
fn classify_failure(status: StatusCode, body: &str) -> MailError {
    if status == StatusCode::UNAUTHORIZED || body.contains("invalid_grant") {
        return MailError::AuthFailed {
            provider: PROVIDER.into(),
            reason: format!("HTTP {status}: {}", truncate(body, 200)),
        };
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return MailError::RateLimited {
            provider: PROVIDER.into(),
        };
    }
    MailError::RequestFailed {
        provider: PROVIDER.into(),
        reason: format!("HTTP {status}: {}", truncate(body, 200)),
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
