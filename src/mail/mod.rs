//! Mail provider boundary.
//!
//! The sync pipeline only sees the `MailSource` trait and the provider's raw
//! message shape. `GmailClient` is the one network implementation.

pub mod gmail;

pub use gmail::GmailClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::MailError;

/// Credentials linking a user to a mailbox.
#[derive(Debug, Clone)]
pub struct MailIdentity {
    pub user_id: String,
    pub email_address: String,
    /// Long-lived OAuth refresh token.
    pub refresh_token: SecretString,
}

/// A message as the provider returns it, before normalization.
///
/// Mirrors the provider's message resource: exactly one of `payload`
/// (structured MIME tree) or `raw` (base64url RFC 822) is normally set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    /// Provider receipt time in epoch milliseconds, as a decimal string.
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
    #[serde(default)]
    pub raw: Option<String>,
}

/// One node of a MIME tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Base64url body data, if this part carries any.
    pub fn data(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| b.data.as_deref())
            .filter(|d| !d.is_empty())
    }

    pub fn is_mime(&self, mime: &str) -> bool {
        self.mime_type.eq_ignore_ascii_case(mime)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
}

/// A mailbox that can list bank notifications received after a point in time.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Provider name for logs and errors.
    fn name(&self) -> &str;

    /// Fetch messages received after `after`.
    ///
    /// Providers filter by whole days and exclude the boundary day itself;
    /// callers are expected to pass a bound already shifted one day earlier.
    /// Any error is fatal to the calling sync pass.
    async fn fetch_messages_since(
        &self,
        identity: &MailIdentity,
        after: DateTime<Utc>,
    ) -> Result<Vec<RawMessage>, MailError>;
}
