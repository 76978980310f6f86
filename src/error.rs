//! Error types for Inbox Ledger.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Normalize error: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mail provider errors. All of these are fatal to a sync pass.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Mailbox not connected for user {user_id}")]
    NotConnected { user_id: String },

    #[error("Authentication failed for provider {provider}: {reason}")]
    AuthFailed { provider: String, reason: String },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} rate limited")]
    RateLimited { provider: String },

    #[error("Fetch from {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
}

/// Failures turning a raw provider message into an `InboundMessage`.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Message {message_id}: body decode failed: {reason}")]
    Decode { message_id: String, reason: String },

    #[error("Message {message_id}: no usable receipt timestamp")]
    MissingTimestamp { message_id: String },

    #[error("Message {message_id}: unparseable message: {reason}")]
    Unparseable { message_id: String, reason: String },
}

/// Sync pass errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] MailError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Normalize failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Sync pass for user {user_id} exceeded deadline of {timeout:?}")]
    Deadline { user_id: String, timeout: Duration },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
