//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default database location.
pub const DEFAULT_DB_PATH: &str = "./data/inbox-ledger.db";

/// First sync reaches back this many months (to the 1st of that month).
pub const DEFAULT_LOOKBACK_MONTHS: u32 = 3;

/// Every 10 minutes, on the minute.
pub const DEFAULT_SYNC_SCHEDULE: &str = "0 */10 * * * *";

pub const DEFAULT_MAX_CONCURRENT_USERS: usize = 4;

pub const DEFAULT_PASS_TIMEOUT_SECS: u64 = 300;

/// Sender filters used when `GMAIL_BANK_SENDERS` is unset. A bare word
/// matches any sender address containing it.
pub const DEFAULT_BANK_SENDERS: &[&str] = &["alerts@hdfcbank.net", "hdfc"];

/// Sync pipeline configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// SQLite/libSQL database file.
    pub db_path: PathBuf,
    /// Bootstrap window for users with no checkpoint.
    pub lookback_months: u32,
    /// Cron expression (6 fields, seconds first) for the batch driver.
    pub schedule: String,
    /// Passes for different users that may run at once.
    pub max_concurrent_users: usize,
    /// External deadline around a single user's pass.
    pub pass_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            lookback_months: DEFAULT_LOOKBACK_MONTHS,
            schedule: DEFAULT_SYNC_SCHEDULE.to_string(),
            max_concurrent_users: DEFAULT_MAX_CONCURRENT_USERS,
            pass_timeout: Duration::from_secs(DEFAULT_PASS_TIMEOUT_SECS),
        }
    }
}

impl SyncConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let db_path = std::env::var("INBOX_LEDGER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let lookback_months =
            parse_env("INBOX_LEDGER_LOOKBACK_MONTHS")?.unwrap_or(defaults.lookback_months);

        let schedule =
            std::env::var("INBOX_LEDGER_SYNC_SCHEDULE").unwrap_or(defaults.schedule);
        cron::Schedule::from_str(&schedule).map_err(|e| ConfigError::InvalidValue {
            key: "INBOX_LEDGER_SYNC_SCHEDULE".into(),
            message: format!("invalid cron: {e}"),
        })?;

        let max_concurrent_users: usize = parse_env("INBOX_LEDGER_MAX_CONCURRENT_USERS")?
            .unwrap_or(defaults.max_concurrent_users);
        if max_concurrent_users == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INBOX_LEDGER_MAX_CONCURRENT_USERS".into(),
                message: "must be at least 1".into(),
            });
        }

        let pass_timeout = parse_env::<u64>("INBOX_LEDGER_PASS_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.pass_timeout);

        Ok(Self {
            db_path,
            lookback_months,
            schedule,
            max_concurrent_users,
            pass_timeout,
        })
    }
}

/// How message details are requested from Gmail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageFormat {
    /// Structured MIME payload with decoded headers.
    #[default]
    Full,
    /// Base64url RFC 822 blob, parsed locally.
    Raw,
}

impl MessageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Raw => "raw",
        }
    }
}

impl FromStr for MessageFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "raw" => Ok(Self::Raw),
            other => Err(ConfigError::InvalidValue {
                key: "GMAIL_MESSAGE_FORMAT".into(),
                message: format!("expected 'full' or 'raw', got '{other}'"),
            }),
        }
    }
}

/// Gmail REST client configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub token_url: String,
    pub api_base: String,
    /// Sender addresses that carry bank alerts.
    pub bank_senders: Vec<String>,
    /// Upper bound on messages fetched in one pass.
    pub max_results: u32,
    /// Parallel detail requests per pass.
    pub fetch_concurrency: usize,
    pub message_format: MessageFormat,
}

impl GmailConfig {
    /// Build config from environment variables.
    /// Returns `None` if `GMAIL_CLIENT_ID` is not set (mail source disabled).
    pub fn from_env() -> Option<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID").ok()?;

        let client_secret =
            SecretString::from(std::env::var("GMAIL_CLIENT_SECRET").unwrap_or_default());

        let token_url = std::env::var("GMAIL_TOKEN_URL")
            .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".to_string());

        let api_base = std::env::var("GMAIL_API_BASE")
            .unwrap_or_else(|_| "https://gmail.googleapis.com/gmail/v1".to_string());

        let bank_senders = std::env::var("GMAIL_BANK_SENDERS")
            .map(|s| split_list(&s))
            .unwrap_or_else(|_| DEFAULT_BANK_SENDERS.iter().map(|s| s.to_string()).collect());

        let max_results: u32 = std::env::var("GMAIL_MAX_RESULTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(500);

        let fetch_concurrency: usize = std::env::var("GMAIL_FETCH_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(8);

        let message_format = std::env::var("GMAIL_MESSAGE_FORMAT")
            .ok()
            .and_then(|s| match s.parse() {
                Ok(format) => Some(format),
                Err(e) => {
                    tracing::warn!("{e}; using 'full'");
                    None
                }
            })
            .unwrap_or_default();

        Some(Self {
            client_id,
            client_secret,
            token_url,
            api_base,
            bank_senders,
            max_results,
            fetch_concurrency,
            message_format,
        })
    }
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
