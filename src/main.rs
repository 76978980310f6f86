use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, bail};
use secrecy::SecretString;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use inbox_ledger::config::{GmailConfig, SyncConfig};
use inbox_ledger::error::{self, ConfigError};
use inbox_ledger::mail::{GmailClient, MailIdentity};
use inbox_ledger::pipeline::SyncOrchestrator;
use inbox_ledger::pipeline::scheduler::{run_scheduled_batch, spawn_sync_scheduler};
use inbox_ledger::pipeline::types::SyncStatusView;
use inbox_ledger::store::{LedgerStore, LibSqlBackend};

const USAGE: &str = "usage: inbox-ledger [run | once | sync <user> | resync <user> | status <user> | connect <user> <email>]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let config = SyncConfig::from_env()?;
    let store: Arc<dyn LedgerStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );

    match args.as_slice() {
        [] | ["run"] => run(store, config).await,
        ["once"] => {
            let orchestrator = build_orchestrator(store, &config)?;
            let report = run_scheduled_batch(&orchestrator, &config).await?;
            print_json(&report)
        }
        ["sync", user] => {
            let orchestrator = build_orchestrator(store, &config)?;
            let result = orchestrator.run_sync(user).await?;
            print_json(&result)
        }
        ["resync", user] => {
            let orchestrator = build_orchestrator(store, &config)?;
            let result = orchestrator.run_full_sync(user).await?;
            print_json(&result)
        }
        ["status", user] => {
            let checkpoint = store.read_checkpoint(user).await?;
            print_json(&SyncStatusView::from(checkpoint))
        }
        ["connect", user, email] => {
            let token = std::env::var("INBOX_LEDGER_REFRESH_TOKEN")
                .map_err(|_| ConfigError::MissingEnvVar("INBOX_LEDGER_REFRESH_TOKEN".into()))?;
            store
                .upsert_mail_identity(&MailIdentity {
                    user_id: user.to_string(),
                    email_address: email.to_string(),
                    refresh_token: SecretString::from(token),
                })
                .await?;
            eprintln!("Connected {email} for user {user}");
            Ok(())
        }
        _ => bail!(USAGE),
    }
}

/// Run the cron-driven batch loop until Ctrl-C.
async fn run(store: Arc<dyn LedgerStore>, config: SyncConfig) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(store, &config)?;

    eprintln!("Inbox Ledger v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Schedule: {}", config.schedule);
    eprintln!(
        "   Concurrency: {} users, {}s per pass\n",
        config.max_concurrent_users,
        config.pass_timeout.as_secs()
    );

    // First batch right away, then on schedule.
    run_scheduled_batch(&orchestrator, &config).await?;

    let (handle, shutdown) = spawn_sync_scheduler(Arc::clone(&orchestrator), config)?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("Shutdown requested");
    shutdown.store(true, Ordering::Relaxed);
    handle.await.context("scheduler task")?;
    Ok(())
}

fn build_orchestrator(
    store: Arc<dyn LedgerStore>,
    config: &SyncConfig,
) -> error::Result<Arc<SyncOrchestrator>> {
    let gmail = GmailConfig::from_env()
        .ok_or_else(|| ConfigError::MissingEnvVar("GMAIL_CLIENT_ID".into()))?;
    tracing::debug!(
        senders = ?gmail.bank_senders,
        format = gmail.message_format.as_str(),
        "Gmail source configured"
    );
    let mail = Arc::new(GmailClient::new(gmail));
    Ok(Arc::new(SyncOrchestrator::new(
        store,
        mail,
        config.lookback_months,
    )))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Stderr logging, plus a daily-rolling file when `INBOX_LEDGER_LOG_DIR` is set.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match std::env::var("INBOX_LEDGER_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "inbox-ledger.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(file)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .init();
            None
        }
    }
}
