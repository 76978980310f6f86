//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS mail_identities (
                user_id TEXT PRIMARY KEY,
                email_address TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- A missing account token is stored as '' so it takes part in the key.
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                bank_label TEXT NOT NULL,
                account_token TEXT NOT NULL DEFAULT '',
                current_balance TEXT NOT NULL DEFAULT '0',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (user_id, bank_label, account_token)
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_user ON accounts(user_id);

            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                user_id TEXT,
                position INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_name_owner
                ON categories(name, COALESCE(user_id, ''));

            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                account_id TEXT NOT NULL REFERENCES accounts(id),
                category_id TEXT REFERENCES categories(id),
                direction TEXT NOT NULL,
                amount TEXT NOT NULL,
                description TEXT NOT NULL,
                counterparty TEXT,
                balance_after TEXT,
                occurred_at TEXT NOT NULL,
                source_message_id TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_user_occurred
                ON transactions(user_id, occurred_at);
            CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id);

            CREATE TABLE IF NOT EXISTS parse_failures (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                source_message_id TEXT NOT NULL UNIQUE,
                sender TEXT NOT NULL,
                reason TEXT NOT NULL,
                missing_fields TEXT NOT NULL DEFAULT '[]',
                subject_snapshot TEXT NOT NULL,
                body_snapshot TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_parse_failures_user ON parse_failures(user_id);

            CREATE TABLE IF NOT EXISTS sync_state (
                user_id TEXT PRIMARY KEY,
                last_sync_at TEXT,
                status TEXT NOT NULL,
                last_error TEXT,
                updated_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        name: "seed_category_catalog",
        sql: r#"
            INSERT OR IGNORE INTO categories (id, name, user_id, position) VALUES
                ('cat-investment', 'Investment', NULL, 1),
                ('cat-rent', 'Rent', NULL, 2),
                ('cat-credit-card-bill', 'Credit Card Bill', NULL, 3),
                ('cat-food-dining', 'Food & Dining', NULL, 4),
                ('cat-transportation', 'Transportation', NULL, 5),
                ('cat-shopping', 'Shopping', NULL, 6),
                ('cat-digital-payments', 'Digital Payments', NULL, 7),
                ('cat-entertainment', 'Entertainment', NULL, 8),
                ('cat-bills-utilities', 'Bills & Utilities', NULL, 9),
                ('cat-healthcare', 'Healthcare', NULL, 10),
                ('cat-salary', 'Salary', NULL, 11),
                ('cat-uncategorized', 'Uncategorized', NULL, 12);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::debug!(
        version = MIGRATIONS.last().map(|m| m.version).unwrap_or(0),
        "Database migrations complete"
    );

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
