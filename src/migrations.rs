//! Forward-only numbered migrations over the embedded SQLite store.
//!
//! Version 0 means a fresh database. Each migration applies iff the stored
//! version is lower, and the stored version is bumped after each one
//! succeeds. Column additions go through `column_exists` because SQLite has
//! no ADD COLUMN IF NOT EXISTS.

use chrono::Utc;
use sqlx::{Row, SqlitePool};

pub const SCHEMA_VERSION: i64 = 7;

pub async fn run(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    ensure_version_table(pool).await?;
    let current = get_schema_version(pool).await?;
    tracing::info!(current, target = SCHEMA_VERSION, "checking schema version");

    if current >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current + 1)..=SCHEMA_VERSION {
        tracing::info!(version, "running migration");
        match version {
            1 => migrate_v1_initial_schema(pool).await?,
            2 => migrate_v2_checkbox_states(pool).await?,
            3 => migrate_v3_frozen_rollover(pool).await?,
            4 => migrate_v4_credentials_notes_key(pool).await?,
            5 => migrate_v5_refunds_tables(pool).await?,
            6 => migrate_v6_refunds_extended(pool).await?,
            7 => migrate_v7_lockouts_and_view_flags(pool).await?,
            _ => unreachable!("no migration registered for version {version}"),
        }
        set_schema_version(pool, version).await?;
    }

    tracing::info!(version = SCHEMA_VERSION, "migrations complete");
    Ok(())
}

async fn ensure_version_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_schema_version(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT version FROM schema_version WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get::<i64, _>("version")).unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO schema_version (id, version, updated_at)
        VALUES (1, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            version = excluded.version,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(version)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

async fn column_exists(
    pool: &SqlitePool,
    table: &str,
    column: &str,
) -> Result<bool, sqlx::Error> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .any(|row| row.get::<String, _>("name") == column))
}

async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<(), sqlx::Error> {
    if !column_exists(pool, table, column).await? {
        sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {definition}"))
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn migrate_v1_initial_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS credentials (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            salt TEXT NOT NULL,
            email_enc TEXT NOT NULL,
            password_enc TEXT NOT NULL,
            mfa_secret_enc TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            recurring_id TEXT PRIMARY KEY,
            upstream_category_id TEXT NOT NULL,
            name TEXT NOT NULL,
            target_amount REAL NOT NULL,
            frequency_months REAL NOT NULL DEFAULT 1,
            frozen_monthly_target REAL,
            target_month TEXT,
            frozen_amount REAL,
            frozen_frequency_months REAL,
            created_at TEXT,
            last_synced_at TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            id TEXT PRIMARY KEY,
            category_type TEXT NOT NULL,
            category_id TEXT NOT NULL,
            category_name TEXT NOT NULL,
            group_id TEXT,
            group_name TEXT,
            month_key TEXT NOT NULL,
            content_enc TEXT NOT NULL,
            salt TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_notes_category ON notes (category_type, category_id)",
        "CREATE INDEX IF NOT EXISTS idx_notes_month ON notes (month_key)",
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_notes_logical_key
            ON notes (category_type, category_id, month_key)
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS general_notes (
            month_key TEXT PRIMARY KEY,
            id TEXT NOT NULL,
            content_enc TEXT NOT NULL,
            salt TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS archived_notes (
            id TEXT PRIMARY KEY,
            category_type TEXT NOT NULL,
            category_id TEXT NOT NULL,
            category_name TEXT NOT NULL,
            group_id TEXT,
            group_name TEXT,
            month_key TEXT NOT NULL,
            content_enc TEXT NOT NULL,
            salt TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            archived_at TEXT NOT NULL,
            original_category_name TEXT NOT NULL,
            original_group_name TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS known_categories (
            category_id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS security_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type TEXT NOT NULL,
            success INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            ip_address TEXT,
            country TEXT,
            city TEXT,
            details TEXT,
            user_agent TEXT
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_security_events_timestamp ON security_events (timestamp DESC)",
        "CREATE INDEX IF NOT EXISTS idx_security_events_type ON security_events (event_type)",
        "CREATE INDEX IF NOT EXISTS idx_security_events_success ON security_events (success)",
        r#"
        CREATE TABLE IF NOT EXISTS ip_geolocation_cache (
            ip_address TEXT PRIMARY KEY,
            country TEXT,
            city TEXT,
            cached_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS security_preferences (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

async fn migrate_v2_checkbox_states(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = [
        "DROP TABLE IF EXISTS checkbox_states",
        r#"
        CREATE TABLE checkbox_states (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            note_id TEXT REFERENCES notes(id) ON DELETE CASCADE,
            general_note_month_key TEXT,
            viewing_month TEXT NOT NULL,
            states_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE UNIQUE INDEX idx_checkbox_note_viewing
            ON checkbox_states (note_id, viewing_month)
        "#,
        r#"
        CREATE UNIQUE INDEX idx_checkbox_general_viewing
            ON checkbox_states (general_note_month_key, viewing_month)
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

async fn migrate_v3_frozen_rollover(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    add_column_if_missing(pool, "categories", "frozen_rollover_amount", "REAL").await?;
    add_column_if_missing(pool, "categories", "frozen_next_due_date", "TEXT").await?;

    // Clear stored targets so the next calculation uses the rollover model.
    sqlx::query(
        r#"
        UPDATE categories SET
            frozen_monthly_target = NULL,
            target_month = NULL,
            frozen_amount = NULL,
            frozen_frequency_months = NULL,
            frozen_rollover_amount = NULL,
            frozen_next_due_date = NULL
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn migrate_v4_credentials_notes_key(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Nullable: existing installs gain the wrapped notes key on next save.
    add_column_if_missing(pool, "credentials", "notes_key_enc", "TEXT").await
}

async fn migrate_v5_refunds_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS refunds_config (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            replacement_tag_id TEXT,
            replace_tag_by_default INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS refunds_saved_views (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            tag_ids TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS refunds_matches (
            id TEXT PRIMARY KEY,
            original_transaction_id TEXT NOT NULL UNIQUE,
            refund_transaction_id TEXT,
            refund_amount REAL,
            refund_merchant TEXT,
            refund_date TEXT,
            refund_account TEXT,
            skipped INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

async fn migrate_v6_refunds_extended(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    add_column_if_missing(pool, "refunds_saved_views", "category_ids", "TEXT").await?;
    add_column_if_missing(pool, "refunds_matches", "transaction_data", "TEXT").await?;
    add_column_if_missing(
        pool,
        "refunds_config",
        "aging_warning_days",
        "INTEGER NOT NULL DEFAULT 30",
    )
    .await?;
    add_column_if_missing(pool, "refunds_config", "show_badge", "INTEGER NOT NULL DEFAULT 1")
        .await?;
    add_column_if_missing(
        pool,
        "refunds_matches",
        "expected_refund",
        "INTEGER NOT NULL DEFAULT 0",
    )
    .await?;
    add_column_if_missing(pool, "refunds_matches", "expected_date", "TEXT").await?;
    add_column_if_missing(pool, "refunds_matches", "expected_account", "TEXT").await?;
    add_column_if_missing(pool, "refunds_matches", "expected_account_id", "TEXT").await?;
    add_column_if_missing(pool, "refunds_matches", "expected_note", "TEXT").await?;
    add_column_if_missing(pool, "refunds_matches", "expected_amount", "REAL").await?;
    Ok(())
}

async fn migrate_v7_lockouts_and_view_flags(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    add_column_if_missing(
        pool,
        "refunds_config",
        "hide_matched_transactions",
        "INTEGER NOT NULL DEFAULT 0",
    )
    .await?;
    add_column_if_missing(
        pool,
        "refunds_config",
        "hide_expected_transactions",
        "INTEGER NOT NULL DEFAULT 0",
    )
    .await?;
    add_column_if_missing(
        pool,
        "refunds_saved_views",
        "exclude_from_all",
        "INTEGER NOT NULL DEFAULT 0",
    )
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ip_lockouts (
            ip_address TEXT PRIMARY KEY,
            failed_attempts INTEGER NOT NULL DEFAULT 0,
            locked_until TEXT,
            last_attempt TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ip_lockouts_locked_until ON ip_lockouts (locked_until)")
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database");
    run(&pool).await.expect("migrations failed");
    pool
}
