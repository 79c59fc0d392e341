use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Current state of each title
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS titles (
            number INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            word_count INTEGER NOT NULL DEFAULT 0,
            section_count INTEGER NOT NULL DEFAULT 0,
            checksum TEXT NOT NULL,
            last_amended_on TEXT,
            fetched_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Dated title history, at most one row per (title, date)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS title_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title_number INTEGER NOT NULL,
            name TEXT NOT NULL,
            word_count INTEGER NOT NULL,
            section_count INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            last_amended_on TEXT,
            snapshot_date TEXT NOT NULL,
            UNIQUE(title_number, snapshot_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agencies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            short_name TEXT,
            slug TEXT NOT NULL UNIQUE,
            parent_id INTEGER REFERENCES agencies(id),
            total_word_count INTEGER NOT NULL DEFAULT 0,
            title_count INTEGER NOT NULL DEFAULT 0,
            checksum TEXT NOT NULL DEFAULT '',
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Direct agency → title references, cleared on each hierarchy import
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agency_titles (
            agency_id INTEGER NOT NULL REFERENCES agencies(id),
            title_number INTEGER NOT NULL,
            PRIMARY KEY (agency_id, title_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agency_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            agency_id INTEGER NOT NULL REFERENCES agencies(id),
            agency_name TEXT NOT NULL,
            total_word_count INTEGER NOT NULL,
            title_count INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            snapshot_date TEXT NOT NULL,
            UNIQUE(agency_id, snapshot_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agency_snapshot_titles (
            snapshot_id INTEGER NOT NULL REFERENCES agency_snapshots(id) ON DELETE CASCADE,
            title_number INTEGER NOT NULL,
            PRIMARY KEY (snapshot_id, title_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only metric time series
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            metric_name TEXT NOT NULL,
            scope TEXT,
            value_kind TEXT NOT NULL,
            value TEXT NOT NULL,
            calculated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_title_snapshots_date ON title_snapshots(snapshot_date)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_agencies_parent ON agencies(parent_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_metrics_name ON metrics(metric_name, calculated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
