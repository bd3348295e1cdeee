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

/// Create every table and index. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Last-known change signals, one row per synced item
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_metadata (
            item_id INTEGER PRIMARY KEY,
            reply_count INTEGER NOT NULL,
            last_activity_at TEXT NOT NULL,
            highest_reply_seq INTEGER,
            synced_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Thread body as last fetched
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_content (
            item_id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            thread_json TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            fetched_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Analysis header; records live in analysis_records
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_results (
            item_id INTEGER PRIMARY KEY,
            category TEXT NOT NULL,
            model TEXT NOT NULL,
            source_hash TEXT NOT NULL,
            analyzed_at INTEGER NOT NULL,
            FOREIGN KEY (item_id) REFERENCES raw_content(item_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_records (
            item_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            question TEXT NOT NULL,
            answer TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (item_id, position),
            FOREIGN KEY (item_id) REFERENCES analysis_results(item_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Latest failure per item
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_failures (
            item_id INTEGER PRIMARY KEY,
            stage TEXT NOT NULL,
            message TEXT NOT NULL,
            raw_response TEXT,
            failed_at INTEGER NOT NULL,
            FOREIGN KEY (item_id) REFERENCES raw_content(item_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Analysis leases
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS work_claims (
            item_id INTEGER PRIMARY KEY,
            worker_id TEXT NOT NULL,
            claimed_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            FOREIGN KEY (item_id) REFERENCES raw_content(item_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            mode TEXT NOT NULL,
            pages INTEGER NOT NULL,
            fetched INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            failed INTEGER NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_analysis_results_analyzed_at ON analysis_results(analyzed_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_work_claims_expires_at ON work_claims(expires_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_analysis_failures_stage ON analysis_failures(stage)")
        .execute(pool)
        .await?;

    Ok(())
}
