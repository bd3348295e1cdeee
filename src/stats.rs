//! Database statistics and health overview.
//!
//! Summarizes how far sync and analysis have progressed: raw and analyzed
//! item counts, pending and stale work, live claims, failures by stage,
//! the category breakdown, and the most recent sync run. Used by
//! `fh stats`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Counts reported by `fh stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub raw_items: i64,
    pub analyzed: i64,
    /// Analyzed from content that has since changed.
    pub stale: i64,
    /// Raw items with no analysis, or a stale one.
    pub pending: i64,
    pub live_claims: i64,
    pub failures: Vec<(String, i64)>,
    pub categories: Vec<(String, i64)>,
    pub last_sync: Option<LastSync>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastSync {
    pub mode: String,
    pub fetched: i64,
    pub skipped: i64,
    pub failed: i64,
    pub finished_at: i64,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<StoreStats> {
    let raw_items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_content")
        .fetch_one(pool)
        .await?;

    let analyzed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analysis_results")
        .fetch_one(pool)
        .await?;

    let stale: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM analysis_results a
        JOIN raw_content r ON r.item_id = a.item_id
        WHERE a.source_hash != r.content_hash
        "#,
    )
    .fetch_one(pool)
    .await?;

    let pending: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM raw_content r
        LEFT JOIN analysis_results a ON a.item_id = r.item_id
        WHERE a.item_id IS NULL OR a.source_hash != r.content_hash
        "#,
    )
    .fetch_one(pool)
    .await?;

    let now = chrono::Utc::now().timestamp();
    let live_claims: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM work_claims WHERE expires_at > ?")
            .bind(now)
            .fetch_one(pool)
            .await?;

    let failures = sqlx::query(
        "SELECT stage, COUNT(*) AS n FROM analysis_failures GROUP BY stage ORDER BY n DESC, stage",
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| (row.get::<String, _>("stage"), row.get::<i64, _>("n")))
    .collect();

    let categories = sqlx::query(
        "SELECT category, COUNT(*) AS n FROM analysis_results GROUP BY category ORDER BY n DESC, category",
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| (row.get::<String, _>("category"), row.get::<i64, _>("n")))
    .collect();

    let last_sync = sqlx::query(
        "SELECT mode, fetched, skipped, failed, finished_at FROM sync_runs ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?
    .map(|row| LastSync {
        mode: row.get("mode"),
        fetched: row.get("fetched"),
        skipped: row.get("skipped"),
        failed: row.get("failed"),
        finished_at: row.get("finished_at"),
    });

    Ok(StoreStats {
        raw_items,
        analyzed,
        stale,
        pending,
        live_claims,
        failures,
        categories,
        last_sync,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Forum Harness: Database Stats");
    println!("==============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Raw items:   {}", stats.raw_items);
    println!(
        "  Analyzed:    {} / {} ({}%)",
        stats.analyzed,
        stats.raw_items,
        if stats.raw_items > 0 {
            (stats.analyzed * 100) / stats.raw_items
        } else {
            0
        }
    );
    println!("  Stale:       {}", stats.stale);
    println!("  Pending:     {}", stats.pending);
    println!("  Claimed:     {}", stats.live_claims);

    match &stats.last_sync {
        Some(run) => println!(
            "  Last sync:   {} ({}; {} fetched, {} unchanged, {} failed)",
            format_ts_relative(run.finished_at),
            run.mode,
            run.fetched,
            run.skipped,
            run.failed
        ),
        None => println!("  Last sync:   never"),
    }

    if !stats.categories.is_empty() {
        println!();
        println!("  By category:");
        for (category, n) in &stats.categories {
            println!("    {:<20} {:>6}", category, n);
        }
    }

    if !stats.failures.is_empty() {
        println!();
        println!("  Failures by stage:");
        for (stage, n) in &stats.failures {
            println!("    {:<20} {:>6}", stage, n);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
pub(crate) fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

pub(crate) fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
