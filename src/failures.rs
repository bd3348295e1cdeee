//! `fh failures`: list the latest analysis failure per item.

use anyhow::{anyhow, Result};

use forum_harness_core::models::FailureStage;
use forum_harness_core::store::AnalysisStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;
use crate::stats::format_ts_relative;

/// Only analysis failures are persisted; sync failures live in the sync
/// report and the `sync_runs` counts.
fn parse_stage_filter(s: &str) -> Result<FailureStage> {
    match FailureStage::parse(s) {
        Some(
            stage @ (FailureStage::Load
            | FailureStage::Call
            | FailureStage::Parse
            | FailureStage::Save),
        ) => Ok(stage),
        _ => Err(anyhow!(
            "Unknown stage: '{}'. Must be load, call, parse, or save.",
            s
        )),
    }
}

pub async fn run_failures(config: &Config, stage: Option<&str>, limit: usize) -> Result<()> {
    let stage = stage.map(parse_stage_filter).transpose()?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let failures = store.list_failures(stage, limit).await?;
    pool.close().await;

    if failures.is_empty() {
        println!("No recorded failures.");
        return Ok(());
    }

    for f in &failures {
        println!(
            "{:>10}  {:<6} {:<14} {}",
            f.item_id,
            f.stage,
            format_ts_relative(f.failed_at),
            f.message
        );
        if let Some(ref raw) = f.raw_response {
            let preview: String = raw.chars().take(200).collect();
            println!("            response: {}", preview.replace('\n', " "));
        }
    }
    println!("{} failure(s)", failures.len());
    Ok(())
}
