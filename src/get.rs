//! Item retrieval by id.
//!
//! Joins the three stores for one item: sync metadata, the raw thread,
//! and the current analysis (flagged stale when it was derived from other
//! content). Used by `fh get`.

use anyhow::{bail, Result};
use serde::Serialize;

use forum_harness_core::models::{AnalysisResult, Post};
use forum_harness_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;
use crate::stats::format_ts_iso;

#[derive(Debug, Clone, Serialize)]
pub struct ItemResponse {
    pub item_id: i64,
    pub title: String,
    pub reply_count: Option<i64>,
    pub last_activity_at: Option<String>,
    pub synced_at: Option<String>,
    pub fetched_at: String,
    pub content_hash: String,
    pub posts: Vec<Post>,
    pub analysis: Option<AnalysisResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResponse {
    #[serde(flatten)]
    pub result: AnalysisResult,
    /// The raw content changed after this analysis was written.
    pub stale: bool,
}

pub async fn get_item(store: &dyn Store, item_id: i64) -> Result<ItemResponse> {
    let raw = match store.get_raw_content(item_id).await? {
        Some(r) => r,
        None => bail!("item not found: {}", item_id),
    };
    let meta = store.get_sync_metadata(&[item_id]).await?.remove(&item_id);
    let analysis = store
        .get_analysis(item_id)
        .await?
        .map(|result| AnalysisResponse {
            stale: result.source_hash != raw.content_hash,
            result,
        });

    Ok(ItemResponse {
        item_id,
        title: raw.thread.title,
        reply_count: meta.as_ref().map(|m| m.reply_count),
        last_activity_at: meta.as_ref().map(|m| m.last_activity_at.clone()),
        synced_at: meta.as_ref().map(|m| format_ts_iso(m.synced_at)),
        fetched_at: format_ts_iso(raw.fetched_at),
        content_hash: raw.content_hash,
        posts: raw.thread.posts,
        analysis,
    })
}

/// CLI entry point: prints the item to stdout.
pub async fn run_get(config: &Config, item_id: i64, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let item = get_item(&store, item_id).await;
    pool.close().await;
    let item = item?;

    if json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    println!("--- Item ---");
    println!("item_id:       {}", item.item_id);
    println!("title:         {}", item.title);
    if let Some(n) = item.reply_count {
        println!("reply_count:   {}", n);
    }
    if let Some(ref at) = item.last_activity_at {
        println!("last_activity: {}", at);
    }
    println!("fetched_at:    {}", item.fetched_at);
    println!("content_hash:  {}", item.content_hash);
    println!();

    println!("--- Posts ({}) ---", item.posts.len());
    for post in &item.posts {
        println!("[#{} {}]", post.seq, post.author);
        println!("{}", post.body);
        println!();
    }

    match &item.analysis {
        Some(a) => {
            println!(
                "--- Analysis ({}, {}{}) ---",
                a.result.category,
                a.result.model,
                if a.stale { ", stale" } else { "" }
            );
            for (i, record) in a.result.records.iter().enumerate() {
                println!("{}. Q: {}", i + 1, record.question);
                if let Some(ref answer) = record.answer {
                    println!("   A: {}", answer);
                }
                if !record.tags.is_empty() {
                    println!("   tags: {}", record.tags.join(", "));
                }
            }
        }
        None => println!("--- Analysis: none ---"),
    }

    Ok(())
}
