//! Incremental sync from the remote forum into the local stores.
//!
//! Walks the listing page by page. For each page the stored
//! [`SyncMetadata`] of every listed item is loaded in one batch read and
//! compared with the listing's change signals; only new or changed items
//! have their full thread fetched. A successful fetch writes raw content
//! and metadata together via [`Store::record_fetch`], so an item whose
//! fetch failed keeps its old metadata and is retried on the next run.
//!
//! ```text
//! listing page ─▶ batch metadata read ─▶ detect_change ─┬─▶ skip
//!                                                       └─▶ fetch thread ─▶ record_fetch
//! ```
//!
//! Per-item failures become [`SyncError`] entries in the report. A listing
//! failure stops pagination and is reported as `listing_error`; items
//! stored before it are kept.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use forum_harness_core::change::detect_change;
use forum_harness_core::models::{RawContent, SyncMetadata, SyncRunRecord};
use forum_harness_core::store::Store;

use crate::config::Config;
use crate::error::SyncError;
use crate::forum::{ForumApi, HttpForumApi};
use crate::progress::{ProgressEvent, ProgressMode, ProgressReporter};
use crate::{db, sqlite_store::SqliteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Walk every page of the listing.
    Full,
    /// Walk the listing until `page_limit` or the end. Same code path as
    /// `Full`; change detection keeps both cheap.
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        }
    }
}

/// Outcome of one sync run.
#[derive(Debug, Default)]
pub struct SyncRunReport {
    pub pages: u64,
    pub skipped: u64,
    pub fetched: u64,
    pub failures: Vec<SyncError>,
    /// Set when a listing page could not be read.
    pub listing_error: Option<String>,
}

impl SyncRunReport {
    pub fn failed(&self) -> u64 {
        self.failures.len() as u64
    }
}

pub struct Syncer {
    api: Arc<dyn ForumApi>,
    store: Arc<dyn Store>,
    progress: Arc<dyn ProgressReporter>,
}

impl Syncer {
    pub fn new(
        api: Arc<dyn ForumApi>,
        store: Arc<dyn Store>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            api,
            store,
            progress,
        }
    }

    /// Run one sync pass.
    ///
    /// Only datastore failures outside the per-item loop (the batch
    /// metadata read, persisting the run summary) return `Err`.
    pub async fn sync(&self, mode: SyncMode, page_limit: Option<u32>) -> Result<SyncRunReport> {
        let started_at = Utc::now().timestamp();
        let mut report = SyncRunReport::default();
        let mut page: u32 = 0;

        info!(mode = mode.as_str(), ?page_limit, "sync started");

        loop {
            if page_limit.is_some_and(|limit| page >= limit) {
                break;
            }

            let listing = match self.api.list_page(page).await {
                Ok(l) => l,
                Err(e) => {
                    warn!(page, error = %e, "listing page failed, stopping pagination");
                    report.listing_error = Some(format!("page {}: {:#}", page, e));
                    break;
                }
            };

            if listing.items.is_empty() {
                break;
            }
            report.pages += 1;

            let ids: Vec<i64> = listing.items.iter().map(|s| s.item_id).collect();
            let stored = self.store.get_sync_metadata(&ids).await?;

            let (mut page_fetched, mut page_skipped) = (0u64, 0u64);
            for summary in &listing.items {
                let reason = match detect_change(summary, stored.get(&summary.item_id)) {
                    Some(r) => r,
                    None => {
                        page_skipped += 1;
                        continue;
                    }
                };
                debug!(item_id = summary.item_id, reason = reason.as_str(), "item changed");

                let thread = match self.api.fetch_thread(summary.item_id).await {
                    Ok(t) if t.item_id == summary.item_id => t,
                    Ok(t) => {
                        report.failures.push(SyncError::FetchFailed {
                            item_id: summary.item_id,
                            message: format!("response carried item {}", t.item_id),
                        });
                        continue;
                    }
                    Err(e) => {
                        warn!(item_id = summary.item_id, error = %e, "fetch failed");
                        report.failures.push(SyncError::FetchFailed {
                            item_id: summary.item_id,
                            message: format!("{:#}", e),
                        });
                        continue;
                    }
                };

                let now = Utc::now().timestamp();
                let raw = RawContent::new(thread, now);
                let meta = SyncMetadata::from_summary(summary, now);
                if let Err(e) = self.store.record_fetch(&raw, &meta).await {
                    warn!(item_id = summary.item_id, error = %e, "store failed");
                    report.failures.push(SyncError::StoreFailed {
                        item_id: summary.item_id,
                        message: format!("{:#}", e),
                    });
                    continue;
                }
                page_fetched += 1;
            }

            report.fetched += page_fetched;
            report.skipped += page_skipped;
            self.progress.report(ProgressEvent::SyncPage {
                page,
                items: listing.items.len() as u64,
                fetched: page_fetched,
                skipped: page_skipped,
            });

            if !listing.has_more {
                break;
            }
            page += 1;
        }

        let run = SyncRunRecord {
            mode: mode.as_str().to_string(),
            pages: report.pages,
            fetched: report.fetched,
            skipped: report.skipped,
            failed: report.failed(),
            started_at,
            finished_at: Utc::now().timestamp(),
        };
        self.store.record_sync_run(&run).await?;

        info!(
            pages = report.pages,
            fetched = report.fetched,
            skipped = report.skipped,
            failed = report.failed(),
            "sync finished"
        );
        Ok(report)
    }
}

/// `fh sync`: run one pass against the configured forum and print a summary.
pub async fn run_sync(
    config: &Config,
    full: bool,
    pages: Option<u32>,
    progress: ProgressMode,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let api = HttpForumApi::new(&config.forum)?;
    let syncer = Syncer::new(
        Arc::new(api),
        Arc::new(SqliteStore::new(pool.clone())),
        progress.reporter(),
    );

    let mode = if full { SyncMode::Full } else { SyncMode::Incremental };
    let report = syncer.sync(mode, pages).await?;

    println!("sync {} ({})", config.forum.base_url, mode.as_str());
    println!("  pages: {}", report.pages);
    println!("  fetched: {} items", report.fetched);
    println!("  unchanged: {} items", report.skipped);
    println!("  failed: {} items", report.failed());
    for failure in &report.failures {
        eprintln!("  - [{}] {}", failure.stage(), failure);
    }
    if let Some(err) = &report.listing_error {
        println!("  listing error: {}", err);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}
