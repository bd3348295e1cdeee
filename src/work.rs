//! Selecting analysis work.
//!
//! Work is computed as an anti-join: raw content with no analysis, or with
//! an analysis derived from different content than is stored now. The
//! candidate set shrinks as workers finish items, so callers always ask
//! for the *next* items rather than paging with an offset.
//!
//! Concurrent workers go through [`WorkSelector::claim_next`], which pairs
//! selection with an atomic lease so that no item is analyzed by two
//! workers at once. A crashed worker's lease expires and the item becomes
//! selectable again.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, trace};

use forum_harness_core::models::{ItemRef, SortOrder, WorkFilter};
use forum_harness_core::store::Store;

use crate::config::Config;
use crate::{db, sqlite_store::SqliteStore};

/// Candidates fetched per claim attempt.
const CLAIM_CANDIDATES: usize = 16;

#[derive(Clone)]
pub struct WorkSelector {
    store: Arc<dyn Store>,
}

impl WorkSelector {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Up to `limit` items needing analysis, ignoring claims.
    ///
    /// With `exclude_analyzed = false` every raw item is returned.
    pub async fn next_batch(
        &self,
        limit: usize,
        exclude_analyzed: bool,
        order: SortOrder,
    ) -> Result<Vec<ItemRef>> {
        let filter = if exclude_analyzed {
            WorkFilter::Unanalyzed
        } else {
            WorkFilter::All
        };
        self.store.select_work(filter, order, limit, None).await
    }

    /// Claim the next unclaimed item matching `filter` for `worker_id`.
    ///
    /// Returns `None` once no unclaimed candidate remains. A candidate lost
    /// to another worker between selection and claim is skipped; when the
    /// whole selection is lost, a fresh one is taken.
    pub async fn claim_next(
        &self,
        filter: WorkFilter,
        order: SortOrder,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<ItemRef>> {
        self.claim_next_excluding(filter, order, worker_id, lease, &HashSet::new())
            .await
    }

    /// Like [`claim_next`](Self::claim_next), never handing out an id in
    /// `exclude`. Batches pass the items they already attempted so a
    /// failing item is tried once per run.
    pub async fn claim_next_excluding(
        &self,
        filter: WorkFilter,
        order: SortOrder,
        worker_id: &str,
        lease: Duration,
        exclude: &HashSet<i64>,
    ) -> Result<Option<ItemRef>> {
        loop {
            let now = Utc::now().timestamp();
            let window = CLAIM_CANDIDATES + exclude.len();
            let candidates: Vec<ItemRef> = self
                .store
                .select_work(filter, order, window, Some(now))
                .await?
                .into_iter()
                .filter(|c| !exclude.contains(&c.item_id))
                .collect();
            if candidates.is_empty() {
                return Ok(None);
            }

            let expires_at = now + lease.as_secs() as i64;
            for candidate in candidates {
                if self
                    .store
                    .try_claim(candidate.item_id, worker_id, now, expires_at)
                    .await?
                {
                    debug!(item_id = candidate.item_id, worker_id, "claimed");
                    return Ok(Some(candidate));
                }
                trace!(item_id = candidate.item_id, worker_id, "lost claim race");
            }
        }
    }

    /// Keep a held claim live for `hold` plus a fresh lease from now.
    pub async fn renew(
        &self,
        item_id: i64,
        worker_id: &str,
        hold: Duration,
        lease: Duration,
    ) -> Result<bool> {
        let expires_at = Utc::now().timestamp() + (hold + lease).as_secs() as i64;
        self.store.extend_claim(item_id, worker_id, expires_at).await
    }

    pub async fn release(&self, item_id: i64, worker_id: &str) -> Result<()> {
        self.store.release_claim(item_id, worker_id).await
    }
}

/// `fh pending`: list items waiting for analysis.
pub async fn run_pending(
    config: &Config,
    limit: usize,
    oldest_first: bool,
    all: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let selector = WorkSelector::new(Arc::new(SqliteStore::new(pool.clone())));
    let order = if oldest_first {
        SortOrder::OldestFirst
    } else {
        config.batch.order
    };

    let items = selector.next_batch(limit, !all, order).await?;
    if items.is_empty() {
        println!("No pending items.");
    } else {
        for item in &items {
            println!("{:>10}  {}", item.item_id, item.title);
        }
        println!("{} item(s)", items.len());
    }

    pool.close().await;
    Ok(())
}
