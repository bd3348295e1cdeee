//! In-memory [`Store`] implementation for testing and embedding.
//!
//! Uses `BTreeMap`s behind `std::sync::RwLock`. Anti-join selection walks
//! the raw-content map in key order, which matches the `item_id` ordering
//! of the SQLite store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{
    AnalysisFailure, AnalysisResult, FailureStage, ItemRef, RawContent, SortOrder, SyncMetadata,
    SyncRunRecord, WorkFilter,
};

use super::{AnalysisStore, MetadataStore, RawContentStore, Store, WorkQueue};

struct Claim {
    worker_id: String,
    expires_at: i64,
}

/// In-memory store for tests and short-lived tools.
#[derive(Default)]
pub struct InMemoryStore {
    metadata: RwLock<BTreeMap<i64, SyncMetadata>>,
    raw: RwLock<BTreeMap<i64, RawContent>>,
    analyses: RwLock<BTreeMap<i64, AnalysisResult>>,
    failures: RwLock<BTreeMap<i64, AnalysisFailure>>,
    claims: RwLock<HashMap<i64, Claim>>,
    runs: RwLock<Vec<SyncRunRecord>>,
    fail_analysis_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent [`AnalysisStore::replace_analysis`] call fail.
    pub fn set_fail_analysis_writes(&self, fail: bool) {
        self.fail_analysis_writes.store(fail, Ordering::SeqCst);
    }

    /// Sync runs recorded so far, oldest first.
    pub fn sync_runs(&self) -> Vec<SyncRunRecord> {
        self.runs.read().map(|r| r.clone()).unwrap_or_default()
    }

    /// Ids with raw content, ascending.
    pub fn raw_ids(&self) -> Vec<i64> {
        self.raw
            .read()
            .map(|r| r.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Ids with an analysis result, ascending.
    pub fn analyzed_ids(&self) -> Vec<i64> {
        self.analyses
            .read()
            .map(|a| a.keys().copied().collect())
            .unwrap_or_default()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn matches_filter(raw: &RawContent, analysis: Option<&AnalysisResult>, filter: WorkFilter) -> bool {
    match (filter, analysis) {
        (WorkFilter::All, _) => true,
        (_, None) => true,
        (WorkFilter::Unanalyzed, Some(a)) => a.source_hash != raw.content_hash,
        (WorkFilter::AnalyzedBefore(ts), Some(a)) => a.analyzed_at < ts,
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn get_sync_metadata(&self, item_ids: &[i64]) -> Result<HashMap<i64, SyncMetadata>> {
        let metadata = read(&self.metadata)?;
        Ok(item_ids
            .iter()
            .filter_map(|id| metadata.get(id).map(|m| (*id, m.clone())))
            .collect())
    }

    async fn put_sync_metadata(&self, meta: &SyncMetadata) -> Result<()> {
        write(&self.metadata)?.insert(meta.item_id, meta.clone());
        Ok(())
    }

    async fn record_sync_run(&self, run: &SyncRunRecord) -> Result<()> {
        write(&self.runs)?.push(run.clone());
        Ok(())
    }
}

#[async_trait]
impl RawContentStore for InMemoryStore {
    async fn get_raw_content(&self, item_id: i64) -> Result<Option<RawContent>> {
        Ok(read(&self.raw)?.get(&item_id).cloned())
    }

    async fn put_raw_content(&self, raw: &RawContent) -> Result<()> {
        write(&self.raw)?.insert(raw.item_id, raw.clone());
        Ok(())
    }
}

#[async_trait]
impl AnalysisStore for InMemoryStore {
    async fn get_analysis(&self, item_id: i64) -> Result<Option<AnalysisResult>> {
        Ok(read(&self.analyses)?.get(&item_id).cloned())
    }

    async fn replace_analysis(&self, result: &AnalysisResult) -> Result<()> {
        if self.fail_analysis_writes.load(Ordering::SeqCst) {
            bail!("analysis writes disabled for item {}", result.item_id);
        }
        if !read(&self.raw)?.contains_key(&result.item_id) {
            bail!("no raw content for item {}", result.item_id);
        }
        let mut analyses = write(&self.analyses)?;
        analyses.remove(&result.item_id);
        analyses.insert(result.item_id, result.clone());
        write(&self.failures)?.remove(&result.item_id);
        Ok(())
    }

    async fn record_failure(&self, failure: &AnalysisFailure) -> Result<()> {
        write(&self.failures)?.insert(failure.item_id, failure.clone());
        Ok(())
    }

    async fn list_failures(
        &self,
        stage: Option<FailureStage>,
        limit: usize,
    ) -> Result<Vec<AnalysisFailure>> {
        let failures = read(&self.failures)?;
        let mut out: Vec<AnalysisFailure> = failures
            .values()
            .filter(|f| stage.map_or(true, |s| f.stage == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.failed_at.cmp(&a.failed_at).then(b.item_id.cmp(&a.item_id)));
        out.truncate(limit);
        Ok(out)
    }
}

#[async_trait]
impl WorkQueue for InMemoryStore {
    async fn select_work(
        &self,
        filter: WorkFilter,
        order: SortOrder,
        limit: usize,
        unclaimed_at: Option<i64>,
    ) -> Result<Vec<ItemRef>> {
        let raw = read(&self.raw)?;
        let analyses = read(&self.analyses)?;
        let claims = read(&self.claims)?;

        let candidates = raw.values().filter(|r| {
            let claimed = unclaimed_at.map_or(false, |now| {
                claims
                    .get(&r.item_id)
                    .map_or(false, |c| c.expires_at > now)
            });
            !claimed && matches_filter(r, analyses.get(&r.item_id), filter)
        });

        let to_ref = |r: &RawContent| ItemRef {
            item_id: r.item_id,
            title: r.thread.title.clone(),
            fetched_at: r.fetched_at,
        };

        Ok(match order {
            SortOrder::NewestFirst => candidates.rev().take(limit).map(to_ref).collect(),
            SortOrder::OldestFirst => candidates.take(limit).map(to_ref).collect(),
        })
    }

    async fn try_claim(
        &self,
        item_id: i64,
        worker_id: &str,
        now: i64,
        expires_at: i64,
    ) -> Result<bool> {
        let mut claims = write(&self.claims)?;
        if let Some(existing) = claims.get(&item_id) {
            if existing.expires_at > now {
                return Ok(false);
            }
        }
        claims.insert(
            item_id,
            Claim {
                worker_id: worker_id.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn extend_claim(&self, item_id: i64, worker_id: &str, expires_at: i64) -> Result<bool> {
        let mut claims = write(&self.claims)?;
        match claims.get_mut(&item_id) {
            Some(claim) if claim.worker_id == worker_id => {
                claim.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_claim(&self, item_id: i64, worker_id: &str) -> Result<()> {
        let mut claims = write(&self.claims)?;
        if claims.get(&item_id).map_or(false, |c| c.worker_id == worker_id) {
            claims.remove(&item_id);
        }
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn record_fetch(&self, raw: &RawContent, meta: &SyncMetadata) -> Result<()> {
        // Hold both write locks so readers never observe one without the other.
        let mut raw_map = write(&self.raw)?;
        let mut metadata = write(&self.metadata)?;
        raw_map.insert(raw.item_id, raw.clone());
        metadata.insert(meta.item_id, meta.clone());
        Ok(())
    }
}
