//! Storage abstraction for Forum Harness.
//!
//! The pipeline writes to three logical stores that share `item_id` as
//! their join key:
//!
//! | Trait | Holds | Written by |
//! |-------|-------|------------|
//! | [`MetadataStore`] | last-known change signals per item | syncer |
//! | [`RawContentStore`] | full thread body as last fetched | syncer |
//! | [`AnalysisStore`] | category + extracted records | analysis runner |
//!
//! [`WorkQueue`] adds the anti-join selection and the claim/lease step
//! used to hand work to concurrent analysis workers. [`Store`] ties them
//! together and owns the one write that spans two stores
//! ([`Store::record_fetch`]).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    AnalysisFailure, AnalysisResult, FailureStage, ItemRef, RawContent, SortOrder, SyncMetadata,
    SyncRunRecord, WorkFilter,
};

/// Per-item sync metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Batch-load metadata for the given ids. Missing ids are absent from the map.
    async fn get_sync_metadata(&self, item_ids: &[i64]) -> Result<HashMap<i64, SyncMetadata>>;

    /// Overwrite the metadata row for `meta.item_id`.
    async fn put_sync_metadata(&self, meta: &SyncMetadata) -> Result<()>;

    /// Append a summary of a finished sync run.
    async fn record_sync_run(&self, run: &SyncRunRecord) -> Result<()>;
}

/// Raw thread content.
#[async_trait]
pub trait RawContentStore: Send + Sync {
    async fn get_raw_content(&self, item_id: i64) -> Result<Option<RawContent>>;

    /// Overwrite the raw content row for `raw.item_id`.
    async fn put_raw_content(&self, raw: &RawContent) -> Result<()>;
}

/// Structured analysis results.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn get_analysis(&self, item_id: i64) -> Result<Option<AnalysisResult>>;

    /// Delete every existing row for the item, then insert `result`.
    ///
    /// Must fail without writing when the item has no raw content, and must
    /// leave the previous result intact if the insert fails. A successful
    /// replace also clears the item's recorded failure.
    async fn replace_analysis(&self, result: &AnalysisResult) -> Result<()>;

    /// Upsert the latest failure for an item.
    async fn record_failure(&self, failure: &AnalysisFailure) -> Result<()>;

    async fn list_failures(
        &self,
        stage: Option<FailureStage>,
        limit: usize,
    ) -> Result<Vec<AnalysisFailure>>;
}

/// Work selection and claims.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Items matching `filter`, ordered by `item_id`.
    ///
    /// When `unclaimed_at` is set, items holding a claim that is still
    /// live at that unix time are excluded.
    async fn select_work(
        &self,
        filter: WorkFilter,
        order: SortOrder,
        limit: usize,
        unclaimed_at: Option<i64>,
    ) -> Result<Vec<ItemRef>>;

    /// Atomically claim an item for `worker_id` until `expires_at`.
    ///
    /// Succeeds only when the item has no claim or its claim expired at or
    /// before `now`. Returns whether the claim was taken.
    async fn try_claim(&self, item_id: i64, worker_id: &str, now: i64, expires_at: i64)
        -> Result<bool>;

    /// Push back the expiry of a claim `worker_id` still holds.
    ///
    /// Returns `false` when another worker has taken the item over.
    async fn extend_claim(&self, item_id: i64, worker_id: &str, expires_at: i64) -> Result<bool>;

    /// Drop a claim held by `worker_id`. No-op when the claim moved on.
    async fn release_claim(&self, item_id: i64, worker_id: &str) -> Result<()>;
}

/// The full store used by the sync and analysis pipelines.
#[async_trait]
pub trait Store: MetadataStore + RawContentStore + AnalysisStore + WorkQueue {
    /// Persist a successful fetch: raw content and its metadata together.
    ///
    /// The default writes raw content first, then metadata, so a failure
    /// in between leaves stale metadata (causing a redundant refetch)
    /// rather than metadata describing content that was never stored.
    /// Transactional backends override this with a single transaction.
    async fn record_fetch(&self, raw: &RawContent, meta: &SyncMetadata) -> Result<()> {
        self.put_raw_content(raw).await?;
        self.put_sync_metadata(meta).await
    }
}
