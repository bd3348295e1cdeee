//! SQLite-backed [`Store`] implementation.
//!
//! Maps each store operation onto the schema created by
//! [`migrate::apply`](crate::migrate::apply). Multi-row writes
//! ([`Store::record_fetch`], [`AnalysisStore::replace_analysis`]) run in a
//! single transaction.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use forum_harness_core::models::{
    AnalysisFailure, AnalysisRecord, AnalysisResult, Category, FailureStage, ItemRef, RawContent,
    SortOrder, SyncMetadata, SyncRunRecord, Thread, WorkFilter,
};
use forum_harness_core::store::{AnalysisStore, MetadataStore, RawContentStore, Store, WorkQueue};

/// SQLite implementation of the [`Store`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn metadata_from_row(row: &SqliteRow) -> SyncMetadata {
    SyncMetadata {
        item_id: row.get("item_id"),
        reply_count: row.get("reply_count"),
        last_activity_at: row.get("last_activity_at"),
        highest_reply_seq: row.get("highest_reply_seq"),
        synced_at: row.get("synced_at"),
    }
}

fn item_ref_from_row(row: &SqliteRow) -> ItemRef {
    ItemRef {
        item_id: row.get("item_id"),
        title: row.get("title"),
        fetched_at: row.get("fetched_at"),
    }
}

fn failure_from_row(row: &SqliteRow) -> Result<AnalysisFailure> {
    let stage: String = row.get("stage");
    Ok(AnalysisFailure {
        item_id: row.get("item_id"),
        stage: FailureStage::parse(&stage)
            .ok_or_else(|| anyhow!("unknown failure stage in database: {}", stage))?,
        message: row.get("message"),
        raw_response: row.get("raw_response"),
        failed_at: row.get("failed_at"),
    })
}

async fn upsert_raw_content<'e, E>(executor: E, raw: &RawContent) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let thread_json = serde_json::to_string(&raw.thread)?;
    sqlx::query(
        r#"
        INSERT INTO raw_content (item_id, title, thread_json, content_hash, fetched_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(item_id) DO UPDATE SET
            title = excluded.title,
            thread_json = excluded.thread_json,
            content_hash = excluded.content_hash,
            fetched_at = excluded.fetched_at
        "#,
    )
    .bind(raw.item_id)
    .bind(&raw.thread.title)
    .bind(thread_json)
    .bind(&raw.content_hash)
    .bind(raw.fetched_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn upsert_sync_metadata<'e, E>(executor: E, meta: &SyncMetadata) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO sync_metadata (item_id, reply_count, last_activity_at, highest_reply_seq, synced_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(item_id) DO UPDATE SET
            reply_count = excluded.reply_count,
            last_activity_at = excluded.last_activity_at,
            highest_reply_seq = excluded.highest_reply_seq,
            synced_at = excluded.synced_at
        "#,
    )
    .bind(meta.item_id)
    .bind(meta.reply_count)
    .bind(&meta.last_activity_at)
    .bind(meta.highest_reply_seq)
    .bind(meta.synced_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn get_sync_metadata(&self, item_ids: &[i64]) -> Result<HashMap<i64, SyncMetadata>> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT item_id, reply_count, last_activity_at, highest_reply_seq, synced_at \
             FROM sync_metadata WHERE item_id IN (",
        );
        let mut separated = qb.separated(", ");
        for id in item_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let meta = metadata_from_row(row);
                (meta.item_id, meta)
            })
            .collect())
    }

    async fn put_sync_metadata(&self, meta: &SyncMetadata) -> Result<()> {
        upsert_sync_metadata(&self.pool, meta).await
    }

    async fn record_sync_run(&self, run: &SyncRunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (mode, pages, fetched, skipped, failed, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.mode)
        .bind(run.pages as i64)
        .bind(run.fetched as i64)
        .bind(run.skipped as i64)
        .bind(run.failed as i64)
        .bind(run.started_at)
        .bind(run.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RawContentStore for SqliteStore {
    async fn get_raw_content(&self, item_id: i64) -> Result<Option<RawContent>> {
        let row = sqlx::query(
            "SELECT item_id, thread_json, content_hash, fetched_at FROM raw_content WHERE item_id = ?",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let thread_json: String = row.get("thread_json");
        let thread: Thread = serde_json::from_str(&thread_json)
            .with_context(|| format!("corrupt thread_json for item {}", item_id))?;

        Ok(Some(RawContent {
            item_id: row.get("item_id"),
            thread,
            content_hash: row.get("content_hash"),
            fetched_at: row.get("fetched_at"),
        }))
    }

    async fn put_raw_content(&self, raw: &RawContent) -> Result<()> {
        upsert_raw_content(&self.pool, raw).await
    }
}

#[async_trait]
impl AnalysisStore for SqliteStore {
    async fn get_analysis(&self, item_id: i64) -> Result<Option<AnalysisResult>> {
        let header = sqlx::query(
            "SELECT item_id, category, model, source_hash, analyzed_at FROM analysis_results WHERE item_id = ?",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        let header = match header {
            Some(h) => h,
            None => return Ok(None),
        };

        let record_rows = sqlx::query(
            "SELECT question, answer, tags_json FROM analysis_records WHERE item_id = ? ORDER BY position ASC",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        let records = record_rows
            .iter()
            .map(|row| {
                let tags_json: String = row.get("tags_json");
                AnalysisRecord {
                    question: row.get("question"),
                    answer: row.get("answer"),
                    tags: serde_json::from_str(&tags_json).unwrap_or_default(),
                }
            })
            .collect();

        let category: String = header.get("category");
        Ok(Some(AnalysisResult {
            item_id: header.get("item_id"),
            category: Category::parse(&category)
                .ok_or_else(|| anyhow!("unknown category in database: {}", category))?,
            records,
            model: header.get("model"),
            source_hash: header.get("source_hash"),
            analyzed_at: header.get("analyzed_at"),
        }))
    }

    async fn replace_analysis(&self, result: &AnalysisResult) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction takes the write lock up front; a
        // read-then-write upgrade can fail under WAL without waiting.
        sqlx::query("DELETE FROM analysis_records WHERE item_id = ?")
            .bind(result.item_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM analysis_results WHERE item_id = ?")
            .bind(result.item_id)
            .execute(&mut *tx)
            .await?;

        let has_raw: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM raw_content WHERE item_id = ?")
                .bind(result.item_id)
                .fetch_one(&mut *tx)
                .await?;
        if !has_raw {
            // Dropping the transaction rolls back the deletes.
            return Err(anyhow!("no raw content for item {}", result.item_id));
        }

        sqlx::query(
            r#"
            INSERT INTO analysis_results (item_id, category, model, source_hash, analyzed_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(result.item_id)
        .bind(result.category.as_str())
        .bind(&result.model)
        .bind(&result.source_hash)
        .bind(result.analyzed_at)
        .execute(&mut *tx)
        .await?;

        for (position, record) in result.records.iter().enumerate() {
            sqlx::query(
                "INSERT INTO analysis_records (item_id, position, question, answer, tags_json) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(result.item_id)
            .bind(position as i64)
            .bind(&record.question)
            .bind(&record.answer)
            .bind(serde_json::to_string(&record.tags)?)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM analysis_failures WHERE item_id = ?")
            .bind(result.item_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_failure(&self, failure: &AnalysisFailure) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_failures (item_id, stage, message, raw_response, failed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                stage = excluded.stage,
                message = excluded.message,
                raw_response = excluded.raw_response,
                failed_at = excluded.failed_at
            "#,
        )
        .bind(failure.item_id)
        .bind(failure.stage.as_str())
        .bind(&failure.message)
        .bind(&failure.raw_response)
        .bind(failure.failed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_failures(
        &self,
        stage: Option<FailureStage>,
        limit: usize,
    ) -> Result<Vec<AnalysisFailure>> {
        let rows = sqlx::query(
            r#"
            SELECT item_id, stage, message, raw_response, failed_at
            FROM analysis_failures
            WHERE (? IS NULL OR stage = ?)
            ORDER BY failed_at DESC, item_id DESC
            LIMIT ?
            "#,
        )
        .bind(stage.map(|s| s.as_str()))
        .bind(stage.map(|s| s.as_str()))
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(failure_from_row).collect()
    }
}

#[async_trait]
impl WorkQueue for SqliteStore {
    async fn select_work(
        &self,
        filter: WorkFilter,
        order: SortOrder,
        limit: usize,
        unclaimed_at: Option<i64>,
    ) -> Result<Vec<ItemRef>> {
        // Anti-join against analysis_results; never offset-paged, since the
        // candidate set shrinks as workers complete items.
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT r.item_id, r.title, r.fetched_at
            FROM raw_content r
            LEFT JOIN analysis_results a ON a.item_id = r.item_id
            WHERE 1 = 1
            "#,
        );

        match filter {
            WorkFilter::Unanalyzed => {
                qb.push(" AND (a.item_id IS NULL OR a.source_hash != r.content_hash)");
            }
            WorkFilter::AnalyzedBefore(ts) => {
                qb.push(" AND (a.item_id IS NULL OR a.analyzed_at < ");
                qb.push_bind(ts);
                qb.push(")");
            }
            WorkFilter::All => {}
        }

        if let Some(now) = unclaimed_at {
            qb.push(
                " AND NOT EXISTS (SELECT 1 FROM work_claims w WHERE w.item_id = r.item_id AND w.expires_at > ",
            );
            qb.push_bind(now);
            qb.push(")");
        }

        qb.push(match order {
            SortOrder::NewestFirst => " ORDER BY r.item_id DESC",
            SortOrder::OldestFirst => " ORDER BY r.item_id ASC",
        });
        qb.push(" LIMIT ");
        qb.push_bind(limit.min(i64::MAX as usize) as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(item_ref_from_row).collect())
    }

    async fn try_claim(
        &self,
        item_id: i64,
        worker_id: &str,
        now: i64,
        expires_at: i64,
    ) -> Result<bool> {
        // Conditional upsert: a live claim blocks the update, an expired one
        // is taken over. SQLite serializes writers, so this is atomic.
        let result = sqlx::query(
            r#"
            INSERT INTO work_claims (item_id, worker_id, claimed_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                worker_id = excluded.worker_id,
                claimed_at = excluded.claimed_at,
                expires_at = excluded.expires_at
            WHERE work_claims.expires_at <= excluded.claimed_at
            "#,
        )
        .bind(item_id)
        .bind(worker_id)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn extend_claim(&self, item_id: i64, worker_id: &str, expires_at: i64) -> Result<bool> {
        // A takeover rewrites worker_id, so matching it is enough.
        let result =
            sqlx::query("UPDATE work_claims SET expires_at = ? WHERE item_id = ? AND worker_id = ?")
                .bind(expires_at)
                .bind(item_id)
                .bind(worker_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_claim(&self, item_id: i64, worker_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM work_claims WHERE item_id = ? AND worker_id = ?")
            .bind(item_id)
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn record_fetch(&self, raw: &RawContent, meta: &SyncMetadata) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_raw_content(&mut *tx, raw).await?;
        upsert_sync_metadata(&mut *tx, meta).await?;
        tx.commit().await?;
        Ok(())
    }
}
