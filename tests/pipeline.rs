//! End-to-end pipeline tests over the in-memory store with fake forum and
//! analysis services.

mod common;

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use forum_harness::batch::{BatchCoordinator, BatchOptions, CancelFlag, OutcomeStatus};
use forum_harness::error::{AnalysisError, SyncError};
use forum_harness::models::{
    AnalysisResult, Category, FailureStage, RawContent, SortOrder, WorkFilter,
};
use forum_harness::progress::NoProgress;
use forum_harness::runner::AnalysisRunner;
use forum_harness::store::memory::InMemoryStore;
use forum_harness::store::{AnalysisStore, MetadataStore, RawContentStore, WorkQueue};
use forum_harness::sync::{SyncMode, Syncer};
use forum_harness::work::WorkSelector;

use common::{analysis_json, summary, thread, FakeForum, FakeService, Reply};

const T1: &str = "2024-05-01T10:00:00Z";
const T2: &str = "2024-05-02T08:30:00Z";

fn syncer(forum: &Arc<FakeForum>, store: &Arc<InMemoryStore>) -> Syncer {
    Syncer::new(forum.clone(), store.clone(), Arc::new(NoProgress))
}

fn runner(store: &Arc<InMemoryStore>, service: &Arc<FakeService>) -> AnalysisRunner {
    AnalysisRunner::new(store.clone(), service.clone(), Duration::from_secs(5))
}

fn coordinator(store: &Arc<InMemoryStore>, service: &Arc<FakeService>) -> BatchCoordinator {
    BatchCoordinator::new(store.clone(), runner(store, service), Arc::new(NoProgress))
}

fn options(target: Option<usize>, concurrency: usize) -> BatchOptions {
    BatchOptions {
        target,
        concurrency,
        order: SortOrder::NewestFirst,
        reanalyze: false,
        lease: Duration::from_secs(600),
        retry_call_failures: 0,
    }
}

fn not_cancelled() -> CancelFlag {
    Arc::new(AtomicBool::new(false))
}

async fn seed_raw(store: &InMemoryStore, ids: &[i64]) {
    for id in ids {
        store
            .put_raw_content(&RawContent::new(thread(*id, 2), 1_700_000_000))
            .await
            .unwrap();
    }
}

// ─── Sync ───────────────────────────────────────────────────────────

#[tokio::test]
async fn unchanged_listing_skips_second_fetch() {
    let forum = Arc::new(FakeForum::new());
    let store = Arc::new(InMemoryStore::new());
    forum.set_pages(vec![vec![summary(1, 3, T1)]]);
    forum.set_thread(thread(1, 3));

    let first = syncer(&forum, &store).sync(SyncMode::Incremental, None).await.unwrap();
    assert_eq!(first.fetched, 1);
    assert_eq!(first.skipped, 0);
    assert!(store.get_raw_content(1).await.unwrap().is_some());

    forum.clear_fetches();
    let second = syncer(&forum, &store).sync(SyncMode::Incremental, None).await.unwrap();
    assert_eq!(second.fetched, 0);
    assert_eq!(second.skipped, 1);
    assert!(forum.fetches().is_empty());
}

#[tokio::test]
async fn reply_count_change_refetches_and_overwrites() {
    let forum = Arc::new(FakeForum::new());
    let store = Arc::new(InMemoryStore::new());
    forum.set_pages(vec![vec![summary(1, 3, T1)]]);
    forum.set_thread(thread(1, 3));
    syncer(&forum, &store).sync(SyncMode::Incremental, None).await.unwrap();

    let mut changed = summary(1, 4, T1);
    changed.highest_reply_seq = Some(3);
    forum.set_pages(vec![vec![changed]]);
    forum.set_thread(thread(1, 4));
    forum.clear_fetches();

    let report = syncer(&forum, &store).sync(SyncMode::Incremental, None).await.unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(forum.fetches(), vec![1]);

    let meta = store.get_sync_metadata(&[1]).await.unwrap();
    assert_eq!(meta[&1].reply_count, 4);
    let raw = store.get_raw_content(1).await.unwrap().unwrap();
    assert_eq!(raw.thread.posts.len(), 4);
    assert_eq!(raw.thread.posts[3].body, "post 4 of thread 1");
}

#[tokio::test]
async fn activity_change_alone_refetches() {
    let forum = Arc::new(FakeForum::new());
    let store = Arc::new(InMemoryStore::new());
    forum.set_pages(vec![vec![summary(9, 2, T1)]]);
    forum.set_thread(thread(9, 2));
    syncer(&forum, &store).sync(SyncMode::Incremental, None).await.unwrap();

    forum.set_pages(vec![vec![summary(9, 2, T2)]]);
    forum.clear_fetches();
    let report = syncer(&forum, &store).sync(SyncMode::Full, None).await.unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(forum.fetches(), vec![9]);
}

#[tokio::test]
async fn fetch_failure_is_isolated_and_retried_next_run() {
    let forum = Arc::new(FakeForum::new());
    let store = Arc::new(InMemoryStore::new());
    forum.set_pages(vec![vec![summary(3, 1, T1), summary(2, 1, T1), summary(1, 1, T1)]]);
    for id in 1..=3 {
        forum.set_thread(thread(id, 1));
    }
    forum.break_item(2);

    let report = syncer(&forum, &store).sync(SyncMode::Incremental, None).await.unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failures[0],
        SyncError::FetchFailed { item_id: 2, .. }
    ));
    assert_eq!(store.raw_ids(), vec![1, 3]);
    assert!(store.get_sync_metadata(&[2]).await.unwrap().is_empty());

    // No metadata was written for item 2, so the next run fetches it again.
    forum.clear_fetches();
    syncer(&forum, &store).sync(SyncMode::Incremental, None).await.unwrap();
    assert_eq!(forum.fetches(), vec![2]);
}

#[tokio::test]
async fn mismatched_thread_id_is_a_fetch_failure() {
    let forum = Arc::new(FakeForum::new());
    let store = Arc::new(InMemoryStore::new());
    forum.set_pages(vec![vec![summary(5, 1, T1)]]);
    forum.serve_as(5, thread(6, 1));

    let report = syncer(&forum, &store).sync(SyncMode::Incremental, None).await.unwrap();
    assert_eq!(report.fetched, 0);
    assert!(matches!(
        report.failures[0],
        SyncError::FetchFailed { item_id: 5, .. }
    ));
    assert!(store.raw_ids().is_empty());
}

#[tokio::test]
async fn pagination_follows_has_more_and_page_limit() {
    let forum = Arc::new(FakeForum::new());
    let store = Arc::new(InMemoryStore::new());
    forum.set_pages(vec![
        vec![summary(4, 1, T1), summary(3, 1, T1)],
        vec![summary(2, 1, T1), summary(1, 1, T1)],
    ]);
    for id in 1..=4 {
        forum.set_thread(thread(id, 1));
    }

    let limited = syncer(&forum, &store).sync(SyncMode::Incremental, Some(1)).await.unwrap();
    assert_eq!(limited.pages, 1);
    assert_eq!(store.raw_ids(), vec![3, 4]);

    let full = syncer(&forum, &store).sync(SyncMode::Full, None).await.unwrap();
    assert_eq!(full.pages, 2);
    assert_eq!(full.skipped, 2);
    assert_eq!(full.fetched, 2);
    assert_eq!(store.raw_ids(), vec![1, 2, 3, 4]);

    let runs = store.sync_runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1].mode, "full");
    assert_eq!(runs[1].fetched, 2);
}

#[tokio::test]
async fn listing_failure_stops_pagination_and_keeps_earlier_pages() {
    let forum = Arc::new(FakeForum::new());
    let store = Arc::new(InMemoryStore::new());
    forum.set_pages(vec![vec![summary(2, 1, T1)], vec![summary(1, 1, T1)]]);
    forum.set_thread(thread(1, 1));
    forum.set_thread(thread(2, 1));
    forum.fail_listing_page(1);

    let report = syncer(&forum, &store).sync(SyncMode::Incremental, None).await.unwrap();
    assert_eq!(report.pages, 1);
    assert_eq!(report.fetched, 1);
    assert!(report.listing_error.is_some());
    assert_eq!(store.raw_ids(), vec![2]);
}

// ─── Work selection ─────────────────────────────────────────────────

#[tokio::test]
async fn next_batch_is_an_anti_join() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[1, 2, 3]).await;
    let service = Arc::new(FakeService::new());
    runner(&store, &service).analyze(2).await.unwrap();

    let selector = WorkSelector::new(store.clone());
    let ids: Vec<i64> = selector
        .next_batch(10, true, SortOrder::OldestFirst)
        .await
        .unwrap()
        .iter()
        .map(|r| r.item_id)
        .collect();
    assert_eq!(ids, vec![1, 3]);

    let newest: Vec<i64> = selector
        .next_batch(10, true, SortOrder::NewestFirst)
        .await
        .unwrap()
        .iter()
        .map(|r| r.item_id)
        .collect();
    assert_eq!(newest, vec![3, 1]);

    let all = selector.next_batch(10, false, SortOrder::OldestFirst).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn changed_content_makes_analysis_stale() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[1]).await;
    let service = Arc::new(FakeService::new());
    runner(&store, &service).analyze(1).await.unwrap();

    let selector = WorkSelector::new(store.clone());
    assert!(selector.next_batch(10, true, SortOrder::NewestFirst).await.unwrap().is_empty());

    store
        .put_raw_content(&RawContent::new(thread(1, 5), 1_700_000_500))
        .await
        .unwrap();
    let pending = selector.next_batch(10, true, SortOrder::NewestFirst).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].item_id, 1);
}

#[tokio::test]
async fn claims_hand_each_item_to_one_worker() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[1, 2]).await;
    let selector = WorkSelector::new(store.clone());
    let lease = Duration::from_secs(600);

    let a = selector
        .claim_next(WorkFilter::Unanalyzed, SortOrder::NewestFirst, "a", lease)
        .await
        .unwrap()
        .unwrap();
    let b = selector
        .claim_next(WorkFilter::Unanalyzed, SortOrder::NewestFirst, "b", lease)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a.item_id, 2);
    assert_eq!(b.item_id, 1);

    let none = selector
        .claim_next(WorkFilter::Unanalyzed, SortOrder::NewestFirst, "c", lease)
        .await
        .unwrap();
    assert!(none.is_none());

    // Releasing with the wrong worker id is a no-op.
    selector.release(2, "b").await.unwrap();
    assert!(selector
        .claim_next(WorkFilter::Unanalyzed, SortOrder::NewestFirst, "c", lease)
        .await
        .unwrap()
        .is_none());

    selector.release(2, "a").await.unwrap();
    let c = selector
        .claim_next(WorkFilter::Unanalyzed, SortOrder::NewestFirst, "c", lease)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(c.item_id, 2);
}

#[tokio::test]
async fn expired_claim_can_be_taken_over() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[7]).await;

    assert!(store.try_claim(7, "crashed", 100, 200).await.unwrap());
    assert!(!store.try_claim(7, "other", 150, 750).await.unwrap());
    assert!(store.try_claim(7, "other", 200, 800).await.unwrap());
}

// ─── Analysis runner ────────────────────────────────────────────────

#[tokio::test]
async fn freeform_response_is_a_parse_failure_and_writes_nothing() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[5]).await;
    let service = Arc::new(FakeService::new());
    service.script(5, Reply::Body("I think this is mostly a login bug.".into()));

    let err = runner(&store, &service).analyze(5).await.unwrap_err();
    match &err {
        AnalysisError::ParseFailed { raw_response, .. } => {
            assert_eq!(raw_response, "I think this is mostly a login bug.");
        }
        other => panic!("expected ParseFailed, got {:?}", other),
    }
    assert!(store.get_analysis(5).await.unwrap().is_none());
}

#[tokio::test]
async fn fenced_json_response_is_accepted() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[5]).await;
    let service = Arc::new(FakeService::new());
    let body = format!(
        "Here is the analysis:\n```json\n{}\n```\nLet me know!",
        analysis_json("bug_report", &["why does login loop?"])
    );
    service.script(5, Reply::Body(body));

    let result = runner(&store, &service).analyze(5).await.unwrap();
    assert_eq!(result.category, Category::BugReport);
    assert_eq!(result.model, "fake-model");
    assert_eq!(result.records[0].question, "why does login loop?");
}

#[tokio::test]
async fn second_analysis_replaces_the_first() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[4]).await;
    let service = Arc::new(FakeService::new());
    service.script(4, Reply::Body(analysis_json("question", &["a?", "b?", "c?"])));
    service.script(4, Reply::Body(analysis_json("how_to", &["d?"])));

    let r = runner(&store, &service);
    r.analyze(4).await.unwrap();
    let second = r.analyze(4).await.unwrap();

    let stored = store.get_analysis(4).await.unwrap().unwrap();
    assert_eq!(stored.category, Category::HowTo);
    assert_eq!(stored.records.len(), 1);
    assert_eq!(stored.records[0].question, "d?");
    assert_eq!(stored, second);
}

#[tokio::test]
async fn analysis_requires_raw_content() {
    let store = Arc::new(InMemoryStore::new());
    let service = Arc::new(FakeService::new());

    let err = runner(&store, &service).analyze(42).await.unwrap_err();
    assert!(matches!(err, AnalysisError::MissingRawContent(42)));
    assert!(service.calls().is_empty());

    let orphan = AnalysisResult {
        item_id: 42,
        category: Category::Other,
        records: vec![],
        model: "m".into(),
        source_hash: "h".into(),
        analyzed_at: 0,
    };
    assert!(store.replace_analysis(&orphan).await.is_err());
    assert!(store.analyzed_ids().is_empty());
}

#[tokio::test]
async fn call_timeout_is_a_call_failure() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[8]).await;
    let service = Arc::new(FakeService::new());
    service.script(8, Reply::Hang);

    let r = AnalysisRunner::new(store.clone(), service.clone(), Duration::from_millis(50));
    let err = r.analyze(8).await.unwrap_err();
    assert!(matches!(err, AnalysisError::CallFailed { item_id: 8, .. }));
    assert!(store.get_analysis(8).await.unwrap().is_none());
}

#[tokio::test]
async fn save_failure_keeps_previous_result() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[3]).await;
    let service = Arc::new(FakeService::new());
    let r = runner(&store, &service);
    let first = r.analyze(3).await.unwrap();

    store.set_fail_analysis_writes(true);
    service.script(3, Reply::Body(analysis_json("feedback", &["x?"])));
    let err = r.analyze(3).await.unwrap_err();
    assert_eq!(err.stage(), FailureStage::Save);
    assert_eq!(store.get_analysis(3).await.unwrap().unwrap(), first);
}

// ─── Batch coordination ─────────────────────────────────────────────

#[tokio::test]
async fn one_bad_item_does_not_stop_the_batch() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[1, 2, 3, 4, 5]).await;
    let service = Arc::new(FakeService::new());
    service.script(3, Reply::Body("not json at all".into()));

    let report = coordinator(&store, &service)
        .run_batch(&options(Some(5), 1), not_cancelled())
        .await
        .unwrap();

    assert_eq!(report.attempted, 5);
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed.get(&FailureStage::Parse), Some(&1));
    // Newest first: 5, 4, 3, then 2 and 1 are still attempted.
    assert_eq!(service.calls(), vec![5, 4, 3, 2, 1]);
    assert_eq!(store.analyzed_ids(), vec![1, 2, 4, 5]);

    let failures = store.list_failures(None, 10).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].item_id, 3);
    assert_eq!(failures[0].raw_response.as_deref(), Some("not json at all"));
}

#[tokio::test]
async fn target_limits_attempts() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[1, 2, 3, 4, 5]).await;
    let service = Arc::new(FakeService::new());

    let report = coordinator(&store, &service)
        .run_batch(&options(Some(2), 1), not_cancelled())
        .await
        .unwrap();
    assert_eq!(report.attempted, 2);
    assert!(!report.drained);
    assert_eq!(store.analyzed_ids(), vec![4, 5]);
}

#[tokio::test]
async fn drain_terminates_despite_persistent_failures() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[1, 2, 3]).await;
    let service = Arc::new(FakeService::new());
    service.always(2, Reply::Fail);

    let report = coordinator(&store, &service)
        .run_batch(&options(None, 1), not_cancelled())
        .await
        .unwrap();
    assert!(report.drained);
    assert_eq!(report.attempted, 3);
    assert_eq!(report.failed.get(&FailureStage::Call), Some(&1));
    assert_eq!(service.calls().iter().filter(|id| **id == 2).count(), 1);
}

#[tokio::test]
async fn concurrent_workers_never_share_an_item() {
    let store = Arc::new(InMemoryStore::new());
    let ids: Vec<i64> = (1..=24).collect();
    seed_raw(&store, &ids).await;
    let service = Arc::new(FakeService::with_delay(Duration::from_millis(5)));

    let report = coordinator(&store, &service)
        .run_batch(&options(None, 4), not_cancelled())
        .await
        .unwrap();

    assert!(report.drained);
    assert_eq!(report.attempted, 24);
    assert_eq!(report.succeeded, 24);
    let calls = service.calls();
    let unique: HashSet<i64> = calls.iter().copied().collect();
    assert_eq!(calls.len(), unique.len());
    assert_eq!(store.analyzed_ids(), ids);
}

#[tokio::test]
async fn shared_budget_caps_concurrent_attempts() {
    let store = Arc::new(InMemoryStore::new());
    let ids: Vec<i64> = (1..=20).collect();
    seed_raw(&store, &ids).await;
    let service = Arc::new(FakeService::new());

    let report = coordinator(&store, &service)
        .run_batch(&options(Some(7), 3), not_cancelled())
        .await
        .unwrap();
    assert_eq!(report.attempted, 7);
    assert_eq!(service.calls().len(), 7);
}

#[tokio::test]
async fn call_failures_are_retried_when_configured() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[1]).await;
    let service = Arc::new(FakeService::new());
    service.script(1, Reply::Fail);

    let mut opts = options(None, 1);
    opts.retry_call_failures = 1;
    let report = coordinator(&store, &service)
        .run_batch(&opts, not_cancelled())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(service.calls(), vec![1, 1]);
}

#[tokio::test]
async fn parse_failures_are_not_retried() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[1]).await;
    let service = Arc::new(FakeService::new());
    service.script(1, Reply::Body("nope".into()));

    let mut opts = options(None, 1);
    opts.retry_call_failures = 3;
    let report = coordinator(&store, &service)
        .run_batch(&opts, not_cancelled())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 0);
    assert_eq!(service.calls(), vec![1]);
}

#[tokio::test]
async fn cancelled_batch_attempts_nothing() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[1, 2]).await;
    let service = Arc::new(FakeService::new());

    let cancel: CancelFlag = Arc::new(AtomicBool::new(true));
    let report = coordinator(&store, &service)
        .run_batch(&options(None, 2), cancel)
        .await
        .unwrap();
    assert_eq!(report.attempted, 0);
    assert!(!report.drained);
    assert!(service.calls().is_empty());
}

#[tokio::test]
async fn reanalyze_redoes_each_item_once() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[1, 2]).await;
    for id in [1, 2] {
        let raw = store.get_raw_content(id).await.unwrap().unwrap();
        store
            .replace_analysis(&AnalysisResult {
                item_id: id,
                category: Category::Other,
                records: vec![],
                model: "old-model".into(),
                source_hash: raw.content_hash,
                analyzed_at: 1_600_000_000,
            })
            .await
            .unwrap();
    }
    let service = Arc::new(FakeService::new());

    let plain = coordinator(&store, &service)
        .run_batch(&options(None, 1), not_cancelled())
        .await
        .unwrap();
    assert_eq!(plain.attempted, 0);

    let mut opts = options(None, 2);
    opts.reanalyze = true;
    let report = coordinator(&store, &service)
        .run_batch(&opts, not_cancelled())
        .await
        .unwrap();
    assert!(report.drained);
    assert_eq!(report.succeeded, 2);
    let mut calls = service.calls();
    calls.sort();
    assert_eq!(calls, vec![1, 2]);
    assert_eq!(store.get_analysis(1).await.unwrap().unwrap().model, "fake-model");
}

#[tokio::test]
async fn reanalyze_includes_items_saved_in_the_current_second() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[3]).await;
    let raw = store.get_raw_content(3).await.unwrap().unwrap();
    store
        .replace_analysis(&AnalysisResult {
            item_id: 3,
            category: Category::Other,
            records: vec![],
            model: "old-model".into(),
            source_hash: raw.content_hash,
            analyzed_at: chrono::Utc::now().timestamp(),
        })
        .await
        .unwrap();

    let service = Arc::new(FakeService::new());
    let mut opts = options(None, 1);
    opts.reanalyze = true;
    let report = coordinator(&store, &service)
        .run_batch(&opts, not_cancelled())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
    assert!(report.drained);
    assert_eq!(service.calls(), vec![3]);
    assert_eq!(store.get_analysis(3).await.unwrap().unwrap().model, "fake-model");
}

#[tokio::test]
async fn single_item_run_reports_outcome() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[11]).await;
    let service = Arc::new(FakeService::new());
    service.script(11, Reply::Body(analysis_json("announcement", &["when?", "where?"])));

    let outcome = coordinator(&store, &service)
        .run_item(11, &options(None, 1))
        .await
        .unwrap();
    assert_eq!(
        outcome.status,
        OutcomeStatus::Succeeded {
            category: Category::Announcement,
            records: 2
        }
    );

    // The claim was released.
    assert!(store.try_claim(11, "next", 1, 2).await.unwrap());
}

#[tokio::test]
async fn single_item_run_rejects_unsynced_item_without_writing() {
    let store = Arc::new(InMemoryStore::new());
    let service = Arc::new(FakeService::new());

    let err = coordinator(&store, &service)
        .run_item(424242, &options(None, 1))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));
    assert!(service.calls().is_empty());
    assert!(store.list_failures(None, 10).await.unwrap().is_empty());
    assert!(store.raw_ids().is_empty());

    // No claim was left behind either.
    assert!(store.try_claim(424242, "next", 1, 2).await.unwrap());
}

#[tokio::test]
async fn retries_keep_the_claim_alive() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[7]).await;
    let service = Arc::new(FakeService::with_delay(Duration::from_millis(1500)));
    service.script(7, Reply::Fail);

    let mut opts = options(None, 1);
    opts.lease = Duration::from_secs(2);
    opts.retry_call_failures = 1;

    let batch = {
        let coordinator = coordinator(&store, &service);
        tokio::spawn(async move { coordinator.run_batch(&opts, not_cancelled()).await })
    };

    // Past the original lease, inside the backoff plus second call.
    tokio::time::sleep(Duration::from_millis(3200)).await;
    assert!(!batch.is_finished());
    let now = chrono::Utc::now().timestamp();
    assert!(!store.try_claim(7, "other-process", now, now + 60).await.unwrap());

    let report = batch.await.unwrap().unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(service.calls(), vec![7, 7]);
}

#[tokio::test]
async fn claims_extend_only_for_their_holder() {
    let store = Arc::new(InMemoryStore::new());
    seed_raw(&store, &[8]).await;
    assert!(store.try_claim(8, "holder", 0, 100).await.unwrap());
    assert!(store.extend_claim(8, "holder", 200).await.unwrap());
    assert!(!store.extend_claim(8, "someone-else", 300).await.unwrap());

    // Expired claim taken over: the old holder can no longer extend it.
    assert!(store.try_claim(8, "newcomer", 200, 400).await.unwrap());
    assert!(!store.extend_claim(8, "holder", 500).await.unwrap());
}

// ─── Full pipeline ──────────────────────────────────────────────────

#[tokio::test]
async fn sync_then_analyze_then_resync_marks_stale() {
    let forum = Arc::new(FakeForum::new());
    let store = Arc::new(InMemoryStore::new());
    forum.set_pages(vec![vec![summary(2, 1, T1), summary(1, 1, T1)]]);
    forum.set_thread(thread(1, 1));
    forum.set_thread(thread(2, 1));
    syncer(&forum, &store).sync(SyncMode::Incremental, None).await.unwrap();

    let service = Arc::new(FakeService::new());
    let report = coordinator(&store, &service)
        .run_batch(&options(None, 2), not_cancelled())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 2);

    forum.set_pages(vec![vec![summary(2, 2, T2), summary(1, 1, T1)]]);
    forum.set_thread(thread(2, 2));
    syncer(&forum, &store).sync(SyncMode::Incremental, None).await.unwrap();

    let pending = WorkSelector::new(store.clone())
        .next_batch(10, true, SortOrder::NewestFirst)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].item_id, 2);

    // Every analyzed item still has raw content.
    for id in store.analyzed_ids() {
        assert!(store.get_raw_content(id).await.unwrap().is_some());
    }
}
