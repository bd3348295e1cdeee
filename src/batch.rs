//! Batch analysis across one or more workers.
//!
//! Each worker repeats claim → analyze → release until the shared attempt
//! budget is spent, no unclaimed work remains, or cancellation is
//! requested. With `concurrency = 1` the loop runs inline; otherwise each
//! worker is a task in a [`JoinSet`]. Per-item failures are recorded in
//! the report (and, best effort, in the failure table) and never stop the
//! batch. Only datastore failures in the claim step abort it.
//!
//! Every item is attempted at most once per run, so draining terminates
//! even when reanalysis selects items this run has already saved.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use forum_harness_core::models::{
    AnalysisFailure, Category, FailureStage, ItemRef, SortOrder, WorkFilter,
};
use forum_harness_core::store::Store;

use crate::analyzer::create_service;
use crate::config::Config;
use crate::error::AnalysisError;
use crate::progress::{ProgressEvent, ProgressMode, ProgressReporter};
use crate::runner::AnalysisRunner;
use crate::work::WorkSelector;
use crate::{db, sqlite_store::SqliteStore};

/// Set to `true` to stop workers after their current item.
pub type CancelFlag = Arc<AtomicBool>;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Maximum attempts; `None` drains all pending work.
    pub target: Option<usize>,
    pub concurrency: usize,
    pub order: SortOrder,
    /// Redo items that already have a current analysis.
    pub reanalyze: bool,
    pub lease: Duration,
    /// Extra attempts for failed analysis calls.
    pub retry_call_failures: u32,
}

impl BatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target: None,
            concurrency: config.batch.concurrency,
            order: config.batch.order,
            reanalyze: false,
            lease: Duration::from_secs(config.batch.lease_secs),
            retry_call_failures: config.batch.retry_call_failures,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded { category: Category, records: usize },
    Failed { stage: FailureStage, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    pub item_id: i64,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: BTreeMap<FailureStage, u64>,
    pub duration: Duration,
    /// Every worker stopped because no unclaimed work remained.
    pub drained: bool,
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchReport {
    pub fn from_outcomes(mut outcomes: Vec<ItemOutcome>, duration: Duration, drained: bool) -> Self {
        outcomes.sort_by_key(|o| o.item_id);
        let mut failed = BTreeMap::new();
        let mut succeeded = 0;
        for outcome in &outcomes {
            match &outcome.status {
                OutcomeStatus::Succeeded { .. } => succeeded += 1,
                OutcomeStatus::Failed { stage, .. } => *failed.entry(*stage).or_insert(0) += 1,
            }
        }
        Self {
            attempted: outcomes.len() as u64,
            succeeded,
            failed,
            duration,
            drained,
            outcomes,
        }
    }

    pub fn failed_total(&self) -> u64 {
        self.failed.values().sum()
    }

    /// Attempts per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.attempted as f64 / secs
        } else {
            0.0
        }
    }
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerExit {
    Drained,
    Budget,
    Cancelled,
}

#[derive(Clone)]
pub struct BatchCoordinator {
    store: Arc<dyn Store>,
    selector: WorkSelector,
    runner: AnalysisRunner,
    progress: Arc<dyn ProgressReporter>,
}

impl BatchCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        runner: AnalysisRunner,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            selector: WorkSelector::new(store.clone()),
            store,
            runner,
            progress,
        }
    }

    pub async fn run_batch(&self, opts: &BatchOptions, cancel: CancelFlag) -> Result<BatchReport> {
        if opts.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }

        let started = Instant::now();
        // Timestamps are whole seconds; the cutoff includes the current one so
        // items saved just before the run are redone. Items this run saves in
        // that second are kept out by the attempted set.
        let filter = if opts.reanalyze {
            WorkFilter::AnalyzedBefore(Utc::now().timestamp() + 1)
        } else {
            WorkFilter::Unanalyzed
        };
        let shared = Shared {
            budget: Arc::new(AtomicUsize::new(0)),
            done: Arc::new(AtomicU64::new(0)),
            attempted: Arc::new(Mutex::new(HashSet::new())),
        };
        let batch_id = Uuid::new_v4();

        info!(
            limit = ?opts.target,
            concurrency = opts.concurrency,
            reanalyze = opts.reanalyze,
            "batch started"
        );

        let mut outcomes = Vec::new();
        let mut drained = true;

        if opts.concurrency == 1 {
            let worker_id = format!("{}-0", batch_id);
            let (exit, worker_outcomes) = self
                .worker_loop(&worker_id, filter, opts, &shared, &cancel)
                .await?;
            drained = exit == WorkerExit::Drained;
            outcomes = worker_outcomes;
        } else {
            let mut workers = JoinSet::new();
            for index in 0..opts.concurrency {
                let this = self.clone();
                let opts = opts.clone();
                let shared = shared.clone();
                let cancel = cancel.clone();
                let worker_id = format!("{}-{}", batch_id, index);
                workers.spawn(async move {
                    this.worker_loop(&worker_id, filter, &opts, &shared, &cancel)
                        .await
                });
            }

            let mut first_error = None;
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(Ok((exit, worker_outcomes))) => {
                        drained &= exit == WorkerExit::Drained;
                        outcomes.extend(worker_outcomes);
                    }
                    Ok(Err(e)) => {
                        // Stop the others; report the first failure.
                        cancel.store(true, Ordering::SeqCst);
                        first_error.get_or_insert(e);
                    }
                    Err(e) => {
                        cancel.store(true, Ordering::SeqCst);
                        first_error.get_or_insert(e.into());
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        let report = BatchReport::from_outcomes(outcomes, started.elapsed(), drained);
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed_total(),
            drained = report.drained,
            "batch finished"
        );
        Ok(report)
    }

    /// Analyze one specific item, bypassing selection but honoring claims.
    ///
    /// Fails without writing anything when the item was never synced.
    pub async fn run_item(&self, item_id: i64, opts: &BatchOptions) -> Result<ItemOutcome> {
        if self.store.get_raw_content(item_id).await?.is_none() {
            bail!("item {} not found; run `fh sync` first", item_id);
        }

        let worker_id = format!("{}-item", Uuid::new_v4());
        let now = Utc::now().timestamp();
        let expires_at = now + opts.lease.as_secs() as i64;
        if !self
            .store
            .try_claim(item_id, &worker_id, now, expires_at)
            .await?
        {
            bail!("item {} is claimed by another worker", item_id);
        }

        let outcome = self.process(item_id, &worker_id, opts).await;
        if let Err(e) = self.selector.release(item_id, &worker_id).await {
            warn!(item_id, error = %e, "failed to release claim");
        }
        Ok(outcome)
    }

    async fn worker_loop(
        &self,
        worker_id: &str,
        filter: WorkFilter,
        opts: &BatchOptions,
        shared: &Shared,
        cancel: &AtomicBool,
    ) -> Result<(WorkerExit, Vec<ItemOutcome>)> {
        let mut outcomes = Vec::new();

        let exit = loop {
            if cancel.load(Ordering::SeqCst) {
                break WorkerExit::Cancelled;
            }
            if let Some(target) = opts.target {
                if shared.budget.fetch_add(1, Ordering::SeqCst) >= target {
                    break WorkerExit::Budget;
                }
            }

            let exclude = shared.attempted_snapshot();
            let item: ItemRef = match self
                .selector
                .claim_next_excluding(filter, opts.order, worker_id, opts.lease, &exclude)
                .await?
            {
                Some(item) => item,
                None => break WorkerExit::Drained,
            };
            shared.mark_attempted(item.item_id);

            let outcome = self.process(item.item_id, worker_id, opts).await;
            if let Err(e) = self.selector.release(item.item_id, worker_id).await {
                warn!(item_id = item.item_id, error = %e, "failed to release claim");
            }

            let n = shared.done.fetch_add(1, Ordering::SeqCst) + 1;
            self.progress.report(ProgressEvent::Analyzed {
                n,
                total: opts.target.map(|t| t as u64),
                item_id: item.item_id,
                ok: outcome.is_success(),
            });
            outcomes.push(outcome);
        };

        Ok((exit, outcomes))
    }

    /// Run the analysis with call retries and turn the result into an outcome.
    ///
    /// The claim is renewed before each retry so it covers the backoff and
    /// the next call. If another worker has taken the item over, retrying
    /// stops and the last call failure stands.
    async fn process(&self, item_id: i64, worker_id: &str, opts: &BatchOptions) -> ItemOutcome {
        let mut attempt = 0;
        let result = loop {
            match self.runner.analyze(item_id).await {
                Err(e) if e.is_retryable() && attempt < opts.retry_call_failures => {
                    attempt += 1;
                    let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                    match self.selector.renew(item_id, worker_id, delay, opts.lease).await {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!(item_id, "claim lost to another worker, not retrying");
                            break Err(e);
                        }
                        Err(store_err) => {
                            warn!(item_id, error = %store_err, "failed to renew claim, not retrying");
                            break Err(e);
                        }
                    }
                    warn!(item_id, attempt, error = %e, "analysis call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => break other,
            }
        };

        match result {
            Ok(analysis) => ItemOutcome {
                item_id,
                status: OutcomeStatus::Succeeded {
                    category: analysis.category,
                    records: analysis.records.len(),
                },
            },
            Err(e) => {
                self.record_failure(&e).await;
                ItemOutcome {
                    item_id,
                    status: OutcomeStatus::Failed {
                        stage: e.stage(),
                        message: e.to_string(),
                    },
                }
            }
        }
    }

    async fn record_failure(&self, e: &AnalysisError) {
        // Never synced: no store may hold a row for it.
        if matches!(e, AnalysisError::MissingRawContent(_)) {
            error!(item_id = e.item_id(), "work item has no raw content");
            return;
        }
        warn!(item_id = e.item_id(), stage = %e.stage(), error = %e, "analysis failed");

        let failure = AnalysisFailure {
            item_id: e.item_id(),
            stage: e.stage(),
            message: e.to_string(),
            raw_response: e.raw_response().map(str::to_string),
            failed_at: Utc::now().timestamp(),
        };
        if let Err(store_err) = self.store.record_failure(&failure).await {
            warn!(item_id = e.item_id(), error = %store_err, "failed to record failure");
        }
    }
}

#[derive(Clone)]
struct Shared {
    /// Attempt slots handed out so far.
    budget: Arc<AtomicUsize>,
    /// Items finished, for progress.
    done: Arc<AtomicU64>,
    /// Items already handed out in this run.
    attempted: Arc<Mutex<HashSet<i64>>>,
}

impl Shared {
    fn attempted_snapshot(&self) -> HashSet<i64> {
        self.attempted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn mark_attempted(&self, item_id: i64) {
        self.attempted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(item_id);
    }
}

/// CLI flags for `fh analyze`.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeArgs {
    pub limit: Option<usize>,
    pub concurrency: Option<usize>,
    pub oldest_first: bool,
    pub reanalyze: bool,
    pub item: Option<i64>,
    pub dry_run: bool,
}

/// `fh analyze`: run a batch (or one item) and print a summary.
pub async fn run_analyze(config: &Config, args: AnalyzeArgs, progress: ProgressMode) -> Result<()> {
    let pool = db::connect(config).await?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool.clone()));

    let mut opts = BatchOptions::from_config(config);
    opts.target = args.limit;
    opts.reanalyze = args.reanalyze;
    if let Some(c) = args.concurrency {
        opts.concurrency = c;
    }
    if args.oldest_first {
        opts.order = SortOrder::OldestFirst;
    }

    if args.dry_run {
        let selector = WorkSelector::new(store);
        let items = selector
            .next_batch(args.limit.unwrap_or(usize::MAX), !args.reanalyze, opts.order)
            .await?;
        println!("analyze (dry-run)");
        println!("  would analyze: {} items", items.len());
        for item in items.iter().take(20) {
            println!("    {:>10}  {}", item.item_id, item.title);
        }
        pool.close().await;
        return Ok(());
    }

    if !config.analysis.is_enabled() {
        bail!("Analysis provider is disabled. Set [analysis] provider in config.");
    }

    let service = create_service(&config.analysis)?;
    let model = service.model_name().to_string();
    let runner = AnalysisRunner::new(
        store.clone(),
        service,
        Duration::from_secs(config.analysis.timeout_secs),
    );
    let coordinator = BatchCoordinator::new(store, runner, progress.reporter());

    if let Some(item_id) = args.item {
        let outcome = coordinator.run_item(item_id, &opts).await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        pool.close().await;
        return Ok(());
    }

    let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight items");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let report = coordinator.run_batch(&opts, cancel).await?;

    println!("analyze ({})", model);
    println!("  attempted: {}", report.attempted);
    println!("  succeeded: {}", report.succeeded);
    println!("  failed: {}", report.failed_total());
    for (stage, count) in &report.failed {
        println!("    {}: {}", stage, count);
    }
    println!(
        "  duration: {:.1}s ({:.2} items/s)",
        report.duration.as_secs_f64(),
        report.throughput()
    );
    if report.drained {
        println!("  no pending items remain");
    }
    println!("ok");

    pool.close().await;
    Ok(())
}
