//! End-to-end crawl pipeline: seed the frontier, let the worker pool drain
//! it through the optimizer into the store, then settle the job's terminal
//! state.
//!
//! The pipeline never blocks a caller: `run_job` is spawned per job and
//! communicates only through the tracker, the store, and the progress
//! reporter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, instrument, warn};
use url::Url;

use siteminer_crawler::{PageSink, WorkerPool};
use siteminer_frontier::Frontier;
use siteminer_optimizer::{DataOptimizer, IngestOutcome};
use siteminer_shared::{
    CrawlConfig, Extraction, JobId, JobKind, JobState, PageRecord, Result, SiteMinerError,
};
use siteminer_store::{SiteStore, StoredJob, WriteOutcome};

use crate::jobs::{CrawlJob, JobTracker};

/// Paths seeded by a business-page job instead of BFS discovery.
pub const BUSINESS_PATHS: &[&str] = &[
    "/about",
    "/about-us",
    "/contact",
    "/contact-us",
    "/terms",
    "/privacy",
    "/faq",
    "/team",
    "/services",
];

/// Scheduling slack over the page target: discovery may queue up to this
/// multiple of the target, since some queued pages will dedup away or fail.
const DISCOVERY_SLACK: u64 = 2;

/// Monitor poll interval while a job runs.
const MONITOR_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for reporting job status.
pub trait ProgressReporter: Send + Sync {
    /// Called once when the job moves to PROGRESS.
    fn started(&self, job: &CrawlJob);
    /// Called periodically while the job runs.
    fn progress(&self, progress: &siteminer_shared::JobProgress);
    /// Called once with the terminal state.
    fn finished(&self, job: JobId, state: JobState);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn started(&self, _job: &CrawlJob) {}
    fn progress(&self, _progress: &siteminer_shared::JobProgress) {}
    fn finished(&self, _job: JobId, _state: JobState) {}
}

// ---------------------------------------------------------------------------
// Shared pipeline context
// ---------------------------------------------------------------------------

/// Everything a running job needs, shared across the engine and its workers.
pub(crate) struct PipelineContext {
    pub config: CrawlConfig,
    pub tracker: Arc<JobTracker>,
    pub frontier: Arc<Frontier>,
    pub optimizer: Arc<DataOptimizer>,
    pub store: Arc<SiteStore>,
    pub pool: Arc<WorkerPool>,
    pub sink: Arc<PipelineSink>,
}

// ---------------------------------------------------------------------------
// Worker sink
// ---------------------------------------------------------------------------

/// Receives worker results and routes them through the optimizer into the
/// store, updating the tracker along the way.
pub(crate) struct PipelineSink {
    tracker: Arc<JobTracker>,
    optimizer: Arc<DataOptimizer>,
    store: Arc<SiteStore>,
    records: Mutex<HashMap<JobId, Vec<PageRecord>>>,
}

impl PipelineSink {
    pub(crate) fn new(
        tracker: Arc<JobTracker>,
        optimizer: Arc<DataOptimizer>,
        store: Arc<SiteStore>,
    ) -> Self {
        Self {
            tracker,
            optimizer,
            store,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Records accumulated for a job so far.
    pub(crate) fn records(&self, job: JobId) -> Vec<PageRecord> {
        self.records
            .lock()
            .expect("records lock poisoned")
            .get(&job)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn forget_job(&self, job: JobId) {
        self.records
            .lock()
            .expect("records lock poisoned")
            .remove(&job);
    }

    /// One retry on a failed partition write, then the page is kept in
    /// memory and the failure logged.
    async fn write_with_retry(&self, record: &PageRecord) -> Result<WriteOutcome> {
        match self.store.write(record).await {
            Ok(outcome) => Ok(outcome),
            Err(first) => {
                warn!(url = %record.url, error = %first, "store write failed, retrying once");
                self.store.write(record).await.map_err(|e| {
                    SiteMinerError::StoreWrite(format!("{}: {e}", record.url))
                })
            }
        }
    }
}

#[async_trait]
impl PageSink for PipelineSink {
    fn is_cancelled(&self, job: JobId) -> bool {
        self.tracker.is_cancelled(job)
    }

    fn page_started(&self, job: JobId, url: &str) {
        self.tracker.set_current_url(job, url);
    }

    async fn page_extracted(
        &self,
        job: JobId,
        url: &Url,
        extraction: Extraction,
    ) -> Result<bool> {
        let Some(snapshot) = self.tracker.snapshot(job) else {
            return Ok(false);
        };
        // A fetch that was in flight at cancel time is discarded, not
        // committed against a job that is already terminal.
        if snapshot.state.is_terminal() || self.tracker.is_cancelled(job) {
            return Err(SiteMinerError::Cancelled);
        }
        if snapshot.pages_scraped >= snapshot.target_pages {
            return Ok(false);
        }
        // Business jobs visit a fixed seed list only.
        let discover = matches!(snapshot.kind, JobKind::Full);

        let record = match self.optimizer.ingest(job, url, extraction) {
            IngestOutcome::DuplicatePage { .. } => return Ok(discover),
            IngestOutcome::Unique(record) => record,
        };

        if self.tracker.is_cancelled(job) {
            return Err(SiteMinerError::Cancelled);
        }
        match self.write_with_retry(&record).await {
            Ok(WriteOutcome::DuplicateContent) => {
                // Stored by an earlier job; counted but not re-recorded.
                self.optimizer.note_duplicate_content(job, 1);
                return Ok(discover);
            }
            Ok(WriteOutcome::Stored { .. }) => {}
            Err(e) => {
                // The page stays in the in-memory result set even when the
                // durable write keeps failing.
                warn!(job = %job, url = %record.url, error = %e, "dropping partition write");
            }
        }

        self.tracker.note_page_scraped(job);
        self.records
            .lock()
            .expect("records lock poisoned")
            .entry(job)
            .or_default()
            .push(*record);

        let scraped = self
            .tracker
            .snapshot(job)
            .map(|j| j.pages_scraped)
            .unwrap_or(0);
        Ok(discover && scraped < snapshot.target_pages)
    }

    async fn page_failed(&self, job: JobId, url: &str, error: &SiteMinerError) {
        warn!(job = %job, url, error = %error, "page failed");
    }

    async fn job_fatal(&self, job: JobId, error: SiteMinerError) {
        self.tracker.set_error(job, &error.to_string());
        // Already-terminal jobs (e.g. revoked mid-flight) keep their state.
        let _ = self.tracker.transition(job, JobState::Failure);
    }
}

// ---------------------------------------------------------------------------
// Job orchestration
// ---------------------------------------------------------------------------

/// Seed the frontier for a job according to its kind. Returns the number of
/// entries queued.
pub(crate) fn seed_job(frontier: &Frontier, job: &CrawlJob) -> u64 {
    let mut queued = 0u64;
    if frontier
        .push(job.id, job.priority, &job.root_url, 0)
        .accepted()
    {
        queued += 1;
    }
    if matches!(job.kind, JobKind::Business) {
        for path in BUSINESS_PATHS {
            if let Ok(url) = job.root_url.join(path) {
                if frontier.push(job.id, job.priority, &url, 1).accepted() {
                    queued += 1;
                }
            }
        }
    }
    queued
}

/// Run one job to completion: PROGRESS, seed, monitor until drained,
/// cancelled, failed, or past its deadline, then settle the terminal state.
#[instrument(skip_all, fields(job = %job_id))]
pub(crate) async fn run_job(
    ctx: Arc<PipelineContext>,
    job_id: JobId,
    progress: Arc<dyn ProgressReporter>,
) {
    let Some(job) = ctx.tracker.snapshot(job_id) else {
        return;
    };
    if ctx.tracker.transition(job_id, JobState::Progress).is_err() {
        // Revoked before it ever started.
        settle(&ctx, job_id, &progress).await;
        return;
    }
    persist(&ctx, job_id).await;
    progress.started(&job);

    let budget = job
        .target_pages
        .saturating_mul(DISCOVERY_SLACK)
        .max(1 + BUSINESS_PATHS.len() as u64);
    ctx.frontier.register_job(job_id, budget, ctx.config.max_depth);

    let queued = seed_job(&ctx.frontier, &job);
    info!(
        site = %job.site,
        kind = ?job.kind,
        target = job.target_pages,
        seeded = queued,
        "job started"
    );

    let started = Instant::now();
    let deadline = Duration::from_secs(ctx.config.job_deadline_secs);

    loop {
        tokio::time::sleep(MONITOR_INTERVAL).await;

        let Some(snapshot) = ctx.tracker.snapshot(job_id) else {
            break;
        };
        if snapshot.state.is_terminal() {
            break;
        }

        let queue = ctx.frontier.job_stats(job_id);
        ctx.tracker.note_pages_found(job_id, queue.scheduled);
        if let Some(p) = ctx.tracker.progress(job_id) {
            progress.progress(&p);
        }

        if queue.is_drained() {
            break;
        }

        if !deadline.is_zero() && started.elapsed() > deadline {
            warn!(elapsed_secs = started.elapsed().as_secs(), "job deadline exceeded");
            ctx.frontier.cancel_job(job_id);
            ctx.tracker.set_error(job_id, "job deadline exceeded");
            let _ = ctx.tracker.transition(job_id, JobState::Failure);
            break;
        }
    }

    settle(&ctx, job_id, &progress).await;
}

/// Fix the terminal state, attach final stats, persist, and release
/// per-job resources.
async fn settle(
    ctx: &Arc<PipelineContext>,
    job_id: JobId,
    progress: &Arc<dyn ProgressReporter>,
) {
    let stats = ctx.optimizer.finish_job(job_id);
    ctx.tracker.set_stats(job_id, stats);

    if ctx
        .tracker
        .snapshot(job_id)
        .is_some_and(|j| j.state == JobState::Progress)
    {
        let _ = ctx.tracker.transition(job_id, JobState::Success);
    }
    persist(ctx, job_id).await;

    ctx.pool.forget_job(job_id);
    ctx.frontier.remove_job(job_id);

    let state = ctx
        .tracker
        .snapshot(job_id)
        .map(|j| j.state)
        .unwrap_or(JobState::Failure);
    // Only SUCCESS jobs have a consumable result; anything else releases
    // its record buffer here.
    if state != JobState::Success {
        ctx.sink.forget_job(job_id);
    }
    progress.finished(job_id, state);
    info!(
        state = %state,
        pages = stats.pages_scraped,
        duplicates = stats.duplicates_removed(),
        "job settled"
    );
}

/// Mirror the tracker's view of a job into the durable jobs table.
pub(crate) async fn persist(ctx: &Arc<PipelineContext>, job_id: JobId) {
    let Some(job) = ctx.tracker.snapshot(job_id) else {
        return;
    };
    let stored = StoredJob {
        id: job.id,
        site: job.site.clone(),
        root_url: job.root_url.to_string(),
        state: job.state,
        stats: job.stats,
        error: job.error.clone(),
    };
    if let Err(e) = ctx.store.upsert_job(&stored).await {
        warn!(job = %job_id, error = %e, "failed to persist job state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteminer_shared::JobPriority;
    use siteminer_store::FeatureHashEmbedder;

    fn job(kind: JobKind) -> CrawlJob {
        CrawlJob::new(
            Url::parse("https://a.test/").unwrap(),
            "a.test".into(),
            kind,
            JobPriority::default(),
            10,
        )
    }

    #[test]
    fn full_job_seeds_root_only() {
        let frontier = Frontier::new();
        let j = job(JobKind::Full);
        frontier.register_job(j.id, 100, 5);

        assert_eq!(seed_job(&frontier, &j), 1);
        assert_eq!(frontier.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_job_discards_inflight_pages() {
        let tracker = Arc::new(JobTracker::new());
        let optimizer = Arc::new(DataOptimizer::new());
        let tmp = std::env::temp_dir().join(format!("sm_pipeline_{}.db", JobId::new()));
        let store = Arc::new(
            SiteStore::open(&tmp, Arc::new(FeatureHashEmbedder::default()), 50)
                .await
                .expect("open store"),
        );
        let sink = PipelineSink::new(
            Arc::clone(&tracker),
            Arc::clone(&optimizer),
            Arc::clone(&store),
        );

        let j = job(JobKind::Full);
        let id = j.id;
        tracker.register(j).unwrap();
        tracker.transition(id, JobState::Progress).unwrap();
        assert!(tracker.cancel(id).unwrap());

        // A page whose fetch was already in flight when the job was revoked
        // arrives now. It must not be committed anywhere.
        let url = Url::parse("https://a.test/page").unwrap();
        let extraction = Extraction {
            title: Some("Late".into()),
            text: "arrived after cancellation".into(),
            ..Default::default()
        };
        let err = sink.page_extracted(id, &url, extraction).await.unwrap_err();
        assert!(matches!(err, SiteMinerError::Cancelled));

        assert!(sink.records(id).is_empty());
        assert_eq!(tracker.snapshot(id).unwrap().pages_scraped, 0);
        assert!(store.stats("a.test").await.unwrap().is_none());
    }

    #[test]
    fn business_job_seeds_exactly_the_configured_paths() {
        let frontier = Frontier::new();
        let j = job(JobKind::Business);
        frontier.register_job(j.id, 100, 5);

        let queued = seed_job(&frontier, &j);
        assert_eq!(queued, 1 + BUSINESS_PATHS.len() as u64);

        for path in BUSINESS_PATHS {
            let url = j.root_url.join(path).unwrap();
            assert!(frontier.contains(j.id, &url));
        }
    }
}
