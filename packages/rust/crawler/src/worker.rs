//! Worker pool draining the crawl frontier.
//!
//! Each worker loops: claim an entry, fetch with retry/backoff, extract,
//! deliver to the sink, then push same-site links one level deeper. Transient
//! fetch errors are retried with exponential backoff plus jitter; permanent
//! errors fail the page immediately. A failed root URL or an excessive
//! per-job error rate escalates to a job-fatal error and cancels the job's
//! remaining queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use siteminer_frontier::{Frontier, FrontierEntry};
use siteminer_shared::{CrawlConfig, Extraction, JobId, Result, SiteMinerError, site_of_url};

use crate::extract::ContentExtractor;
use crate::fetch::PageFetcher;

/// The error-rate gate only trips after this many attempts, so one early
/// failure cannot kill a job.
const ERROR_RATE_MIN_ATTEMPTS: u64 = 5;

/// Where workers deliver their results.
#[async_trait]
pub trait PageSink: Send + Sync {
    /// Cooperative cancellation check, consulted before and during work.
    fn is_cancelled(&self, job: JobId) -> bool;

    /// A worker is about to process this URL.
    fn page_started(&self, job: JobId, url: &str);

    /// Deliver one extracted page. Returns `false` once the job's page
    /// target is met and link discovery should stop.
    async fn page_extracted(&self, job: JobId, url: &Url, extraction: Extraction)
    -> Result<bool>;

    /// A page failed permanently (after retries, where applicable).
    async fn page_failed(&self, job: JobId, url: &str, error: &SiteMinerError);

    /// The job as a whole cannot proceed.
    async fn job_fatal(&self, job: JobId, error: SiteMinerError);
}

#[derive(Debug, Default, Clone, Copy)]
struct JobCounters {
    attempted: u64,
    failed: u64,
}

/// Pool of fetch workers shared across all running jobs.
pub struct WorkerPool {
    frontier: Arc<Frontier>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn ContentExtractor>,
    sink: Arc<dyn PageSink>,
    config: CrawlConfig,
    counters: Mutex<HashMap<JobId, JobCounters>>,
}

impl WorkerPool {
    pub fn new(
        frontier: Arc<Frontier>,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn ContentExtractor>,
        sink: Arc<dyn PageSink>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            frontier,
            fetcher,
            extractor,
            sink,
            config,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn the configured number of workers. They run until the frontier
    /// shuts down.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(workers = self.config.workers, "starting worker pool");
        (0..self.config.workers)
            .map(|index| {
                let pool = Arc::clone(self);
                tokio::spawn(async move { pool.run_worker(index).await })
            })
            .collect()
    }

    /// Drop per-job counters once a job has settled.
    pub fn forget_job(&self, job: JobId) {
        self.counters
            .lock()
            .expect("counters lock poisoned")
            .remove(&job);
    }

    async fn run_worker(&self, index: usize) {
        debug!(worker = index, "worker started");
        while let Some(entry) = self.frontier.pop().await {
            let job = entry.job;
            self.process_entry(entry).await;
            self.frontier.mark_done(job);
            if self.config.request_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.request_delay_ms)).await;
            }
        }
        debug!(worker = index, "worker stopped");
    }

    async fn process_entry(&self, entry: FrontierEntry) {
        let job = entry.job;
        if self.sink.is_cancelled(job) {
            return;
        }
        self.sink.page_started(job, &entry.url);
        self.note_attempt(job);

        let url = match Url::parse(&entry.url) {
            Ok(url) => url,
            Err(e) => {
                let err = SiteMinerError::PermanentFetch(format!("{}: {e}", entry.url));
                self.record_failure(&entry, err).await;
                return;
            }
        };

        let result = match self.fetch_with_retry(job, &url).await {
            Ok(outcome) => self.extractor.extract(&outcome.html, &url),
            Err(e) => Err(e),
        };

        match result {
            Ok(extraction) => {
                let links = extraction.links.clone();
                match self.sink.page_extracted(job, &url, extraction).await {
                    Ok(true) => self.push_links(&entry, &url, &links),
                    Ok(false) => {
                        debug!(%job, url = %url, "page target met, stopping discovery");
                    }
                    Err(SiteMinerError::Cancelled) => {}
                    Err(e) => self.record_failure(&entry, e).await,
                }
            }
            Err(SiteMinerError::Cancelled) => {}
            Err(e) => self.record_failure(&entry, e).await,
        }
    }

    /// Fetch with retry on transient errors: delay = base * 2^attempt +
    /// jitter, capped at the configured maximum.
    async fn fetch_with_retry(
        &self,
        job: JobId,
        url: &Url,
    ) -> Result<crate::fetch::FetchOutcome> {
        let mut attempt: u32 = 0;
        loop {
            if self.sink.is_cancelled(job) {
                return Err(SiteMinerError::Cancelled);
            }
            match self.fetcher.fetch(url).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt < self.config.retry_count => {
                    let jitter = fastrand::u64(0..=self.config.backoff_base_ms.max(1));
                    let delay = backoff_delay(&self.config, attempt, jitter);
                    warn!(
                        %url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient fetch error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Queue same-site links one level deeper. Cross-site links are ignored.
    fn push_links(&self, entry: &FrontierEntry, page_url: &Url, links: &[String]) {
        let site = site_of_url(page_url);
        for link in links {
            let Ok(link_url) = Url::parse(link) else {
                continue;
            };
            if site_of_url(&link_url) != site {
                continue;
            }
            self.frontier
                .push(entry.job, entry.priority, &link_url, entry.depth + 1);
        }
    }

    fn note_attempt(&self, job: JobId) {
        let mut counters = self.counters.lock().expect("counters lock poisoned");
        counters.entry(job).or_default().attempted += 1;
    }

    async fn record_failure(&self, entry: &FrontierEntry, error: SiteMinerError) {
        let job = entry.job;
        warn!(%job, url = %entry.url, error = %error, "page failed");
        self.sink.page_failed(job, &entry.url, &error).await;

        let stats = {
            let mut counters = self.counters.lock().expect("counters lock poisoned");
            let c = counters.entry(job).or_default();
            c.failed += 1;
            *c
        };

        if entry.depth == 0 {
            self.frontier.cancel_job(job);
            self.sink
                .job_fatal(
                    job,
                    SiteMinerError::JobFatal(format!("root URL failed: {error}")),
                )
                .await;
            return;
        }

        let rate = stats.failed as f64 / stats.attempted as f64;
        if stats.attempted >= ERROR_RATE_MIN_ATTEMPTS && rate > self.config.error_rate_threshold
        {
            self.frontier.cancel_job(job);
            self.sink
                .job_fatal(
                    job,
                    SiteMinerError::JobFatal(format!(
                        "error rate {:.0}% exceeded threshold ({} of {} pages failed)",
                        rate * 100.0,
                        stats.failed,
                        stats.attempted
                    )),
                )
                .await;
        }
    }
}

/// Backoff delay for a retry attempt, before jitter capping.
pub fn backoff_delay(config: &CrawlConfig, attempt: u32, jitter_ms: u64) -> Duration {
    let exp = config
        .backoff_base_ms
        .saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(exp.saturating_add(jitter_ms).min(config.backoff_max_ms))
}
