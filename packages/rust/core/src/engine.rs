//! The SiteMiner engine: one facade owning the frontier, the worker pool,
//! the optimizer, the store, and the query router.
//!
//! All jobs share a single frontier and worker pool, so priorities are
//! honored across jobs. Each created job gets its own orchestration task
//! that settles its terminal state.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{info, instrument};
use url::Url;

use siteminer_crawler::{DomExtractor, HttpFetcher, WorkerPool};
use siteminer_frontier::Frontier;
use siteminer_optimizer::DataOptimizer;
use siteminer_shared::{
    AppConfig, CrawlConfig, JobId, JobKind, JobPriority, JobProgress, JobResult, JobState,
    Result, SiteMinerError, expand_tilde, site_of_url,
};
use siteminer_store::{Embedder, FeatureHashEmbedder, SiteStats, SiteStore};

use crate::jobs::{CrawlJob, JobTracker};
use crate::pipeline::{PipelineContext, PipelineSink, ProgressReporter, SilentProgress};
use crate::router::{Answer, Conversation, LanguageModel, QueryRouter, SiteInsights};

/// Facade over the whole crawl/store/ask lifecycle.
pub struct SiteMiner {
    ctx: Arc<PipelineContext>,
    router: Arc<QueryRouter>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SiteMiner {
    /// Start an engine with the default local embedder.
    pub async fn new(config: AppConfig, model: Arc<dyn LanguageModel>) -> Result<Self> {
        Self::with_embedder(config, Arc::new(FeatureHashEmbedder::default()), model).await
    }

    /// Start an engine with a caller-supplied embedder.
    pub async fn with_embedder(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        let db_path = expand_tilde(&config.storage.db_path)?;
        let store = Arc::new(
            SiteStore::open(&db_path, embedder, config.retrieval.chunk_size_words).await?,
        );

        let crawl = CrawlConfig::from(&config);
        let frontier = Arc::new(Frontier::new());
        let tracker = Arc::new(JobTracker::new());
        let optimizer = Arc::new(DataOptimizer::new());
        let sink = Arc::new(PipelineSink::new(
            Arc::clone(&tracker),
            Arc::clone(&optimizer),
            Arc::clone(&store),
        ));

        let fetcher = Arc::new(HttpFetcher::new(&crawl)?);
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&frontier),
            fetcher,
            Arc::new(DomExtractor),
            Arc::clone(&sink) as _,
            crawl.clone(),
        ));
        let handles = pool.spawn();

        let router = Arc::new(QueryRouter::new(
            Arc::clone(&store),
            model,
            config.retrieval.clone(),
        ));

        let ctx = Arc::new(PipelineContext {
            config: crawl,
            tracker,
            frontier,
            optimizer,
            store,
            pool,
            sink,
        });

        info!(db = %db_path.display(), "engine started");
        Ok(Self {
            ctx,
            router,
            workers: Mutex::new(handles),
        })
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    /// Create and start a crawl job. Returns immediately with the job ID;
    /// progress is observed through [`SiteMiner::get_progress`].
    pub async fn create_job(
        &self,
        url: &str,
        kind: JobKind,
        priority: JobPriority,
        target_pages: Option<u64>,
    ) -> Result<JobId> {
        self.create_job_with_progress(url, kind, priority, target_pages, Arc::new(SilentProgress))
            .await
    }

    /// As [`SiteMiner::create_job`], with a progress reporter attached.
    #[instrument(skip_all, fields(url))]
    pub async fn create_job_with_progress(
        &self,
        url: &str,
        kind: JobKind,
        priority: JobPriority,
        target_pages: Option<u64>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<JobId> {
        let root_url = Url::parse(url)
            .map_err(|e| SiteMinerError::validation(format!("invalid URL {url}: {e}")))?;
        if !matches!(root_url.scheme(), "http" | "https") {
            return Err(SiteMinerError::validation(format!(
                "unsupported URL scheme: {}",
                root_url.scheme()
            )));
        }
        let site = site_of_url(&root_url);
        if site.is_empty() {
            return Err(SiteMinerError::validation(format!("URL has no host: {url}")));
        }

        let target = target_pages.unwrap_or(self.ctx.config.target_pages).max(1);
        let job = CrawlJob::new(root_url, site, kind, priority, target);
        let job_id = job.id;
        self.ctx.tracker.register(job)?;
        crate::pipeline::persist(&self.ctx, job_id).await;

        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            crate::pipeline::run_job(ctx, job_id, progress).await;
        });
        Ok(job_id)
    }

    /// Current progress for a job. Falls back to the durable jobs table for
    /// jobs from earlier runs of this process.
    pub async fn get_progress(&self, job: JobId) -> Result<JobProgress> {
        if let Some(progress) = self.ctx.tracker.progress(job) {
            return Ok(progress);
        }
        let stored = self
            .ctx
            .store
            .load_job(job)
            .await?
            .ok_or_else(|| SiteMinerError::validation(format!("unknown job {job}")))?;
        let percentage = if stored.state == JobState::Success {
            100.0
        } else {
            0.0
        };
        Ok(JobProgress {
            state: stored.state,
            pages_scraped: stored.stats.map(|s| s.pages_scraped).unwrap_or(0),
            pages_found: 0,
            current_url: None,
            percentage,
            error: stored.error,
        })
    }

    /// Full result of a successfully completed job: its page records and
    /// optimization stats. Errors for jobs that are not SUCCESS.
    pub fn get_result(&self, job: JobId) -> Result<JobResult> {
        let snapshot = self
            .ctx
            .tracker
            .snapshot(job)
            .ok_or_else(|| SiteMinerError::validation(format!("unknown job {job}")))?;
        match snapshot.state {
            JobState::Success => Ok(JobResult {
                records: self.ctx.sink.records(job),
                stats: snapshot.stats.unwrap_or_default(),
            }),
            state if state.is_terminal() => Err(SiteMinerError::validation(format!(
                "job {job} finished as {state}: {}",
                snapshot.error.as_deref().unwrap_or("no error recorded")
            ))),
            state => Err(SiteMinerError::validation(format!(
                "job {job} still {state}"
            ))),
        }
    }

    /// Drop a finished job's in-memory footprint: its record buffer and
    /// tracker entry. The durable job row is kept, so
    /// [`SiteMiner::get_progress`] still answers from the store afterwards.
    pub fn release_job(&self, job: JobId) -> Result<()> {
        let snapshot = self
            .ctx
            .tracker
            .snapshot(job)
            .ok_or_else(|| SiteMinerError::validation(format!("unknown job {job}")))?;
        if !snapshot.state.is_terminal() {
            return Err(SiteMinerError::validation(format!(
                "job {job} still {}",
                snapshot.state
            )));
        }
        self.ctx.sink.forget_job(job);
        self.ctx.pool.forget_job(job);
        self.ctx.tracker.remove(job);
        Ok(())
    }

    /// Cancel a running job. Returns `false` when the job was already
    /// terminal.
    pub async fn cancel_job(&self, job: JobId) -> Result<bool> {
        let cancelled = self.ctx.tracker.cancel(job)?;
        if cancelled {
            self.ctx.frontier.cancel_job(job);
            crate::pipeline::persist(&self.ctx, job).await;
            info!(%job, "job cancelled");
        }
        Ok(cancelled)
    }

    // -----------------------------------------------------------------------
    // Retrieval
    // -----------------------------------------------------------------------

    /// Ask a question across all crawled sites.
    pub async fn ask(&self, question: &str, k: Option<usize>) -> Result<Answer> {
        self.router.ask(question, None, k).await
    }

    /// Ask a question scoped to one site partition.
    pub async fn query_site(&self, site: &str, question: &str, k: Option<usize>) -> Result<Answer> {
        self.router.ask(question, Some(site), k).await
    }

    /// Build a business-insights report for one site.
    pub async fn site_insights(&self, site: &str) -> Result<SiteInsights> {
        self.router.insights(site).await
    }

    /// Start a multi-turn conversation, optionally scoped to one site.
    pub fn conversation(&self, site: Option<String>, history_limit: usize) -> Conversation {
        Conversation::new(Arc::clone(&self.router), site, history_limit)
    }

    // -----------------------------------------------------------------------
    // Partitions
    // -----------------------------------------------------------------------

    pub async fn site_stats(&self, site: &str) -> Result<Option<SiteStats>> {
        self.ctx.store.stats(site).await
    }

    pub async fn list_sites(&self) -> Result<Vec<SiteStats>> {
        self.ctx.store.list_sites().await
    }

    pub async fn delete_site(&self, site: &str) -> Result<()> {
        self.ctx.store.delete_site(site).await
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Stop the worker pool and wait for in-flight work to finish.
    pub async fn shutdown(&self) {
        self.ctx.frontier.shutdown();
        let handles: Vec<_> = {
            let mut workers = self.workers.lock().expect("workers lock poisoned");
            workers.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!("engine stopped");
    }
}
