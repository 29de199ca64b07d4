//! In-memory job registry and state machine.
//!
//! The tracker owns the authoritative lifecycle state of every job in this
//! process. Transitions follow `PENDING → PROGRESS → {SUCCESS, FAILURE}`,
//! with `REVOKED` reachable from any non-terminal state. Terminal states are
//! immutable; counters only ever increase.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;
use url::Url;

use siteminer_shared::{
    JobId, JobKind, JobPriority, JobProgress, JobState, OptimizationStats, Result,
    SiteMinerError,
};

/// One crawl job as tracked in memory.
#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub id: JobId,
    pub root_url: Url,
    pub site: String,
    pub kind: JobKind,
    pub priority: JobPriority,
    pub target_pages: u64,
    pub state: JobState,
    pub pages_scraped: u64,
    pub pages_found: u64,
    pub current_url: Option<String>,
    pub error: Option<String>,
    /// Final stats, set when the job settles.
    pub stats: Option<OptimizationStats>,
}

impl CrawlJob {
    pub fn new(
        root_url: Url,
        site: String,
        kind: JobKind,
        priority: JobPriority,
        target_pages: u64,
    ) -> Self {
        Self {
            id: JobId::new(),
            root_url,
            site,
            kind,
            priority,
            target_pages,
            state: JobState::Pending,
            pages_scraped: 0,
            pages_found: 0,
            current_url: None,
            error: None,
            stats: None,
        }
    }
}

struct JobEntry {
    job: CrawlJob,
    cancel: Arc<AtomicBool>,
}

/// Registry of all jobs known to this process.
pub struct JobTracker {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new job in PENDING state.
    pub fn register(&self, job: CrawlJob) -> Result<()> {
        let mut jobs = self.jobs.write().expect("tracker lock poisoned");
        if jobs.contains_key(&job.id) {
            return Err(SiteMinerError::validation(format!(
                "job {} already registered",
                job.id
            )));
        }
        jobs.insert(
            job.id,
            JobEntry {
                job,
                cancel: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(())
    }

    /// Apply a state transition, rejecting anything the state machine
    /// does not allow.
    pub fn transition(&self, id: JobId, next: JobState) -> Result<()> {
        let mut jobs = self.jobs.write().expect("tracker lock poisoned");
        let entry = jobs
            .get_mut(&id)
            .ok_or_else(|| SiteMinerError::validation(format!("unknown job {id}")))?;
        if !entry.job.state.can_transition_to(next) {
            return Err(SiteMinerError::validation(format!(
                "illegal transition {} -> {next} for job {id}",
                entry.job.state
            )));
        }
        debug!(job = %id, from = %entry.job.state, to = %next, "job state transition");
        entry.job.state = next;
        Ok(())
    }

    /// Request cancellation. Returns `false` if the job was already
    /// terminal (a no-op), `true` if it was moved to REVOKED.
    pub fn cancel(&self, id: JobId) -> Result<bool> {
        let mut jobs = self.jobs.write().expect("tracker lock poisoned");
        let entry = jobs
            .get_mut(&id)
            .ok_or_else(|| SiteMinerError::validation(format!("unknown job {id}")))?;
        if entry.job.state.is_terminal() {
            return Ok(false);
        }
        entry.job.state = JobState::Revoked;
        entry.cancel.store(true, Ordering::SeqCst);
        Ok(true)
    }

    /// Shared cancellation flag for a job, checked cooperatively by workers.
    pub fn is_cancelled(&self, id: JobId) -> bool {
        let jobs = self.jobs.read().expect("tracker lock poisoned");
        jobs.get(&id)
            .is_some_and(|e| e.cancel.load(Ordering::SeqCst))
    }

    /// Record one scraped page. Counters are monotonic.
    pub fn note_page_scraped(&self, id: JobId) {
        let mut jobs = self.jobs.write().expect("tracker lock poisoned");
        if let Some(entry) = jobs.get_mut(&id) {
            entry.job.pages_scraped += 1;
        }
    }

    /// Update the discovered-URL count (monotonic: lower values ignored).
    pub fn note_pages_found(&self, id: JobId, found: u64) {
        let mut jobs = self.jobs.write().expect("tracker lock poisoned");
        if let Some(entry) = jobs.get_mut(&id) {
            if found > entry.job.pages_found {
                entry.job.pages_found = found;
            }
        }
    }

    pub fn set_current_url(&self, id: JobId, url: &str) {
        let mut jobs = self.jobs.write().expect("tracker lock poisoned");
        if let Some(entry) = jobs.get_mut(&id) {
            entry.job.current_url = Some(url.to_string());
        }
    }

    /// Record a job-level error message. First error wins.
    pub fn set_error(&self, id: JobId, error: &str) {
        let mut jobs = self.jobs.write().expect("tracker lock poisoned");
        if let Some(entry) = jobs.get_mut(&id) {
            if entry.job.error.is_none() {
                entry.job.error = Some(error.to_string());
            }
        }
    }

    /// Attach final optimization stats when the job settles.
    pub fn set_stats(&self, id: JobId, stats: OptimizationStats) {
        let mut jobs = self.jobs.write().expect("tracker lock poisoned");
        if let Some(entry) = jobs.get_mut(&id) {
            entry.job.stats = Some(stats);
        }
    }

    /// Drop a job from the registry, returning its final tracked state.
    pub fn remove(&self, id: JobId) -> Option<CrawlJob> {
        let mut jobs = self.jobs.write().expect("tracker lock poisoned");
        jobs.remove(&id).map(|e| e.job)
    }

    /// Copy of the job's current tracked state.
    pub fn snapshot(&self, id: JobId) -> Option<CrawlJob> {
        let jobs = self.jobs.read().expect("tracker lock poisoned");
        jobs.get(&id).map(|e| e.job.clone())
    }

    /// Point-in-time progress for a job.
    ///
    /// Percentage is `min(99, scraped/target*100)` while running and snaps
    /// to 100 only at SUCCESS, so a consumer never sees 100% on a job that
    /// might still fail.
    pub fn progress(&self, id: JobId) -> Option<JobProgress> {
        let jobs = self.jobs.read().expect("tracker lock poisoned");
        jobs.get(&id).map(|entry| {
            let job = &entry.job;
            let percentage = match job.state {
                JobState::Success => 100.0,
                _ => {
                    let target = job.target_pages.max(1) as f64;
                    ((job.pages_scraped as f64 / target) * 100.0).min(99.0)
                }
            };
            JobProgress {
                state: job.state,
                pages_scraped: job.pages_scraped,
                pages_found: job.pages_found,
                current_url: job.current_url.clone(),
                percentage,
                error: job.error.clone(),
            }
        })
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> CrawlJob {
        CrawlJob::new(
            Url::parse("https://a.test/").unwrap(),
            "a.test".into(),
            JobKind::Full,
            JobPriority::default(),
            10,
        )
    }

    #[test]
    fn lifecycle_happy_path() {
        let tracker = JobTracker::new();
        let j = job();
        let id = j.id;
        tracker.register(j).unwrap();

        tracker.transition(id, JobState::Progress).unwrap();
        tracker.transition(id, JobState::Success).unwrap();
        assert_eq!(tracker.snapshot(id).unwrap().state, JobState::Success);
    }

    #[test]
    fn illegal_transitions_rejected() {
        let tracker = JobTracker::new();
        let j = job();
        let id = j.id;
        tracker.register(j).unwrap();

        // PENDING cannot jump straight to SUCCESS.
        assert!(tracker.transition(id, JobState::Success).is_err());

        tracker.transition(id, JobState::Progress).unwrap();
        tracker.transition(id, JobState::Failure).unwrap();
        // Terminal states are immutable.
        assert!(tracker.transition(id, JobState::Progress).is_err());
        assert!(tracker.transition(id, JobState::Revoked).is_err());
    }

    #[test]
    fn cancel_from_any_non_terminal_state() {
        let tracker = JobTracker::new();
        let j = job();
        let id = j.id;
        tracker.register(j).unwrap();

        assert!(tracker.cancel(id).unwrap());
        assert_eq!(tracker.snapshot(id).unwrap().state, JobState::Revoked);
        assert!(tracker.is_cancelled(id));

        // A second cancel is a no-op.
        assert!(!tracker.cancel(id).unwrap());
    }

    #[test]
    fn percentage_capped_at_99_until_success() {
        let tracker = JobTracker::new();
        let mut j = job();
        j.target_pages = 4;
        let id = j.id;
        tracker.register(j).unwrap();
        tracker.transition(id, JobState::Progress).unwrap();

        for _ in 0..2 {
            tracker.note_page_scraped(id);
        }
        let progress = tracker.progress(id).unwrap();
        assert!((progress.percentage - 50.0).abs() < f64::EPSILON);

        // Even past the target, a running job never reports 100.
        for _ in 0..10 {
            tracker.note_page_scraped(id);
        }
        assert!((tracker.progress(id).unwrap().percentage - 99.0).abs() < f64::EPSILON);

        tracker.transition(id, JobState::Success).unwrap();
        assert!((tracker.progress(id).unwrap().percentage - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn pages_found_is_monotonic() {
        let tracker = JobTracker::new();
        let j = job();
        let id = j.id;
        tracker.register(j).unwrap();

        tracker.note_pages_found(id, 7);
        tracker.note_pages_found(id, 3);
        assert_eq!(tracker.snapshot(id).unwrap().pages_found, 7);
    }

    #[test]
    fn unknown_job_is_validation_error() {
        let tracker = JobTracker::new();
        let err = tracker.transition(JobId::new(), JobState::Progress).unwrap_err();
        assert!(matches!(err, SiteMinerError::Validation { .. }));
    }
}
