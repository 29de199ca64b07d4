//! Crawl frontier: a thread-safe, priority-ordered, deduplicating URL queue.
//!
//! Entries are ordered by (job priority descending, discovery depth
//! ascending, insertion order) so high-priority jobs drain first and
//! traversal within a job stays breadth-first. URLs are normalized before
//! insertion and deduplicated per job; a URL is atomically claimed at pop
//! time so concurrent workers never double-process it.

mod normalize;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::debug;
use url::Url;

use siteminer_shared::{JobId, JobPriority};

pub use normalize::normalize_url;

/// A unit of crawl work waiting in the frontier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Normalized URL (scheme+host+path+sorted query, fragment stripped).
    pub url: String,
    pub priority: JobPriority,
    pub depth: u32,
    pub job: JobId,
}

/// Outcome of a [`Frontier::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Entry accepted and queued.
    Queued,
    /// The normalized URL was already seen for this job.
    Duplicate,
    /// The entry exceeded the job's depth ceiling.
    TooDeep,
    /// The job's schedule budget is exhausted.
    BudgetExhausted,
    /// The job is unknown, cancelled, or closed.
    Rejected,
}

impl PushOutcome {
    pub fn accepted(&self) -> bool {
        matches!(self, Self::Queued)
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Heap wrapper giving max-heap semantics for our ordering:
/// priority desc, then depth asc, then insertion order asc.
#[derive(Debug)]
struct HeapEntry {
    entry: FrontierEntry,
    seq: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entry
            .priority
            .cmp(&other.entry.priority)
            .then_with(|| other.entry.depth.cmp(&self.entry.depth))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-job bookkeeping.
#[derive(Debug)]
struct JobQueue {
    seen: HashSet<String>,
    /// URLs queued but not yet popped.
    pending: u64,
    /// URLs popped and currently being processed.
    in_flight: u64,
    /// Total URLs ever accepted for this job.
    scheduled: u64,
    /// Ceiling on `scheduled`.
    budget: u64,
    max_depth: u32,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct Inner {
    heap: BinaryHeap<HeapEntry>,
    jobs: HashMap<JobId, JobQueue>,
    next_seq: u64,
    shutdown: bool,
}

/// Snapshot of a job's queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobQueueStats {
    pub pending: u64,
    pub in_flight: u64,
    pub scheduled: u64,
}

impl JobQueueStats {
    /// True when nothing is queued and nothing is being processed.
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.in_flight == 0
    }
}

// ---------------------------------------------------------------------------
// Frontier
// ---------------------------------------------------------------------------

/// Shared, priority-ordered crawl queue. Cheap operations only: all methods
/// complete without blocking on I/O.
pub struct Frontier {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Frontier {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    /// Register a job before pushing entries for it.
    ///
    /// `budget` caps how many URLs may ever be scheduled for the job;
    /// `max_depth` caps discovery depth to prevent unbounded expansion.
    pub fn register_job(&self, job: JobId, budget: u64, max_depth: u32) {
        let mut inner = self.inner.lock().expect("frontier lock poisoned");
        inner.jobs.entry(job).or_insert(JobQueue {
            seen: HashSet::new(),
            pending: 0,
            in_flight: 0,
            scheduled: 0,
            budget,
            max_depth,
            cancelled: false,
        });
    }

    /// Push a URL for a job. Idempotent: a URL already seen for the job is
    /// a no-op, as is any push past the job's budget or depth ceiling.
    pub fn push(&self, job: JobId, priority: JobPriority, url: &Url, depth: u32) -> PushOutcome {
        let normalized = normalize_url(url);
        let mut inner = self.inner.lock().expect("frontier lock poisoned");
        if inner.shutdown {
            return PushOutcome::Rejected;
        }

        let seq = inner.next_seq;
        let Some(queue) = inner.jobs.get_mut(&job) else {
            return PushOutcome::Rejected;
        };
        if queue.cancelled {
            return PushOutcome::Rejected;
        }
        if depth > queue.max_depth {
            return PushOutcome::TooDeep;
        }
        if queue.scheduled >= queue.budget {
            return PushOutcome::BudgetExhausted;
        }
        if !queue.seen.insert(normalized.clone()) {
            return PushOutcome::Duplicate;
        }

        queue.scheduled += 1;
        queue.pending += 1;
        inner.next_seq += 1;
        inner.heap.push(HeapEntry {
            entry: FrontierEntry {
                url: normalized,
                priority,
                depth,
                job,
            },
            seq,
        });
        drop(inner);

        self.notify.notify_waiters();
        PushOutcome::Queued
    }

    /// Claim the next entry without waiting. Entries belonging to cancelled
    /// jobs are discarded rather than dispatched.
    pub fn try_pop(&self) -> Option<FrontierEntry> {
        let mut inner = self.inner.lock().expect("frontier lock poisoned");
        while let Some(top) = inner.heap.pop() {
            let job = top.entry.job;
            let Some(queue) = inner.jobs.get_mut(&job) else {
                continue;
            };
            queue.pending = queue.pending.saturating_sub(1);
            if queue.cancelled {
                debug!(%job, url = %top.entry.url, "dropping entry for cancelled job");
                continue;
            }
            queue.in_flight += 1;
            return Some(top.entry);
        }
        None
    }

    /// Wait until an entry is available or the frontier shuts down.
    pub async fn pop(&self) -> Option<FrontierEntry> {
        loop {
            if let Some(entry) = self.try_pop() {
                return Some(entry);
            }
            if self.is_shutdown() {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Mark a previously popped entry as fully processed.
    pub fn mark_done(&self, job: JobId) {
        let mut inner = self.inner.lock().expect("frontier lock poisoned");
        if let Some(queue) = inner.jobs.get_mut(&job) {
            queue.in_flight = queue.in_flight.saturating_sub(1);
        }
        drop(inner);
        // Wake pollers waiting on drain.
        self.notify.notify_waiters();
    }

    /// Whether a normalized URL has been seen for a job.
    pub fn contains(&self, job: JobId, url: &Url) -> bool {
        let normalized = normalize_url(url);
        let inner = self.inner.lock().expect("frontier lock poisoned");
        inner
            .jobs
            .get(&job)
            .is_some_and(|q| q.seen.contains(&normalized))
    }

    /// Total entries currently queued across all jobs.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("frontier lock poisoned").heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue counters for one job.
    pub fn job_stats(&self, job: JobId) -> JobQueueStats {
        let inner = self.inner.lock().expect("frontier lock poisoned");
        inner
            .jobs
            .get(&job)
            .map(|q| JobQueueStats {
                pending: q.pending,
                in_flight: q.in_flight,
                scheduled: q.scheduled,
            })
            .unwrap_or_default()
    }

    /// Stop dispatching a job: queued entries are discarded at pop time and
    /// future pushes are rejected. Already-popped entries finish normally.
    pub fn cancel_job(&self, job: JobId) {
        let mut inner = self.inner.lock().expect("frontier lock poisoned");
        if let Some(queue) = inner.jobs.get_mut(&job) {
            queue.cancelled = true;
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Drop all bookkeeping for a finished job.
    pub fn remove_job(&self, job: JobId) {
        let mut inner = self.inner.lock().expect("frontier lock poisoned");
        inner.jobs.remove(&job);
    }

    /// Signal shutdown and wake any waiters.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("frontier lock poisoned");
        inner.shutdown = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    fn is_shutdown(&self) -> bool {
        self.inner.lock().expect("frontier lock poisoned").shutdown
    }
}

impl Default for Frontier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn seeded(job: JobId, budget: u64, depth: u32) -> Frontier {
        let frontier = Frontier::new();
        frontier.register_job(job, budget, depth);
        frontier
    }

    #[test]
    fn duplicate_push_is_noop() {
        let job = JobId::new();
        let frontier = seeded(job, 100, 5);
        let p = JobPriority::default();

        assert!(frontier.push(job, p, &url("https://a.test/page"), 0).accepted());
        assert_eq!(
            frontier.push(job, p, &url("https://a.test/page"), 1),
            PushOutcome::Duplicate
        );
        // Fragment-only difference normalizes to the same URL.
        assert_eq!(
            frontier.push(job, p, &url("https://a.test/page#section"), 1),
            PushOutcome::Duplicate
        );
        assert_eq!(frontier.len(), 1);

        // Exactly one entry dispatched.
        assert!(frontier.try_pop().is_some());
        assert!(frontier.try_pop().is_none());
    }

    #[test]
    fn priority_then_depth_then_insertion_order() {
        let low = JobId::new();
        let high = JobId::new();
        let frontier = Frontier::new();
        frontier.register_job(low, 100, 5);
        frontier.register_job(high, 100, 5);

        frontier.push(low, JobPriority::new(2), &url("https://low.test/deep"), 3);
        frontier.push(low, JobPriority::new(2), &url("https://low.test/a"), 1);
        frontier.push(low, JobPriority::new(2), &url("https://low.test/b"), 1);
        frontier.push(high, JobPriority::new(8), &url("https://high.test/"), 2);

        // High-priority job first regardless of depth.
        assert_eq!(frontier.try_pop().unwrap().url, "https://high.test/");
        // Then shallow entries of the low job, in insertion order.
        assert_eq!(frontier.try_pop().unwrap().url, "https://low.test/a");
        assert_eq!(frontier.try_pop().unwrap().url, "https://low.test/b");
        assert_eq!(frontier.try_pop().unwrap().url, "https://low.test/deep");
    }

    #[test]
    fn depth_ceiling_enforced() {
        let job = JobId::new();
        let frontier = seeded(job, 100, 2);
        let p = JobPriority::default();

        assert!(frontier.push(job, p, &url("https://a.test/ok"), 2).accepted());
        assert_eq!(
            frontier.push(job, p, &url("https://a.test/too-deep"), 3),
            PushOutcome::TooDeep
        );
    }

    #[test]
    fn budget_enforced() {
        let job = JobId::new();
        let frontier = seeded(job, 2, 5);
        let p = JobPriority::default();

        assert!(frontier.push(job, p, &url("https://a.test/1"), 0).accepted());
        assert!(frontier.push(job, p, &url("https://a.test/2"), 1).accepted());
        assert_eq!(
            frontier.push(job, p, &url("https://a.test/3"), 1),
            PushOutcome::BudgetExhausted
        );
    }

    #[test]
    fn cancelled_job_entries_not_dispatched() {
        let job = JobId::new();
        let frontier = seeded(job, 100, 5);
        let p = JobPriority::default();

        frontier.push(job, p, &url("https://a.test/1"), 0);
        frontier.push(job, p, &url("https://a.test/2"), 1);
        frontier.cancel_job(job);

        assert!(frontier.try_pop().is_none());
        assert_eq!(
            frontier.push(job, p, &url("https://a.test/3"), 1),
            PushOutcome::Rejected
        );
    }

    #[test]
    fn drain_tracking() {
        let job = JobId::new();
        let frontier = seeded(job, 100, 5);
        let p = JobPriority::default();

        frontier.push(job, p, &url("https://a.test/1"), 0);
        assert!(!frontier.job_stats(job).is_drained());

        let entry = frontier.try_pop().unwrap();
        let stats = frontier.job_stats(job);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.in_flight, 1);
        assert!(!stats.is_drained());

        frontier.mark_done(entry.job);
        assert!(frontier.job_stats(job).is_drained());
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let job = JobId::new();
        let frontier = std::sync::Arc::new(seeded(job, 100, 5));

        let waiter = {
            let frontier = frontier.clone();
            tokio::spawn(async move { frontier.pop().await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        frontier.push(job, JobPriority::default(), &url("https://a.test/"), 0);

        let entry = waiter.await.unwrap().expect("entry dispatched");
        assert_eq!(entry.url, "https://a.test/");
    }

    #[tokio::test]
    async fn pop_returns_none_on_shutdown() {
        let frontier = std::sync::Arc::new(Frontier::new());
        let waiter = {
            let frontier = frontier.clone();
            tokio::spawn(async move { frontier.pop().await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        frontier.shutdown();
        assert!(waiter.await.unwrap().is_none());
    }
}
