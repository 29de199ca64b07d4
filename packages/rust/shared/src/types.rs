//! Core domain types for SiteMiner crawl jobs and scraped records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for crawl job identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Lifecycle state of a crawl job.
///
/// Transitions: `Pending → Progress → {Success, Failure}`, with
/// `→ Revoked` reachable from any non-terminal state via cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Progress,
    Success,
    Failure,
    Revoked,
}

impl JobState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Revoked)
    }

    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Self::Pending, Self::Progress) => true,
            (Self::Progress, Self::Success | Self::Failure) => true,
            // Cancellation is reachable from any non-terminal state.
            (_, Self::Revoked) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Progress => "PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Revoked => "REVOKED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROGRESS" => Ok(Self::Progress),
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            "REVOKED" => Ok(Self::Revoked),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// JobPriority / JobKind
// ---------------------------------------------------------------------------

/// Job priority in the range 1–9 (higher drains first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPriority(u8);

impl JobPriority {
    /// Clamp an arbitrary integer into the valid 1–9 range.
    pub fn new(value: u8) -> Self {
        Self(value.clamp(1, 9))
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        Self(5)
    }
}

/// What kind of crawl a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// BFS crawl of the whole site from the root URL.
    Full,
    /// Fixed set of business pages (/about, /contact, /terms, ...).
    Business,
}

// ---------------------------------------------------------------------------
// Scraped records
// ---------------------------------------------------------------------------

/// A product extracted from a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Contact information extracted from a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phones: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl ContactInfo {
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.phones.is_empty() && self.address.is_none()
    }
}

/// Coarse classification of a page, derived from its URL and content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Home,
    Product,
    Category,
    Contact,
    Article,
    General,
}

/// A deduplicated page with its extracted structure.
///
/// Identity is the content hash, not the URL: two URLs rendering identical
/// cleaned content collapse to one record. The hash is computed after
/// content cleaning, so formatting-only differences collapse too.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    /// Partition key: host, lowercased, `www.` prefix stripped.
    pub site: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Cleaned main content text.
    pub content: String,
    pub page_type: PageType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub products: Vec<ProductRecord>,
    #[serde(default, skip_serializing_if = "ContactInfo::is_empty")]
    pub contacts: ContactInfo,
    /// SHA-256 of the cleaned content, hex-encoded.
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
    pub word_count: usize,
}

/// Raw output of the content-extractor capability for one page, before
/// cleaning and deduplication.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub title: Option<String>,
    /// Main content text, as extracted (not yet cleaned).
    pub text: String,
    pub products: Vec<ProductRecord>,
    pub contacts: ContactInfo,
    /// Absolute link URLs discovered on the page.
    pub links: Vec<String>,
}

// ---------------------------------------------------------------------------
// OptimizationStats
// ---------------------------------------------------------------------------

/// Per-job deduplication and cleaning counters.
///
/// Computed incrementally while a job runs; immutable once the job reaches a
/// terminal state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OptimizationStats {
    pub pages_scraped: u64,
    pub duplicate_pages_skipped: u64,
    pub duplicate_content_removed: u64,
    pub duplicate_products_removed: u64,
    pub duplicate_contacts_removed: u64,
    pub content_cleaned: u64,
}

impl OptimizationStats {
    /// Total candidate items seen (unique + duplicate, across all types).
    pub fn total_candidates(&self) -> u64 {
        self.pages_scraped
            + self.duplicate_pages_skipped
            + self.duplicate_content_removed
            + self.duplicate_products_removed
            + self.duplicate_contacts_removed
    }

    /// Total items eliminated by dedup/cleaning.
    pub fn duplicates_removed(&self) -> u64 {
        self.duplicate_pages_skipped
            + self.duplicate_content_removed
            + self.duplicate_products_removed
            + self.duplicate_contacts_removed
    }

    /// Percentage of candidate items eliminated, clamped to `[0, 100]`.
    pub fn ratio(&self) -> f64 {
        let total = self.total_candidates();
        if total == 0 {
            return 0.0;
        }
        let ratio = (self.duplicates_removed() as f64 / total as f64) * 100.0;
        ratio.clamp(0.0, 100.0)
    }
}

// ---------------------------------------------------------------------------
// Progress / result snapshots
// ---------------------------------------------------------------------------

/// A point-in-time snapshot of job progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub state: JobState,
    pub pages_scraped: u64,
    pub pages_found: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    /// `min(99, scraped/target*100)` while running; snapped to 100 at SUCCESS.
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final output of a completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub records: Vec<PageRecord>,
    pub stats: OptimizationStats,
}

// ---------------------------------------------------------------------------
// Site helpers
// ---------------------------------------------------------------------------

/// Extract the site partition key from a URL: host, lowercased, with any
/// leading `www.` stripped.
pub fn site_of_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    host.strip_prefix("www.").unwrap_or(&host).to_string()
}
