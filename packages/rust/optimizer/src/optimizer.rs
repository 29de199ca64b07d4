//! Data optimizer: page/product/contact deduplication and per-job stats.
//!
//! The optimizer consumes raw extraction results, cleans content, computes
//! fingerprints, and drops anything already seen within the record's site.
//! Content identity is scoped per site: the same content on two different
//! sites is kept once per site. Duplicate indexes are keyed by the site
//! partition so no single global lock becomes a bottleneck for stats reads.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::Utc;
use tracing::debug;
use url::Url;

use siteminer_shared::{
    ContactInfo, Extraction, JobId, OptimizationStats, PageRecord, PageType, site_of_url,
};

use crate::clean::clean_content;
use crate::fingerprint::{
    fingerprint_email, fingerprint_phone, fingerprint_product, fingerprint_text,
};

/// Outcome of ingesting one page extraction.
#[derive(Debug)]
pub enum IngestOutcome {
    /// First time this content was seen for the site.
    Unique(Box<PageRecord>),
    /// Content hash already present for the site; the page was discarded.
    DuplicatePage { content_hash: String },
}

impl IngestOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicatePage { .. })
    }
}

#[derive(Debug, Default)]
struct SiteIndex {
    pages: HashSet<String>,
    products: HashSet<String>,
    contacts: HashSet<String>,
}

#[derive(Debug, Default)]
struct State {
    sites: HashMap<String, SiteIndex>,
    jobs: HashMap<JobId, OptimizationStats>,
}

/// Deduplicating optimizer shared by all workers of a job.
///
/// All operations are quick in-memory updates; callers never block on I/O.
pub struct DataOptimizer {
    state: Mutex<State>,
}

impl DataOptimizer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Clean, fingerprint, and deduplicate one page extraction.
    pub fn ingest(&self, job: JobId, url: &Url, extraction: Extraction) -> IngestOutcome {
        let cleaned = clean_content(&extraction.text);
        let content_hash = fingerprint_text(&cleaned.text);
        let site = site_of_url(url);

        let mut state = self.state.lock().expect("optimizer lock poisoned");
        let stats = state.jobs.entry(job).or_default();
        if cleaned.changed {
            stats.content_cleaned += 1;
        }

        let index = state.sites.entry(site.clone()).or_default();
        if !index.pages.insert(content_hash.clone()) {
            debug!(%url, hash = %content_hash, "duplicate page content, skipping");
            state.jobs.entry(job).or_default().duplicate_pages_skipped += 1;
            return IngestOutcome::DuplicatePage { content_hash };
        }

        // Dedup structured records within the site, including repeats on the
        // same page.
        let mut duplicate_products = 0u64;
        let mut products = Vec::with_capacity(extraction.products.len());
        for product in extraction.products {
            if index.products.insert(fingerprint_product(&product)) {
                products.push(product);
            } else {
                duplicate_products += 1;
            }
        }

        let mut duplicate_contacts = 0u64;
        let mut contacts = ContactInfo {
            address: extraction.contacts.address,
            ..ContactInfo::default()
        };
        for email in extraction.contacts.emails {
            if index.contacts.insert(fingerprint_email(&email)) {
                contacts.emails.push(email);
            } else {
                duplicate_contacts += 1;
            }
        }
        for phone in extraction.contacts.phones {
            if index.contacts.insert(fingerprint_phone(&phone)) {
                contacts.phones.push(phone);
            } else {
                duplicate_contacts += 1;
            }
        }

        let stats = state.jobs.entry(job).or_default();
        stats.pages_scraped += 1;
        stats.duplicate_products_removed += duplicate_products;
        stats.duplicate_contacts_removed += duplicate_contacts;
        drop(state);

        let word_count = cleaned.text.split_whitespace().count();
        let page_type = classify_page(url, extraction.title.as_deref(), &cleaned.text);

        IngestOutcome::Unique(Box::new(PageRecord {
            url: url.to_string(),
            site,
            title: extraction.title,
            content: cleaned.text,
            page_type,
            products,
            contacts,
            content_hash,
            fetched_at: Utc::now(),
            word_count,
        }))
    }

    /// Record a chunk rejected by the store's own dedup index.
    pub fn note_duplicate_content(&self, job: JobId, count: u64) {
        let mut state = self.state.lock().expect("optimizer lock poisoned");
        state.jobs.entry(job).or_default().duplicate_content_removed += count;
    }

    /// Snapshot of a job's running stats.
    pub fn stats(&self, job: JobId) -> OptimizationStats {
        let state = self.state.lock().expect("optimizer lock poisoned");
        state.jobs.get(&job).copied().unwrap_or_default()
    }

    /// Remove and return a finished job's stats. The returned value is the
    /// final, immutable snapshot.
    pub fn finish_job(&self, job: JobId) -> OptimizationStats {
        let mut state = self.state.lock().expect("optimizer lock poisoned");
        state.jobs.remove(&job).unwrap_or_default()
    }
}

impl Default for DataOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Page classification
// ---------------------------------------------------------------------------

/// Classify a page from its URL and content, coarsely.
pub fn classify_page(url: &Url, title: Option<&str>, content: &str) -> PageType {
    let path = url.path().to_ascii_lowercase();
    let content_lower: String = content.chars().take(2_000).collect::<String>().to_lowercase();
    let _ = title;

    if ["product", "item", "goods", "buy", "shop"]
        .iter()
        .any(|w| path.contains(w))
        || ["add to cart", "buy now"].iter().any(|w| content_lower.contains(w))
    {
        return PageType::Product;
    }
    if ["category", "catalog", "collection"].iter().any(|w| path.contains(w)) {
        return PageType::Category;
    }
    if ["contact", "about", "company"].iter().any(|w| path.contains(w)) {
        return PageType::Contact;
    }
    if ["blog", "article", "news", "post"].iter().any(|w| path.contains(w)) {
        return PageType::Article;
    }
    if path == "/" || path.is_empty() {
        return PageType::Home;
    }
    PageType::General
}
