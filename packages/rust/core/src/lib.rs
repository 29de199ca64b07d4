//! Core orchestration for SiteMiner.
//!
//! This crate ties the frontier, crawler, optimizer, and store together
//! into end-to-end crawl jobs, and layers retrieval-backed question
//! answering on top:
//! - [`jobs`] — the in-memory job registry and state machine
//! - [`pipeline`] — per-job orchestration from seed to terminal state
//! - [`router`] — retrieval, context assembly, and answer generation
//! - [`engine`] — the [`SiteMiner`] facade applications talk to

pub mod engine;
pub mod jobs;
pub mod pipeline;
pub mod router;

pub use engine::SiteMiner;
pub use jobs::{CrawlJob, JobTracker};
pub use pipeline::{BUSINESS_PATHS, ProgressReporter, SilentProgress};
pub use router::{
    Answer, Conversation, Insight, LanguageModel, OpenAiModel, QueryRouter, SiteInsights,
    SourceAttribution,
};
