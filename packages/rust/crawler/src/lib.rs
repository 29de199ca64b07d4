//! Concurrent site crawler: fetch capability, content extraction, and the
//! worker pool that drains the crawl frontier.
//!
//! This crate provides:
//! - [`fetch`] — the [`PageFetcher`] capability and its reqwest default
//! - [`extract`] — the [`ContentExtractor`] capability and its DOM default
//! - [`worker`] — the [`WorkerPool`] with retry/backoff and job-fatal gates

pub mod extract;
pub mod fetch;
pub mod worker;

pub use extract::{ContentExtractor, DomExtractor};
pub use fetch::{FetchOutcome, HttpFetcher, PageFetcher};
pub use worker::{PageSink, WorkerPool, backoff_delay};
