//! Shared types, error model, and configuration for SiteMiner.
//!
//! This crate is the foundation depended on by all other SiteMiner crates.
//! It provides:
//! - [`SiteMinerError`] — the unified error type
//! - Domain types ([`PageRecord`], [`OptimizationStats`], [`JobId`], [`JobState`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, CrawlDefaults, LlmConfig, RetrievalConfig, StorageConfig, config_dir,
    config_file_path, expand_tilde, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{Result, SiteMinerError};
pub use types::{
    ContactInfo, Extraction, JobId, JobKind, JobPriority, JobProgress, JobResult, JobState,
    OptimizationStats, PageRecord, PageType, ProductRecord, site_of_url,
};
