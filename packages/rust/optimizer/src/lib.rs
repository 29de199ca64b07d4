//! Data optimization: content cleaning, fingerprinting, and deduplication.
//!
//! Sits between the crawler and the store. Workers hand raw extractions to
//! [`DataOptimizer::ingest`]; unique pages come back as [`PageRecord`]s ready
//! for storage, duplicates are dropped and counted.
//!
//! [`PageRecord`]: siteminer_shared::PageRecord

pub mod clean;
pub mod fingerprint;
pub mod optimizer;

pub use clean::{Cleaned, clean_content};
pub use fingerprint::{
    fingerprint_email, fingerprint_phone, fingerprint_product, fingerprint_text,
};
pub use optimizer::{DataOptimizer, IngestOutcome, classify_page};
