//! Application configuration for SiteMiner.
//!
//! User config lives at `~/.siteminer/siteminer.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SiteMinerError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "siteminer.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".siteminer";

// ---------------------------------------------------------------------------
// Config structs (matching siteminer.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Crawl defaults.
    #[serde(default)]
    pub crawl: CrawlDefaults,

    /// Retrieval settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Language model settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlDefaults {
    /// Default page-count target per job.
    #[serde(default = "default_target_pages")]
    pub target_pages: u64,

    /// Number of concurrent fetch workers per job.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-fetch timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Retry ceiling for transient fetch errors.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Base backoff delay in milliseconds (doubled per attempt).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff cap in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Per-request delay in milliseconds to respect target-site load.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Discovery depth ceiling.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Job fails when failed/attempted exceeds this fraction.
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    /// Soft deadline per job in seconds (0 = none).
    #[serde(default = "default_job_deadline_secs")]
    pub job_deadline_secs: u64,
}

impl Default for CrawlDefaults {
    fn default() -> Self {
        Self {
            target_pages: default_target_pages(),
            workers: default_workers(),
            request_timeout_secs: default_timeout_secs(),
            retry_count: default_retry_count(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            request_delay_ms: default_request_delay_ms(),
            max_depth: default_max_depth(),
            error_rate_threshold: default_error_rate_threshold(),
            job_deadline_secs: default_job_deadline_secs(),
        }
    }
}

fn default_target_pages() -> u64 {
    100
}
fn default_workers() -> usize {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_retry_count() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_request_delay_ms() -> u64 {
    1_000
}
fn default_max_depth() -> u32 {
    5
}
fn default_error_rate_threshold() -> f64 {
    0.5
}
fn default_job_deadline_secs() -> u64 {
    1_800
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Chunk size in words for the vector store.
    #[serde(default = "default_chunk_size_words")]
    pub chunk_size_words: usize,

    /// Per-chunk character limit when assembling a context window.
    #[serde(default = "default_context_chunk_chars")]
    pub context_chunk_chars: usize,

    /// Default number of chunks retrieved per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Conversation history length (question/answer pairs).
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Response cache TTL in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size_words: default_chunk_size_words(),
            context_chunk_chars: default_context_chunk_chars(),
            top_k: default_top_k(),
            history_limit: default_history_limit(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_chunk_size_words() -> usize {
    1_000
}
fn default_context_chunk_chars() -> usize {
    2_000
}
fn default_top_k() -> usize {
    5
}
fn default_history_limit() -> usize {
    10
}
fn default_cache_ttl_secs() -> u64 {
    300
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Default model to use for answering.
    #[serde(default = "default_model")]
    pub default_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the database file (tilde-expanded at load).
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.siteminer/siteminer.db".into()
}

// ---------------------------------------------------------------------------
// Crawl config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration — merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub target_pages: u64,
    pub workers: usize,
    pub request_timeout_secs: u64,
    pub retry_count: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub request_delay_ms: u64,
    pub max_depth: u32,
    pub error_rate_threshold: f64,
    pub job_deadline_secs: u64,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        let c = &config.crawl;
        Self {
            target_pages: c.target_pages,
            workers: c.workers,
            request_timeout_secs: c.request_timeout_secs,
            retry_count: c.retry_count,
            backoff_base_ms: c.backoff_base_ms,
            backoff_max_ms: c.backoff_max_ms,
            request_delay_ms: c.request_delay_ms,
            max_depth: c.max_depth,
            error_rate_threshold: c.error_rate_threshold,
            job_deadline_secs: c.job_deadline_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.siteminer/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SiteMinerError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.siteminer/siteminer.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SiteMinerError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SiteMinerError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SiteMinerError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SiteMinerError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SiteMinerError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &str) -> Result<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| SiteMinerError::config("could not determine home directory"))?;
        Ok(home.join(rest))
    } else {
        Ok(PathBuf::from(path))
    }
}

/// Check that the LLM API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(SiteMinerError::config(format!(
            "LLM API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("target_pages"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.crawl.workers, 5);
        assert_eq!(parsed.retrieval.top_k, 5);
        assert_eq!(parsed.llm.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[crawl]
workers = 2
target_pages = 10
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.crawl.workers, 2);
        assert_eq!(config.crawl.target_pages, 10);
        assert_eq!(config.crawl.retry_count, 3);
        assert_eq!(config.retrieval.chunk_size_words, 1_000);
    }

    #[test]
    fn crawl_config_from_app_config() {
        let app = AppConfig::default();
        let crawl = CrawlConfig::from(&app);
        assert_eq!(crawl.workers, 5);
        assert_eq!(crawl.retry_count, 3);
        assert_eq!(crawl.request_delay_ms, 1_000);
        assert!((crawl.error_rate_threshold - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn tilde_expansion() {
        let expanded = expand_tilde("~/.siteminer/siteminer.db").unwrap();
        assert!(!expanded.to_string_lossy().contains('~'));
        assert!(expanded.ends_with(".siteminer/siteminer.db"));

        let absolute = expand_tilde("/var/lib/sm.db").unwrap();
        assert_eq!(absolute, PathBuf::from("/var/lib/sm.db"));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.llm.api_key_env = "SM_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
