//! CLI command definitions, routing, and tracing setup.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

use siteminer_core::{
    Answer, LanguageModel, OpenAiModel, ProgressReporter, SiteMiner,
};
use siteminer_shared::{
    AppConfig, JobId, JobKind, JobPriority, JobProgress, JobState, init_config, load_config,
    site_of_url, validate_api_key,
};

/// Poll interval while waiting on a running job.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// SiteMiner — crawl websites into a deduplicated, queryable store.
#[derive(Parser)]
#[command(
    name = "siteminer",
    version,
    about = "Crawl websites, deduplicate their content, and ask questions about it.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Initialize the config file with defaults.
    Init,

    /// Crawl a website into its site partition.
    Crawl {
        /// Root URL to crawl.
        url: String,

        /// Page-count target (defaults to the configured value).
        #[arg(short, long)]
        pages: Option<u64>,

        /// Job priority, 1 (lowest) to 9 (highest).
        #[arg(long, default_value = "5")]
        priority: u8,

        /// Visit only business pages (about, contact, terms, ...) instead
        /// of following links.
        #[arg(long)]
        business: bool,
    },

    /// Ask a question about crawled content.
    Ask {
        /// The question to answer.
        question: String,

        /// Restrict retrieval to one site (defaults to all sites).
        #[arg(short, long)]
        site: Option<String>,

        /// Number of chunks to retrieve.
        #[arg(short, long)]
        k: Option<usize>,

        /// Keep the session open for follow-up questions.
        #[arg(long)]
        chat: bool,
    },

    /// Generate a business-insights report for a crawled site.
    Insights {
        /// Site to report on.
        site: String,
    },

    /// List all crawled site partitions.
    Sites,

    /// Show counters for one site partition.
    Stats {
        /// Site to inspect.
        site: String,
    },

    /// Delete a site partition: its chunks, dedup index, and counters.
    #[command(name = "delete-site")]
    DeleteSite {
        /// Site to delete.
        site: String,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "siteminer=info",
        1 => "siteminer=debug",
        _ => "siteminer=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init => cmd_init(),
        Command::Crawl {
            url,
            pages,
            priority,
            business,
        } => cmd_crawl(&url, pages, priority, business).await,
        Command::Ask {
            question,
            site,
            k,
            chat,
        } => cmd_ask(&question, site.as_deref(), k, chat).await,
        Command::Insights { site } => cmd_insights(&site).await,
        Command::Sites => cmd_sites().await,
        Command::Stats { site } => cmd_stats(&site).await,
        Command::DeleteSite { site } => cmd_delete_site(&site).await,
    }
}

/// Model used by commands that never generate an answer.
struct NoModel;

#[async_trait]
impl LanguageModel for NoModel {
    async fn complete(&self, _prompt: &str) -> siteminer_shared::Result<String> {
        Err(siteminer_shared::SiteMinerError::Model(
            "no language model configured for this command".into(),
        ))
    }
}

async fn engine_without_model(config: AppConfig) -> Result<SiteMiner> {
    Ok(SiteMiner::new(config, Arc::new(NoModel)).await?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_crawl(url: &str, pages: Option<u64>, priority: u8, business: bool) -> Result<()> {
    let config = load_config()?;
    let parsed = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
    let site = site_of_url(&parsed);

    let kind = if business {
        JobKind::Business
    } else {
        JobKind::Full
    };

    info!(url, %site, ?kind, "starting crawl");

    let engine = engine_without_model(config).await?;
    let reporter = Arc::new(CliProgress::new());
    let job = engine
        .create_job_with_progress(
            url,
            kind,
            JobPriority::new(priority),
            pages,
            Arc::clone(&reporter) as _,
        )
        .await?;

    let progress = wait_for_job(&engine, job).await?;
    reporter.clear();

    match progress.state {
        JobState::Success => {
            let result = engine.get_result(job)?;
            let stats = result.stats;
            println!();
            println!("  Crawl finished!");
            println!("  Site:              {site}");
            println!("  Pages stored:      {}", stats.pages_scraped);
            println!("  Duplicates pruned: {}", stats.duplicates_removed());
            println!("  Content cleaned:   {}", stats.content_cleaned);
            println!();
            println!("  Ask about it with: siteminer ask \"...\" --site {site}");
            println!();
            engine.release_job(job)?;
        }
        state => {
            let reason = progress.error.unwrap_or_else(|| "unknown".into());
            engine.shutdown().await;
            return Err(eyre!("crawl ended as {state}: {reason}"));
        }
    }

    engine.shutdown().await;
    Ok(())
}

async fn cmd_ask(question: &str, site: Option<&str>, k: Option<usize>, chat: bool) -> Result<()> {
    let config = load_config()?;
    validate_api_key(&config)?;
    let model = Arc::new(OpenAiModel::from_config(&config.llm)?);
    let history_limit = config.retrieval.history_limit;

    let engine = SiteMiner::new(config, model).await?;

    if chat {
        let mut conversation =
            engine.conversation(site.map(String::from), history_limit);
        print_answer(&conversation.ask(question).await?);

        loop {
            print!("> ");
            std::io::stdout().flush()?;
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line)? == 0 {
                break;
            }
            let follow_up = line.trim();
            if follow_up.is_empty() || follow_up == "exit" {
                break;
            }
            print_answer(&conversation.ask(follow_up).await?);
        }
    } else {
        let answer = match site {
            Some(site) => engine.query_site(site, question, k).await?,
            None => engine.ask(question, k).await?,
        };
        print_answer(&answer);
    }

    engine.shutdown().await;
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!();
    println!("{}", answer.text);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &answer.sources {
            println!("  - {} ({:.3})", source.url, source.distance);
        }
    }
    println!();
}

async fn cmd_insights(site: &str) -> Result<()> {
    let config = load_config()?;
    validate_api_key(&config)?;
    let model = Arc::new(OpenAiModel::from_config(&config.llm)?);
    let engine = SiteMiner::new(config, model).await?;

    if engine.site_stats(site).await?.is_none() {
        engine.shutdown().await;
        return Err(eyre!("no partition for site '{site}' — crawl it first"));
    }

    let report = engine.site_insights(site).await?;
    println!();
    println!("Business insights for {}", report.site);
    for insight in &report.insights {
        println!();
        println!("Q: {}  (confidence {:.0}%)", insight.question, insight.confidence * 100.0);
        println!("{}", insight.answer);
        if let Some(best) = insight.sources.first() {
            println!("   source: {}", best.url);
        }
    }
    println!();

    engine.shutdown().await;
    Ok(())
}

async fn cmd_sites() -> Result<()> {
    let engine = engine_without_model(load_config()?).await?;
    let sites = engine.list_sites().await?;

    if sites.is_empty() {
        println!("No sites crawled yet. Start with: siteminer crawl <url>");
    } else {
        println!("{:<40} {:>8} {:>8}  {}", "SITE", "PAGES", "CHUNKS", "UPDATED");
        for s in &sites {
            println!(
                "{:<40} {:>8} {:>8}  {}",
                s.site,
                s.pages,
                s.chunks,
                s.updated_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    engine.shutdown().await;
    Ok(())
}

async fn cmd_stats(site: &str) -> Result<()> {
    let engine = engine_without_model(load_config()?).await?;
    match engine.site_stats(site).await? {
        Some(stats) => {
            println!("Site:    {}", stats.site);
            println!("Pages:   {}", stats.pages);
            println!("Chunks:  {}", stats.chunks);
            println!("Updated: {}", stats.updated_at.to_rfc3339());
        }
        None => println!("No partition for site '{site}'."),
    }

    engine.shutdown().await;
    Ok(())
}

async fn cmd_delete_site(site: &str) -> Result<()> {
    let engine = engine_without_model(load_config()?).await?;
    if engine.site_stats(site).await?.is_none() {
        engine.shutdown().await;
        return Err(eyre!("no partition for site '{site}'"));
    }

    engine.delete_site(site).await?;
    println!("Deleted site partition '{site}'.");

    engine.shutdown().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Job waiting and CLI progress
// ---------------------------------------------------------------------------

async fn wait_for_job(engine: &SiteMiner, job: JobId) -> Result<JobProgress> {
    loop {
        let progress = engine.get_progress(job).await?;
        if progress.state.is_terminal() {
            return Ok(progress);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Progress reporter rendering an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {percent}% {msg}")
                .unwrap()
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    fn clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn started(&self, job: &siteminer_core::CrawlJob) {
        self.bar
            .set_message(format!("crawling {}", job.root_url));
    }

    fn progress(&self, progress: &JobProgress) {
        self.bar.set_position(progress.percentage as u64);
        if let Some(url) = &progress.current_url {
            self.bar.set_message(format!(
                "[{} scraped / {} found] {url}",
                progress.pages_scraped, progress.pages_found
            ));
        }
    }

    fn finished(&self, _job: JobId, _state: JobState) {
        self.bar.finish_and_clear();
    }
}
