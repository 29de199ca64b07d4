//! Query router: retrieval, context assembly, and answer generation.
//!
//! Retrieval happens against the site-partitioned store; the bounded context
//! window is assembled from the top chunks (each truncated to the configured
//! character limit) and handed to the [`LanguageModel`] capability. Repeat
//! questions are served from a TTL cache keyed by the normalized
//! (question, site) pair.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, instrument};

use siteminer_shared::{LlmConfig, Result, RetrievalConfig, SiteMinerError};
use siteminer_store::{RetrievedChunk, SiteStore};

/// Answer returned when retrieval finds nothing relevant.
const NO_CONTENT_ANSWER: &str = "No crawled content matched this question.";

/// Questions answered for a site-level insights report.
const INSIGHT_QUESTIONS: &[&str] = &[
    "What products or services are offered?",
    "How can customers get in contact?",
    "What are the shipping, return, and refund policies?",
    "Where is the business located and when is it open?",
    "What does the business say makes it stand out?",
];

/// Capability trait for answer generation.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Where an answer's supporting chunk came from.
#[derive(Debug, Clone)]
pub struct SourceAttribution {
    pub site: String,
    pub url: String,
    pub title: Option<String>,
    /// Cosine distance of the chunk to the question (lower is closer).
    pub distance: f32,
}

/// A generated answer with its ranked sources.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceAttribution>,
    /// Whether this answer was served from the response cache.
    pub cached: bool,
}

/// One answered insight question.
#[derive(Debug, Clone)]
pub struct Insight {
    pub question: String,
    pub answer: String,
    /// Heuristic answer confidence in `[0, 1]`.
    pub confidence: f32,
    pub sources: Vec<SourceAttribution>,
}

/// Business-insights report for one site.
#[derive(Debug, Clone)]
pub struct SiteInsights {
    pub site: String,
    pub insights: Vec<Insight>,
}

// ---------------------------------------------------------------------------
// QueryRouter
// ---------------------------------------------------------------------------

struct CacheEntry {
    answer: Answer,
    at: Instant,
}

/// Routes questions to one site partition or across all of them.
pub struct QueryRouter {
    store: Arc<SiteStore>,
    model: Arc<dyn LanguageModel>,
    config: RetrievalConfig,
    cache: Mutex<HashMap<(String, Option<String>), CacheEntry>>,
}

impl QueryRouter {
    pub fn new(
        store: Arc<SiteStore>,
        model: Arc<dyn LanguageModel>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            model,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Answer a question from crawled content.
    ///
    /// With `site = Some(..)` retrieval is scoped to that partition;
    /// with `None` all partitions are ranked together.
    #[instrument(skip_all, fields(site = site.unwrap_or("*")))]
    pub async fn ask(
        &self,
        question: &str,
        site: Option<&str>,
        k: Option<usize>,
    ) -> Result<Answer> {
        let key = (normalize_question(question), site.map(str::to_string));
        if let Some(answer) = self.cache_get(&key) {
            debug!("response cache hit");
            return Ok(answer);
        }

        let answer = self.answer(question, question, site, k, "").await?;
        self.cache_put(key, &answer);
        Ok(answer)
    }

    /// Build a business-insights report for one site: every configured
    /// question answered against the site's partition, with a confidence
    /// score derived from the supporting chunks.
    #[instrument(skip_all, fields(site))]
    pub async fn insights(&self, site: &str) -> Result<SiteInsights> {
        let mut insights = Vec::with_capacity(INSIGHT_QUESTIONS.len());
        for question in INSIGHT_QUESTIONS {
            let answer = self.ask(question, Some(site), None).await?;
            let confidence = answer_confidence(&answer.sources, self.config.top_k);
            insights.push(Insight {
                question: (*question).to_string(),
                answer: answer.text,
                confidence,
                sources: answer.sources,
            });
        }
        Ok(SiteInsights {
            site: site.to_string(),
            insights,
        })
    }

    /// Answer with conversation history biasing retrieval. Bypasses the
    /// response cache since history makes every call unique.
    pub(crate) async fn ask_with_history(
        &self,
        question: &str,
        site: Option<&str>,
        history: &VecDeque<(String, String)>,
    ) -> Result<Answer> {
        let mut retrieval_text = String::new();
        for (past_question, _) in history {
            retrieval_text.push_str(past_question);
            retrieval_text.push(' ');
        }
        retrieval_text.push_str(question);

        let mut history_block = String::new();
        if !history.is_empty() {
            history_block.push_str("Previous conversation:\n");
            for (q, a) in history {
                history_block.push_str(&format!("Q: {q}\nA: {a}\n"));
            }
            history_block.push('\n');
        }

        self.answer(question, &retrieval_text, site, None, &history_block)
            .await
    }

    async fn answer(
        &self,
        question: &str,
        retrieval_text: &str,
        site: Option<&str>,
        k: Option<usize>,
        history_block: &str,
    ) -> Result<Answer> {
        let k = k.unwrap_or(self.config.top_k);
        let chunks = self.store.query(site, retrieval_text, k).await?;
        if chunks.is_empty() {
            return Ok(Answer {
                text: NO_CONTENT_ANSWER.to_string(),
                sources: Vec::new(),
                cached: false,
            });
        }

        let context = build_context(&chunks, self.config.context_chunk_chars);
        let prompt = format!(
            "You are answering questions using content crawled from websites. \
             Answer from the context below; say so when the context is not enough.\n\n\
             Context:\n{context}\n\n{history_block}Question: {question}\nAnswer:"
        );

        let text = self.model.complete(&prompt).await?;
        let sources = chunks
            .iter()
            .map(|c| SourceAttribution {
                site: c.site.clone(),
                url: c.url.clone(),
                title: c.title.clone(),
                distance: c.distance,
            })
            .collect();

        Ok(Answer {
            text,
            sources,
            cached: false,
        })
    }

    fn cache_get(&self, key: &(String, Option<String>)) -> Option<Answer> {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        if ttl.is_zero() {
            return None;
        }
        let cache = self.cache.lock().expect("cache lock poisoned");
        cache.get(key).and_then(|entry| {
            if entry.at.elapsed() < ttl {
                let mut answer = entry.answer.clone();
                answer.cached = true;
                Some(answer)
            } else {
                None
            }
        })
    }

    fn cache_put(&self, key: (String, Option<String>), answer: &Answer) {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        if ttl.is_zero() {
            return;
        }
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        cache.retain(|_, entry| entry.at.elapsed() < ttl);
        cache.insert(
            key,
            CacheEntry {
                answer: answer.clone(),
                at: Instant::now(),
            },
        );
    }
}

/// Heuristic confidence for an answer: mean similarity of its supporting
/// chunks, scaled by how much of the requested context was actually found.
/// Zero when retrieval found nothing.
fn answer_confidence(sources: &[SourceAttribution], top_k: usize) -> f32 {
    if sources.is_empty() {
        return 0.0;
    }
    let mean_similarity = sources
        .iter()
        .map(|s| (1.0 - s.distance).clamp(0.0, 1.0))
        .sum::<f32>()
        / sources.len() as f32;
    let coverage = (sources.len() as f32 / top_k.max(1) as f32).min(1.0);
    (mean_similarity * coverage).clamp(0.0, 1.0)
}

/// Normalize a question for cache keying: lowercased, whitespace collapsed,
/// trailing punctuation dropped.
fn normalize_question(question: &str) -> String {
    question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_end_matches(['?', '!', '.'])
        .to_string()
}

/// Assemble the bounded context window: each chunk truncated to `max_chars`,
/// prefixed with its title/URL, sections separated by `---`.
fn build_context(chunks: &[RetrievedChunk], max_chars: usize) -> String {
    let sections: Vec<String> = chunks
        .iter()
        .map(|chunk| {
            let text: String = chunk.text.chars().take(max_chars).collect();
            let title = chunk.title.as_deref().unwrap_or("Untitled");
            format!("Title: {title}\nURL: {url}\n\n{text}", url = chunk.url)
        })
        .collect();
    sections.join("\n\n---\n\n")
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A stateful question/answer session with bounded history.
///
/// History biases retrieval toward the conversation's topic; once the limit
/// is reached the oldest exchange is evicted.
pub struct Conversation {
    router: Arc<QueryRouter>,
    site: Option<String>,
    history: VecDeque<(String, String)>,
    limit: usize,
}

impl Conversation {
    pub fn new(router: Arc<QueryRouter>, site: Option<String>, limit: usize) -> Self {
        Self {
            router,
            site,
            history: VecDeque::new(),
            limit,
        }
    }

    pub async fn ask(&mut self, question: &str) -> Result<Answer> {
        let answer = self
            .router
            .ask_with_history(question, self.site.as_deref(), &self.history)
            .await?;

        self.history
            .push_back((question.to_string(), answer.text.clone()));
        while self.history.len() > self.limit {
            self.history.pop_front();
        }
        Ok(answer)
    }

    pub fn history(&self) -> &VecDeque<(String, String)> {
        &self.history
    }
}

// ---------------------------------------------------------------------------
// Default model over an OpenAI-compatible API
// ---------------------------------------------------------------------------

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiModel {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            SiteMinerError::config(format!(
                "LLM API key not found. Set the {} environment variable.",
                config.api_key_env
            ))
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: config.default_model.clone(),
            base_url: "https://api.openai.com/v1".to_string(),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SiteMinerError::Model(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SiteMinerError::Model(format!("HTTP {status}")));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SiteMinerError::Model(e.to_string()))?;

        value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SiteMinerError::Model("malformed completion response".into()))
    }
}
