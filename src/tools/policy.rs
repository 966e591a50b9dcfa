//! Policy passage retriever.
//!
//! Fetches a pricing policy page, splits it into candidate text blocks,
//! scores each block against a query and returns the best `k`. Ranked
//! passages are cached per exact `(url, query)` pair for the life of the
//! retriever, or until [`PolicyRetriever::clear_cache`] is called.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::{RequestConfig, RetrievalConfig};
use crate::error::{RetrievalError, RetrievalResult};

/// Pricing vocabulary; each term present adds half a point.
pub const PRICING_KEYWORDS: &[&str] = &[
    "price",
    "pricing",
    "cost",
    "fee",
    "membership",
    "monthly",
    "annual",
    "per ride",
    "per minute",
    "unlock",
    "surcharge",
    "overage",
    "included",
    "pass",
    "plan",
];

/// Class/id fragments that mark an element as pricing content.
const PRICING_MARKERS: &[&str] = &[
    "price", "pricing", "fare", "fee", "plan", "cost", "membership", "pass",
];

/// Generic text-bearing elements considered as passages.
const TEXT_TAGS: &[&str] = &[
    "p", "li", "td", "th", "dd", "dt", "span", "strong", "blockquote", "figcaption",
];

const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// A scored snippet of policy text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Passage {
    /// Whitespace-normalized block text.
    pub text: String,
    /// Where the block came from (`h1`, `pricing:div`, `p`, ...).
    pub source_label: String,
    /// Relevance score; always positive.
    pub score: f64,
}

/// Passages returned for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retrieval {
    pub passages: Vec<Passage>,
}

/// Kind of element a candidate block was taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSource {
    /// `h1`..`h6`
    Heading(u8),
    /// Element whose class or id names pricing content.
    Pricing(String),
    /// Generic text element.
    Text(String),
}

impl BlockSource {
    /// Score bonus: +2 for a top-level heading, +1 for a sub-heading.
    pub fn bonus(&self) -> f64 {
        match self {
            BlockSource::Heading(1) => 2.0,
            BlockSource::Heading(_) => 1.0,
            _ => 0.0,
        }
    }

    pub fn label(&self) -> String {
        match self {
            BlockSource::Heading(level) => format!("h{}", level),
            BlockSource::Pricing(tag) => format!("pricing:{}", tag),
            BlockSource::Text(tag) => tag.clone(),
        }
    }
}

/// Source of raw policy page HTML.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the page body at `url`.
    async fn fetch(&self, url: &str) -> RetrievalResult<String>;
}

/// Fetches pages over HTTP with a bounded timeout and browser-like identity.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout_ms: u64,
}

impl HttpFetcher {
    /// Create a new fetcher
    pub fn new(config: &RequestConfig) -> RetrievalResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(RetrievalError::Client)?;

        Ok(Self {
            client,
            timeout_ms: config.timeout_ms,
        })
    }

    fn classify_error(&self, url: &str, error: reqwest::Error) -> RetrievalError {
        if error.is_timeout() {
            RetrievalError::Timeout {
                url: url.to_string(),
                timeout_ms: self.timeout_ms,
            }
        } else {
            RetrievalError::FetchFailed {
                url: url.to_string(),
                source: error,
            }
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> RetrievalResult<String> {
        let start = Instant::now();

        let response = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| self.classify_error(url, e))?
            .error_for_status()
            .map_err(|e| self.classify_error(url, e))?;

        let body = response
            .text()
            .await
            .map_err(|e| self.classify_error(url, e))?;

        info!(
            url = %url,
            bytes = body.len(),
            latency_ms = start.elapsed().as_millis(),
            "Policy page fetched"
        );
        Ok(body)
    }
}

type CacheKey = (String, String);

/// Query-scoped passage retrieval over policy pages.
pub struct PolicyRetriever {
    fetcher: Arc<dyn PageFetcher>,
    cache: RwLock<HashMap<CacheKey, Vec<Passage>>>,
    config: RetrievalConfig,
}

impl PolicyRetriever {
    /// Create a retriever over an arbitrary page source.
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: RetrievalConfig) -> Self {
        Self {
            fetcher,
            cache: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Create a retriever that fetches over HTTP.
    pub fn http(request: &RequestConfig, config: RetrievalConfig) -> RetrievalResult<Self> {
        Ok(Self::new(Arc::new(HttpFetcher::new(request)?), config))
    }

    /// Return the top-`k` passages of `url` for `query`.
    pub async fn retrieve(&self, url: &str, query: &str, k: usize) -> RetrievalResult<Retrieval> {
        validate_url(url)?;

        let key = (url.to_string(), query.to_string());
        if let Some(ranked) = self.cache.read().await.get(&key) {
            debug!(url = %url, query = %query, "Passage cache hit");
            return Ok(Retrieval {
                passages: ranked.iter().take(k).cloned().collect(),
            });
        }

        let html = self.fetcher.fetch(url).await?;
        let ranked = rank_passages(&html, query, &self.config);

        debug!(
            url = %url,
            query = %query,
            candidates = ranked.len(),
            "Passages ranked"
        );

        let passages = ranked.iter().take(k).cloned().collect();
        self.cache.write().await.insert(key, ranked);

        Ok(Retrieval { passages })
    }

    /// Drop every cached ranking; the next retrieval re-fetches.
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    /// Number of cached `(url, query)` rankings.
    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn validate_url(url: &str) -> RetrievalResult<()> {
    let parsed = url::Url::parse(url).map_err(|e| RetrievalError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(RetrievalError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", scheme),
        }),
    }
}

/// A text block lifted from the page, before scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub text: String,
    pub source: BlockSource,
}

/// Collect candidate blocks in document order.
///
/// Keeps blocks whose length is strictly between the configured bounds and
/// drops exact duplicate texts after their first occurrence.
pub fn extract_candidates(html: &str, config: &RetrievalConfig) -> Vec<Candidate> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for element in document.root_element().descendants().filter_map(ElementRef::wrap) {
        let Some(source) = classify(&element) else {
            continue;
        };

        let text = visible_text(&element);
        let length = text.chars().count();
        if length <= config.min_passage_chars || length >= config.max_passage_chars {
            continue;
        }
        if !seen.insert(text.clone()) {
            continue;
        }

        candidates.push(Candidate { text, source });
    }

    candidates
}

fn classify(element: &ElementRef) -> Option<BlockSource> {
    let name = element.value().name();

    if let Some(level) = name
        .strip_prefix('h')
        .and_then(|n| n.parse::<u8>().ok())
        .filter(|n| (1..=6).contains(n))
    {
        return Some(BlockSource::Heading(level));
    }

    if HIDDEN_TAGS.contains(&name) || matches!(name, "html" | "head" | "body" | "title") {
        return None;
    }

    let marker = [element.value().attr("class"), element.value().id()]
        .into_iter()
        .flatten()
        .map(str::to_lowercase)
        .any(|attr| PRICING_MARKERS.iter().any(|m| attr.contains(m)));
    if marker {
        return Some(BlockSource::Pricing(name.to_string()));
    }

    if TEXT_TAGS.contains(&name) {
        return Some(BlockSource::Text(name.to_string()));
    }

    None
}

fn visible_text(element: &ElementRef) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|el| HIDDEN_TAGS.contains(&el.value().name()));
        if !hidden {
            parts.push(&**text);
        }
    }

    parts
        .iter()
        .flat_map(|part| part.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased, de-duplicated query terms.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Score a block: 1 per query term found, 0.5 per pricing keyword, plus
/// the heading bonus.
pub fn score_block(text: &str, terms: &[String], source: &BlockSource) -> f64 {
    let lower = text.to_lowercase();

    let term_hits = terms.iter().filter(|t| lower.contains(t.as_str())).count() as f64;
    let keyword_hits = PRICING_KEYWORDS.iter().filter(|k| lower.contains(*k)).count() as f64;

    term_hits + keyword_hits * 0.5 + source.bonus()
}

/// Score every candidate and order by descending score, keeping document
/// order among ties. Zero-score blocks are dropped.
pub fn rank_passages(html: &str, query: &str, config: &RetrievalConfig) -> Vec<Passage> {
    let terms = query_terms(query);

    let mut passages: Vec<Passage> = extract_candidates(html, config)
        .into_iter()
        .filter_map(|candidate| {
            let score = score_block(&candidate.text, &terms, &candidate.source);
            (score > 0.0).then(|| Passage {
                source_label: candidate.source.label(),
                text: candidate.text,
                score,
            })
        })
        .collect();

    // sort_by is stable, so equal scores stay in document order
    passages.sort_by(|a, b| b.score.total_cmp(&a.score));
    passages
}
