use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Prefix marking identity keys hashed from title+author rather than taken
/// from a canonical identifier.
pub const FALLBACK_KEY_PREFIX: &str = "tah:";

/// One normalized, de-duplicated research item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Stable identifier: arXiv id, DOI, or a title+author hash fallback.
    /// Unique within the store; two entries sharing a key are the same item.
    pub identity_key: String,
    pub title: String,
    pub abstract_text: String,
    pub authors: Vec<String>,
    /// Missing when the source carried no date. Never defaulted to "now";
    /// ordering falls back to `first_seen_at` explicitly.
    pub published_at: Option<DateTime<Utc>>,
    pub source_name: String,
    pub source_url: String,
    pub canonical_url: String,
    /// Topic tags: source hints plus taxonomy matches. Never part of identity.
    pub categories: BTreeSet<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Entry {
    /// Sort timestamp for queries: the published date when the source carried
    /// one, otherwise the first sighting.
    pub fn effective_published(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.first_seen_at)
    }

    /// True when the identity key is the hashed title+author fallback rather
    /// than a canonical identifier.
    pub fn has_fallback_key(&self) -> bool {
        self.identity_key.starts_with(FALLBACK_KEY_PREFIX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    RssAtom,
    ArxivQuery,
}

/// One configured feed or query source. Immutable once loaded for a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    /// Feed URL for `rss_atom`; arXiv search expression (or full API URL)
    /// for `arxiv_query`.
    pub endpoint: String,
    #[serde(default)]
    pub category_hints: BTreeSet<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    1800
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_concurrent_fetches: usize,
    /// Minimum spacing between requests to the same host. Also keeps the
    /// arXiv API happy, which asks clients not to hammer it.
    pub min_host_interval_ms: u64,
    pub max_payload_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "paper-aggregator/0.1".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_ms: 5_000,
            max_concurrent_fetches: 8,
            min_host_interval_ms: 1_000,
            max_payload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Raw source output before normalization.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub source_name: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("permanent fetch failure for {source_name}: {detail}")]
    FetchPermanent { source_name: String, detail: String },

    #[error("transient fetch failure for {source_name}: {detail}")]
    FetchTransient { source_name: String, detail: String },

    #[error("parse error in {source_name}: {detail}")]
    Parse { source_name: String, detail: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AggregatorError {
    /// Failures worth retrying within the same cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, AggregatorError::FetchTransient { .. })
    }
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
