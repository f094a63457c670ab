use crate::types::{AggregatorError, FetchConfig, Result, SourceConfig, SourceKind};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;
use url::Url;

/// Top-level TOML configuration: fetch/scheduler tuning, the topic taxonomy,
/// and the source list.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub taxonomy: TaxonomyConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub refresh_interval_secs: u64,
    pub cycle_timeout_secs: u64,
    pub retention_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 1800,
            cycle_timeout_secs: 120,
            // Journal feeds republish slowly; keep a six-month window.
            retention_days: 180,
        }
    }
}

/// Keyword taxonomy: each topic tag maps to its trigger phrases. Versioned so
/// a taxonomy change is visible in logs and snapshots of behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct TaxonomyConfig {
    #[serde(default = "default_taxonomy_version")]
    pub version: u32,
    pub topics: Vec<TopicConfig>,
}

fn default_taxonomy_version() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicConfig {
    pub tag: String,
    pub phrases: Vec<String>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&raw)
            .map_err(|e| AggregatorError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        info!(
            "Loaded config: {} sources, taxonomy v{} with {} topics",
            config.sources.len(),
            config.taxonomy.version,
            config.taxonomy.topics.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(AggregatorError::Config("source with empty name".to_string()));
            }
            if !names.insert(source.name.as_str()) {
                return Err(AggregatorError::Config(format!(
                    "duplicate source name: {}",
                    source.name
                )));
            }
            if source.endpoint.trim().is_empty() {
                return Err(AggregatorError::Config(format!(
                    "source {} has an empty endpoint",
                    source.name
                )));
            }
            // Feed endpoints must be fetchable URLs; arXiv endpoints may be
            // bare search expressions, validated at request-build time.
            if source.kind == SourceKind::RssAtom {
                let url = Url::parse(&source.endpoint)?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(AggregatorError::Config(format!(
                        "source {} endpoint must be http(s): {}",
                        source.name, source.endpoint
                    )));
                }
            }
        }
        for topic in &self.taxonomy.topics {
            if topic.tag.trim().is_empty() {
                return Err(AggregatorError::Config("taxonomy topic with empty tag".to_string()));
            }
            if topic.phrases.iter().all(|p| p.trim().is_empty()) {
                return Err(AggregatorError::Config(format!(
                    "taxonomy topic {} has no usable phrases",
                    topic.tag
                )));
            }
        }
        Ok(())
    }
}
