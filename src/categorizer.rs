use crate::config::TaxonomyConfig;
use crate::types::{AggregatorError, Entry, Result};
use regex::Regex;
use std::collections::BTreeSet;
use tracing::info;

/// Compiled topic taxonomy. Each topic's trigger phrases become one
/// case-insensitive, word-boundary-anchored alternation, so "ion trap" also
/// matches "ion-trap" but "ion" never fires inside "region". Stateless after
/// construction; categorization is deterministic and re-runnable.
pub struct Taxonomy {
    version: u32,
    topics: Vec<Topic>,
}

struct Topic {
    tag: String,
    pattern: Regex,
}

impl Taxonomy {
    pub fn from_config(config: &TaxonomyConfig) -> Result<Self> {
        let mut topics = Vec::with_capacity(config.topics.len());
        for topic in &config.topics {
            let pattern = compile_phrases(&topic.phrases).map_err(|e| {
                AggregatorError::Config(format!("taxonomy topic {}: {}", topic.tag, e))
            })?;
            topics.push(Topic {
                tag: topic.tag.clone(),
                pattern,
            });
        }
        info!(
            "Compiled taxonomy v{} with {} topics",
            config.version,
            topics.len()
        );
        Ok(Self {
            version: config.version,
            topics,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Tags matched by title+abstract. Source hints are handled separately
    /// (seeded on the entry at normalization time).
    pub fn matches(&self, title: &str, abstract_text: &str) -> BTreeSet<String> {
        let text = format!("{} {}", title, abstract_text);
        self.topics
            .iter()
            .filter(|topic| topic.pattern.is_match(&text))
            .map(|topic| topic.tag.clone())
            .collect()
    }

    /// Re-runnable tagging pass: adds taxonomy matches to whatever hints the
    /// entry already carries.
    pub fn categorize(&self, entry: &mut Entry) {
        entry
            .categories
            .extend(self.matches(&entry.title, &entry.abstract_text));
    }
}

/// One alternation per topic; phrase-internal spaces and hyphens match
/// interchangeably.
fn compile_phrases(phrases: &[String]) -> std::result::Result<Regex, regex::Error> {
    let alternates: Vec<String> = phrases
        .iter()
        .filter(|p| !p.trim().is_empty())
        .map(|phrase| {
            phrase
                .split(|c: char| c.is_whitespace() || c == '-')
                .filter(|w| !w.is_empty())
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"[\s\-]+")
        })
        .collect();
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternates.join("|")))
}
