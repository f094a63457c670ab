use crate::parser;
use crate::types::{AggregatorError, Entry, RawPayload, Result, SourceConfig};
use tracing::{debug, info};
use url::Url;

const API_ENDPOINT: &str = "https://export.arxiv.org/api/query";
const MAX_RESULTS: &str = "100";

/// Builds the arXiv export API request for a configured source. The endpoint
/// is either a full API URL (used verbatim) or a bare search expression such
/// as `cat:quant-ph AND abs:"ion trap"`.
pub fn request_url(endpoint: &str) -> Result<String> {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Url::parse(endpoint)?;
        return Ok(endpoint.to_string());
    }

    let mut url = Url::parse(API_ENDPOINT)?;
    url.query_pairs_mut()
        .append_pair("search_query", endpoint)
        .append_pair("sortBy", "submittedDate")
        .append_pair("sortOrder", "descending")
        .append_pair("start", "0")
        .append_pair("max_results", MAX_RESULTS);
    Ok(url.into())
}

/// Normalizes an arXiv API response (Atom) into entry candidates. The entry
/// id carries the arXiv identifier, which becomes the identity key with its
/// version suffix stripped.
pub fn normalize(payload: &RawPayload, source: &SourceConfig) -> Result<Vec<Entry>> {
    let feed = feed_rs::parser::parse(payload.body.as_bytes()).map_err(|e| {
        AggregatorError::Parse {
            source_name: source.name.clone(),
            detail: e.to_string(),
        }
    })?;

    let total = feed.entries.len();
    let mut entries = Vec::with_capacity(total);
    for item in feed.entries {
        match normalize_item(item, payload, source) {
            Some(entry) => entries.push(entry),
            None => debug!("Skipping malformed arXiv result in {}", source.name),
        }
    }

    info!(
        "Normalized {}/{} arXiv results from {}",
        entries.len(),
        total,
        source.name
    );
    Ok(entries)
}

fn normalize_item(
    item: feed_rs::model::Entry,
    payload: &RawPayload,
    source: &SourceConfig,
) -> Option<Entry> {
    let title = item
        .title
        .map(|t| parser::clean_html(&t.content))
        .filter(|t| !t.is_empty())?;

    // The abstract page is the canonical link; a DOI link shows up as a
    // rel="related" entry once a paper is published.
    let canonical_url = item
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| item.links.first())
        .map(|l| l.href.clone())
        .unwrap_or_else(|| item.id.clone());
    if canonical_url.is_empty() {
        return None;
    }

    let authors: Vec<String> = item
        .authors
        .into_iter()
        .map(|a| a.name)
        .filter(|name| !name.trim().is_empty())
        .collect();

    let mut key_candidates: Vec<&str> = vec![item.id.as_str(), canonical_url.as_str()];
    for l in &item.links {
        key_candidates.push(l.href.as_str());
    }
    let identity_key =
        parser::derive_identity_key(&key_candidates, &title, authors.first().map(|s| s.as_str()));

    let abstract_text = item
        .summary
        .map(|s| parser::clean_html(&s.content))
        .unwrap_or_default();

    let published_at = item
        .published
        .or(item.updated)
        .map(|dt| dt.with_timezone(&chrono::Utc));

    Some(Entry {
        identity_key,
        title,
        abstract_text,
        authors,
        published_at,
        source_name: source.name.clone(),
        source_url: source.endpoint.clone(),
        canonical_url,
        categories: source.category_hints.clone(),
        first_seen_at: payload.fetched_at,
        last_seen_at: payload.fetched_at,
    })
}
