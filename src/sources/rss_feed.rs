use crate::parser;
use crate::types::{AggregatorError, Entry, RawPayload, Result, SourceConfig};
use tracing::{debug, info};

/// Normalizes an RSS 2.0 or Atom payload into entry candidates. Items missing
/// a usable title or link are skipped; the rest of the batch survives.
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
            None => debug!("Skipping malformed item in {}", source.name),
        }
    }

    info!(
        "Normalized {}/{} items from feed {}",
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
    let link = item.links.first().map(|l| l.href.clone())?;

    let summary = item
        .summary
        .map(|s| s.content)
        .or_else(|| item.content.and_then(|c| c.body))
        .map(|s| parser::clean_html(&s))
        .unwrap_or_default();

    let authors: Vec<String> = item
        .authors
        .into_iter()
        .map(|a| a.name)
        .filter(|name| !name.trim().is_empty())
        .collect();

    // Journal mirrors often carry the DOI in the guid or a link; check them
    // all before falling back to the title+author hash.
    let mut key_candidates: Vec<&str> = vec![item.id.as_str()];
    key_candidates.push(link.as_str());
    for l in &item.links[1..] {
        key_candidates.push(l.href.as_str());
    }
    let identity_key =
        parser::derive_identity_key(&key_candidates, &title, authors.first().map(|s| s.as_str()));

    let published_at = item
        .published
        .or(item.updated)
        .map(|dt| dt.with_timezone(&chrono::Utc));

    Some(Entry {
        identity_key,
        title,
        abstract_text: summary,
        authors,
        published_at,
        source_name: source.name.clone(),
        source_url: source.endpoint.clone(),
        canonical_url: link,
        categories: source.category_hints.clone(),
        first_seen_at: payload.fetched_at,
        last_seen_at: payload.fetched_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceKind;
    use chrono::Utc;

    fn source() -> SourceConfig {
        SourceConfig {
            name: "prl".to_string(),
            kind: SourceKind::RssAtom,
            endpoint: "https://feeds.aps.org/rss/recent/prl.xml".to_string(),
            category_hints: ["ion-traps".to_string()].into(),
            poll_interval_secs: 1800,
        }
    }

    fn payload(body: &str) -> RawPayload {
        RawPayload {
            source_name: "prl".to_string(),
            body: body.to_string(),
            fetched_at: Utc::now(),
        }
    }

    const RSS_FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <rss version="2.0"><channel>
        <title>Physical Review Letters</title>
        <item>
            <title>Trapped Ion Quantum Network Node</title>
            <link>https://journals.aps.org/prl/abstract/10.1103/PhysRevLett.132.010801</link>
            <guid>https://doi.org/10.1103/PhysRevLett.132.010801</guid>
            <description>&lt;p&gt;We demonstrate a network node based on a trapped ion.&lt;/p&gt;</description>
            <author>jane@example.org (Jane Doe)</author>
            <pubDate>Mon, 04 Mar 2024 00:00:00 GMT</pubDate>
        </item>
        <item>
            <link>https://journals.aps.org/prl/untitled</link>
            <description>No title here.</description>
        </item>
        </channel></rss>"#;

    #[test]
    fn normalizes_valid_items_and_skips_broken_ones() {
        let entries = normalize(&payload(RSS_FIXTURE), &source()).unwrap();
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry.identity_key, "doi:10.1103/PhysRevLett.132.010801");
        assert_eq!(entry.title, "Trapped Ion Quantum Network Node");
        assert_eq!(
            entry.abstract_text,
            "We demonstrate a network node based on a trapped ion."
        );
        assert!(entry.categories.contains("ion-traps"));
        assert_eq!(entry.published_at.unwrap().to_rfc3339(), "2024-03-04T00:00:00+00:00");
    }

    #[test]
    fn feed_level_garbage_is_a_parse_error() {
        let result = normalize(&payload("this is not xml at all"), &source());
        assert!(matches!(
            result,
            Err(AggregatorError::Parse { ref source_name, .. }) if source_name == "prl"
        ));
    }

    #[test]
    fn missing_guid_falls_back_to_title_author_hash() {
        let body = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>J</title>
            <item>
                <title>An Untracked Paper</title>
                <link>https://journal.example/articles/42</link>
            </item>
        </channel></rss>"#;
        let entries = normalize(&payload(body), &source()).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].has_fallback_key());
        assert!(entries[0].published_at.is_none());
    }
}
