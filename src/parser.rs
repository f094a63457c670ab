use crate::sources;
use crate::types::{Entry, RawPayload, Result, SourceConfig, SourceKind, FALLBACK_KEY_PREFIX};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Converts a raw payload into entry candidates according to its source kind.
/// Per-item problems are skipped inside the kind-specific normalizers; only a
/// payload that fails feed-level parsing errors out.
pub fn normalize(payload: &RawPayload, source: &SourceConfig) -> Result<Vec<Entry>> {
    match source.kind {
        SourceKind::RssAtom => sources::rss_feed::normalize(payload, source),
        SourceKind::ArxivQuery => sources::arxiv::normalize(payload, source),
    }
}

static DOI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"10\.\d{4,9}/[-._;()/:a-zA-Z0-9]+").expect("DOI pattern"));

// New-style (2401.12345) and old-style (quant-ph/0301001) arXiv ids, with an
// optional version suffix that identity must ignore.
static ARXIV_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"arxiv\.org/abs/((?:\d{4}\.\d{4,5})|(?:[a-z-]+(?:\.[A-Z]{2})?/\d{7}))(?:v\d+)?")
        .expect("arXiv id pattern")
});

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));

/// Lowercases, strips punctuation, and collapses whitespace. Shared between
/// identity-key hashing and near-duplicate scoring so both see the same text.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(c.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// Strips markup and decodes HTML entities from feed summaries. Journal feeds
/// routinely embed `<p>`/`<i>` markup and MathML fragments in abstracts.
pub fn clean_html(text: &str) -> String {
    let without_tags = TAG_RE.replace_all(text, " ");
    let decoded = html_escape::decode_html_entities(without_tags.as_ref());
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn extract_doi(text: &str) -> Option<String> {
    DOI_RE
        .find(text)
        .map(|m| format!("doi:{}", m.as_str().trim_end_matches(['.', ';'])))
}

pub fn extract_arxiv_id(text: &str) -> Option<String> {
    ARXIV_ID_RE
        .captures(text)
        .map(|caps| format!("arxiv:{}", &caps[1]))
}

/// Identity key preference order: arXiv id, DOI, then a hash of the
/// normalized title plus primary author.
pub fn derive_identity_key(
    candidates: &[&str],
    title: &str,
    primary_author: Option<&str>,
) -> String {
    for candidate in candidates {
        if let Some(id) = extract_arxiv_id(candidate) {
            return id;
        }
    }
    for candidate in candidates {
        if let Some(doi) = extract_doi(candidate) {
            return doi;
        }
    }
    fallback_identity_key(title, primary_author)
}

/// "tah" = title+author hash, the last-resort identity for feeds with no
/// recognizable canonical identifier.
pub fn fallback_identity_key(title: &str, primary_author: Option<&str>) -> String {
    let normalized = format!(
        "{}|{}",
        normalize_text(title),
        normalize_text(primary_author.unwrap_or(""))
    );
    let digest = Sha256::digest(normalized.as_bytes());
    format!("{FALLBACK_KEY_PREFIX}{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_collapses_case_punctuation_and_whitespace() {
        assert_eq!(
            normalize_text("Trapped-Ion   Quantum\tNetwork Node!"),
            "trapped ion quantum network node"
        );
        assert_eq!(normalize_text("  "), "");
    }

    #[test]
    fn clean_html_strips_tags_and_entities() {
        let raw = "<p>Cavity&nbsp;QED with <i>single</i> atoms &amp; photons</p>";
        assert_eq!(clean_html(raw), "Cavity QED with single atoms & photons");
    }

    #[test]
    fn extracts_new_and_old_style_arxiv_ids() {
        assert_eq!(
            extract_arxiv_id("http://arxiv.org/abs/2403.01234v2"),
            Some("arxiv:2403.01234".to_string())
        );
        assert_eq!(
            extract_arxiv_id("https://arxiv.org/abs/quant-ph/0301001v1"),
            Some("arxiv:quant-ph/0301001".to_string())
        );
        assert_eq!(extract_arxiv_id("https://example.com/abs/123"), None);
    }

    #[test]
    fn extracts_doi_from_guid() {
        assert_eq!(
            extract_doi("https://doi.org/10.1103/PhysRevLett.132.010801"),
            Some("doi:10.1103/PhysRevLett.132.010801".to_string())
        );
        assert_eq!(extract_doi("urn:uuid:1234"), None);
    }

    #[test]
    fn identity_prefers_arxiv_then_doi_then_hash() {
        let key = derive_identity_key(
            &[
                "https://doi.org/10.1103/PhysRevA.1.1",
                "http://arxiv.org/abs/2403.01234v1",
            ],
            "Some Title",
            Some("A. Author"),
        );
        assert_eq!(key, "arxiv:2403.01234");

        let key = derive_identity_key(
            &["https://doi.org/10.1103/PhysRevA.1.1"],
            "Some Title",
            Some("A. Author"),
        );
        assert_eq!(key, "doi:10.1103/PhysRevA.1.1");

        let key = derive_identity_key(&["urn:uuid:99"], "Some Title", Some("A. Author"));
        assert!(key.starts_with("tah:"));
    }

    #[test]
    fn fallback_key_is_stable_under_formatting_noise() {
        let a = fallback_identity_key("Trapped-Ion Quantum Network Node", Some("Jane Doe"));
        let b = fallback_identity_key("trapped ion   quantum network node", Some("jane doe"));
        assert_eq!(a, b);

        let c = fallback_identity_key("Trapped-Ion Quantum Network Node", Some("Other Author"));
        assert_ne!(a, c);
    }
}
