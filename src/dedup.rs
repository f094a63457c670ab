use crate::parser::normalize_text;
use crate::types::{Entry, FALLBACK_KEY_PREFIX};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

/// Lightweight view of a stored entry, enough to resolve identity against a
/// new batch without cloning whole entries out of the store.
#[derive(Debug, Clone)]
pub struct DedupKey {
    pub identity_key: String,
    pub title_norm: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl DedupKey {
    pub fn of(entry: &Entry) -> Self {
        Self {
            identity_key: entry.identity_key.clone(),
            title_norm: normalize_text(&entry.title),
            published_at: entry.published_at,
        }
    }
}

/// Cross-source identity resolution. Exact `identity_key` equality is
/// authoritative; the near-duplicate title heuristic is only a safety net for
/// items whose key had to be derived from garbled or mirror-mangled metadata.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    similarity_threshold: f64,
    date_window: Duration,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self {
            // High bar on purpose: distinct papers with similar titles are
            // common ("... in cavity QED" variants), false merges are not
            // recoverable.
            similarity_threshold: 0.92,
            date_window: Duration::days(7),
        }
    }
}

impl Deduplicator {
    pub fn new(similarity_threshold: f64, date_window: Duration) -> Self {
        Self {
            similarity_threshold,
            date_window,
        }
    }

    /// Resolves a cycle's candidate batch against the store's current keys.
    /// Output entries carry their final identity key: intra-batch duplicates
    /// are merged into one candidate, and near-duplicates of existing entries
    /// are re-keyed so the store upsert merges them instead of inserting.
    pub fn plan(&self, batch: Vec<Entry>, existing: &[DedupKey]) -> Vec<Entry> {
        let input_len = batch.len();
        let mut resolved: HashMap<String, Entry> = HashMap::new();
        // Working index over store keys plus already-accepted batch entries,
        // so two mirrors of the same unseen paper merge within one cycle.
        let mut index: Vec<DedupKey> = existing.to_vec();

        for candidate in batch {
            let key = self.resolve_key(&candidate, &index);

            match resolved.get_mut(&key) {
                Some(kept) => {
                    debug!(
                        "Collapsing batch duplicate {} -> {}",
                        candidate.identity_key, key
                    );
                    merge_into(kept, &candidate);
                }
                None => {
                    let mut entry = candidate;
                    if entry.identity_key != key {
                        debug!(
                            "Near-duplicate: {} merges under existing key {}",
                            entry.identity_key, key
                        );
                        entry.identity_key = key.clone();
                    }
                    index.push(DedupKey::of(&entry));
                    resolved.insert(key, entry);
                }
            }
        }

        if resolved.len() < input_len {
            info!(
                "Deduplicated batch: {} candidates -> {} entries",
                input_len,
                resolved.len()
            );
        }
        resolved.into_values().collect()
    }

    fn resolve_key(&self, candidate: &Entry, index: &[DedupKey]) -> String {
        // Exact key match wins outright.
        if index.iter().any(|k| k.identity_key == candidate.identity_key) {
            return candidate.identity_key.clone();
        }

        let title_norm = normalize_text(&candidate.title);
        for known in index {
            // The fuzzy fallback only applies when one side's key had to be
            // hashed from title+author. Two canonical identifiers that differ
            // are two different papers, however similar the titles.
            let fuzzy_applies = candidate.has_fallback_key()
                || known.identity_key.starts_with(FALLBACK_KEY_PREFIX);
            if fuzzy_applies
                && self.is_near_duplicate(&title_norm, candidate.published_at, known)
            {
                return known.identity_key.clone();
            }
        }

        candidate.identity_key.clone()
    }

    fn is_near_duplicate(
        &self,
        title_norm: &str,
        published_at: Option<DateTime<Utc>>,
        known: &DedupKey,
    ) -> bool {
        if title_norm.is_empty() || known.title_norm.is_empty() {
            return false;
        }
        if !self.dates_within_window(published_at, known.published_at) {
            return false;
        }
        near_duplicate_score(title_norm, &known.title_norm) >= self.similarity_threshold
    }

    fn dates_within_window(&self, a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => (a - b).abs() <= self.date_window,
            // A missing date cannot veto the title evidence.
            _ => true,
        }
    }
}

/// Pure similarity score over pre-normalized titles, kept free of I/O and
/// store access so the heuristic is testable on its own.
pub fn near_duplicate_score(title_a_norm: &str, title_b_norm: &str) -> f64 {
    strsim::normalized_levenshtein(title_a_norm, title_b_norm)
}

/// Merge semantics shared by batch collapsing and store upserts: richer
/// abstract wins, categories union, sighting window widens, identity and key
/// of `existing` are preserved.
pub fn merge_into(existing: &mut Entry, incoming: &Entry) {
    if incoming.abstract_text.len() > existing.abstract_text.len() {
        existing.abstract_text = incoming.abstract_text.clone();
    }
    if existing.authors.is_empty() {
        existing.authors = incoming.authors.clone();
    }
    if existing.published_at.is_none() {
        existing.published_at = incoming.published_at;
    }
    // A mirror merged into a hash-keyed entry may still contribute the better
    // landing page (arXiv abstract or DOI resolver).
    if existing.has_fallback_key()
        && (incoming.canonical_url.contains("arxiv.org") || incoming.canonical_url.contains("doi.org"))
    {
        existing.canonical_url = incoming.canonical_url.clone();
    }
    existing
        .categories
        .extend(incoming.categories.iter().cloned());
    existing.first_seen_at = existing.first_seen_at.min(incoming.first_seen_at);
    existing.last_seen_at = existing.last_seen_at.max(incoming.last_seen_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::fallback_identity_key;
    use chrono::TimeZone;

    fn entry(key: &str, title: &str, published: Option<DateTime<Utc>>) -> Entry {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        Entry {
            identity_key: key.to_string(),
            title: title.to_string(),
            abstract_text: String::new(),
            authors: vec![],
            published_at: published,
            source_name: "test".to_string(),
            source_url: "https://test.example/feed".to_string(),
            canonical_url: "https://test.example/item".to_string(),
            categories: Default::default(),
            first_seen_at: now,
            last_seen_at: now,
        }
    }

    fn day(d: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap())
    }

    #[test]
    fn identical_keys_collapse_within_a_batch() {
        let dedup = Deduplicator::default();
        let mut a = entry("arxiv:2403.01234", "Paper", day(1));
        a.abstract_text = "short".to_string();
        a.categories.insert("ion-traps".to_string());
        let mut b = entry("arxiv:2403.01234", "Paper", day(1));
        b.abstract_text = "a much longer abstract".to_string();
        b.categories.insert("quantum-networks".to_string());

        let planned = dedup.plan(vec![a, b], &[]);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].abstract_text, "a much longer abstract");
        assert!(planned[0].categories.contains("ion-traps"));
        assert!(planned[0].categories.contains("quantum-networks"));
    }

    #[test]
    fn near_duplicate_titles_merge_under_existing_key() {
        let dedup = Deduplicator::default();
        let arxiv = entry("arxiv:2403.01234", "Trapped-Ion Quantum Network Node", day(2));
        let existing = [DedupKey::of(&arxiv)];

        let mirror_key = fallback_identity_key("Trapped Ion Quantum Network Node", Some("Jane Doe"));
        let mirror = entry(&mirror_key, "Trapped Ion Quantum Network Node", day(4));

        let planned = dedup.plan(vec![mirror], &existing);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].identity_key, "arxiv:2403.01234");
    }

    #[test]
    fn near_duplicates_merge_within_one_batch() {
        let dedup = Deduplicator::default();
        let arxiv = entry("arxiv:2403.01234", "Trapped-Ion Quantum Network Node", day(2));
        let mirror_key = fallback_identity_key("Trapped Ion Quantum Network Node", None);
        let mut mirror = entry(&mirror_key, "Trapped Ion Quantum Network Node", day(4));
        mirror.categories.insert("quantum-networks".to_string());

        let planned = dedup.plan(vec![arxiv, mirror], &[]);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].identity_key, "arxiv:2403.01234");
        assert!(planned[0].categories.contains("quantum-networks"));
    }

    #[test]
    fn canonical_candidate_merges_under_preexisting_fallback_key() {
        // A journal mirror was seen first and stored under a hash key; when
        // the arXiv record arrives later, it merges under that existing key.
        let dedup = Deduplicator::default();
        let mirror_key = fallback_identity_key("Trapped Ion Quantum Network Node", Some("Jane Doe"));
        let mirror = entry(&mirror_key, "Trapped Ion Quantum Network Node", day(2));
        let existing = [DedupKey::of(&mirror)];

        let arxiv = entry("arxiv:2403.01234", "Trapped-Ion Quantum Network Node", day(4));
        let planned = dedup.plan(vec![arxiv], &existing);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].identity_key, mirror_key);
    }

    #[test]
    fn similar_but_distinct_titles_stay_distinct() {
        let dedup = Deduplicator::default();
        let a = entry("arxiv:2403.01234", "Cavity QED with a Single Rubidium Atom", day(2));
        let existing = [DedupKey::of(&a)];

        let b_key = fallback_identity_key("Cavity QED with a Single Cesium Atom", None);
        let b = entry(&b_key, "Cavity QED with a Single Cesium Atom", day(2));

        let planned = dedup.plan(vec![b], &existing);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].identity_key, b_key);
    }

    #[test]
    fn distant_publish_dates_block_the_heuristic() {
        let dedup = Deduplicator::default();
        let a = entry("arxiv:2301.00001", "Trapped Ion Quantum Network Node", day(1));
        let existing = [DedupKey::of(&a)];

        let b_key = fallback_identity_key("Trapped Ion Quantum Network Node", None);
        let b = entry(&b_key, "Trapped Ion Quantum Network Node", day(25));

        let planned = dedup.plan(vec![b], &existing);
        assert_eq!(planned[0].identity_key, b_key);
    }

    #[test]
    fn canonical_keys_never_fuzzy_merge() {
        // Two different arXiv ids with near-identical titles are different
        // papers by definition.
        let dedup = Deduplicator::default();
        let a = entry("arxiv:2403.01234", "Trapped Ion Quantum Network Node", day(2));
        let existing = [DedupKey::of(&a)];

        let b = entry("arxiv:2403.09999", "Trapped-Ion Quantum Network Node", day(2));
        let planned = dedup.plan(vec![b], &existing);
        assert_eq!(planned[0].identity_key, "arxiv:2403.09999");
    }

    #[test]
    fn merge_widens_sighting_window_and_fills_gaps() {
        let mut existing = entry("tah:abc", "Paper", None);
        existing.first_seen_at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        existing.last_seen_at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let mut incoming = entry("tah:abc", "Paper", day(2));
        incoming.canonical_url = "https://arxiv.org/abs/2403.01234".to_string();
        incoming.authors = vec!["Jane Doe".to_string()];
        incoming.first_seen_at = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap();
        incoming.last_seen_at = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap();

        merge_into(&mut existing, &incoming);
        assert_eq!(existing.published_at, day(2));
        assert_eq!(existing.authors, vec!["Jane Doe"]);
        assert_eq!(existing.canonical_url, "https://arxiv.org/abs/2403.01234");
        assert_eq!(
            existing.first_seen_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            existing.last_seen_at,
            Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap()
        );
    }
}
