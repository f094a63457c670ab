use crate::dedup::{merge_into, DedupKey};
use crate::types::{Entry, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// The current de-duplicated, categorized entry set, keyed by identity.
/// Owned explicitly and passed around as `Arc<Store>`; there is no ambient
/// global. Writers merge under the write lock, so readers never observe a
/// partially-merged entry.
pub struct Store {
    entries: RwLock<HashMap<String, Entry>>,
}

/// Query filters. `cursor` restarts a paged query exactly where the previous
/// page stopped, without the store materializing the full result. `limit` is
/// clamped to at least 1 so every page advances the cursor.
#[derive(Debug, Clone, Default)]
pub struct StoreQuery {
    pub category: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub cursor: Option<QueryCursor>,
}

/// Position in the query ordering: published (or first-seen) descending,
/// first-seen descending, identity key ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCursor {
    pub published_at: DateTime<Utc>,
    pub first_seen_at: DateTime<Utc>,
    pub identity_key: String,
}

impl QueryCursor {
    fn of(entry: &Entry) -> Self {
        Self {
            published_at: entry.effective_published(),
            first_seen_at: entry.first_seen_at,
            identity_key: entry.identity_key.clone(),
        }
    }

    /// True when `entry` comes strictly after this cursor in query order.
    fn precedes(&self, entry: &Entry) -> bool {
        let entry_pos = (
            entry.effective_published(),
            entry.first_seen_at,
        );
        let cursor_pos = (self.published_at, self.first_seen_at);
        match cursor_pos.cmp(&entry_pos) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => entry.identity_key > self.identity_key,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryPage {
    pub entries: Vec<Entry>,
    pub next_cursor: Option<QueryCursor>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts a new entry or merges into the existing one with the same
    /// identity key. The merge is atomic from a reader's perspective.
    pub async fn upsert(&self, entry: Entry) {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&entry.identity_key) {
            Some(existing) => {
                debug!("Merging re-sighted entry {}", entry.identity_key);
                merge_into(existing, &entry);
            }
            None => {
                debug!("Inserting new entry {}", entry.identity_key);
                entries.insert(entry.identity_key.clone(), entry);
            }
        }
    }

    /// Entries matching the filters, ordered by published date descending
    /// (first-seen when the source carried no date), ties broken by
    /// first-seen descending then key. Returns at most `limit` entries and a
    /// cursor to restart from.
    pub async fn query(&self, query: &StoreQuery) -> QueryPage {
        let entries = self.entries.read().await;

        let mut matching: Vec<&Entry> = entries
            .values()
            .filter(|e| {
                query
                    .category
                    .as_ref()
                    .map(|c| e.categories.contains(c))
                    .unwrap_or(true)
            })
            .filter(|e| {
                query
                    .since
                    .map(|since| e.effective_published() >= since)
                    .unwrap_or(true)
            })
            .filter(|e| {
                query
                    .cursor
                    .as_ref()
                    .map(|cursor| cursor.precedes(e))
                    .unwrap_or(true)
            })
            .collect();

        matching.sort_by(|a, b| {
            b.effective_published()
                .cmp(&a.effective_published())
                .then_with(|| b.first_seen_at.cmp(&a.first_seen_at))
                .then_with(|| a.identity_key.cmp(&b.identity_key))
        });

        let limit = query.limit.unwrap_or(usize::MAX).max(1);
        let has_more = matching.len() > limit;
        let page: Vec<Entry> = matching.into_iter().take(limit).cloned().collect();
        let next_cursor = if has_more {
            page.last().map(QueryCursor::of)
        } else {
            None
        };

        QueryPage {
            entries: page,
            next_cursor,
        }
    }

    /// Index for cross-source identity resolution; avoids cloning entries.
    pub async fn dedup_index(&self) -> Vec<DedupKey> {
        self.entries.read().await.values().map(DedupKey::of).collect()
    }

    /// Drops entries whose last sighting is older than the horizon. Anything
    /// still emitted by a live source gets re-sighted every cycle and never
    /// ages out.
    pub async fn evict_stale(&self, horizon: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.last_seen_at >= horizon);
        let evicted = before - entries.len();
        if evicted > 0 {
            info!("Evicted {} stale entries", evicted);
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn get(&self, identity_key: &str) -> Option<Entry> {
        self.entries.read().await.get(identity_key).cloned()
    }

    /// Writes the entry set as JSON, via a temp file and rename so a crash
    /// mid-write never truncates the previous snapshot.
    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let entries: Vec<Entry> = {
            let guard = self.entries.read().await;
            guard.values().cloned().collect()
        };
        let json = serde_json::to_vec_pretty(&entries)?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, path).await?;
        info!("Saved snapshot of {} entries to {}", entries.len(), path.display());
        Ok(())
    }

    /// Loads a snapshot for a warm restart. A missing file yields an empty
    /// store; a corrupt one is an error rather than silent data loss.
    pub async fn load_snapshot(path: &Path) -> Result<Self> {
        let store = Store::new();
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No snapshot at {}, starting empty", path.display());
                return Ok(store);
            }
            Err(e) => return Err(e.into()),
        };

        let loaded: Vec<Entry> = serde_json::from_slice(&raw)?;
        info!("Loaded snapshot of {} entries from {}", loaded.len(), path.display());
        let mut entries = store.entries.write().await;
        for entry in loaded {
            entries.insert(entry.identity_key.clone(), entry);
        }
        drop(entries);
        Ok(store)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
