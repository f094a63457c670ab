use crate::types::SourceConfig;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Per-source fetch bookkeeping. The source list itself is immutable; only
/// this runtime state changes between cycles.
#[derive(Debug, Clone, Default)]
pub struct SourceState {
    pub last_fetch_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error: Option<String>,
}

/// The configured source set plus runtime state. The scheduler takes a fresh
/// handle each cycle, so the registry can be replaced between cycles without
/// touching the store.
pub struct SourceRegistry {
    sources: Vec<SourceConfig>,
    state: RwLock<HashMap<String, SourceState>>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<SourceConfig>) -> Self {
        info!("Source registry initialized with {} sources", sources.len());
        Self {
            sources,
            state: RwLock::new(HashMap::new()),
        }
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sources whose poll interval has elapsed. Never-fetched sources are due
    /// immediately; failing sources back off exponentially on their interval
    /// so a dead feed is not hammered every cycle.
    pub async fn due_sources(&self, now: DateTime<Utc>) -> Vec<SourceConfig> {
        let state = self.state.read().await;
        let mut due = Vec::new();

        for source in &self.sources {
            let source_state = state.get(&source.name);
            let next_fetch = match source_state.and_then(|s| s.last_fetch_time) {
                None => now,
                Some(last) => {
                    let error_count = source_state.map(|s| s.error_count).unwrap_or(0);
                    let interval = source.poll_interval_secs as i64
                        * 2_i64.pow(error_count.min(5));
                    last + Duration::seconds(interval)
                }
            };

            if next_fetch <= now {
                due.push(source.clone());
            } else {
                debug!("Source {} not due until {}", source.name, next_fetch);
            }
        }

        due
    }

    pub async fn record_success(&self, name: &str, now: DateTime<Utc>) {
        let mut state = self.state.write().await;
        let entry = state.entry(name.to_string()).or_default();
        entry.last_fetch_time = Some(now);
        entry.last_success_time = Some(now);
        entry.error_count = 0;
        entry.last_error = None;
    }

    pub async fn record_failure(&self, name: &str, error: &str, now: DateTime<Utc>) {
        let mut state = self.state.write().await;
        let entry = state.entry(name.to_string()).or_default();
        entry.last_fetch_time = Some(now);
        entry.error_count += 1;
        entry.last_error = Some(error.to_string());
    }

    pub async fn source_state(&self, name: &str) -> Option<SourceState> {
        self.state.read().await.get(name).cloned()
    }
}
