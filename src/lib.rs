pub mod categorizer;
pub mod config;
pub mod dedup;
pub mod fetcher;
pub mod parser;
pub mod registry;
pub mod scheduler;
pub mod sources;
pub mod store;
pub mod types;

pub use categorizer::Taxonomy;
pub use config::{AppConfig, SchedulerConfig, TaxonomyConfig, TopicConfig};
pub use dedup::{DedupKey, Deduplicator};
pub use fetcher::Fetcher;
pub use registry::SourceRegistry;
pub use scheduler::{CyclePhase, CycleSummary, Scheduler};
pub use store::{QueryCursor, QueryPage, Store, StoreQuery};
pub use types::*;
