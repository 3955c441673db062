// Public modules
pub mod config;
pub mod ingest;
pub mod mailer;
pub mod models;
pub mod normalize;
pub mod render;
pub mod scorer;
pub mod store;
pub mod telemetry;
pub mod triage;

// Re-export commonly used types
pub use config::Config;
pub use ingest::{ingest_sources, FeedFetcher, IngestReport};
pub use mailer::ResendMailer;
pub use models::{Category, DigestSnapshot, DigestTiers, FeedSource, Judgment, ScoredItem};
pub use normalize::{normalize, normalize_all, SummaryRecord};
pub use render::DigestRenderer;
pub use scorer::{ClaudeScorer, ScoreOutcome};
pub use store::ItemStore;
pub use triage::{assemble, Thresholds};
