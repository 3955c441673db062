use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Business category assigned by the scorer.
///
/// Labels outside the known set are kept verbatim in `Unknown` so a stray
/// value from the store never breaks assembly or rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    #[default]
    Market,
    Technology,
    SupplyChain,
    Trade,
    Regulatory,
    Competitor,
    Unknown(String),
}

impl Category {
    pub const KNOWN: [Category; 6] = [
        Category::Market,
        Category::Technology,
        Category::SupplyChain,
        Category::Trade,
        Category::Regulatory,
        Category::Competitor,
    ];

    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "market" => Category::Market,
            "technology" => Category::Technology,
            "supply_chain" => Category::SupplyChain,
            "trade" => Category::Trade,
            "regulatory" => Category::Regulatory,
            "competitor" => Category::Competitor,
            _ => Category::Unknown(label.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Category::Market => "market",
            Category::Technology => "technology",
            Category::SupplyChain => "supply_chain",
            Category::Trade => "trade",
            Category::Regulatory => "regulatory",
            Category::Competitor => "competitor",
            Category::Unknown(label) => label,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Category::Unknown(_))
    }
}

impl From<String> for Category {
    fn from(label: String) -> Self {
        Category::parse(&label)
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.as_str().to_string()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scored news item, the unit the triage engine ranks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub id: String,
    pub title: String,
    pub url: String,
    pub summary: String,
    pub why_it_matters: String,
    pub category: Category,
    #[serde(default)]
    pub topics: Vec<String>,
    pub relevance_score: u8,
    pub must_read: bool,
    #[serde(default)]
    pub hype_flag: bool,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// The tiered digest produced by [`crate::triage::assemble`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DigestTiers {
    pub critical: Vec<ScoredItem>,
    pub notable: Vec<ScoredItem>,
    pub minor: Vec<ScoredItem>,
}

impl DigestTiers {
    /// True when no tier holds an item: nothing to report today.
    pub fn is_empty(&self) -> bool {
        self.critical.is_empty() && self.notable.is_empty() && self.minor.is_empty()
    }

    pub fn total(&self) -> usize {
        self.critical.len() + self.notable.len() + self.minor.len()
    }
}

/// A digest persisted for one calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestSnapshot {
    pub date: String,
    pub tiers: DigestTiers,
    pub email_sent: bool,
    pub created_at: String,
}

/// A configured news feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSource {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub category: String,
    pub enabled: bool,
}

/// A feed entry ready to be stored.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub source_id: i64,
    pub title: String,
    pub url: String,
    pub content: String,
    pub published_at: DateTime<Utc>,
}

/// The scorer's verdict on one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub summary: String,
    pub why_it_matters: String,
    pub category: Category,
    pub topics: Vec<String>,
    pub relevance_score: u8,
    pub must_read: bool,
    pub hype_flag: bool,
}

/// A stored item that still needs a relevance judgment.
#[derive(Debug, Clone)]
pub struct PendingItem {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub content: String,
    pub source_category: Option<String>,
}
