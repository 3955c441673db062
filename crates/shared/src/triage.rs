//! Digest assembly: partitions a pool of scored items into critical, notable
//! and minor tiers using thresholds relative to the day's best score.
//!
//! Assembly is pure. The same pool always yields the same tiers, and an empty
//! result means there is nothing to report.

use crate::models::{DigestTiers, ScoredItem};

pub const CRITICAL_CAP: usize = 3;
pub const NOTABLE_CAP: usize = 7;
pub const MINOR_CAP: usize = 10;

/// Items moved from notable into an empty critical tier.
pub const FALLBACK_PROMOTIONS: usize = 2;

const HIGH_RATIO: f64 = 0.7;
const HIGH_FLOOR: f64 = 60.0;
const MID_RATIO: f64 = 0.4;
const MID_FLOOR: f64 = 30.0;

/// Tier cutoffs derived from the best score in the pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub high: f64,
    pub mid: f64,
}

impl Thresholds {
    pub fn from_pool(pool: &[ScoredItem]) -> Self {
        let max_score = pool.iter().map(score).max().unwrap_or(0);
        Self::from_max_score(max_score)
    }

    pub fn from_max_score(max_score: u8) -> Self {
        let max_score = f64::from(max_score.min(100));
        Self {
            high: (max_score * HIGH_RATIO).max(HIGH_FLOOR),
            mid: (max_score * MID_RATIO).max(MID_FLOOR),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Critical,
    Notable,
    Minor,
}

impl Thresholds {
    /// Half-open intervals: a score equal to `mid` is notable, equal to
    /// `high` is critical.
    fn classify(&self, item: &ScoredItem) -> Option<Tier> {
        let value = score(item);
        if value == 0 {
            return None;
        }
        let value = f64::from(value);
        if item.must_read || value >= self.high {
            Some(Tier::Critical)
        } else if value >= self.mid {
            Some(Tier::Notable)
        } else {
            Some(Tier::Minor)
        }
    }
}

/// Build the tiered digest for a pool of scored items.
pub fn assemble(pool: &[ScoredItem]) -> DigestTiers {
    let thresholds = Thresholds::from_pool(pool);

    let mut critical = Vec::new();
    let mut notable = Vec::new();
    let mut minor = Vec::new();

    for item in pool {
        match thresholds.classify(item) {
            Some(Tier::Critical) => critical.push(item),
            Some(Tier::Notable) => notable.push(item),
            Some(Tier::Minor) => minor.push(item),
            None => {}
        }
    }

    let mut critical = top_n(critical, CRITICAL_CAP);
    let mut notable = top_n(notable, NOTABLE_CAP);
    let minor = top_n(minor, MINOR_CAP);

    if critical.is_empty() && !notable.is_empty() {
        let take = FALLBACK_PROMOTIONS.min(notable.len());
        critical = notable.drain(..take).collect();
    }

    DigestTiers {
        critical,
        notable,
        minor,
    }
}

/// Stable descending sort by score, then keep the first `cap` entries.
fn top_n(mut candidates: Vec<&ScoredItem>, cap: usize) -> Vec<ScoredItem> {
    candidates.sort_by(|a, b| score(b).cmp(&score(a)));
    candidates.into_iter().take(cap).cloned().collect()
}

fn score(item: &ScoredItem) -> u8 {
    item.relevance_score.min(100)
}
