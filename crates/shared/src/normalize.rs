//! Boundary adapter turning loosely-shaped summary rows into [`ScoredItem`]s.
//!
//! Every default the triage engine relies on is applied here, so nothing
//! downstream has to second-guess a field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Category, ScoredItem};

pub const UNTITLED: &str = "Untitled";

/// A related row that may arrive as one object or as a list of them.
///
/// `Many` is tried first: a struct with all-default fields would otherwise
/// accept an empty array as a single value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_first(self) -> Option<T> {
        match self {
            OneOrMany::One(value) => Some(value),
            OneOrMany::Many(values) => values.into_iter().next(),
        }
    }
}

/// The item a summary was written for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemRef {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub title: Option<Value>,
    #[serde(default)]
    pub url: Option<Value>,
    #[serde(default)]
    pub published_at: Option<Value>,
}

/// A summary row joined to its item, as read from the store or a JSON export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryRecord {
    #[serde(default)]
    pub summary: Option<Value>,
    #[serde(default)]
    pub why_it_matters: Option<Value>,
    #[serde(default)]
    pub category: Option<Value>,
    #[serde(default)]
    pub topics: Option<Value>,
    #[serde(default)]
    pub relevance_score: Option<Value>,
    #[serde(default)]
    pub must_read: Option<Value>,
    #[serde(default)]
    pub hype_flag: Option<Value>,
    #[serde(default)]
    pub created_at: Option<Value>,
    #[serde(default)]
    pub item: Option<OneOrMany<ItemRef>>,
}

/// Convert one record, or `None` when it has no related item.
pub fn normalize(record: SummaryRecord) -> Option<ScoredItem> {
    let item = record.item?.into_first()?;

    let id = text(&item.id)
        .or_else(|| text(&item.url))
        .unwrap_or_default();
    let title = text(&item.title)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    Some(ScoredItem {
        id,
        title,
        url: text(&item.url).unwrap_or_default(),
        summary: text(&record.summary).unwrap_or_default(),
        why_it_matters: text(&record.why_it_matters).unwrap_or_default(),
        category: text(&record.category)
            .map(|c| Category::parse(&c))
            .unwrap_or_default(),
        topics: topics(&record.topics),
        relevance_score: clamp_score(record.relevance_score.as_ref()),
        must_read: flag(&record.must_read),
        hype_flag: flag(&record.hype_flag),
        published_at: text(&item.published_at).and_then(|d| parse_timestamp(&d)),
    })
}

/// Normalize a batch, dropping records without an item.
pub fn normalize_all(records: Vec<SummaryRecord>) -> Vec<ScoredItem> {
    records.into_iter().filter_map(normalize).collect()
}

/// Coerce a loosely-typed score into `[0, 100]`; anything non-numeric is 0.
pub fn clamp_score(value: Option<&Value>) -> u8 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(v) if v.is_finite() => v.round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .or_else(|_| DateTime::parse_from_rfc2822(value.trim()))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn text(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

fn flag(value: &Option<Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}

fn topics(value: &Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect(),
        // Stored as a JSON-encoded string column
        Some(Value::String(s)) => serde_json::from_str::<Vec<String>>(s).unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> SummaryRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_full_record() {
        let item = normalize(record(json!({
            "summary": "Regulator updates beacon rules",
            "why_it_matters": "New certification work",
            "category": "regulatory",
            "topics": ["beacons", "faa"],
            "relevance_score": 92,
            "must_read": true,
            "hype_flag": false,
            "item": {
                "id": 17,
                "title": "FAA finalizes ELT rule",
                "url": "https://example.com/elt",
                "published_at": "2026-10-17T08:00:00Z"
            }
        })))
        .unwrap();

        assert_eq!(item.id, "17");
        assert_eq!(item.title, "FAA finalizes ELT rule");
        assert_eq!(item.category, Category::Regulatory);
        assert_eq!(item.topics, vec!["beacons", "faa"]);
        assert_eq!(item.relevance_score, 92);
        assert!(item.must_read);
        assert!(item.published_at.is_some());
    }

    #[test]
    fn test_item_as_one_element_list() {
        let item = normalize(record(json!({
            "relevance_score": 40,
            "item": [{ "id": "a", "title": "Listed", "url": "https://example.com/a" }]
        })))
        .unwrap();
        assert_eq!(item.id, "a");
        assert_eq!(item.title, "Listed");
    }

    #[test]
    fn test_missing_or_empty_item_is_skipped() {
        assert!(normalize(record(json!({ "relevance_score": 40 }))).is_none());
        assert!(normalize(record(json!({ "relevance_score": 40, "item": [] }))).is_none());
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let item = normalize(record(json!({
            "item": { "url": "https://example.com/x" }
        })))
        .unwrap();
        assert_eq!(item.id, "https://example.com/x");
        assert_eq!(item.title, UNTITLED);
        assert_eq!(item.summary, "");
        assert_eq!(item.why_it_matters, "");
        assert_eq!(item.category, Category::Market);
        assert_eq!(item.relevance_score, 0);
        assert!(!item.must_read);
        assert!(!item.hype_flag);
    }

    #[test]
    fn test_wrong_shaped_fields_fall_back() {
        let item = normalize(record(json!({
            "summary": ["not", "text"],
            "relevance_score": "lots",
            "must_read": "yes",
            "topics": "[\"tariffs\"]",
            "item": { "id": 3, "title": "   " }
        })))
        .unwrap();
        assert_eq!(item.summary, "");
        assert_eq!(item.relevance_score, 0);
        assert!(item.must_read);
        assert_eq!(item.topics, vec!["tariffs"]);
        assert_eq!(item.title, UNTITLED);
    }

    #[test]
    fn test_unknown_category_is_kept_opaque() {
        let item = normalize(record(json!({
            "category": "sar",
            "relevance_score": 10,
            "item": { "id": 1 }
        })))
        .unwrap();
        assert_eq!(item.category, Category::Unknown("sar".to_string()));
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(Some(&json!(150))), 100);
        assert_eq!(clamp_score(Some(&json!(-20))), 0);
        assert_eq!(clamp_score(Some(&json!(72.6))), 73);
        assert_eq!(clamp_score(Some(&json!(" 55 "))), 55);
        assert_eq!(clamp_score(Some(&json!(null))), 0);
        assert_eq!(clamp_score(None), 0);
    }

    #[test]
    fn test_normalize_all_drops_orphans() {
        let records = vec![
            record(json!({ "relevance_score": 50, "item": { "id": 1 } })),
            record(json!({ "relevance_score": 60 })),
        ];
        assert_eq!(normalize_all(records).len(), 1);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2026-10-17T08:00:00+00:00").is_some());
        assert!(parse_timestamp("Sat, 17 Oct 2026 08:00:00 GMT").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
