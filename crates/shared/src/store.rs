//! SQLite item store: feed sources, ingested items, their summaries, and
//! one persisted digest per day.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

use crate::config::split_recipients;
use crate::models::{DigestSnapshot, DigestTiers, FeedSource, Judgment, NewItem, PendingItem};
use crate::normalize::{ItemRef, OneOrMany, SummaryRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    category TEXT NOT NULL DEFAULT '',
    enabled INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER REFERENCES sources(id),
    title TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    content TEXT NOT NULL DEFAULT '',
    published_at TEXT,
    fetched_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS summaries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL UNIQUE REFERENCES items(id),
    summary TEXT NOT NULL,
    why_it_matters TEXT NOT NULL,
    category TEXT NOT NULL,
    topics TEXT NOT NULL DEFAULT '[]',
    relevance_score INTEGER NOT NULL,
    must_read INTEGER NOT NULL DEFAULT 0,
    hype_flag INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS digests (
    date TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    email_sent INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

pub const RECIPIENTS_KEY: &str = "digest_recipients";

/// Timestamps are stored as UTC RFC 3339 so text comparison orders them.
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// (date, tiers json, email_sent, created_at)
type DigestRow = (String, String, bool, String);

pub struct ItemStore {
    conn: Connection,
}

impl ItemStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        Ok(Self { conn })
    }

    // ==================== Sources ====================

    pub fn add_source(&self, name: &str, url: &str, category: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO sources (name, url, category, enabled) VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT(url) DO UPDATE SET name = excluded.name, category = excluded.category",
                params![name, url, category],
            )
            .context("Failed to save source")?;
        let id = self
            .conn
            .query_row("SELECT id FROM sources WHERE url = ?1", [url], |row| row.get(0))
            .context("Failed to look up saved source")?;
        Ok(id)
    }

    pub fn set_source_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE sources SET enabled = ?1 WHERE id = ?2",
                params![enabled, id],
            )
            .context("Failed to update source")?;
        Ok(changed > 0)
    }

    pub fn list_sources(&self) -> Result<Vec<FeedSource>> {
        self.query_sources("SELECT id, name, url, category, enabled FROM sources ORDER BY id")
    }

    pub fn enabled_sources(&self) -> Result<Vec<FeedSource>> {
        self.query_sources(
            "SELECT id, name, url, category, enabled FROM sources WHERE enabled = 1 ORDER BY id",
        )
    }

    fn query_sources(&self, sql: &str) -> Result<Vec<FeedSource>> {
        let mut stmt = self.conn.prepare(sql)?;
        let sources = stmt
            .query_map([], |row| {
                Ok(FeedSource {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    url: row.get(2)?,
                    category: row.get(3)?,
                    enabled: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read sources")?;
        Ok(sources)
    }

    // ==================== Items ====================

    pub fn existing_urls(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT url FROM items")?;
        let urls = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()
            .context("Failed to read item URLs")?;
        Ok(urls)
    }

    /// Insert an item; returns `false` when its URL is already stored.
    pub fn insert_item(&self, item: &NewItem) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO items (source_id, title, url, content, published_at, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    item.source_id,
                    item.title,
                    item.url,
                    item.content,
                    timestamp(item.published_at),
                    timestamp(Utc::now()),
                ],
            )
            .context("Failed to insert item")?;
        Ok(inserted > 0)
    }

    /// Items without a summary, newest publication first.
    pub fn unsummarized_items(&self, limit: usize) -> Result<Vec<PendingItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.title, i.url, i.content, s.category
             FROM items i
             LEFT JOIN sources s ON s.id = i.source_id
             WHERE NOT EXISTS (SELECT 1 FROM summaries m WHERE m.item_id = i.id)
             ORDER BY i.published_at DESC, i.id DESC
             LIMIT ?1",
        )?;
        let items = stmt
            .query_map([limit as i64], |row| {
                Ok(PendingItem {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    url: row.get(2)?,
                    content: row.get(3)?,
                    source_category: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read unsummarized items")?;
        Ok(items)
    }

    // ==================== Summaries ====================

    pub fn insert_summary(&self, item_id: i64, judgment: &Judgment) -> Result<()> {
        let topics = serde_json::to_string(&judgment.topics).context("Failed to encode topics")?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO summaries
                 (item_id, summary, why_it_matters, category, topics, relevance_score, must_read, hype_flag, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    item_id,
                    judgment.summary,
                    judgment.why_it_matters,
                    judgment.category.as_str(),
                    topics,
                    judgment.relevance_score,
                    judgment.must_read,
                    judgment.hype_flag,
                    timestamp(Utc::now()),
                ],
            )
            .context("Failed to insert summary")?;
        Ok(())
    }

    /// Summaries written in the last `hours`, skipping items published more
    /// than `stale_days` ago. Highest score first.
    pub fn recent_summaries(
        &self,
        now: DateTime<Utc>,
        hours: i64,
        stale_days: i64,
    ) -> Result<Vec<SummaryRecord>> {
        let summary_cutoff = timestamp(now - Duration::hours(hours));
        let published_cutoff = timestamp(now - Duration::days(stale_days));

        let mut stmt = self.conn.prepare(
            "SELECT m.summary, m.why_it_matters, m.category, m.topics, m.relevance_score,
                    m.must_read, m.hype_flag, m.created_at,
                    i.id, i.title, i.url, i.published_at
             FROM summaries m
             JOIN items i ON i.id = m.item_id
             WHERE m.created_at >= ?1
               AND (i.published_at IS NULL OR i.published_at >= ?2)
             ORDER BY m.relevance_score DESC, m.id ASC",
        )?;

        let records = stmt
            .query_map(params![summary_cutoff, published_cutoff], |row| {
                let published_at: Option<String> = row.get(11)?;
                Ok(SummaryRecord {
                    summary: Some(Value::String(row.get(0)?)),
                    why_it_matters: Some(Value::String(row.get(1)?)),
                    category: Some(Value::String(row.get(2)?)),
                    topics: Some(Value::String(row.get(3)?)),
                    relevance_score: Some(Value::from(row.get::<_, i64>(4)?)),
                    must_read: Some(Value::Bool(row.get(5)?)),
                    hype_flag: Some(Value::Bool(row.get(6)?)),
                    created_at: Some(Value::String(row.get(7)?)),
                    item: Some(OneOrMany::One(ItemRef {
                        id: Some(Value::from(row.get::<_, i64>(8)?)),
                        title: Some(Value::String(row.get(9)?)),
                        url: Some(Value::String(row.get(10)?)),
                        published_at: published_at.map(Value::String),
                    })),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read recent summaries")?;
        Ok(records)
    }

    // ==================== Digests ====================

    /// Store the digest for `date`, replacing any earlier one for that day.
    pub fn save_digest(&self, date: &str, tiers: &DigestTiers) -> Result<()> {
        let content = serde_json::to_string(tiers).context("Failed to serialize digest")?;
        self.conn
            .execute(
                "INSERT INTO digests (date, content, email_sent, created_at) VALUES (?1, ?2, 0, ?3)
                 ON CONFLICT(date) DO UPDATE SET
                    content = excluded.content,
                    email_sent = 0,
                    created_at = excluded.created_at",
                params![date, content, timestamp(Utc::now())],
            )
            .with_context(|| format!("Failed to save digest for {}", date))?;
        Ok(())
    }

    pub fn mark_email_sent(&self, date: &str) -> Result<()> {
        self.conn
            .execute("UPDATE digests SET email_sent = 1 WHERE date = ?1", [date])
            .with_context(|| format!("Failed to mark digest {} as sent", date))?;
        Ok(())
    }

    pub fn digest_for(&self, date: &str) -> Result<Option<DigestSnapshot>> {
        self.query_digest(
            "SELECT date, content, email_sent, created_at FROM digests WHERE date = ?1",
            Some(date),
        )
    }

    pub fn latest_digest(&self) -> Result<Option<DigestSnapshot>> {
        self.query_digest(
            "SELECT date, content, email_sent, created_at FROM digests ORDER BY date DESC LIMIT 1",
            None,
        )
    }

    fn query_digest(&self, sql: &str, date: Option<&str>) -> Result<Option<DigestSnapshot>> {
        let mut stmt = self.conn.prepare(sql)?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<DigestRow> {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, String>(3)?,
            ))
        };
        let row = match date {
            Some(date) => stmt.query_row([date], map_row).optional()?,
            None => stmt.query_row([], map_row).optional()?,
        };

        let Some((date, content, email_sent, created_at)) = row else {
            return Ok(None);
        };
        let tiers: DigestTiers = serde_json::from_str(&content)
            .with_context(|| format!("Stored digest for {} is not valid JSON", date))?;

        Ok(Some(DigestSnapshot {
            date,
            tiers,
            email_sent,
            created_at,
        }))
    }

    // ==================== Settings ====================

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .with_context(|| format!("Failed to read setting {}", key))?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .with_context(|| format!("Failed to write setting {}", key))?;
        Ok(())
    }

    /// Recipients from the settings table, or `fallback` when none are set.
    pub fn digest_recipients(&self, fallback: &[String]) -> Vec<String> {
        match self.get_setting(RECIPIENTS_KEY) {
            Ok(Some(value)) => {
                let recipients = split_recipients(&value);
                if !recipients.is_empty() {
                    return recipients;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Could not read recipients from settings ({:#}), using env var", e);
            }
        }
        fallback.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use crate::normalize::normalize_all;

    fn judgment(score: u8, must_read: bool) -> Judgment {
        Judgment {
            summary: "Summary".to_string(),
            why_it_matters: "Because".to_string(),
            category: Category::Trade,
            topics: vec!["tariffs".to_string()],
            relevance_score: score,
            must_read,
            hype_flag: false,
        }
    }

    fn new_item(source_id: i64, url: &str, published_at: DateTime<Utc>) -> NewItem {
        NewItem {
            source_id,
            title: format!("Title for {}", url),
            url: url.to_string(),
            content: "Body".to_string(),
            published_at,
        }
    }

    #[test]
    fn test_sources_roundtrip_and_toggle() {
        let store = ItemStore::open_in_memory().unwrap();
        let a = store.add_source("Wire", "https://wire.example/rss", "maritime").unwrap();
        let b = store.add_source("Air", "https://air.example/rss", "aviation").unwrap();
        // Re-adding the same URL updates in place
        let again = store.add_source("Wire 2", "https://wire.example/rss", "maritime").unwrap();
        assert_eq!(a, again);

        assert!(store.set_source_enabled(b, false).unwrap());
        let enabled = store.enabled_sources().unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "Wire 2");
        assert_eq!(store.list_sources().unwrap().len(), 2);
    }

    #[test]
    fn test_insert_item_ignores_duplicate_url() {
        let store = ItemStore::open_in_memory().unwrap();
        let source = store.add_source("Wire", "https://wire.example/rss", "").unwrap();
        let item = new_item(source, "https://wire.example/1", Utc::now());
        assert!(store.insert_item(&item).unwrap());
        assert!(!store.insert_item(&item).unwrap());
        assert!(store.existing_urls().unwrap().contains("https://wire.example/1"));
    }

    #[test]
    fn test_unsummarized_items_excludes_scored() {
        let store = ItemStore::open_in_memory().unwrap();
        let source = store.add_source("Wire", "https://wire.example/rss", "maritime").unwrap();
        let now = Utc::now();
        store
            .insert_item(&new_item(source, "https://wire.example/old", now - Duration::hours(5)))
            .unwrap();
        store.insert_item(&new_item(source, "https://wire.example/new", now)).unwrap();

        let pending = store.unsummarized_items(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].url, "https://wire.example/new");
        assert_eq!(pending[0].source_category.as_deref(), Some("maritime"));

        store.insert_summary(pending[0].id, &judgment(80, false)).unwrap();
        let pending = store.unsummarized_items(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, "https://wire.example/old");
    }

    #[test]
    fn test_recent_summaries_filters_stale_publications() {
        let store = ItemStore::open_in_memory().unwrap();
        let source = store.add_source("Wire", "https://wire.example/rss", "").unwrap();
        let now = Utc::now();
        store.insert_item(&new_item(source, "https://wire.example/fresh", now)).unwrap();
        store
            .insert_item(&new_item(source, "https://wire.example/stale", now - Duration::days(30)))
            .unwrap();
        for item in store.unsummarized_items(10).unwrap() {
            let score = if item.url.ends_with("fresh") { 55 } else { 90 };
            store.insert_summary(item.id, &judgment(score, false)).unwrap();
        }

        let records = store.recent_summaries(now + Duration::minutes(1), 24, 7).unwrap();
        let items = normalize_all(records);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://wire.example/fresh");
        assert_eq!(items[0].relevance_score, 55);
        assert_eq!(items[0].category, Category::Trade);
        assert_eq!(items[0].topics, vec!["tariffs"]);
    }

    #[test]
    fn test_save_digest_replaces_same_date() {
        let store = ItemStore::open_in_memory().unwrap();
        store.save_digest("2026-10-17", &DigestTiers::default()).unwrap();
        store.mark_email_sent("2026-10-17").unwrap();
        assert!(store.digest_for("2026-10-17").unwrap().unwrap().email_sent);

        store.save_digest("2026-10-17", &DigestTiers::default()).unwrap();
        let snapshot = store.digest_for("2026-10-17").unwrap().unwrap();
        assert!(!snapshot.email_sent);
        assert!(snapshot.tiers.is_empty());

        store.save_digest("2026-10-18", &DigestTiers::default()).unwrap();
        assert_eq!(store.latest_digest().unwrap().unwrap().date, "2026-10-18");
        assert!(store.digest_for("2026-01-01").unwrap().is_none());
    }

    #[test]
    fn test_digest_recipients_prefers_settings() {
        let store = ItemStore::open_in_memory().unwrap();
        let fallback = vec!["env@example.com".to_string()];
        assert_eq!(store.digest_recipients(&fallback), fallback);

        store.set_setting(RECIPIENTS_KEY, "a@example.com, b@example.com").unwrap();
        assert_eq!(
            store.digest_recipients(&fallback),
            vec!["a@example.com", "b@example.com"]
        );

        store.set_setting(RECIPIENTS_KEY, " , ").unwrap();
        assert_eq!(store.digest_recipients(&fallback), fallback);
    }

    #[test]
    fn test_open_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("intel.db");
        let store = ItemStore::open(&path).unwrap();
        store.set_setting("k", "v").unwrap();
        drop(store);

        let reopened = ItemStore::open(&path).unwrap();
        assert_eq!(reopened.get_setting("k").unwrap().as_deref(), Some("v"));
    }
}
