use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

use crate::models::{FeedSource, NewItem};
use crate::normalize::{parse_timestamp, UNTITLED};
use crate::store::ItemStore;

pub const ENTRIES_PER_FEED: usize = 20;
pub const STALE_AFTER_DAYS: i64 = 7;
pub const MAX_TITLE_CHARS: usize = 500;
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// One `<item>` (RSS) or `<entry>` (Atom) as it appeared in the feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub content: Option<String>,
    pub description: Option<String>,
    pub published: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Content,
    Description,
    Published,
}

impl Field {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Field::Title),
            b"link" => Some(Field::Link),
            b"encoded" | b"content" => Some(Field::Content),
            b"description" | b"summary" => Some(Field::Description),
            b"pubDate" | b"published" | b"updated" | b"date" => Some(Field::Published),
            _ => None,
        }
    }
}

impl FeedEntry {
    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Content => &mut self.content,
            Field::Description => &mut self.description,
            Field::Published => &mut self.published,
        }
    }

    /// First occurrence wins, so `published` beats a later `updated`.
    fn set_once(&mut self, field: Field, value: String) {
        let value = value.trim();
        let slot = self.slot(field);
        if slot.is_none() && !value.is_empty() {
            *slot = Some(value.to_string());
        }
    }
}

/// Parse RSS 2.0 or Atom XML into entries, in document order.
///
/// Malformed XML after at least one complete entry keeps what was read and
/// logs the error; a feed that yields nothing before the error is an error.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut entry: Option<FeedEntry> = None;
    // The field being read and the tag name that will close it
    let mut open: Option<(Field, Vec<u8>)> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let local = e.local_name();
                let name = local.as_ref();
                if name == b"item" || name == b"entry" {
                    entry = Some(FeedEntry::default());
                    open = None;
                } else if let Some(current) = entry.as_mut() {
                    if open.is_none() {
                        if let Some(field) = Field::from_local_name(name) {
                            if field == Field::Link {
                                if let Some(href) = atom_href(e) {
                                    current.set_once(Field::Link, href);
                                }
                            }
                            open = Some((field, name.to_vec()));
                            text.clear();
                        }
                    }
                }
            }
            Ok(Event::Empty(ref e)) => {
                if let Some(current) = entry.as_mut() {
                    if e.local_name().as_ref() == b"link" {
                        if let Some(href) = atom_href(e) {
                            current.set_once(Field::Link, href);
                        }
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if open.is_some() {
                    match e.unescape() {
                        Ok(unescaped) => text.push_str(&unescaped),
                        // unknown entities such as &nbsp; stay as written
                        Err(_) => text.push_str(&String::from_utf8_lossy(e)),
                    }
                }
            }
            Ok(Event::CData(e)) => {
                if open.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(ref e)) => {
                let local = e.local_name();
                let name = local.as_ref();
                if name == b"item" || name == b"entry" {
                    if let Some(done) = entry.take() {
                        entries.push(done);
                    }
                    open = None;
                } else if let Some((field, tag)) = open.as_ref() {
                    if tag.as_slice() == name {
                        if let Some(current) = entry.as_mut() {
                            current.set_once(*field, std::mem::take(&mut text));
                        }
                        open = None;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                if entries.is_empty() {
                    anyhow::bail!(
                        "Feed XML error at position {}: {}",
                        reader.error_position(),
                        e
                    );
                }
                warn!(
                    position = reader.error_position(),
                    kept = entries.len(),
                    "Feed XML error, keeping entries read so far: {}",
                    e
                );
                break;
            }
            _ => {}
        }
    }

    Ok(entries)
}

/// `href` of an Atom `<link>`, ignoring non-alternate relations.
fn atom_href(e: &BytesStart<'_>) -> Option<String> {
    let rel = e
        .try_get_attribute("rel")
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
    if rel.as_deref().is_some_and(|r| r != "alternate") {
        return None;
    }
    e.try_get_attribute("href")
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Truncate to at most `max` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

fn html_to_text(html: &str) -> String {
    if !html.contains('<') {
        return html.trim().to_string();
    }
    html2text::from_read(html.as_bytes(), 100).trim().to_string()
}

fn resolve_link(base: &str, link: &str) -> Option<String> {
    if let Ok(url) = Url::parse(link) {
        return Some(url.to_string());
    }
    Url::parse(base).ok()?.join(link).ok().map(|u| u.to_string())
}

/// Result of turning one feed's entries into storable items.
#[derive(Debug, Default)]
pub struct FeedBatch {
    pub items: Vec<NewItem>,
    pub skipped_old: usize,
}

/// Convert the first [`ENTRIES_PER_FEED`] entries of a feed into new items,
/// dropping links already seen and entries published before `cutoff`.
pub fn entries_to_items(
    source: &FeedSource,
    entries: Vec<FeedEntry>,
    seen_urls: &HashSet<String>,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> FeedBatch {
    let mut batch = FeedBatch::default();
    let mut batch_urls = HashSet::new();

    for entry in entries.into_iter().take(ENTRIES_PER_FEED) {
        let Some(url) = entry.link.as_deref().and_then(|l| resolve_link(&source.url, l)) else {
            continue;
        };
        if seen_urls.contains(&url) || !batch_urls.insert(url.clone()) {
            continue;
        }

        let published_at = entry
            .published
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(now);
        if published_at < cutoff {
            batch.skipped_old += 1;
            continue;
        }

        let title = entry
            .title
            .as_deref()
            .map(html_to_text)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());
        let body = entry
            .content
            .or(entry.description)
            .map(|html| html_to_text(&html))
            .unwrap_or_default();

        batch.items.push(NewItem {
            source_id: source.id,
            title: truncate_chars(&title, MAX_TITLE_CHARS).to_string(),
            url,
            content: truncate_chars(&body, MAX_CONTENT_CHARS).to_string(),
            published_at,
        });
    }

    batch
}

pub struct FeedFetcher {
    client: Client,
    semaphore: Arc<Semaphore>,
}

impl FeedFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; IntelDigest/1.0)")
            .build()
            .context("Failed to create HTTP client")?;

        let semaphore = Arc::new(Semaphore::new(4));

        Ok(Self { client, semaphore })
    }

    pub async fn fetch_feed(&self, url: &str) -> Result<Vec<FeedEntry>> {
        let _permit = self.semaphore.acquire().await?;

        let mut last_error = None;
        for attempt in 0..3u32 {
            match self.try_fetch_feed(url).await {
                Ok(entries) => return Ok(entries),
                Err(e) => {
                    debug!("Fetch attempt {} for {} failed: {:#}", attempt + 1, url, e);
                    last_error = Some(e);
                    if attempt < 2 {
                        let backoff = std::time::Duration::from_millis(500 * 2_u64.pow(attempt));
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Failed to fetch {}", url)))
    }

    async fn try_fetch_feed(&self, url: &str) -> Result<Vec<FeedEntry>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send HTTP request")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP error: {}", status);
        }

        let body = response.text().await.context("Failed to read response body")?;
        parse_feed(&body)
    }

    pub async fn fetch_sources_parallel(
        &self,
        sources: Vec<FeedSource>,
    ) -> Vec<(FeedSource, Result<Vec<FeedEntry>>)> {
        stream::iter(sources)
            .map(|source| async move {
                let entries = self.fetch_feed(&source.url).await;
                (source, entries)
            })
            .buffer_unordered(4)
            .collect()
            .await
    }
}

/// Totals for one ingest run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub sources: usize,
    pub new_items: usize,
    pub skipped_old: usize,
    pub failed_sources: Vec<String>,
}

/// Fetch every enabled source and store entries not seen before.
///
/// A source that cannot be fetched or parsed is logged and skipped.
pub async fn ingest_sources(
    store: &ItemStore,
    fetcher: &FeedFetcher,
    now: DateTime<Utc>,
) -> Result<IngestReport> {
    let sources = store.enabled_sources()?;
    let mut seen_urls = store.existing_urls()?;
    let cutoff = now - Duration::days(STALE_AFTER_DAYS);

    let mut report = IngestReport {
        sources: sources.len(),
        ..IngestReport::default()
    };

    let mut results = fetcher.fetch_sources_parallel(sources).await;
    results.sort_by_key(|(source, _)| source.id);

    for (source, entries) in results {
        let entries = match entries {
            Ok(entries) => entries,
            Err(e) => {
                warn!(source = %source.name, "Skipping feed: {:#}", e);
                report.failed_sources.push(source.name.clone());
                continue;
            }
        };

        let batch = entries_to_items(&source, entries, &seen_urls, cutoff, now);
        report.skipped_old += batch.skipped_old;

        let mut added = 0;
        for item in batch.items {
            if store.insert_item(&item)? {
                seen_urls.insert(item.url.clone());
                added += 1;
            }
        }
        if added > 0 {
            println!("   [{}] {}: +{} items", source.category, source.name, added);
        }
        report.new_items += added;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Maritime Wire</title>
    <link>https://wire.example/</link>
    <item>
      <title>Coast Guard updates EPIRB &amp; PLB guidance</title>
      <link>https://wire.example/epirb</link>
      <pubDate>Sat, 17 Oct 2026 08:00:00 GMT</pubDate>
      <description>Short teaser</description>
      <content:encoded><![CDATA[<p>Full <b>story</b> body.</p>]]></content:encoded>
    </item>
    <item>
      <title>Old news</title>
      <link>https://wire.example/old</link>
      <pubDate>Mon, 01 Jun 2026 08:00:00 GMT</pubDate>
    </item>
    <item>
      <link>/relative</link>
      <description>No title here</description>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Aviation Notes</title>
  <entry>
    <title>EASA publishes ELT rule</title>
    <link rel="self" href="https://air.example/self/1"/>
    <link href="https://air.example/elt"/>
    <published>2026-10-16T12:00:00Z</published>
    <updated>2026-10-17T12:00:00Z</updated>
    <summary>Summary text</summary>
  </entry>
</feed>"#;

    fn source() -> FeedSource {
        FeedSource {
            id: 1,
            name: "Maritime Wire".to_string(),
            url: "https://wire.example/feed.xml".to_string(),
            category: "maritime".to_string(),
            enabled: true,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()
    }

    // ==================== Parsing Tests ====================

    #[test]
    fn test_parse_rss_items() {
        let entries = parse_feed(RSS).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0].title.as_deref(),
            Some("Coast Guard updates EPIRB & PLB guidance")
        );
        assert_eq!(entries[0].link.as_deref(), Some("https://wire.example/epirb"));
        assert_eq!(entries[0].description.as_deref(), Some("Short teaser"));
        assert_eq!(
            entries[0].content.as_deref(),
            Some("<p>Full <b>story</b> body.</p>")
        );
        assert!(entries[2].title.is_none());
    }

    #[test]
    fn test_channel_fields_are_not_entries() {
        let entries = parse_feed(RSS).unwrap();
        assert!(entries.iter().all(|e| e.title.as_deref() != Some("Maritime Wire")));
    }

    #[test]
    fn test_parse_atom_entry() {
        let entries = parse_feed(ATOM).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].link.as_deref(), Some("https://air.example/elt"));
        assert_eq!(entries[0].published.as_deref(), Some("2026-10-16T12:00:00Z"));
        assert_eq!(entries[0].description.as_deref(), Some("Summary text"));
    }

    #[test]
    fn test_parse_malformed_feed_errors() {
        assert!(parse_feed("<rss><channel><item><title>x</item></rss>").is_err());
    }

    #[test]
    fn test_parse_truncated_feed_keeps_complete_items() {
        let xml = "<rss><channel>\
            <item><title>Cospas-Sarsat ground segment update</title>\
            <link>https://sar.example/1</link></item>\
            <item><title>Cut off</item></channel></rss>";
        let entries = parse_feed(xml).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title.as_deref(), Some("Cospas-Sarsat ground segment update"));
        assert_eq!(entries[0].link.as_deref(), Some("https://sar.example/1"));
    }

    #[test]
    fn test_parse_unknown_entity_kept_verbatim() {
        let xml = "<rss><channel><item>\
            <title>Fire&nbsp;safety rules</title>\
            </item></channel></rss>";
        let entries = parse_feed(xml).unwrap();
        assert_eq!(entries[0].title.as_deref(), Some("Fire&nbsp;safety rules"));
    }

    // ==================== Conversion Tests ====================

    #[test]
    fn test_entries_to_items_filters_and_defaults() {
        let entries = parse_feed(RSS).unwrap();
        let cutoff = now() - Duration::days(STALE_AFTER_DAYS);
        let batch = entries_to_items(&source(), entries, &HashSet::new(), cutoff, now());

        assert_eq!(batch.skipped_old, 1);
        assert_eq!(batch.items.len(), 2);

        let first = &batch.items[0];
        assert_eq!(first.url, "https://wire.example/epirb");
        assert!(first.content.contains("Full"));
        assert!(!first.content.contains("<p>"));

        let untitled = &batch.items[1];
        assert_eq!(untitled.title, UNTITLED);
        assert_eq!(untitled.url, "https://wire.example/relative");
        assert_eq!(untitled.published_at, now());
        assert_eq!(untitled.content, "No title here");
    }

    #[test]
    fn test_entries_to_items_skips_seen_urls() {
        let entries = parse_feed(RSS).unwrap();
        let seen: HashSet<String> = ["https://wire.example/epirb".to_string()].into();
        let cutoff = now() - Duration::days(STALE_AFTER_DAYS);
        let batch = entries_to_items(&source(), entries, &seen, cutoff, now());
        assert!(batch.items.iter().all(|i| i.url != "https://wire.example/epirb"));
    }

    #[test]
    fn test_entries_to_items_caps_per_feed() {
        let entries: Vec<FeedEntry> = (0..30)
            .map(|i| FeedEntry {
                link: Some(format!("https://wire.example/{}", i)),
                ..FeedEntry::default()
            })
            .collect();
        let cutoff = now() - Duration::days(STALE_AFTER_DAYS);
        let batch = entries_to_items(&source(), entries, &HashSet::new(), cutoff, now());
        assert_eq!(batch.items.len(), ENTRIES_PER_FEED);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }
}
