use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::ingest::truncate_chars;
use crate::models::{Category, Judgment, PendingItem};
use crate::normalize::clamp_score;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const MAX_CONTENT_CHARS: usize = 4000;
const MAX_TOPICS: usize = 3;
const MAX_ATTEMPTS: u32 = 5;

const SCORING_PROMPT: &str = r#"You are scoring news for a company that manufactures:
- EPIRBs (Emergency Position Indicating Radio Beacons) for maritime
- ELTs (Emergency Locator Transmitters) for aviation
- PLBs (Personal Locator Beacons) for outdoor/marine safety
- GMDSS equipment for commercial vessels

Given the title and content below, return a JSON object with:
{
  "summary": "One clear sentence summarizing what this is about",
  "why_it_matters": "Max 25 words on why this matters to the business",
  "category": "market|technology|supply_chain|trade|regulatory|competitor",
  "topics": ["tag1", "tag2", "tag3"],
  "relevance_score": 0-100,
  "must_read": true/false,
  "hype_flag": true/false
}

Category definitions:
- market: Aviation/maritime industry news, customer segments, market trends
- technology: Electronics, beacons, SAR systems, GPS, semiconductors
- supply_chain: Components, manufacturing, logistics, shortages
- trade: Tariffs, trade policy, geopolitics affecting supply chains
- regulatory: FAA, EASA, IMO, USCG, Cospas-Sarsat regulations
- competitor: Competing beacon and avionics manufacturers

Scoring for relevance:
- 90-100: Direct beacon/SAR news, major regulatory change, competitor M&A
- 75-89: FAA/EASA/IMO regulatory updates, supply chain disruption, tariff changes
- 60-74: General aviation/maritime industry news, electronics manufacturing
- 40-59: Tangentially related industry news
- 0-39: Low relevance to the business

Rules:
- must_read = true ONLY for: beacon regulations, Cospas-Sarsat updates, competitor news, major FAA/IMO changes
- hype_flag = true if: vague claims, no concrete details
- Return ONLY valid JSON, no markdown"#;

/// What happened when one item was sent for scoring.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    /// The model returned a usable judgment.
    Scored(Judgment),
    /// The model answered but not with parseable JSON.
    Fallback(Judgment),
    /// Every attempt failed to reach the model.
    Failed(String),
}

#[derive(Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    text: String,
}

pub struct ClaudeScorer {
    client: Client,
    api_key: String,
    model: String,
    semaphore: Arc<Semaphore>,
}

impl ClaudeScorer {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        // Low concurrency keeps us under the per-minute token limit
        let semaphore = Arc::new(Semaphore::new(2));

        Ok(Self {
            client,
            api_key,
            model,
            semaphore,
        })
    }

    pub async fn score_item(&self, item: &PendingItem) -> ScoreOutcome {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(e) => return ScoreOutcome::Failed(e.to_string()),
        };

        let user_content = user_message(item);

        for attempt in 0..MAX_ATTEMPTS {
            match self.request_judgment(&user_content).await {
                Ok(text) => {
                    // Small pause after success to spread load
                    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
                    return match parse_judgment(&text) {
                        Some(judgment) => ScoreOutcome::Scored(judgment),
                        None => {
                            warn!(item = %item.title, "Unparseable judgment, using fallback");
                            ScoreOutcome::Fallback(fallback_judgment(&item.title))
                        }
                    };
                }
                Err(e) => {
                    let error_msg = format!("{:#}", e);
                    if attempt + 1 == MAX_ATTEMPTS {
                        warn!(item = %item.title, "Failed to score: {}", error_msg);
                        return ScoreOutcome::Failed(error_msg);
                    }

                    let is_rate_limit = error_msg.contains("rate_limit");
                    let backoff = if is_rate_limit {
                        std::time::Duration::from_secs(15 * (attempt as u64 + 1))
                    } else {
                        std::time::Duration::from_millis(1000 * 2_u64.pow(attempt))
                    };

                    if is_rate_limit {
                        warn!("Rate limit hit, waiting {:?} before retry...", backoff);
                    } else {
                        debug!("Scoring attempt {} failed: {}", attempt + 1, error_msg);
                    }

                    tokio::time::sleep(backoff).await;
                }
            }
        }

        ScoreOutcome::Failed("Max retries reached".to_string())
    }

    async fn request_judgment(&self, user_content: &str) -> Result<String> {
        let request = ClaudeRequest {
            model: &self.model,
            max_tokens: 500,
            system: SCORING_PROMPT,
            messages: vec![Message {
                role: "user".to_string(),
                content: user_content.to_string(),
            }],
        };

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Claude API")?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            anyhow::bail!("Claude API error: {}", error_text);
        }

        let claude_response = response
            .json::<ClaudeResponse>()
            .await
            .context("Failed to parse Claude API response")?;

        Ok(claude_response
            .content
            .first()
            .map(|c| c.text.clone())
            .unwrap_or_default())
    }

    pub async fn score_items_parallel(
        &self,
        items: Vec<PendingItem>,
    ) -> Vec<(PendingItem, ScoreOutcome)> {
        let results: Vec<(PendingItem, ScoreOutcome)> = stream::iter(items)
            .map(|item| async move {
                let outcome = self.score_item(&item).await;
                // Print progress dot
                eprint!(".");
                let _ = std::io::stderr().flush();
                (item, outcome)
            })
            .buffer_unordered(2)
            .collect()
            .await;
        eprintln!(); // Newline after dots
        results
    }
}

fn user_message(item: &PendingItem) -> String {
    let content = if item.content.trim().is_empty() {
        "(No content - summarize based on title)"
    } else {
        truncate_chars(&item.content, MAX_CONTENT_CHARS)
    };
    let source_category = item
        .source_category
        .as_deref()
        .filter(|c| !c.is_empty())
        .unwrap_or("general");

    format!(
        "Title: {}\n\nSource category: {}\n\nContent:\n{}",
        item.title, source_category, content
    )
}

/// Extract the outermost `{...}` span from a model reply and read it as a
/// judgment, defaulting any missing field.
pub fn parse_judgment(text: &str) -> Option<Judgment> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
    let obj = value.as_object()?;

    let string_or = |key: &str, default: &str| {
        obj.get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| default.to_string())
    };

    let category = obj
        .get("category")
        .and_then(|v| v.as_str())
        .map(Category::parse)
        .filter(Category::is_known)
        .unwrap_or_default();

    let topics = obj
        .get("topics")
        .and_then(|v| v.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str())
                .take(MAX_TOPICS)
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    let relevance_score = match obj.get("relevance_score") {
        Some(score) => clamp_score(Some(score)),
        None => 50,
    };

    Some(Judgment {
        summary: string_or("summary", "No summary available"),
        why_it_matters: string_or("why_it_matters", "Significance unclear"),
        category,
        topics,
        relevance_score,
        must_read: obj.get("must_read").and_then(|v| v.as_bool()).unwrap_or(false),
        hype_flag: obj.get("hype_flag").and_then(|v| v.as_bool()).unwrap_or(false),
    })
}

/// Judgment used when the model's reply cannot be read.
pub fn fallback_judgment(title: &str) -> Judgment {
    Judgment {
        summary: title.to_string(),
        why_it_matters: "Unable to analyze significance".to_string(),
        category: Category::default(),
        topics: Vec::new(),
        relevance_score: 30,
        must_read: false,
        hype_flag: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(content: &str) -> PendingItem {
        PendingItem {
            id: 1,
            title: "Beacon maker acquired".to_string(),
            url: "https://example.com/a".to_string(),
            content: content.to_string(),
            source_category: Some("competitor".to_string()),
        }
    }

    #[test]
    fn test_parse_judgment_full() {
        let text = r#"Here you go:
{"summary": "Rival acquired", "why_it_matters": "Market shift", "category": "competitor",
 "topics": ["m&a", "beacons", "market", "extra"], "relevance_score": 95,
 "must_read": true, "hype_flag": false}"#;
        let judgment = parse_judgment(text).unwrap();
        assert_eq!(judgment.summary, "Rival acquired");
        assert_eq!(judgment.category, Category::Competitor);
        assert_eq!(judgment.topics.len(), MAX_TOPICS);
        assert_eq!(judgment.relevance_score, 95);
        assert!(judgment.must_read);
    }

    #[test]
    fn test_parse_judgment_defaults_and_clamps() {
        let judgment =
            parse_judgment(r#"{"category": "weather", "relevance_score": 140}"#).unwrap();
        assert_eq!(judgment.summary, "No summary available");
        assert_eq!(judgment.why_it_matters, "Significance unclear");
        assert_eq!(judgment.category, Category::Market);
        assert_eq!(judgment.relevance_score, 100);
        assert!(!judgment.must_read);
    }

    #[test]
    fn test_parse_judgment_missing_score_defaults_to_fifty() {
        let judgment = parse_judgment(r#"{"summary": "x"}"#).unwrap();
        assert_eq!(judgment.relevance_score, 50);
    }

    #[test]
    fn test_parse_judgment_rejects_non_json() {
        assert!(parse_judgment("I cannot help with that").is_none());
        assert!(parse_judgment("} backwards {").is_none());
        assert!(parse_judgment("{not json}").is_none());
    }

    #[test]
    fn test_fallback_judgment() {
        let judgment = fallback_judgment("Some title");
        assert_eq!(judgment.summary, "Some title");
        assert_eq!(judgment.relevance_score, 30);
        assert!(!judgment.must_read);
    }

    #[test]
    fn test_user_message_truncates_content() {
        let long = "x".repeat(MAX_CONTENT_CHARS + 500);
        let message = user_message(&pending(&long));
        assert!(message.starts_with("Title: Beacon maker acquired"));
        assert!(message.contains("Source category: competitor"));
        assert_eq!(message.matches('x').count(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn test_user_message_without_content() {
        let message = user_message(&pending("   "));
        assert!(message.contains("(No content - summarize based on title)"));
    }
}
