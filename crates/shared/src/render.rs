use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::default_data_dir;
use crate::models::{DigestTiers, ScoredItem};

pub const CRITICAL_LABEL: &str = "Critical Updates";
pub const NOTABLE_LABEL: &str = "Industry Watch";
pub const MINOR_LABEL: &str = "Quick Hits";

pub struct DigestRenderer;

impl DigestRenderer {
    pub fn subject(date: &str) -> String {
        format!("Industry Intelligence - {}", date)
    }

    /// Inline-styled HTML for email clients. Empty tiers get no section.
    pub fn email_html(date: &str, tiers: &DigestTiers) -> String {
        let mut html = String::new();

        html.push_str("<html>\n");
        html.push_str("<body style=\"font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;\">\n");
        html.push_str(&format!(
            "  <h1 style=\"color: #1a1a1a; border-bottom: 2px solid #0066cc; padding-bottom: 10px;\">{}</h1>\n",
            Self::escape_html(&Self::subject(date))
        ));

        if !tiers.critical.is_empty() {
            html.push_str(&format!(
                "  <h2 style=\"color: #cc0000;\">&#x1F6A8; {}</h2>\n",
                CRITICAL_LABEL
            ));
            for item in &tiers.critical {
                html.push_str("  <div style=\"margin-bottom: 20px; padding: 15px; background: #f8f9fa; border-left: 4px solid #cc0000;\">\n");
                html.push_str(&format!(
                    "    <h3 style=\"margin: 0 0 10px 0;\">{}{}{}</h3>\n",
                    Self::link(item, "color: #1a1a1a; text-decoration: none;"),
                    Self::badge(&item.category.as_str().to_uppercase()),
                    if item.hype_flag {
                        Self::badge("HYPE?")
                    } else {
                        String::new()
                    }
                ));
                if !item.summary.is_empty() {
                    html.push_str(&format!(
                        "    <p style=\"margin: 0 0 10px 0; color: #333;\">{}</p>\n",
                        Self::escape_html(&item.summary)
                    ));
                }
                if !item.why_it_matters.is_empty() {
                    html.push_str(&format!(
                        "    <p style=\"margin: 0; color: #666; font-style: italic;\">Impact: {}</p>\n",
                        Self::escape_html(&item.why_it_matters)
                    ));
                }
                html.push_str("  </div>\n");
            }
        }

        if !tiers.notable.is_empty() {
            html.push_str(&format!(
                "  <h2 style=\"color: #0066cc;\">&#x1F4CB; {}</h2>\n",
                NOTABLE_LABEL
            ));
            for item in &tiers.notable {
                html.push_str("  <div style=\"margin-bottom: 15px; padding: 10px; background: #f8f9fa;\">\n");
                html.push_str(&format!(
                    "    <h4 style=\"margin: 0 0 5px 0;\">{}</h4>\n",
                    Self::link(item, "color: #1a1a1a;")
                ));
                if !item.summary.is_empty() {
                    html.push_str(&format!(
                        "    <p style=\"margin: 0; color: #666; font-size: 14px;\">{}</p>\n",
                        Self::escape_html(&item.summary)
                    ));
                }
                html.push_str("  </div>\n");
            }
        }

        if !tiers.minor.is_empty() {
            html.push_str(&format!(
                "  <h2 style=\"color: #666;\">&#x26A1; {}</h2>\n  <ul>\n",
                MINOR_LABEL
            ));
            for item in &tiers.minor {
                html.push_str(&format!("    <li>{}</li>\n", Self::link(item, "")));
            }
            html.push_str("  </ul>\n");
        }

        html.push_str("  <hr style=\"margin-top: 30px; border: none; border-top: 1px solid #ddd;\">\n");
        html.push_str("  <p style=\"color: #999; font-size: 12px;\">Generated by Intel Digest</p>\n");
        html.push_str("</body>\n</html>\n");
        html
    }

    /// Markdown narrative handed to an external text-to-speech tool.
    pub fn podcast_script(date: &str, tiers: &DigestTiers) -> String {
        let mut text = String::new();

        text.push_str(&format!("# Industry Intelligence Briefing for {}\n\n", date));
        text.push_str("Welcome to your daily industry intelligence briefing covering search and rescue, aviation safety, maritime regulation, and the wider safety equipment market.\n\n");

        if !tiers.critical.is_empty() {
            text.push_str("## CRITICAL UPDATES - Must Know\n\n");
            for item in &tiers.critical {
                Self::push_story(&mut text, item, "Why this matters");
            }
        }

        if !tiers.notable.is_empty() {
            text.push_str("## INDUSTRY DEVELOPMENTS - Worth Tracking\n\n");
            for item in &tiers.notable {
                Self::push_story(&mut text, item, "Relevance");
            }
        }

        if !tiers.minor.is_empty() {
            text.push_str("## QUICK INTEL - Brief Updates\n\n");
            for item in &tiers.minor {
                if item.summary.is_empty() {
                    text.push_str(&format!("- **{}**\n", item.title));
                } else {
                    text.push_str(&format!("- **{}**: {}\n", item.title, item.summary));
                }
            }
        }

        text.push_str("\n## Wrap Up\n\n");
        text.push_str("That's your industry intelligence briefing for today. Stay ahead of regulatory changes, track competitor moves, and keep building the best safety equipment in the industry.\n");
        text
    }

    fn push_story(text: &mut String, item: &ScoredItem, impact_label: &str) {
        text.push_str(&format!("### {}\n", item.title));
        if !item.summary.is_empty() {
            text.push_str(&format!("{}\n", item.summary));
        }
        text.push('\n');
        if !item.why_it_matters.is_empty() {
            text.push_str(&format!("{}: {}\n\n", impact_label, item.why_it_matters));
        }
    }

    /// One line per tier, for console output.
    pub fn digest_summary(tiers: &DigestTiers) -> String {
        format!(
            "{}: {}\n{}: {}\n{}: {}\nTotal: {}",
            CRITICAL_LABEL,
            tiers.critical.len(),
            NOTABLE_LABEL,
            tiers.notable.len(),
            MINOR_LABEL,
            tiers.minor.len(),
            tiers.total()
        )
    }

    fn link(item: &ScoredItem, style: &str) -> String {
        let title = Self::escape_html(&item.title);
        if item.url.is_empty() {
            return title;
        }
        if style.is_empty() {
            format!("<a href=\"{}\">{}</a>", Self::escape_html(&item.url), title)
        } else {
            format!(
                "<a href=\"{}\" style=\"{}\">{}</a>",
                Self::escape_html(&item.url),
                style,
                title
            )
        }
    }

    fn badge(label: &str) -> String {
        format!(
            "<span style=\"background: #eee; padding: 2px 6px; border-radius: 3px; font-size: 11px; margin-left: 8px;\">{}</span>",
            Self::escape_html(label)
        )
    }

    fn escape_html(text: &str) -> String {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&#39;")
    }

    /// Default directory for rendered digests and scripts.
    pub fn default_output_dir() -> Result<PathBuf> {
        let dir = default_data_dir()?.join("digests");
        fs::create_dir_all(&dir).context("Failed to create digests directory")?;
        Ok(dir)
    }

    pub fn save(content: &str, dir: &Path, filename: &str) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let filepath = dir.join(filename);
        fs::write(&filepath, content)
            .with_context(|| format!("Failed to write {}", filepath.display()))?;
        Ok(filepath)
    }
}
