use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

pub const APP_DIR: &str = "intel-digest";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_FROM: &str = "Intel Digest <digest@localhost>";

const ENV_HELP: &str = "To fix this, create ~/.config/intel-digest/.env with:\n  \
    ANTHROPIC_API_KEY=your_key_here\n  \
    RESEND_API_KEY=your_key_here\n  \
    DIGEST_EMAIL_TO=you@example.com";

/// Settings for the pipeline binaries, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: Option<String>,
    pub resend_api_key: Option<String>,
    pub digest_email_to: Vec<String>,
    pub digest_email_from: String,
    pub database_path: PathBuf,
    pub model: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Try to load .env from multiple locations
        Self::try_load_dotenv();

        let database_path = match non_empty_var("INTEL_DIGEST_DB") {
            Some(path) => PathBuf::from(path),
            None => default_data_dir()?.join("intel.db"),
        };

        Ok(Self {
            anthropic_api_key: non_empty_var("ANTHROPIC_API_KEY"),
            resend_api_key: non_empty_var("RESEND_API_KEY"),
            digest_email_to: split_recipients(&env::var("DIGEST_EMAIL_TO").unwrap_or_default()),
            digest_email_from: non_empty_var("DIGEST_EMAIL_FROM")
                .unwrap_or_else(|| DEFAULT_FROM.to_string()),
            database_path,
            model: non_empty_var("INTEL_DIGEST_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    pub fn require_anthropic_key(&self) -> Result<&str> {
        self.anthropic_api_key.as_deref().with_context(|| {
            format!(
                "ANTHROPIC_API_KEY not found.\n\n{}\n\n\
                Get your Anthropic API key from: https://console.anthropic.com/settings/keys",
                ENV_HELP
            )
        })
    }

    pub fn require_resend_key(&self) -> Result<&str> {
        self.resend_api_key.as_deref().with_context(|| {
            format!(
                "RESEND_API_KEY not found.\n\n{}\n\n\
                Get your Resend API key from: https://resend.com/api-keys",
                ENV_HELP
            )
        })
    }

    fn try_load_dotenv() {
        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/intel-digest/.env (standard config location)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join(APP_DIR).join(".env");
            if config_path.exists() && dotenvy::from_path(&config_path).is_ok() {
                return;
            }
        }

        // 3. ~/.env (home directory)
        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".env");
            if home_path.exists() {
                let _ = dotenvy::from_path(&home_path);
            }
        }
    }
}

/// Local data directory shared by the database and rendered artifacts.
pub fn default_data_dir() -> Result<PathBuf> {
    let dir = dirs::data_local_dir()
        .context("Could not determine local data directory")?
        .join(APP_DIR);
    std::fs::create_dir_all(&dir).context("Failed to create data directory")?;
    Ok(dir)
}

/// Split a comma-separated address list, dropping blanks.
pub fn split_recipients(list: &str) -> Vec<String> {
    list.split(',')
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_string())
        .collect()
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_recipients() {
        assert_eq!(
            split_recipients(" a@example.com, ,b@example.com,"),
            vec!["a@example.com", "b@example.com"]
        );
        assert!(split_recipients("").is_empty());
    }

    #[test]
    fn test_require_keys_report_missing() {
        let config = Config {
            anthropic_api_key: None,
            resend_api_key: Some("re_123".to_string()),
            digest_email_to: Vec::new(),
            digest_email_from: DEFAULT_FROM.to_string(),
            database_path: PathBuf::from("intel.db"),
            model: DEFAULT_MODEL.to_string(),
        };
        let err = config.require_anthropic_key().unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
        assert_eq!(config.require_resend_key().unwrap(), "re_123");
    }
}
