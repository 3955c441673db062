use anyhow::{Context, Result};
use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use std::path::Path;

use crate::render::DigestRenderer;

const API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Serialize)]
pub struct Attachment {
    pub filename: String,
    /// Base64-encoded file body
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct EmailRequest {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl EmailRequest {
    pub fn digest(from: &str, recipients: &[String], date: &str, html: String) -> Result<Self> {
        ensure_recipients(recipients)?;
        Ok(Self {
            from: from.to_string(),
            to: recipients.to_vec(),
            subject: DigestRenderer::subject(date),
            html,
            attachments: Vec::new(),
        })
    }

    pub fn podcast(from: &str, recipients: &[String], date: &str, audio: &[u8]) -> Result<Self> {
        ensure_recipients(recipients)?;
        let html = format!(
            "<h1>Your Intel Digest audio briefing is ready</h1>\n\
             <p>Today's key developments in SAR, aviation, maritime, and the wider safety equipment industry.</p>\n\
             <p>Date: {}</p>\n\
             <p>The audio file is attached to this email.</p>\n\
             <hr>\n\
             <p style=\"color: #666; font-size: 12px;\">Generated by Intel Digest</p>",
            date
        );
        Ok(Self {
            from: from.to_string(),
            to: recipients.to_vec(),
            subject: format!("Intel Digest Audio - {}", date),
            html,
            attachments: vec![Attachment {
                filename: format!("intel-digest-{}.mp3", date),
                content: base64::engine::general_purpose::STANDARD.encode(audio),
            }],
        })
    }
}

fn ensure_recipients(recipients: &[String]) -> Result<()> {
    if recipients.is_empty() {
        anyhow::bail!(
            "No digest recipients configured. Set DIGEST_EMAIL_TO or the digest_recipients setting."
        );
    }
    Ok(())
}

pub struct ResendMailer {
    client: Client,
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn new(api_key: String, from: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            from,
        })
    }

    pub async fn send_digest(&self, date: &str, recipients: &[String], html: String) -> Result<()> {
        let request = EmailRequest::digest(&self.from, recipients, date, html)?;
        self.send(&request).await
    }

    pub async fn send_podcast(
        &self,
        date: &str,
        recipients: &[String],
        audio_path: &Path,
    ) -> Result<()> {
        let audio = tokio::fs::read(audio_path)
            .await
            .with_context(|| format!("Failed to read audio file: {}", audio_path.display()))?;
        let request = EmailRequest::podcast(&self.from, recipients, date, &audio)?;
        self.send(&request).await
    }

    async fn send(&self, request: &EmailRequest) -> Result<()> {
        let response = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .context("Failed to send request to Resend API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            anyhow::bail!("Resend API returned error: {} - {}", status, error_text);
        }

        tracing::info!(recipients = request.to.len(), subject = %request.subject, "Email accepted");
        Ok(())
    }
}
