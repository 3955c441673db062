use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use shared::telemetry::{init_tracing, level_for};
use shared::{Config, DigestRenderer, ItemStore, ResendMailer};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "prepare-podcast")]
#[command(about = "Write the audio briefing script for a saved digest and email the recording")]
struct Args {
    /// Digest date (YYYY-MM-DD), defaults to the latest saved digest
    #[arg(short, long)]
    date: Option<String>,

    /// Directory for the script
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Recorded audio file to send as an attachment
    #[arg(short, long)]
    audio: Option<PathBuf>,

    /// Write the script without sending email
    #[arg(long)]
    no_email: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json, level_for(args.verbose));

    let config = Config::from_env()?;
    let store = ItemStore::open(&config.database_path)?;

    println!("📖 Fetching digest...");
    let snapshot = match args.date.as_deref() {
        Some(d) => {
            let date = NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .with_context(|| format!("Invalid date '{}'. Use YYYY-MM-DD.", d))?
                .format("%Y-%m-%d")
                .to_string();
            store.digest_for(&date)?
        }
        None => store.latest_digest()?,
    };
    let Some(snapshot) = snapshot else {
        anyhow::bail!("No digest found. Run build-digest first.");
    };
    println!(
        "✓ Found digest for {} ({} items)",
        snapshot.date,
        snapshot.tiers.total()
    );

    println!("\n📝 Writing podcast script...");
    let script = DigestRenderer::podcast_script(&snapshot.date, &snapshot.tiers);
    let output_dir = match args.output {
        Some(dir) => dir,
        None => DigestRenderer::default_output_dir()?,
    };
    let script_path = DigestRenderer::save(
        &script,
        &output_dir,
        &format!("podcast-{}.md", snapshot.date),
    )
    .context("Failed to save podcast script")?;
    println!(
        "✓ Script ({} characters) saved to: {}",
        script.chars().count(),
        script_path.display()
    );

    let Some(audio_path) = args.audio else {
        println!("\n✅ Done! Feed the script to your TTS tool, then rerun with --audio.");
        return Ok(());
    };
    if !audio_path.exists() {
        anyhow::bail!("Audio file not found: {}", audio_path.display());
    }
    if args.no_email {
        println!("\n✅ Done! Email skipped (--no-email).");
        return Ok(());
    }

    println!("\n📧 Sending audio briefing...");
    let recipients = store.digest_recipients(&config.digest_email_to);
    let mailer = ResendMailer::new(
        config.require_resend_key()?.to_string(),
        config.digest_email_from.clone(),
    )?;
    mailer
        .send_podcast(&snapshot.date, &recipients, &audio_path)
        .await
        .context("Failed to send podcast email")?;
    info!(date = %snapshot.date, "Podcast email sent");
    println!("✓ Email sent to {} recipients", recipients.len());

    println!("\n✅ Done!");
    Ok(())
}
