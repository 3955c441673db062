use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use shared::telemetry::{init_tracing, level_for};
use shared::{
    assemble, normalize_all, Config, DigestRenderer, ItemStore, ResendMailer, SummaryRecord,
    Thresholds,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "build-digest")]
#[command(about = "Assemble today's tiered intel digest, save it and email it")]
struct Args {
    /// Only consider summaries written in the last N hours
    #[arg(long, default_value = "24")]
    hours: i64,

    /// Skip items published more than N days ago
    #[arg(long, default_value = "7")]
    stale_days: i64,

    /// Digest date (YYYY-MM-DD), defaults to today in UTC
    #[arg(short, long)]
    date: Option<String>,

    /// Read summary records from a JSON export instead of the store
    #[arg(long)]
    pool: Option<PathBuf>,

    /// Directory for the rendered HTML
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Save and render without sending email
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

    let date = match args.date.as_deref() {
        Some(d) => NaiveDate::parse_from_str(d, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{}'. Use YYYY-MM-DD.", d))?,
        None => Utc::now().date_naive(),
    }
    .format("%Y-%m-%d")
    .to_string();

    println!("📚 Fetching recent summaries...");
    let records = match &args.pool {
        Some(path) => load_pool_file(path)?,
        None => store.recent_summaries(Utc::now(), args.hours, args.stale_days)?,
    };
    println!("✓ Found {} summaries", records.len());

    let pool = normalize_all(records);
    let thresholds = Thresholds::from_pool(&pool);
    info!(
        items = pool.len(),
        high = thresholds.high,
        mid = thresholds.mid,
        "Derived tier thresholds"
    );

    println!("\n🧮 Building digest...");
    let tiers = assemble(&pool);
    println!("{}", DigestRenderer::digest_summary(&tiers));

    if tiers.is_empty() {
        println!("\nNothing to report for {}. Skipping save and email.", date);
        return Ok(());
    }

    println!("\n  CRITICAL UPDATES:");
    for item in &tiers.critical {
        let title: String = item.title.chars().take(55).collect();
        println!("  - [{}] {}", item.category, title);
    }

    println!("\n💾 Saving digest for {}...", date);
    store.save_digest(&date, &tiers)?;

    let html = DigestRenderer::email_html(&date, &tiers);
    let output_dir = match args.output {
        Some(dir) => dir,
        None => DigestRenderer::default_output_dir()?,
    };
    let html_path = DigestRenderer::save(&html, &output_dir, &format!("digest-{}.html", date))
        .context("Failed to save HTML digest")?;
    println!("✓ HTML saved to: {}", html_path.display());

    if args.no_email {
        println!("\n✅ Done! Email skipped (--no-email).");
        return Ok(());
    }

    println!("\n📧 Sending email...");
    let recipients = store.digest_recipients(&config.digest_email_to);
    let mailer = ResendMailer::new(
        config.require_resend_key()?.to_string(),
        config.digest_email_from.clone(),
    )?;
    if let Err(e) = mailer.send_digest(&date, &recipients, html).await {
        warn!("Digest email failed: {:#}", e);
        return Err(e.context("Failed to send digest email"));
    }
    store.mark_email_sent(&date)?;
    println!("✓ Email sent to {} recipients", recipients.len());

    println!("\n✅ Done! Digest for {} delivered.", date);
    Ok(())
}

fn load_pool_file(path: &Path) -> Result<Vec<SummaryRecord>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read pool file: {}", path.display()))?;
    let records: Vec<SummaryRecord> = serde_json::from_str(&content).with_context(|| {
        format!(
            "Failed to parse {}. Expected a JSON array of summary records.",
            path.display()
        )
    })?;
    Ok(records)
}
