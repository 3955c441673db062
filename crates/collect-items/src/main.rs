use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use shared::telemetry::{init_tracing, level_for};
use shared::{ingest_sources, ClaudeScorer, Config, FeedFetcher, ItemStore, ScoreOutcome};
use tracing::info;

#[derive(Parser)]
#[command(name = "collect-items")]
#[command(about = "Ingest news feeds and score new items for the daily intel digest")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch enabled feeds, then score unsummarized items (default)
    Run {
        /// Maximum number of items to score in this run
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Only score items already in the store
        #[arg(long)]
        skip_ingest: bool,

        /// Only fetch feeds
        #[arg(long)]
        skip_score: bool,
    },
    /// Add (or update) a feed source
    AddSource {
        /// Display name
        #[arg(short, long)]
        name: String,

        /// RSS or Atom feed URL
        #[arg(short, long)]
        url: String,

        /// Source category passed to the scorer (e.g. maritime, aviation)
        #[arg(short, long, default_value = "")]
        category: String,
    },
    /// Enable or disable a feed source by id
    ToggleSource {
        id: i64,

        #[arg(long)]
        disable: bool,
    },
    /// List configured feed sources
    Sources,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json, level_for(args.verbose));

    let config = Config::from_env()?;
    let store = ItemStore::open(&config.database_path)?;
    info!(db = %config.database_path.display(), "Opened item store");

    match args.command.unwrap_or(Command::Run {
        limit: 50,
        skip_ingest: false,
        skip_score: false,
    }) {
        Command::Run {
            limit,
            skip_ingest,
            skip_score,
        } => run(&config, &store, limit, skip_ingest, skip_score).await,
        Command::AddSource {
            name,
            url,
            category,
        } => {
            let id = store.add_source(&name, &url, &category)?;
            println!("✓ Saved source #{}: {} ({})", id, name, url);
            Ok(())
        }
        Command::ToggleSource { id, disable } => {
            if !store.set_source_enabled(id, !disable)? {
                anyhow::bail!("No source with id {}", id);
            }
            println!(
                "✓ Source #{} {}",
                id,
                if disable { "disabled" } else { "enabled" }
            );
            Ok(())
        }
        Command::Sources => {
            let sources = store.list_sources()?;
            if sources.is_empty() {
                println!("No sources configured. Add one with `collect-items add-source`.");
            }
            for source in sources {
                println!(
                    "  {:>3}) [{}] {} {}{}",
                    source.id,
                    if source.category.is_empty() {
                        "-"
                    } else {
                        source.category.as_str()
                    },
                    source.name,
                    source.url,
                    if source.enabled { "" } else { " (disabled)" }
                );
            }
            Ok(())
        }
    }
}

async fn run(
    config: &Config,
    store: &ItemStore,
    limit: usize,
    skip_ingest: bool,
    skip_score: bool,
) -> Result<()> {
    if !skip_ingest {
        println!("\n📡 Fetching RSS feeds...");
        let fetcher = FeedFetcher::new()?;
        let report = ingest_sources(store, &fetcher, Utc::now())
            .await
            .context("Failed to ingest feeds")?;

        println!(
            "✓ {} sources: {} new items, {} skipped (old)",
            report.sources, report.new_items, report.skipped_old
        );
        if !report.failed_sources.is_empty() {
            println!("\n⚠ Failed to fetch {} sources:", report.failed_sources.len());
            for name in &report.failed_sources {
                println!("  ✗ {}", name);
            }
        }
    }

    if skip_score {
        return Ok(());
    }

    println!("\n🔍 Checking for unsummarized items...");
    let pending = store.unsummarized_items(limit)?;
    if pending.is_empty() {
        println!("No new items to score.");
        return Ok(());
    }
    println!("✓ Found {} items to score", pending.len());

    println!("\n🤖 Scoring items with Claude...");
    println!("  (This may take a minute...)");
    let api_key = config.require_anthropic_key()?.to_string();
    let scorer = ClaudeScorer::new(api_key, config.model.clone())?;
    let results = scorer.score_items_parallel(pending).await;

    let mut scored = 0;
    let mut fallback = 0;
    let mut failed = Vec::new();

    for (item, outcome) in results {
        match outcome {
            ScoreOutcome::Scored(judgment) => {
                store.insert_summary(item.id, &judgment)?;
                scored += 1;
            }
            ScoreOutcome::Fallback(judgment) => {
                store.insert_summary(item.id, &judgment)?;
                fallback += 1;
            }
            ScoreOutcome::Failed(reason) => failed.push((item, reason)),
        }
    }

    println!(
        "✓ Scored {} items ({} with fallback judgment)",
        scored + fallback,
        fallback
    );
    if !failed.is_empty() {
        println!("\n⚠ Failed to score {} items (will retry next run):", failed.len());
        for (item, reason) in &failed {
            println!("  ✗ \"{}\"", item.title);
            println!("    {}", reason);
        }
    }

    Ok(())
}
