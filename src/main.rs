mod browser;
mod config;
mod contacts;
mod db;
mod extract;
mod filter;
mod models;
mod pipeline;

use anyhow::{anyhow, Result};
use browser::{RendererOptions, WebDriverRenderer};
use clap::{Parser, Subcommand};
use config::PipelineConfig;
use db::Database;
use pipeline::{Pipeline, RunReport};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "jobtrawl")]
#[command(about = "Collect job postings from search results into a local listings store")]
struct Cli {
    /// Path to the listings database
    #[arg(long, env = "JOBTRAWL_DB", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Scrape every configured search target and store new listings
    Run {
        /// JSON file with targets, allowed locations and selectors
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Maximum cards to process per target
        #[arg(short, long)]
        max_cards: Option<usize>,

        /// Allowed location token (repeatable, replaces the configured list)
        #[arg(short, long = "allow")]
        allow: Vec<String>,

        /// WebDriver endpoint (chromedriver)
        #[arg(long, env = "WEBDRIVER_URL", default_value = "http://localhost:9515")]
        webdriver_url: String,

        /// Seconds to wait after each navigation before reading the page
        #[arg(long, default_value = "5")]
        settle_secs: u64,

        /// Run Chrome without a window
        #[arg(long)]
        headless: bool,
    },

    /// List stored listings
    List {
        /// Number of listings to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show one stored listing
    Show {
        /// Listing ID
        id: i64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(Database::default_path);
    let db = Database::open(&db_path)?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Run {
            config,
            max_cards,
            allow,
            webdriver_url,
            settle_secs,
            headless,
        } => {
            db.init()?;

            let mut pipeline_config = match config {
                Some(path) => PipelineConfig::load(&path)?,
                None => PipelineConfig::default(),
            };
            if let Some(max) = max_cards {
                pipeline_config.max_cards_per_target = max;
            }
            if !allow.is_empty() {
                pipeline_config.allowed_locations = allow;
            }
            if pipeline_config.targets.is_empty() {
                return Err(anyhow!("No search targets configured"));
            }

            tracing::info!("=== Scraper started ===");
            let renderer = WebDriverRenderer::new(RendererOptions {
                webdriver_url,
                headless,
                settle_delay: Duration::from_secs(settle_secs),
                ..Default::default()
            })?;

            let mut pipeline = Pipeline::new(pipeline_config, renderer, &db)?;
            let report = pipeline.run();
            if let Err(e) = pipeline.into_renderer().quit() {
                tracing::warn!("{:#}", e);
            }
            tracing::info!("=== Scraper finished ===");

            print_report(&report);
            println!("  Listings in store: {}", db.count()?);
        }

        Commands::List { limit } => {
            db.ensure_initialized()?;
            let listings = db.list_listings(limit)?;
            if listings.is_empty() {
                println!("No listings found.");
            } else {
                println!("{:<6} {:<30} {:<20} {:<24} {:<5}", "ID", "TITLE", "COMPANY", "LOCATION", "EASY");
                println!("{}", "-".repeat(89));
                for listing in listings {
                    println!(
                        "{:<6} {:<30} {:<20} {:<24} {:<5}",
                        listing.id,
                        truncate(&listing.title, 28),
                        truncate(&listing.company, 18),
                        truncate(&listing.location, 22),
                        if listing.easy_apply.is_some() { "yes" } else { "-" }
                    );
                }
            }
        }

        Commands::Show { id } => {
            db.ensure_initialized()?;
            match db.get_listing(id)? {
                Some(listing) => {
                    println!("Listing #{}", listing.id);
                    println!("Title: {}", listing.title);
                    println!("Company: {}", listing.company);
                    println!("Location: {}", listing.location);
                    println!("Link: {}", listing.detail_link);
                    if let Some(easy_apply) = &listing.easy_apply {
                        println!("Easy Apply: {}", easy_apply);
                    }
                    if !listing.contacts.emails.is_empty() {
                        let emails: Vec<_> = listing.contacts.emails.iter().cloned().collect();
                        println!("Emails: {}", emails.join(", "));
                    }
                    if !listing.contacts.phones.is_empty() {
                        let phones: Vec<_> = listing.contacts.phones.iter().cloned().collect();
                        println!("Phones: {}", phones.join(", "));
                    }
                    println!("Captured: {}", listing.captured_at);
                    println!("\n--- Description ---\n{}", listing.description);
                }
                None => {
                    println!("Listing #{} not found.", id);
                }
            }
        }
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("\nResults:");
    for target in &report.targets {
        print!(
            "  {:<20} found {:>3}, processed {:>3}, stored {:>3}",
            truncate(&target.label, 20),
            target.cards_found,
            target.cards_processed,
            target.stored
        );
        if target.duplicates > 0 {
            print!(", already stored {}", target.duplicates);
        }
        if target.skipped > 0 {
            print!(", skipped {}", target.skipped);
        }
        if target.failed > 0 {
            print!(", failed {}", target.failed);
        }
        println!();
        if let Some(error) = &target.error {
            println!("    error: {}", error);
        }
    }
    println!("  Total stored: {}", report.total_stored());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
