use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use youtrend_scraper::apis::data_api::DataApiClient;
use youtrend_scraper::apis::innertube::InnertubeFeedClient;
use youtrend_scraper::cancel::CancelSignal;
use youtrend_scraper::config::Config;
use youtrend_scraper::logging;
use youtrend_scraper::metrics;
use youtrend_scraper::pipeline::{planned_pairs, Pipeline, RunReport};

#[derive(Parser)]
#[command(name = "youtrend_scraper")]
#[command(about = "YouTube trending metadata scraper")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: feed traversal, enrichment, snapshot
    Run {
        /// Country codes to scrape (comma-separated), overriding the config
        #[arg(long)]
        countries: Option<String>,
        /// Trending categories (comma-separated). Available: now, music, gaming, movies
        #[arg(long)]
        categories: Option<String>,
        /// Output directory for the dataset snapshot
        #[arg(long)]
        output_dir: Option<String>,
        /// Cancel the run after this many seconds, keeping partial results
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
    /// Feed traversal and aggregation only; no API key required
    Feed {
        #[arg(long)]
        countries: Option<String>,
        #[arg(long)]
        categories: Option<String>,
        #[arg(long)]
        output_dir: Option<String>,
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
}

fn apply_overrides(
    config: &mut Config,
    countries: Option<String>,
    categories: Option<String>,
    output_dir: Option<String>,
) {
    if let Some(list) = countries {
        config.scrape.countries = list.split(',').map(|s| s.trim().to_uppercase()).collect();
    }
    if let Some(list) = categories {
        config.scrape.categories = list.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Some(dir) = output_dir {
        config.output.dir = dir;
    }
}

fn cancellation(deadline_secs: Option<u64>) -> CancelSignal {
    let cancel = CancelSignal::new();
    if let Some(secs) = deadline_secs {
        cancel.arm_deadline(Duration::from_secs(secs));
    }
    let ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, cancelling run");
            println!("\n🛑 Cancelling; finishing in-flight calls and snapshotting...");
            ctrlc.cancel();
        }
    });
    cancel
}

fn print_report(report: &RunReport) {
    println!("\n📊 Run results:");
    println!("   Pairs traversed: {} ({} incomplete)", report.pairs, report.incomplete_pairs);
    println!("   Feed entries: {} ({} malformed dropped)", report.feed_entries, report.malformed_entries);
    println!("   Distinct records: {}", report.distinct_records);
    println!(
        "   Enriched: {} videos, {} channels ({} unavailable)",
        report.enrichment.enriched_videos,
        report.enrichment.enriched_channels,
        report.enrichment.unavailable_videos
    );
    if report.enrichment.quota_soft_stop {
        println!(
            "   ⚠️  Quota exhausted mid-run; enrichment is partial ({} units left)",
            report.enrichment.budget_remaining
        );
    }
    if report.cancelled {
        println!("   ⚠️  Run was cancelled; dataset is partial");
    }
    println!("   Rows written: {} ({} excluded)", report.rows, report.excluded_rows);
    println!("   Output file: {}", report.output_file);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging and the metrics recorder
    logging::init_logging();
    metrics::init_metrics();
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let mut config = Config::load_from(&cli.config)?;

    match cli.command {
        Commands::Run {
            countries,
            categories,
            output_dir,
            deadline_secs,
        } => {
            apply_overrides(&mut config, countries, categories, output_dir);
            // A missing credential is the one error allowed to stop the run
            // before any fetching starts.
            let api_key = Config::api_key()?;

            println!("🔄 Scraping {} (country, category) pairs...", planned_pairs(&config).len());
            let data_api = Arc::new(DataApiClient::new(api_key));
            let pipeline = Pipeline::new(
                Arc::new(InnertubeFeedClient::new()),
                data_api.clone(),
                data_api,
                config,
            );

            match pipeline.run(cancellation(deadline_secs)).await {
                Ok(report) => print_report(&report),
                Err(e) => {
                    error!("Pipeline failed: {}", e);
                    println!("❌ Pipeline failed: {e}");
                }
            }
        }
        Commands::Feed {
            countries,
            categories,
            output_dir,
            deadline_secs,
        } => {
            apply_overrides(&mut config, countries, categories, output_dir);

            println!("🔄 Fetching trending feeds (no enrichment)...");
            let pipeline = Pipeline::new_feed_only(Arc::new(InnertubeFeedClient::new()), config);

            match pipeline.run(cancellation(deadline_secs)).await {
                Ok(report) => print_report(&report),
                Err(e) => {
                    error!("Feed run failed: {}", e);
                    println!("❌ Feed run failed: {e}");
                }
            }
        }
    }
    metrics::flush_to_disk();
    Ok(())
}
