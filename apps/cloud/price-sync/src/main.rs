//! Price Sync
//!
//! Normalizes GCP billing SKUs into Morpheus prices and price sets, links
//! them to service plans and reports coverage. Every command is idempotent.

use clap::{Parser, Subcommand};
use core_config::FromEnv;
use core_config::tracing::{init_tracing, install_color_eyre};
use domain_price_bundles::COMPUTE_ENGINE_SERVICE_ID;
use eyre::Result;
use observability::SyncTimer;
use std::process::ExitCode;
use tracing::info;

mod commands;
mod config;
mod providers;

use commands::PriceSync;
use config::Config;

#[derive(Parser)]
#[command(name = "price-sync")]
#[command(about = "Sync GCP SKU prices into Morpheus price sets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Regions to keep. Defaults to GCP_REGIONS.
    #[arg(short = 'R', long, value_delimiter = ',', global = true)]
    regions: Option<Vec<String>>,

    /// Prefix for remote names and codes. Defaults to PRICE_PREFIX.
    #[arg(long, global = true)]
    prefix: Option<String>,

    /// Read SKUs from the billing API even when a cache file exists
    #[arg(long, global = true)]
    live: bool,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Print Prometheus metrics after the command
    #[arg(long, global = true)]
    print_metrics: bool,

    /// Debug logging unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the SKU catalog into the cache file
    Discover {
        /// Billing service ids. Defaults to Compute Engine.
        #[arg(short, long, value_delimiter = ',', default_value = COMPUTE_ENGINE_SERVICE_ID)]
        services: Vec<String>,

        /// Download every billing service
        #[arg(long)]
        all: bool,
    },

    /// Create or update one price per attached SKU entry
    CreatePrices {
        /// Report what would be written without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Create or update price sets
    CreateBundles {
        #[arg(long)]
        dry_run: bool,
    },

    /// Prices, then price sets
    Sync {
        #[arg(long)]
        dry_run: bool,
    },

    /// Create one service plan per family price set
    CreatePlans {
        #[arg(long)]
        dry_run: bool,
    },

    /// Link service plans to their price sets
    Map {
        #[arg(long)]
        dry_run: bool,
    },

    /// Report service plans without price sets
    Validate,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Discover { .. } => "discover",
            Commands::CreatePrices { .. } => "create-prices",
            Commands::CreateBundles { .. } => "create-bundles",
            Commands::Sync { .. } => "sync",
            Commands::CreatePlans { .. } => "create-plans",
            Commands::Map { .. } => "map",
            Commands::Validate => "validate",
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    install_color_eyre();

    let cli = Cli::parse();
    let config = Config::from_env()?.with_overrides(cli.regions.clone(), cli.prefix.clone());
    init_tracing(&config.environment, cli.verbose);

    observability::init_metrics()?;

    info!(
        command = cli.command.name(),
        regions = ?config.sync.regions,
        prefix = %config.sync.prefix,
        "Starting price sync"
    );

    let runner = PriceSync::new(config).with_live_catalog(cli.live);
    let mut timer = SyncTimer::new(cli.command.name());

    let report = match &cli.command {
        Commands::Discover { services, all } => runner.discover(services, *all).await?,
        Commands::CreatePrices { dry_run } => runner.create_prices(*dry_run).await?,
        Commands::CreateBundles { dry_run } => runner.create_bundles(*dry_run).await?,
        Commands::Sync { dry_run } => runner.sync(*dry_run).await?,
        Commands::CreatePlans { dry_run } => runner.create_plans(*dry_run).await?,
        Commands::Map { dry_run } => runner.map(*dry_run).await?,
        Commands::Validate => runner.validate().await?,
    };

    let seconds = timer.stop();
    info!(command = cli.command.name(), duration_secs = seconds, "Command complete");

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }

    if cli.print_metrics {
        print!("{}", observability::render_metrics());
    }

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
