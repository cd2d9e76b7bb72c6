#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the parking data ingestion tool.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use park_api_cli_utils::IndicatifProgress;
use park_api_ingest::config::split_list;
use park_api_ingest::{BatchOptions, Destination, IngestConfig, run_batch};
use park_api_scraper::CacheMode;
use park_api_snapshot_models::validation::validation_report;
use park_api_source::fetcher_for;
use park_api_source::geojson::lot_infos_to_geojson;
use park_api_source::registry::Registry;
use park_api_source::snapshot::export_lot_infos;

#[derive(Parser)]
#[command(name = "park_api_ingest", about = "Parking occupancy ingestion tool")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the ids of the available pools as a JSON array
    List {
        /// Comma-separated pool ids to restrict the list to
        #[arg(short, long)]
        pools: Option<String>,
    },
    /// Scrape pools and store their snapshots
    Scrape {
        /// Comma-separated pool ids (overrides `PARK_API_POOLS` and the config)
        #[arg(short, long)]
        pools: Option<String>,
        /// Number of pools scraped concurrently
        #[arg(short = 'j', long, default_value = "1")]
        parallel: usize,
        /// Response cache mode: `true`, `false`, `read` or `write`
        #[arg(short, long, default_value = "false")]
        cache: CacheMode,
        /// Print the snapshot documents instead of storing them
        #[arg(long)]
        dry_run: bool,
        /// Keep stored pool and lot metadata unchanged
        #[arg(long)]
        no_update_infos: bool,
        /// Fail pools whose lots are not all covered by lot infos
        #[arg(long)]
        infos_required: bool,
    },
    /// Export a pool's lot infos as a `GeoJSON` `FeatureCollection`
    Geojson {
        /// Pool id
        pool: String,
        /// Add lots that are only known from live data
        #[arg(long)]
        include_unknown: bool,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Response cache mode: `true`, `false`, `read` or `write`
        #[arg(short, long, default_value = "false")]
        cache: CacheMode,
    },
    /// Validate snapshot documents (a single document or an array)
    Validate {
        /// JSON file to validate
        file: PathBuf,
    },
}

#[allow(clippy::too_many_lines)]
#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let multi = park_api_cli_utils::init_logger();
    let cli = Cli::parse();
    let config = IngestConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::List { pools } => {
            let registry = Registry::builtin()?;
            let pools = pools.map(|p| split_list(&p)).unwrap_or_default();
            let mut ids: Vec<String> = registry
                .select(&pools)?
                .iter()
                .map(|source| source.pool_info().id.clone())
                .collect();
            ids.sort();
            println!("{}", serde_json::to_string(&ids)?);
        }
        Commands::Scrape {
            pools,
            parallel,
            cache,
            dry_run,
            no_update_infos,
            infos_required,
        } => {
            let registry = Registry::builtin()?;
            let pools = pools.map_or_else(|| config.pools.clone(), |p| split_list(&p));
            let sources = registry.select(&pools)?;

            let options = BatchOptions {
                parallelism: parallel.max(1),
                infos_required,
                update_infos: !no_update_infos,
            };
            let fetch_config = config.fetch_config(cache);
            let progress = IndicatifProgress::pools_bar(&multi, "Scraping", sources.len() as u64);

            let start = Instant::now();
            let output = if dry_run {
                run_batch(&sources, &fetch_config, &options, &Destination::DryRun, &progress).await
            } else {
                let conn = park_api_database::open(&config.database_path)?;
                run_batch(&sources, &fetch_config, &options, &Destination::Database(&conn), &progress).await
            };

            log::info!(
                "Scraped {} pools in {:.1}s, {} failed",
                output.report.results.len(),
                start.elapsed().as_secs_f64(),
                output.report.failures().count()
            );

            if dry_run {
                println!("{}", serde_json::to_string_pretty(&output.snapshots)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&output.report)?);
            }

            return Ok(ExitCode::from(u8::from(output.report.has_failures())));
        }
        Commands::Geojson {
            pool,
            include_unknown,
            output,
            cache,
        } => {
            let registry = Registry::builtin()?;
            let source = registry
                .select(std::slice::from_ref(&pool))?
                .into_iter()
                .next()
                .ok_or_else(|| format!("Unknown pool: {pool}"))?;

            let fetcher = fetcher_for(source.as_ref(), &config.fetch_config(cache))?;
            let infos = export_lot_infos(source.as_ref(), &fetcher, include_unknown).await?;
            let text = serde_json::to_string_pretty(&lot_infos_to_geojson(&infos)?)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, text)?;
                    log::info!("Wrote {} lots of '{pool}' to {}", infos.len(), path.display());
                }
                None => println!("{text}"),
            }
        }
        Commands::Validate { file } => {
            let document: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            let documents = match document {
                serde_json::Value::Array(documents) => documents,
                single => vec![single],
            };

            let reports: Vec<_> = documents.iter().map(validation_report).collect();
            println!("{}", serde_json::to_string_pretty(&reports)?);

            let invalid = reports.iter().filter(|report| !report.is_valid()).count();
            if invalid > 0 {
                log::error!("{invalid} of {} documents are invalid", reports.len());
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
