#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch scraping of parking pools into the `DuckDB` store.
//!
//! [`run_batch`] scrapes the selected pools with bounded concurrency. Every
//! pool is isolated: its errors and panics become a [`PoolFailure`] in the
//! [`BatchReport`] and a row in the error log, and never affect sibling
//! pools.

pub mod config;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use duckdb::Connection;
use futures::{FutureExt as _, StreamExt as _};
use park_api_database::error_log::insert_error;
use park_api_database::store::store_snapshot;
use park_api_database_models::ErrorLogRow;
use park_api_ingest_models::{BatchReport, PoolFailure, PoolOutcome, PoolResult};
use park_api_scraper::FetchConfig;
use park_api_snapshot_models::Snapshot;
use park_api_source::progress::ProgressCallback;
use park_api_source::registry::SourceRef;
use park_api_source::snapshot::make_snapshot;
use park_api_source::{ParkingSource, fetcher_for};

pub use config::{ConfigError, IngestConfig};

/// Source recorded in the error log for pool failures.
pub const ERROR_LOG_SOURCE: &str = "pool";

/// How a batch is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum number of pools scraped concurrently (at least 1).
    pub parallelism: usize,
    /// Fail a pool whose lots are not all covered by lot infos.
    pub infos_required: bool,
    /// Overwrite stored pool and lot metadata with scraped values.
    pub update_infos: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            infos_required: false,
            update_infos: true,
        }
    }
}

/// Where scraped snapshots go.
pub enum Destination<'a> {
    /// Store every snapshot and log failures.
    Database(&'a Connection),
    /// Keep the snapshots in memory.
    DryRun,
}

/// Everything a batch produced.
#[derive(Debug)]
pub struct BatchOutput {
    /// Per-pool outcomes.
    pub report: BatchReport,
    /// Snapshot documents of a dry run, failed scrapes included. Empty when
    /// storing.
    pub snapshots: Vec<Snapshot>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// Scrapes one pool. Errors and panics of the source are captured as a
/// [`PoolFailure`].
///
/// # Errors
///
/// Returns the [`PoolFailure`] of a failed scrape.
pub async fn scrape_pool(
    source: &dyn ParkingSource,
    fetch_config: &FetchConfig,
    infos_required: bool,
) -> Result<Snapshot, PoolFailure> {
    let fetcher = fetcher_for(source, fetch_config).map_err(|e| PoolFailure::from_error("FetchError", &e))?;

    match AssertUnwindSafe(make_snapshot(source, &fetcher, infos_required))
        .catch_unwind()
        .await
    {
        Ok(Ok(snapshot)) => Ok(snapshot),
        Ok(Err(e)) => Err(PoolFailure::from_error(e.kind(), &e)),
        Err(payload) => Err(PoolFailure::panic(panic_message(payload.as_ref()))),
    }
}

fn log_failure(conn: &Connection, pool_id: &str, failure: &PoolFailure) {
    let entry = ErrorLogRow {
        timestamp: Utc::now(),
        source: ERROR_LOG_SOURCE.to_string(),
        module_name: None,
        pool_id: Some(pool_id.to_string()),
        text: failure.text(),
        stacktrace: Some(failure.stacktrace()),
    };
    if let Err(e) = insert_error(conn, &entry) {
        log::error!("failed to record error of pool '{pool_id}': {e}");
    }
}

fn finish_pool(
    destination: &Destination<'_>,
    source: &dyn ParkingSource,
    scraped: Result<Snapshot, PoolFailure>,
    options: &BatchOptions,
    snapshots: &mut Vec<Snapshot>,
) -> PoolOutcome {
    let pool = source.pool_info();

    let outcome = match (destination, scraped) {
        (Destination::DryRun, Ok(snapshot)) => {
            let lots = snapshot.lots.len();
            snapshots.push(snapshot);
            PoolOutcome::Scraped { lots }
        }
        (Destination::DryRun, Err(failure)) => {
            snapshots.push(Snapshot::failed(pool, failure.text()));
            PoolOutcome::Failed(failure)
        }
        (Destination::Database(conn), Ok(snapshot)) => {
            match store_snapshot(conn, &snapshot, options.update_infos) {
                Ok(rows) => PoolOutcome::Stored {
                    observations: rows.len(),
                },
                Err(e) => PoolOutcome::Failed(PoolFailure::from_error(e.kind(), &e)),
            }
        }
        (Destination::Database(_), Err(failure)) => PoolOutcome::Failed(failure),
    };

    if let PoolOutcome::Failed(failure) = &outcome {
        log::error!("pool '{}' failed: {}", pool.id, failure.text());
        if let Destination::Database(conn) = destination {
            log_failure(conn, &pool.id, failure);
        }
    }

    outcome
}

/// Scrapes `sources` with at most `options.parallelism` pools in flight and
/// hands each snapshot to `destination` as soon as it is ready.
///
/// Storage happens on the calling task, one pool at a time, each pool in its
/// own transaction.
pub async fn run_batch(
    sources: &[SourceRef],
    fetch_config: &FetchConfig,
    options: &BatchOptions,
    destination: &Destination<'_>,
    progress: &Arc<dyn ProgressCallback>,
) -> BatchOutput {
    let started_at = Utc::now();
    progress.set_total(sources.len() as u64);
    log::info!(
        "scraping {} pools with parallelism {}",
        sources.len(),
        options.parallelism.max(1)
    );

    let mut in_flight = futures::stream::iter(sources.iter().map(|source| async move {
        let start = Instant::now();
        log::debug!("scraping pool '{}'", source.pool_info().id);
        let scraped = scrape_pool(source.as_ref(), fetch_config, options.infos_required).await;
        (source, scraped, start)
    }))
    .buffer_unordered(options.parallelism.max(1));

    let mut results = Vec::with_capacity(sources.len());
    let mut snapshots = Vec::new();

    while let Some((source, scraped, start)) = in_flight.next().await {
        let pool_id = source.pool_info().id.clone();
        let outcome = finish_pool(destination, source.as_ref(), scraped, options, &mut snapshots);

        if let PoolOutcome::Stored { observations } | PoolOutcome::Scraped { lots: observations } = &outcome {
            log::info!("pool '{pool_id}': {observations} lots");
        }

        progress.set_message(pool_id.clone());
        progress.inc(1);

        results.push(PoolResult {
            pool_id,
            outcome,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        });
    }

    let report = BatchReport::new(started_at, Utc::now(), results);
    progress.finish(format!(
        "{} pools, {} failed",
        report.results.len(),
        report.failures().count()
    ));

    BatchOutput { report, snapshots }
}
