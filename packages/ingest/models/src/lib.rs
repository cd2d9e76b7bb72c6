#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch scrape result types.
//!
//! A [`BatchReport`] holds one [`PoolResult`] per scraped pool. Failed pools
//! carry a [`PoolFailure`] next to the successful ones; one pool's failure
//! never hides another pool's result.

use std::error::Error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind recorded for a panic inside a source.
pub const PANIC_KIND: &str = "Panic";

/// Why a pool's scrape cycle failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolFailure {
    /// Stable error kind, e.g. `ExtractionError`.
    pub kind: String,
    /// Outermost error message.
    pub message: String,
    /// Error cause chain, outermost first.
    pub trace: Vec<String>,
}

impl PoolFailure {
    /// Captures an error and its `source()` chain.
    #[must_use]
    pub fn from_error(kind: &str, error: &(dyn Error + 'static)) -> Self {
        let mut trace = Vec::new();
        let mut current = Some(error);
        while let Some(e) = current {
            trace.push(e.to_string());
            current = e.source();
        }

        Self {
            kind: kind.to_string(),
            message: error.to_string(),
            trace,
        }
    }

    /// Captures a panic with its payload message.
    #[must_use]
    pub fn panic(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: PANIC_KIND.to_string(),
            trace: vec![message.clone()],
            message,
        }
    }

    /// One-line description, `kind: message`.
    #[must_use]
    pub fn text(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }

    /// The cause chain, one error per line.
    #[must_use]
    pub fn stacktrace(&self) -> String {
        self.trace.join("\n")
    }
}

/// What happened to one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PoolOutcome {
    /// The snapshot was scraped and stored.
    Stored {
        /// Number of observations written.
        observations: usize,
    },
    /// The snapshot was scraped but not stored (dry run).
    Scraped {
        /// Number of lots in the snapshot.
        lots: usize,
    },
    /// Scraping or storing failed.
    Failed(PoolFailure),
}

/// Result of one pool in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolResult {
    /// Pool slug.
    pub pool_id: String,
    /// Outcome of the pool's cycle.
    #[serde(flatten)]
    pub outcome: PoolOutcome,
    /// Wall time spent on the pool.
    pub duration_ms: u64,
}

impl PoolResult {
    /// The failure, if the pool failed.
    #[must_use]
    pub const fn failure(&self) -> Option<&PoolFailure> {
        match &self.outcome {
            PoolOutcome::Failed(failure) => Some(failure),
            PoolOutcome::Stored { .. } | PoolOutcome::Scraped { .. } => None,
        }
    }
}

/// Output of a batch scrape, results ordered by pool id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// When the batch started.
    pub started_at: DateTime<Utc>,
    /// When the last pool finished.
    pub finished_at: DateTime<Utc>,
    /// One entry per pool.
    pub results: Vec<PoolResult>,
}

impl BatchReport {
    /// Creates a report, ordering the results by pool id.
    #[must_use]
    pub fn new(started_at: DateTime<Utc>, finished_at: DateTime<Utc>, mut results: Vec<PoolResult>) -> Self {
        results.sort_by(|a, b| a.pool_id.cmp(&b.pool_id));
        Self {
            started_at,
            finished_at,
            results,
        }
    }

    /// Results of failed pools.
    pub fn failures(&self) -> impl Iterator<Item = &PoolResult> {
        self.results.iter().filter(|result| result.failure().is_some())
    }

    /// Whether any pool failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Process exit code: 1 if any pool failed, 0 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.has_failures())
    }
}
