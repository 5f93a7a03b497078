//! Differential executor.
//!
//! Replays every vector in a corpus directory through two verifiers and
//! compares their raw output byte for byte. Work proceeds in batches of
//! `concurrency` vectors; inside a batch every vector, and both verifiers per
//! vector, run concurrently. A status line is logged on a fixed interval
//! whether or not a batch has finished.

use std::{
    io,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    slice::Chunks,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures::future::join_all;
use thiserror::Error;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::adapter::{AdapterError, Verifier};

/// Shortest accepted status interval; a zero period would spin the ticker.
const MIN_STATUS_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("failed to list corpus {}: {source}", .path.display())]
    ListCorpus { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Vectors in flight at once.
    pub concurrency: NonZeroUsize,
    pub status_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN),
            status_interval: Duration::from_secs(5),
        }
    }
}

/// A vector on which the two verifiers disagreed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub path: PathBuf,
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub matched: u64,
    pub failed: u64,
    /// Number of vectors in the corpus listing.
    pub total: u64,
    pub mismatches: Vec<Mismatch>,
}

impl Report {
    pub fn processed(&self) -> u64 {
        self.matched + self.failed
    }

    fn log_status(&self) {
        info!(
            matched = self.matched,
            failed = self.failed,
            total = self.total,
            timestamp = unix_timestamp(),
            "status"
        );
    }
}

/// Consecutive groups of at most `size` items; only the last may be short.
pub fn batches<T>(items: &[T], size: NonZeroUsize) -> Chunks<'_, T> {
    items.chunks(size.get())
}

pub struct Executor<L, R> {
    left: L,
    right: R,
    config: ExecutorConfig,
}

impl<L: Verifier, R: Verifier> Executor<L, R> {
    pub fn new(left: L, right: R, config: ExecutorConfig) -> Self {
        Self {
            left,
            right,
            config,
        }
    }

    /// Runs every vector in `corpus` through both verifiers.
    ///
    /// The first verifier error ends the run once its batch has settled; no
    /// report is returned in that case.
    pub async fn run(&self, corpus: &Path) -> Result<Report, ExecuteError> {
        let files = list_corpus(corpus).await?;
        let mut report = Report {
            total: files.len() as u64,
            ..Report::default()
        };
        info!(
            corpus = %corpus.display(),
            vectors = report.total,
            left = self.left.label(),
            right = self.right.label(),
            "starting differential run"
        );

        let period = self.config.status_interval.max(MIN_STATUS_INTERVAL);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for batch in batches(&files, self.config.concurrency) {
            let pending = join_all(batch.iter().map(|path| self.compare(path)));
            tokio::pin!(pending);
            let outcomes = loop {
                tokio::select! {
                    outcomes = &mut pending => break outcomes,
                    _ = ticker.tick() => report.log_status(),
                }
            };

            // Every settled comparison is recorded before the first error
            // ends the run.
            let mut first_error = None;
            for outcome in outcomes {
                match outcome {
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                    Ok(None) => report.matched += 1,
                    Ok(Some(mismatch)) => {
                        warn!(
                            path = %mismatch.path.display(),
                            left = ?mismatch.left,
                            right = ?mismatch.right,
                            "verifiers disagree"
                        );
                        report.failed += 1;
                        report.mismatches.push(mismatch);
                    }
                }
            }
            if let Some(err) = first_error {
                report.log_status();
                return Err(err.into());
            }
        }

        report.log_status();
        Ok(report)
    }

    /// Runs both verifiers on one vector; `Some` when their output differs.
    async fn compare(&self, path: &Path) -> Result<Option<Mismatch>, AdapterError> {
        let (left, right) = tokio::join!(self.left.verify(path), self.right.verify(path));
        let (left, right) = (left?, right?);
        if left == right {
            Ok(None)
        } else {
            Ok(Some(Mismatch {
                path: path.to_path_buf(),
                left,
                right,
            }))
        }
    }
}

/// Visible regular files directly inside `dir`, sorted by name.
async fn list_corpus(dir: &Path) -> Result<Vec<PathBuf>, ExecuteError> {
    let list_err = |source| ExecuteError::ListCorpus {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(list_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
        // Dot-files are staging leftovers from interrupted stores.
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type().await.map_err(list_err)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
