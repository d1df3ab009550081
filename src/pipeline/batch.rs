/// Batch indexer: many images, bounded concurrency, one summary
use super::RecordBuilder;
use crate::error::{PhotofindError, Result};
use crate::media::absolute_path;
use crate::storage::{record_id, ImageStore};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Batch-level stop switch, checked between images
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why an image did not produce a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unreadable image
    Skipped,
    /// No embedding
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub reason: String,
}

/// Outcome of a batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    /// Records stored (new or overwritten)
    pub succeeded: usize,
    /// Already stored and left alone
    pub unchanged: usize,
    /// Decode failures
    pub skipped: usize,
    /// Embedding failures
    pub failed: usize,
    /// Stored with OCR or face output missing
    pub degraded: usize,
    /// Never started because the batch was cancelled
    pub cancelled: usize,
    pub failures: Vec<BatchFailure>,
    pub duration_ms: u64,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.unchanged + self.skipped + self.failed + self.cancelled
    }

    /// Every image was either stored or already present
    pub fn is_clean(&self) -> bool {
        self.skipped == 0 && self.failed == 0 && self.cancelled == 0
    }
}

enum Outcome {
    Stored { degraded: bool },
    Failure(BatchFailure),
}

/// Indexes a list of images through a shared `RecordBuilder`
///
/// Images are processed in parallel up to `workers`; the store serialises the
/// writes. Per-image failures land in the summary, store-level failures
/// abort the batch.
pub struct BatchIndexer {
    builder: Arc<RecordBuilder>,
    store: Arc<dyn ImageStore>,
    workers: usize,
    skip_existing: bool,
    cancel: CancelFlag,
}

impl BatchIndexer {
    pub fn new(builder: Arc<RecordBuilder>, store: Arc<dyn ImageStore>, workers: usize) -> Self {
        Self {
            builder,
            store,
            workers: workers.max(1),
            skip_existing: false,
            cancel: CancelFlag::new(),
        }
    }

    /// Leave images whose path-derived id is already stored untouched
    pub fn skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub async fn run(&self, paths: Vec<PathBuf>) -> Result<BatchSummary> {
        let start = Instant::now();
        let total = paths.len();
        info!(
            "Starting batch of {} images with {} workers",
            total, self.workers
        );

        let mut summary = BatchSummary::default();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<Result<Outcome>> = JoinSet::new();

        for (position, path) in paths.iter().enumerate() {
            // Drain finished work so store errors surface early
            while let Some(joined) = tasks.try_join_next() {
                self.absorb(joined, &mut summary, &mut tasks)?;
            }

            if self.cancel.is_cancelled() {
                summary.cancelled = total - position;
                warn!("Batch cancelled, {} images not started", summary.cancelled);
                break;
            }

            if self.skip_existing {
                let id = record_id(&absolute_path(path)?);
                if self.store.contains(&id)? {
                    debug!("Unchanged: {}", path.display());
                    summary.unchanged += 1;
                    continue;
                }
            }

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| PhotofindError::Other(e.into()))?;

            // Cancellation may arrive while waiting for a worker slot
            if self.cancel.is_cancelled() {
                drop(permit);
                summary.cancelled = total - position;
                warn!("Batch cancelled, {} images not started", summary.cancelled);
                break;
            }

            let builder = Arc::clone(&self.builder);
            let store = Arc::clone(&self.store);
            let path = path.clone();
            tasks.spawn(async move {
                let outcome = index_one(&builder, store, path).await;
                drop(permit);
                outcome
            });
        }

        while let Some(joined) = tasks.join_next().await {
            self.absorb(joined, &mut summary, &mut tasks)?;
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Batch complete: {} stored, {} unchanged, {} skipped, {} failed, {} degraded, \
             {} cancelled, {}ms",
            summary.succeeded,
            summary.unchanged,
            summary.skipped,
            summary.failed,
            summary.degraded,
            summary.cancelled,
            summary.duration_ms
        );
        Ok(summary)
    }

    fn absorb(
        &self,
        joined: std::result::Result<Result<Outcome>, tokio::task::JoinError>,
        summary: &mut BatchSummary,
        tasks: &mut JoinSet<Result<Outcome>>,
    ) -> Result<()> {
        let outcome = joined.map_err(|e| PhotofindError::Other(e.into())).and_then(|r| r);
        match outcome {
            Ok(Outcome::Stored { degraded }) => {
                summary.succeeded += 1;
                if degraded {
                    summary.degraded += 1;
                }
                Ok(())
            }
            Ok(Outcome::Failure(failure)) => {
                match failure.kind {
                    FailureKind::Skipped => summary.skipped += 1,
                    FailureKind::Failed => summary.failed += 1,
                }
                summary.failures.push(failure);
                Ok(())
            }
            Err(e) => {
                tasks.abort_all();
                Err(e)
            }
        }
    }
}

/// Process and store one image; only store-level problems are errors
async fn index_one(
    builder: &RecordBuilder,
    store: Arc<dyn ImageStore>,
    path: PathBuf,
) -> Result<Outcome> {
    let processed = match builder.process(&path).await {
        Ok(processed) => processed,
        Err(e) => {
            if matches!(e, PhotofindError::Embedding(_)) {
                discard_stale(Arc::clone(&store), &path).await?;
            }
            return classify(path, e);
        }
    };

    let degraded = processed.is_degraded();
    let record = processed.record;
    tokio::task::spawn_blocking(move || store.upsert(record))
        .await
        .map_err(|e| PhotofindError::Other(e.into()))??;

    Ok(Outcome::Stored { degraded })
}

/// Drop the record an earlier run stored for `path`
///
/// A re-index whose embedding fails must not leave the previous record
/// searchable.
pub(crate) async fn discard_stale(store: Arc<dyn ImageStore>, path: &Path) -> Result<bool> {
    let id = record_id(&absolute_path(path)?);
    let removed = tokio::task::spawn_blocking(move || store.remove(&id))
        .await
        .map_err(|e| PhotofindError::Other(e.into()))??;
    if removed {
        warn!("Removed previous record for {}", path.display());
    }
    Ok(removed)
}

fn classify(path: PathBuf, error: PhotofindError) -> Result<Outcome> {
    if error.is_store_level() {
        return Err(error);
    }
    let kind = if matches!(error, PhotofindError::Decode { .. }) {
        FailureKind::Skipped
    } else {
        FailureKind::Failed
    };

    match kind {
        FailureKind::Skipped => warn!("Skipping {}: {}", path.display(), error),
        FailureKind::Failed => warn!("Failed {}: {}", path.display(), error),
    }
    Ok(Outcome::Failure(BatchFailure {
        path,
        kind,
        reason: error.to_string(),
    }))
}
