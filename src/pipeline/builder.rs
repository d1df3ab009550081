/// Record builder: one image in, one searchable record out
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::error::{PhotofindError, Result};
use crate::faces::{FaceIdentifier, FaceMatches};
use crate::media::{absolute_path, DecodedImage};
use crate::ocr::TextExtractor;
use crate::storage::{record_id, ImageRecord};
use chrono::Utc;
use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Wall-clock time spent in each step of one record build
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    pub decode: Duration,
    pub embedding: Duration,
    pub ocr: Duration,
    pub faces: Duration,
    pub total: Duration,
}

/// Result of processing one image
#[derive(Debug)]
pub struct ProcessedImage {
    pub record: ImageRecord,
    /// `ExtractionDegraded` for every optional step that failed
    pub degraded: Vec<PhotofindError>,
    pub timings: StageTimings,
}

impl ProcessedImage {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn searchable_text(&self) -> &str {
        &self.record.searchable_text
    }

    pub fn into_parts(self) -> (String, ImageRecord) {
        (self.record.searchable_text.clone(), self.record)
    }
}

/// Why a blocking perception step produced nothing
enum StageError<E> {
    Failed(E),
    TimedOut,
    Panicked(String),
}

impl<E: Display> StageError<E> {
    fn describe(&self, timeout: Duration) -> String {
        match self {
            StageError::Failed(e) => e.to_string(),
            StageError::TimedOut => format!("timed out after {}s", timeout.as_secs()),
            StageError::Panicked(reason) => format!("worker panicked: {}", reason),
        }
    }
}

/// Runs the perception steps for one image and merges their output
///
/// Embedding, OCR and face identification run as independent blocking tasks
/// joined per image. Only the embedding is mandatory: OCR and face failures
/// leave their field empty and mark the result degraded.
pub struct RecordBuilder {
    embedder: Arc<dyn EmbeddingProvider>,
    ocr: Option<Arc<dyn TextExtractor>>,
    faces: Option<Arc<FaceIdentifier>>,
    max_dimension: u32,
    inference_timeout: Duration,
}

impl RecordBuilder {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        ocr: Option<Arc<dyn TextExtractor>>,
        faces: Option<Arc<FaceIdentifier>>,
        max_dimension: u32,
        inference_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            ocr,
            faces,
            max_dimension,
            inference_timeout,
        }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Build the record for `path`
    ///
    /// Fails with `Decode` when the file cannot be read as an image and with
    /// `Embedding` when no vector could be produced; no partial record is
    /// returned in either case.
    pub async fn process(&self, path: &Path) -> Result<ProcessedImage> {
        let started = Instant::now();
        let path = absolute_path(path)?;

        let max_dimension = self.max_dimension;
        let decode_path = path.clone();
        let image =
            tokio::task::spawn_blocking(move || DecodedImage::open(&decode_path, max_dimension))
                .await
            .map_err(|e| PhotofindError::Decode {
                path: path.clone(),
                reason: format!("decoder panicked: {}", e),
            })??;
        let decode_time = started.elapsed();

        let embed_task = {
            let embedder = Arc::clone(&self.embedder);
            let image = image.clone();
            self.run_stage(move || embedder.embed_image(&image))
        };
        let ocr_task = {
            let ocr = self.ocr.clone();
            let image = image.clone();
            self.run_stage(move || match ocr {
                Some(ocr) => ocr.extract_text(&image).map(Some),
                None => Ok(None),
            })
        };
        let face_task = {
            let faces = self.faces.clone();
            let image = image.clone();
            self.run_stage(move || match faces {
                Some(faces) => faces.detect_and_match(&image).map(Some),
                None => Ok(None),
            })
        };

        let ((embedding, embed_time), (ocr_result, ocr_time), (face_result, face_time)) =
            tokio::join!(embed_task, ocr_task, face_task);

        let embedding = embedding.map_err(|e| match e {
            StageError::Failed(e) => PhotofindError::Embedding(e),
            StageError::TimedOut => {
                PhotofindError::Embedding(EmbeddingError::Timeout(self.inference_timeout.as_secs()))
            }
            StageError::Panicked(reason) => PhotofindError::Embedding(
                EmbeddingError::GenerationError(format!("worker panicked: {}", reason)),
            ),
        })?;
        if embedding.is_empty() {
            return Err(PhotofindError::Embedding(EmbeddingError::GenerationError(
                "empty embedding".to_string(),
            )));
        }

        let mut degraded = Vec::new();

        let ocr_text = match ocr_result {
            Ok(text) => text.unwrap_or_default(),
            Err(e) => {
                let reason = e.describe(self.inference_timeout);
                warn!("OCR degraded for {}: {}", path.display(), reason);
                degraded.push(PhotofindError::ExtractionDegraded { stage: "ocr", reason });
                String::new()
            }
        };

        let faces = match face_result {
            Ok(matches) => matches.unwrap_or_default(),
            Err(e) => {
                let reason = e.describe(self.inference_timeout);
                warn!("Face identification degraded for {}: {}", path.display(), reason);
                degraded.push(PhotofindError::ExtractionDegraded { stage: "faces", reason });
                FaceMatches::default()
            }
        };

        let searchable_text = searchable_text(&faces, &ocr_text);
        let timings = StageTimings {
            decode: decode_time,
            embedding: embed_time,
            ocr: ocr_time,
            faces: face_time,
            total: started.elapsed(),
        };

        debug!(
            "Processed {} in {:?} (decode {:?}, embedding {:?}, ocr {:?}, faces {:?})",
            path.display(),
            timings.total,
            timings.decode,
            timings.embedding,
            timings.ocr,
            timings.faces
        );

        Ok(ProcessedImage {
            record: ImageRecord {
                id: record_id(&path),
                path,
                embedding,
                ocr_text,
                faces: faces.matches,
                unknown_faces: faces.unknown,
                searchable_text,
                indexed_at: Utc::now(),
            },
            degraded,
            timings,
        })
    }

    /// Run a blocking step on the blocking pool, bounded by the inference
    /// timeout
    ///
    /// A step that times out keeps running on its thread; its result is
    /// discarded.
    async fn run_stage<T, E, F>(&self, step: F) -> (std::result::Result<T, StageError<E>>, Duration)
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    {
        let started = Instant::now();
        let handle = tokio::task::spawn_blocking(step);

        let outcome = match tokio::time::timeout(self.inference_timeout, handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(StageError::Failed(e)),
            Ok(Err(join_error)) => Err(StageError::Panicked(join_error.to_string())),
            Err(_) => Err(StageError::TimedOut),
        };
        (outcome, started.elapsed())
    }
}

/// Text summary of what was found in the image
///
/// One line per non-empty part: recognised people, unknown face count and
/// OCR text.
pub fn searchable_text(faces: &FaceMatches, ocr_text: &str) -> String {
    let mut lines = Vec::new();
    if !faces.matches.is_empty() {
        let names: Vec<&str> = faces.matches.iter().map(|m| m.name.as_str()).collect();
        lines.push(format!("People: {}", names.join(", ")));
    }
    if faces.unknown > 0 {
        lines.push(format!("Unknown faces: {}", faces.unknown));
    }
    if !ocr_text.is_empty() {
        lines.push(format!("Text: {}", ocr_text));
    }
    lines.join("\n")
}
