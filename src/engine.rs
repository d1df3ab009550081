//! Search engine facade
//!
//! `SearchEngine` is the single entry point used by the CLI: it owns the
//! shared models, the face identifier and the image store, and exposes
//! indexing, search, statistics and gallery management.

use crate::config::{expand_path, Config};
use crate::embedding::{ClipEmbedder, EmbeddingError, EmbeddingProvider};
use crate::error::{PhotofindError, Result};
use crate::faces::{
    FaceError, FaceIdentifier, Gallery, GalleryReport, KnownPerson, OnnxFaceModel,
    OnnxFaceModelOptions,
};
use crate::media::collect_images;
use crate::ocr::{TesseractExtractor, TextExtractor};
use crate::pipeline::{
    discard_stale, BatchIndexer, BatchSummary, CancelFlag, ProcessedImage, RecordBuilder,
};
use crate::storage::{
    ImageStore, IndexBackend, IndexOptions, SqliteImageStore, StoreStats, FACE_CACHE_FILE,
};
use regex::RegexBuilder;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One search result
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub path: PathBuf,
    /// Cosine similarity between query and image, higher is better
    pub score: f32,
    pub ocr_text: String,
    /// Recognised people, sorted by name
    pub faces: Vec<String>,
}

/// `stats()` output: store summary plus engine context
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub embedding_model: String,
    pub known_people: usize,
}

/// Tunables the engine needs beyond its components
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub max_image_dimension: u32,
    pub inference_timeout: Duration,
    pub workers: usize,
    pub default_limit: usize,
    pub auto_person_filter: bool,
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_image_dimension: config.processing.max_image_dimension,
            inference_timeout: Duration::from_secs(config.processing.inference_timeout_secs),
            workers: config.processing.workers,
            default_limit: config.search.default_limit,
            auto_person_filter: config.search.auto_person_filter,
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Explicitly constructed, shared components
pub struct EngineComponents {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub ocr: Option<Arc<dyn TextExtractor>>,
    pub faces: Option<Arc<FaceIdentifier>>,
    pub store: Arc<dyn ImageStore>,
}

pub struct SearchEngine {
    builder: Arc<RecordBuilder>,
    embedder: Arc<dyn EmbeddingProvider>,
    faces: Option<Arc<FaceIdentifier>>,
    store: Arc<dyn ImageStore>,
    options: EngineOptions,
}

impl SearchEngine {
    /// Open every component described by `config`
    ///
    /// Models load lazily on first use. Missing face model files do not stop
    /// the engine: the gallery starts empty and face steps degrade per image.
    pub fn open(config: &Config) -> Result<Self> {
        let store_dir = config.store_dir()?;
        let options = EngineOptions::from_config(config);

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(ClipEmbedder::new(
            &config.embedding.model,
            config
                .embedding
                .cache_dir
                .as_deref()
                .map(expand_path)
                .transpose()?,
            config.embedding.show_download_progress,
        )?);

        let backend: IndexBackend = config
            .index
            .backend
            .parse()
            .map_err(|e| PhotofindError::Config(format!("{}", e)))?;
        let store = SqliteImageStore::open(
            &store_dir,
            embedder.dimension(),
            IndexOptions {
                backend,
                m: config.index.hnsw_m,
                ef_construction: config.index.hnsw_ef_construction,
                ef_search: config.index.hnsw_ef_search,
            },
        )?;

        let ocr: Option<Arc<dyn TextExtractor>> = if config.ocr.enabled {
            Some(Arc::new(TesseractExtractor::new(
                config.ocr.command.clone(),
                config.ocr.language.clone(),
                config.ocr.min_confidence,
                options.inference_timeout,
            )))
        } else {
            info!("OCR disabled");
            None
        };

        let faces = if config.faces.enabled {
            Some(Arc::new(open_face_identifier(config, &store_dir)?))
        } else {
            info!("Face recognition disabled");
            None
        };

        Ok(Self::with_components(
            EngineComponents {
                embedder,
                ocr,
                faces,
                store: Arc::new(store),
            },
            options,
        ))
    }

    /// Assemble an engine from already-built components
    pub fn with_components(components: EngineComponents, options: EngineOptions) -> Self {
        let builder = Arc::new(RecordBuilder::new(
            Arc::clone(&components.embedder),
            components.ocr,
            components.faces.clone(),
            options.max_image_dimension,
            options.inference_timeout,
        ));

        Self {
            builder,
            embedder: components.embedder,
            faces: components.faces,
            store: components.store,
            options,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Index one image, overwriting any previous record for the same path
    pub async fn add_image(&self, path: &Path) -> Result<String> {
        let processed = match self.builder.process(path).await {
            Ok(processed) => processed,
            Err(e) => {
                if matches!(e, PhotofindError::Embedding(_)) {
                    discard_stale(Arc::clone(&self.store), path).await?;
                }
                return Err(e);
            }
        };
        let record = processed.record;
        let id = record.id.clone();

        let store = Arc::clone(&self.store);
        let is_new = tokio::task::spawn_blocking(move || store.upsert(record))
            .await
            .map_err(|e| PhotofindError::Other(e.into()))??;

        debug!(
            "{} {} as {}",
            if is_new { "Indexed" } else { "Re-indexed" },
            path.display(),
            id
        );
        Ok(id)
    }

    /// Index a list of images in parallel
    pub async fn index_batch(
        &self,
        paths: Vec<PathBuf>,
        skip_existing: bool,
        cancel: CancelFlag,
    ) -> Result<BatchSummary> {
        self.indexer(None, skip_existing, cancel).run(paths).await
    }

    /// Index every image under `root` (or `root` itself), up to `limit`
    pub async fn index_path(
        &self,
        root: &Path,
        limit: Option<usize>,
        workers: Option<usize>,
        skip_existing: bool,
        cancel: CancelFlag,
    ) -> Result<BatchSummary> {
        let paths = collect_images(root, limit)?;
        info!("Found {} images under {}", paths.len(), root.display());
        self.indexer(workers, skip_existing, cancel).run(paths).await
    }

    fn indexer(
        &self,
        workers: Option<usize>,
        skip_existing: bool,
        cancel: CancelFlag,
    ) -> BatchIndexer {
        BatchIndexer::new(
            Arc::clone(&self.builder),
            Arc::clone(&self.store),
            workers.unwrap_or(self.options.workers),
        )
        .skip_existing(skip_existing)
        .with_cancel_flag(cancel)
    }

    /// Rank stored images against a free-text query
    ///
    /// With `person_filter` only images showing that person qualify. Without
    /// one, and with `auto_person_filter` on, known names mentioned in the
    /// query restrict results to images showing any of them. Filtering
    /// happens before truncation to `top_k`.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        person_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PhotofindError::InvalidInput("Search query is empty".to_string()));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }
        // Nothing to rank, so the text model is never needed
        if self.store.count()? == 0 {
            return Ok(Vec::new());
        }

        let people = self.people_filter(query, person_filter)?;
        if !people.is_empty() {
            debug!("Restricting search to photos of: {}", people.join(", "));
        }

        let query_vector = self.embed_query(query).await?;
        let scored = self.store.search(&query_vector, top_k, &people)?;

        Ok(scored
            .into_iter()
            .map(|hit| SearchHit {
                id: hit.record.id.clone(),
                path: hit.record.path.clone(),
                score: hit.score,
                ocr_text: hit.record.ocr_text.clone(),
                faces: hit.record.face_names().into_iter().collect(),
            })
            .collect())
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let timeout = self.options.inference_timeout;

        let task = tokio::task::spawn_blocking(move || embedder.embed_text(&text));
        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => Ok(joined.map_err(|e| PhotofindError::Other(e.into()))??),
            Err(_) => Err(PhotofindError::Embedding(EmbeddingError::Timeout(
                timeout.as_secs(),
            ))),
        }
    }

    fn people_filter(&self, query: &str, explicit: Option<&str>) -> Result<Vec<String>> {
        let known = self.known_names()?;

        if let Some(name) = explicit {
            let name = name.trim();
            if name.is_empty() {
                return Ok(Vec::new());
            }
            // Accept any capitalisation of a known name
            let canonical = known
                .iter()
                .find(|k| k.eq_ignore_ascii_case(name))
                .cloned()
                .unwrap_or_else(|| name.to_string());
            return Ok(vec![canonical]);
        }

        if !self.options.auto_person_filter {
            return Ok(Vec::new());
        }
        Ok(mentioned_people(query, &known))
    }

    fn known_names(&self) -> Result<Vec<String>> {
        match &self.faces {
            Some(faces) => Ok(faces.gallery()?.names()),
            None => Ok(Vec::new()),
        }
    }

    /// Run the pipeline on one image without storing anything
    pub async fn inspect(&self, path: &Path) -> Result<ProcessedImage> {
        self.builder.process(path).await
    }

    pub fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            store: self.store.stats()?,
            embedding_model: self.embedder.model_name().to_string(),
            known_people: self.known_names()?.len(),
        })
    }

    pub fn store(&self) -> &Arc<dyn ImageStore> {
        &self.store
    }

    /// Flush and release the store; safe to call more than once
    pub fn close(&self) -> Result<()> {
        self.store.close()
    }

    pub fn list_known(&self) -> Result<Vec<KnownPerson>> {
        Ok(self.face_identifier()?.list_known()?)
    }

    /// Add reference photos for `name` and rebuild the gallery
    pub async fn add_known(&self, name: &str, photos: Vec<PathBuf>) -> Result<GalleryReport> {
        let faces = Arc::clone(self.face_identifier()?);
        let name = name.to_string();
        self.blocking_gallery(move || faces.add_known(&name, &photos)).await
    }

    /// Remove a person from the gallery; false if they were not known
    pub async fn remove_known(&self, name: &str) -> Result<bool> {
        let faces = Arc::clone(self.face_identifier()?);
        let name = name.to_string();
        self.blocking_gallery(move || faces.remove_known(&name)).await
    }

    /// Rescan the known-faces directory; `force` ignores cached embeddings
    pub async fn rebuild_gallery(&self, force: bool) -> Result<GalleryReport> {
        let faces = Arc::clone(self.face_identifier()?);
        self.blocking_gallery(move || faces.rebuild_gallery(force)).await
    }

    async fn blocking_gallery<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> std::result::Result<T, FaceError> + Send + 'static,
    {
        let value = tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| PhotofindError::Other(e.into()))??;
        Ok(value)
    }

    fn face_identifier(&self) -> Result<&Arc<FaceIdentifier>> {
        self.faces
            .as_ref()
            .ok_or_else(|| PhotofindError::Config("Face recognition is disabled".to_string()))
    }
}

fn open_face_identifier(config: &Config, store_dir: &Path) -> Result<FaceIdentifier> {
    let model = Arc::new(OnnxFaceModel::new(OnnxFaceModelOptions {
        detector_path: expand_path(&config.faces.detector_model)?,
        recognizer_path: expand_path(&config.faces.recognizer_model)?,
        detection_threshold: config.faces.detection_threshold,
        intra_threads: 1,
    }));
    let known_faces_dir = config.known_faces_dir()?;
    let cache_path = store_dir.join(FACE_CACHE_FILE);
    let threshold = config.faces.match_threshold;
    let max_dimension = config.processing.max_image_dimension;

    match FaceIdentifier::open(
        model.clone(),
        known_faces_dir.clone(),
        cache_path.clone(),
        threshold,
        max_dimension,
    ) {
        Ok((identifier, _report)) => Ok(identifier),
        Err(FaceError::ModelUnavailable(reason)) => {
            warn!(
                "Face models unavailable ({}); faces will not be recognised",
                reason
            );
            Ok(FaceIdentifier::with_gallery(
                model,
                known_faces_dir,
                cache_path,
                threshold,
                max_dimension,
                Gallery::default(),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// Known names that appear in `query` as whole words, ignoring case
pub fn mentioned_people(query: &str, known: &[String]) -> Vec<String> {
    known
        .iter()
        .filter(|name| {
            let pattern = format!(r"(?:^|\W){}(?:$|\W)", regex::escape(name));
            RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map(|re| re.is_match(query))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_mentioned_people_whole_words() {
        let known = names(&["Alice", "Bob", "Mary Jane"]);
        assert_eq!(mentioned_people("alice at the beach", &known), names(&["Alice"]));
        assert_eq!(
            mentioned_people("Bob and MARY JANE hiking", &known),
            names(&["Bob", "Mary Jane"])
        );
        // Substrings do not count
        assert!(mentioned_people("bobsled race", &known).is_empty());
        assert!(mentioned_people("a sunset", &[]).is_empty());
    }

    #[test]
    fn test_mentioned_people_punctuation() {
        let known = names(&["Alice"]);
        assert_eq!(mentioned_people("Alice's birthday", &known), names(&["Alice"]));
        assert_eq!(mentioned_people("photos of alice.", &known), names(&["Alice"]));
    }
}
