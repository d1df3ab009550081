//! Gallery of known identities built from `known_faces/<person>/*`
//!
//! Reference embeddings are cached in a bincode file next to the vector
//! store. An entry is reused while the file's size and mtime are unchanged;
//! when they differ the content hash decides, so a touched-but-identical file
//! is not re-embedded. Files that disappear drop out of the cache.

use super::{FaceError, FaceModel};
use crate::media::{is_image_path, DecodedImage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

const CACHE_VERSION: u32 = 1;

/// One named person and their reference embeddings
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub name: String,
    pub reference_embeddings: Vec<Vec<f32>>,
    /// File names the embeddings came from, same order
    pub reference_files: Vec<String>,
}

/// Summary row for `list_known`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnownPerson {
    pub name: String,
    pub reference_count: usize,
}

/// Ordered set of identities; iteration order is the tie-break order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    identities: Vec<Identity>,
}

impl Gallery {
    /// Build a gallery ordered by name
    pub fn new(mut identities: Vec<Identity>) -> Self {
        identities.sort_by(|a, b| a.name.cmp(&b.name));
        Self { identities }
    }

    /// Build a gallery keeping the given order
    pub fn from_ordered(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn get(&self, name: &str) -> Option<&Identity> {
        self.identities.iter().find(|i| i.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.identities.iter().map(|i| i.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn reference_count(&self) -> usize {
        self.identities
            .iter()
            .map(|i| i.reference_embeddings.len())
            .sum()
    }

    pub fn known_people(&self) -> Vec<KnownPerson> {
        self.identities
            .iter()
            .map(|i| KnownPerson {
                name: i.name.clone(),
                reference_count: i.reference_embeddings.len(),
            })
            .collect()
    }
}

/// A reference photo that could not be used
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryBuildWarning {
    pub path: PathBuf,
    pub reason: String,
}

impl GalleryBuildWarning {
    pub fn new(path: &Path, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for GalleryBuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skipped reference {}: {}", self.path.display(), self.reason)
    }
}

/// What a gallery build did
#[derive(Debug, Clone, Default)]
pub struct GalleryReport {
    pub people: usize,
    pub references: usize,
    /// References embedded during this build
    pub embedded: usize,
    /// References taken from the cache
    pub reused: usize,
    pub warnings: Vec<GalleryBuildWarning>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedReference {
    size: u64,
    mtime_secs: u64,
    mtime_nanos: u32,
    hash: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GalleryCache {
    version: u32,
    model: String,
    /// person -> file name -> reference
    people: BTreeMap<String, BTreeMap<String, CachedReference>>,
}

impl GalleryCache {
    fn load(path: &Path, model: &str) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::empty(model),
            Err(e) => {
                tracing::warn!("Face cache unreadable, rebuilding: {}: {}", path.display(), e);
                return Self::empty(model);
            }
        };

        match bincode::deserialize::<GalleryCache>(&bytes) {
            Ok(cache) if cache.version == CACHE_VERSION && cache.model == model => cache,
            Ok(_) => {
                tracing::info!("Face cache written by another model or version, rebuilding");
                Self::empty(model)
            }
            Err(e) => {
                tracing::warn!("Face cache corrupt, rebuilding: {}: {}", path.display(), e);
                Self::empty(model)
            }
        }
    }

    fn empty(model: &str) -> Self {
        Self {
            version: CACHE_VERSION,
            model: model.to_string(),
            people: BTreeMap::new(),
        }
    }

    fn save(&self, path: &Path) -> Result<(), FaceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FaceError::io(e, format!("Failed to create {}", parent.display()))
            })?;
        }
        let bytes = bincode::serialize(self)
            .map_err(|e| FaceError::Gallery(format!("Failed to encode face cache: {}", e)))?;

        // Write to a sibling temp file, then rename over the old cache
        let temp_path = path.with_extension("bin.tmp");
        std::fs::write(&temp_path, bytes).map_err(|e| {
            FaceError::io(e, format!("Failed to write {}", temp_path.display()))
        })?;
        std::fs::rename(&temp_path, path)
            .map_err(|e| FaceError::io(e, format!("Failed to replace {}", path.display())))?;
        Ok(())
    }
}

/// Scan `known_faces_dir` and produce the gallery
///
/// Unreadable or faceless reference photos never fail the build; they are
/// reported in `GalleryReport::warnings`. A missing directory is created and
/// yields an empty gallery.
pub fn build_gallery(
    known_faces_dir: &Path,
    cache_path: &Path,
    model: &dyn FaceModel,
    max_dimension: u32,
    force: bool,
) -> Result<(Gallery, GalleryReport), FaceError> {
    let mut report = GalleryReport::default();

    if !known_faces_dir.exists() {
        std::fs::create_dir_all(known_faces_dir).map_err(|e| {
            FaceError::io(e, format!("Failed to create {}", known_faces_dir.display()))
        })?;
    }

    let previous = if force {
        GalleryCache::empty(model.name())
    } else {
        GalleryCache::load(cache_path, model.name())
    };
    let mut next = GalleryCache::empty(model.name());
    let mut identities = Vec::new();

    for (person, person_dir) in list_people(known_faces_dir)? {
        let cached_person = previous.people.get(&person);
        let mut entries = BTreeMap::new();

        for file in list_reference_files(&person_dir)? {
            let file_name = match file.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let cached = cached_person.and_then(|p| p.get(&file_name));

            match load_reference(&file, cached, model, max_dimension) {
                Ok((entry, reused)) => {
                    if reused {
                        report.reused += 1;
                    } else {
                        tracing::info!("Learning face: {} ({})", person, file_name);
                        report.embedded += 1;
                    }
                    entries.insert(file_name, entry);
                }
                Err(FaceError::ModelUnavailable(reason)) => {
                    return Err(FaceError::ModelUnavailable(reason));
                }
                Err(e) => {
                    let warning = GalleryBuildWarning::new(&file, e.to_string());
                    tracing::warn!("{}", warning);
                    report.warnings.push(warning);
                }
            }
        }

        if entries.is_empty() {
            continue;
        }

        identities.push(Identity {
            name: person.clone(),
            reference_files: entries.keys().cloned().collect(),
            reference_embeddings: entries.values().map(|e| e.embedding.clone()).collect(),
        });
        next.people.insert(person, entries);
    }

    let changed = force
        || report.embedded > 0
        || !same_entries(&previous, &next)
        || !cache_path.exists();
    if changed {
        next.save(cache_path)?;
    }

    let gallery = Gallery::new(identities);
    report.people = gallery.len();
    report.references = gallery.reference_count();
    Ok((gallery, report))
}

fn same_entries(a: &GalleryCache, b: &GalleryCache) -> bool {
    a.people.len() == b.people.len()
        && a.people.iter().zip(b.people.iter()).all(|((pa, fa), (pb, fb))| {
            pa == pb
                && fa.len() == fb.len()
                && fa.iter().zip(fb.iter()).all(|((na, ea), (nb, eb))| {
                    na == nb
                        && ea.hash == eb.hash
                        && ea.size == eb.size
                        && ea.mtime_secs == eb.mtime_secs
                        && ea.mtime_nanos == eb.mtime_nanos
                })
        })
}

fn list_people(dir: &Path) -> Result<Vec<(String, PathBuf)>, FaceError> {
    let mut people = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| FaceError::io(e, format!("Failed to read {}", dir.display())))?;

    for entry in entries {
        let entry = entry.map_err(|e| FaceError::io(e, "Failed to read gallery entry"))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if super::validate_person_name(name).is_ok() {
                people.push((name.to_string(), path));
            }
        }
    }

    people.sort();
    Ok(people)
}

fn list_reference_files(dir: &Path) -> Result<Vec<PathBuf>, FaceError> {
    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| FaceError::io(e, format!("Failed to read {}", dir.display())))?;

    for entry in entries {
        let entry = entry.map_err(|e| FaceError::io(e, "Failed to read reference entry"))?;
        let path = entry.path();
        if path.is_file() && is_image_path(&path) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Returns the cache entry for a reference photo and whether it was reused
fn load_reference(
    file: &Path,
    cached: Option<&CachedReference>,
    model: &dyn FaceModel,
    max_dimension: u32,
) -> Result<(CachedReference, bool), FaceError> {
    let metadata = std::fs::metadata(file)
        .map_err(|e| FaceError::io(e, format!("Failed to stat {}", file.display())))?;
    let size = metadata.len();
    let (mtime_secs, mtime_nanos) = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| (d.as_secs(), d.subsec_nanos()))
        .unwrap_or((0, 0));

    if let Some(cached) = cached {
        if cached.size == size
            && cached.mtime_secs == mtime_secs
            && cached.mtime_nanos == mtime_nanos
        {
            return Ok((cached.clone(), true));
        }
    }

    let bytes = std::fs::read(file)
        .map_err(|e| FaceError::io(e, format!("Failed to read {}", file.display())))?;
    let hash = blake3::hash(&bytes).to_hex().to_string();

    if let Some(cached) = cached {
        if cached.hash == hash {
            let mut refreshed = cached.clone();
            refreshed.size = size;
            refreshed.mtime_secs = mtime_secs;
            refreshed.mtime_nanos = mtime_nanos;
            return Ok((refreshed, true));
        }
    }

    let image =
        DecodedImage::open(file, max_dimension).map_err(|e| FaceError::Decode(e.to_string()))?;
    let embedding = reference_embedding(&image, model)?;

    Ok((
        CachedReference {
            size,
            mtime_secs,
            mtime_nanos,
            hash,
            embedding,
        },
        false,
    ))
}

/// Embedding of the largest face; the whole frame when no face is found
fn reference_embedding(image: &DecodedImage, model: &dyn FaceModel) -> Result<Vec<f32>, FaceError> {
    let faces = model.detect(&image.pixels)?;
    let face = faces
        .into_iter()
        .max_by_key(|f| f.bbox.area())
        .unwrap_or_else(|| super::DetectedFace::whole(image.width(), image.height()));
    model.embed(&image.pixels, &face)
}
