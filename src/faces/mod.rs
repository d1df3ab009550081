//! Face detection, recognition and the gallery of known people
//!
//! - `FaceModel` abstracts the detector + recognizer pair (ONNX in production)
//! - `gallery` builds and caches reference embeddings from
//!   `known_faces/<person>/*.jpg`
//! - `matcher` assigns each detected face to the nearest known identity
//! - `FaceIdentifier` owns the gallery; callers only read match results

mod gallery;
mod matcher;
mod model;

pub use gallery::{
    build_gallery, Gallery, GalleryBuildWarning, GalleryReport, Identity, KnownPerson,
};
pub use matcher::{match_faces, nearest_identity};
pub use model::{BoundingBox, DetectedFace, FaceModel, OnnxFaceModel, OnnxFaceModelOptions};

use crate::media::DecodedImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("Face model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Face inference failed: {0}")]
    Inference(String),

    #[error("Face image unreadable: {0}")]
    Decode(String),

    #[error("Invalid person name: {0:?}")]
    InvalidName(String),

    #[error("Gallery error: {0}")]
    Gallery(String),

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },
}

impl FaceError {
    pub(crate) fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            source,
            context: context.into(),
        }
    }
}

/// A recognised person in a photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub name: String,
    /// `1 - cosine distance` to the closest reference
    pub confidence: f32,
}

/// Outcome of `detect_and_match` for one image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceMatches {
    /// One entry per person, sorted by name, best confidence kept
    pub matches: Vec<FaceMatch>,
    /// Faces that matched nobody in the gallery
    pub unknown: usize,
}

impl FaceMatches {
    pub fn names(&self) -> BTreeSet<String> {
        self.matches.iter().map(|m| m.name.clone()).collect()
    }

    pub fn detected(&self) -> usize {
        self.matches.len() + self.unknown
    }
}

/// Detects faces and names them against the gallery of known people
///
/// The gallery is built once at construction and swapped atomically on
/// rebuild, so concurrent `detect_and_match` calls always see a complete
/// gallery.
pub struct FaceIdentifier {
    model: Arc<dyn FaceModel>,
    gallery: RwLock<Arc<Gallery>>,
    known_faces_dir: PathBuf,
    cache_path: PathBuf,
    match_threshold: f32,
    max_dimension: u32,
    rebuild_lock: Mutex<()>,
}

impl FaceIdentifier {
    /// Create an identifier and build its gallery (reusing cached
    /// embeddings for unchanged reference photos)
    pub fn open(
        model: Arc<dyn FaceModel>,
        known_faces_dir: PathBuf,
        cache_path: PathBuf,
        match_threshold: f32,
        max_dimension: u32,
    ) -> Result<(Self, GalleryReport), FaceError> {
        let identifier = Self::with_gallery(
            model,
            known_faces_dir,
            cache_path,
            match_threshold,
            max_dimension,
            Gallery::default(),
        );
        let report = identifier.rebuild_gallery(false)?;
        Ok((identifier, report))
    }

    /// Create an identifier around an already-built gallery
    pub fn with_gallery(
        model: Arc<dyn FaceModel>,
        known_faces_dir: PathBuf,
        cache_path: PathBuf,
        match_threshold: f32,
        max_dimension: u32,
        gallery: Gallery,
    ) -> Self {
        Self {
            model,
            gallery: RwLock::new(Arc::new(gallery)),
            known_faces_dir,
            cache_path,
            match_threshold,
            max_dimension,
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Detect every face in the image and name those close enough to a
    /// known identity; zero faces is a valid result
    pub fn detect_and_match(&self, image: &DecodedImage) -> Result<FaceMatches, FaceError> {
        let faces = self.model.detect(&image.pixels)?;
        if faces.is_empty() {
            return Ok(FaceMatches::default());
        }

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in &faces {
            embeddings.push(self.model.embed(&image.pixels, face)?);
        }

        let gallery = self.gallery()?;
        Ok(match_faces(&embeddings, &gallery, self.match_threshold))
    }

    /// Rescan the known-faces directory; `force` discards the cache
    pub fn rebuild_gallery(&self, force: bool) -> Result<GalleryReport, FaceError> {
        let _guard = self
            .rebuild_lock
            .lock()
            .map_err(|_| FaceError::Gallery("rebuild lock poisoned".to_string()))?;

        let (gallery, report) = build_gallery(
            &self.known_faces_dir,
            &self.cache_path,
            self.model.as_ref(),
            self.max_dimension,
            force,
        )?;

        let mut slot = self
            .gallery
            .write()
            .map_err(|_| FaceError::Gallery("gallery lock poisoned".to_string()))?;
        *slot = Arc::new(gallery);

        tracing::info!(
            "Face gallery ready: {} people, {} references ({} embedded, {} cached, {} warnings)",
            report.people,
            report.references,
            report.embedded,
            report.reused,
            report.warnings.len()
        );
        Ok(report)
    }

    /// Snapshot of the current gallery
    pub fn gallery(&self) -> Result<Arc<Gallery>, FaceError> {
        self.gallery
            .read()
            .map(|g| Arc::clone(&g))
            .map_err(|_| FaceError::Gallery("gallery lock poisoned".to_string()))
    }

    /// Known people with their reference counts, sorted by name
    pub fn list_known(&self) -> Result<Vec<KnownPerson>, FaceError> {
        Ok(self.gallery()?.known_people())
    }

    /// Copy reference photos into `known_faces/<name>/` and rebuild
    pub fn add_known(&self, name: &str, photos: &[PathBuf]) -> Result<GalleryReport, FaceError> {
        let person_dir = self.person_dir(name)?;
        std::fs::create_dir_all(&person_dir).map_err(|e| {
            FaceError::io(e, format!("Failed to create {}", person_dir.display()))
        })?;

        let mut missing = Vec::new();
        for photo in photos {
            let file_name = match photo.file_name() {
                Some(file_name) if photo.is_file() => file_name,
                _ => {
                    missing.push(GalleryBuildWarning::new(photo, "reference photo not found"));
                    continue;
                }
            };
            let target = person_dir.join(file_name);
            std::fs::copy(photo, &target).map_err(|e| {
                FaceError::io(e, format!("Failed to copy {} into gallery", photo.display()))
            })?;
            tracing::info!("Added reference photo for {}: {}", name, target.display());
        }

        let mut report = self.rebuild_gallery(false)?;
        for warning in &missing {
            tracing::warn!("{}", warning);
        }
        report.warnings.extend(missing);
        Ok(report)
    }

    /// Delete a person's reference photos and drop them from the gallery
    pub fn remove_known(&self, name: &str) -> Result<bool, FaceError> {
        let person_dir = self.person_dir(name)?;
        let existed = person_dir.is_dir();
        if existed {
            std::fs::remove_dir_all(&person_dir).map_err(|e| {
                FaceError::io(e, format!("Failed to remove {}", person_dir.display()))
            })?;
        }
        self.rebuild_gallery(false)?;
        Ok(existed)
    }

    pub fn known_faces_dir(&self) -> &Path {
        &self.known_faces_dir
    }

    pub fn match_threshold(&self) -> f32 {
        self.match_threshold
    }

    fn person_dir(&self, name: &str) -> Result<PathBuf, FaceError> {
        validate_person_name(name)?;
        Ok(self.known_faces_dir.join(name))
    }
}

/// Person names double as directory names
pub fn validate_person_name(name: &str) -> Result<(), FaceError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name == "."
        || name == ".."
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
    {
        return Err(FaceError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_name_validation() {
        assert!(validate_person_name("Alice").is_ok());
        assert!(validate_person_name("Mary Jane").is_ok());
        assert!(validate_person_name("").is_err());
        assert!(validate_person_name("..").is_err());
        assert!(validate_person_name(".hidden").is_err());
        assert!(validate_person_name("a/b").is_err());
        assert!(validate_person_name(" padded ").is_err());
    }

    #[test]
    fn test_face_matches_names() {
        let matches = FaceMatches {
            matches: vec![
                FaceMatch {
                    name: "Alice".to_string(),
                    confidence: 0.9,
                },
                FaceMatch {
                    name: "Bob".to_string(),
                    confidence: 0.7,
                },
            ],
            unknown: 2,
        };
        assert_eq!(matches.detected(), 4);
        assert!(matches.names().contains("Bob"));
    }
}
