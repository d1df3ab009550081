//! Configuration management for photofind
//!
//! Every tunable knob (image size limit, thresholds, result counts, index
//! backend) lives here and is loaded from TOML, then overridden from the
//! environment and validated.

use crate::error::{PhotofindError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub processing: ProcessingConfig,
    pub ocr: OcrConfig,
    pub faces: FacesConfig,
    pub search: SearchConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// One subdirectory per person, defaults to `<data_dir>/known_faces`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_faces_dir: Option<PathBuf>,
    /// Vector index and face cache, defaults to `<data_dir>/store`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
}

/// Image/text embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub show_download_progress: bool,
}

/// Per-image processing limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Longest side in pixels before images are downscaled for OCR and faces
    pub max_image_dimension: u32,
    /// Images processed concurrently during a batch
    pub workers: usize,
    /// Upper bound on any single model inference
    pub inference_timeout_secs: u64,
}

/// Text extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    pub enabled: bool,
    pub command: String,
    pub language: String,
    /// Fragments recognised with lower confidence are dropped (0.0 - 1.0)
    pub min_confidence: f32,
}

/// Face detection and recognition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacesConfig {
    pub enabled: bool,
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    /// Cosine distance under which a face matches a reference
    pub match_threshold: f32,
    /// Detector score under which a box is discarded
    pub detection_threshold: f32,
}

/// Search defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_limit: usize,
    /// Restrict results to known people named in the query text
    pub auto_person_filter: bool,
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// "flat" (exact) or "hnsw" (approximate candidates, exact re-scoring)
    pub backend: String,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faces_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_image_dimension: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PhotofindError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| PhotofindError::io(e, format!("Failed to read config file: {:?}", path)))?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PhotofindError::io(e, format!("Failed to create config directory: {:?}", parent))
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            PhotofindError::io(e, format!("Failed to write config file: {:?}", path))
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self.profiles.get(profile).cloned().ok_or_else(|| {
            PhotofindError::Config(format!("Unknown profile: {}", profile))
        })?;

        if let Some(enabled) = overrides.ocr_enabled {
            self.ocr.enabled = enabled;
        }
        if let Some(enabled) = overrides.faces_enabled {
            self.faces.enabled = enabled;
        }
        if let Some(dim) = overrides.max_image_dimension {
            self.processing.max_image_dimension = dim;
        }
        if let Some(workers) = overrides.workers {
            self.processing.workers = workers;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: PHOTOFIND_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("PHOTOFIND_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "PROCESSING__MAX_IMAGE_DIMENSION" => {
                self.processing.max_image_dimension = parse_env(path, value)?
            }
            "PROCESSING__WORKERS" => self.processing.workers = parse_env(path, value)?,
            "OCR__ENABLED" => self.ocr.enabled = parse_env(path, value)?,
            "OCR__MIN_CONFIDENCE" => self.ocr.min_confidence = parse_env(path, value)?,
            "FACES__ENABLED" => self.faces.enabled = parse_env(path, value)?,
            "FACES__MATCH_THRESHOLD" => self.faces.match_threshold = parse_env(path, value)?,
            "SEARCH__DEFAULT_LIMIT" => self.search.default_limit = parse_env(path, value)?,
            "INDEX__BACKEND" => self.index.backend = value.to_string(),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Directory holding one subdirectory of reference photos per person
    pub fn known_faces_dir(&self) -> Result<PathBuf> {
        match &self.storage.known_faces_dir {
            Some(dir) => expand_path(dir),
            None => Ok(expand_path(&self.storage.data_dir)?.join("known_faces")),
        }
    }

    /// Directory holding the vector store and the face cache
    pub fn store_dir(&self) -> Result<PathBuf> {
        match &self.storage.store_dir {
            Some(dir) => expand_path(dir),
            None => Ok(expand_path(&self.storage.data_dir)?.join("store")),
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            PhotofindError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("photofind").join("config.toml"))
    }

    /// Configuration rooted at an explicit data directory, used by tests and
    /// the `--data-dir` flag
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.storage.data_dir = data_dir.into();
        config
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| PhotofindError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| PhotofindError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| PhotofindError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.photofind");
        let models_dir = data_dir.join("models");
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir,
                known_faces_dir: None,
                store_dir: None,
            },
            embedding: EmbeddingConfig {
                model: "clip-vit-b32".to_string(),
                cache_dir: None,
                show_download_progress: true,
            },
            processing: ProcessingConfig {
                max_image_dimension: 1024,
                workers,
                inference_timeout_secs: 120,
            },
            ocr: OcrConfig {
                enabled: true,
                command: "tesseract".to_string(),
                language: "eng".to_string(),
                min_confidence: 0.5,
            },
            faces: FacesConfig {
                enabled: true,
                detector_model: models_dir.join("face_detector.onnx"),
                recognizer_model: models_dir.join("face_recognizer.onnx"),
                match_threshold: 0.6,
                detection_threshold: 0.7,
            },
            search: SearchConfig {
                default_limit: 10,
                auto_person_filter: true,
            },
            index: IndexConfig {
                backend: "flat".to_string(),
                hnsw_m: 16,
                hnsw_ef_construction: 200,
                hnsw_ef_search: 64,
            },
            profiles: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_roundtrip_through_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::default();
        config.faces.match_threshold = 0.45;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.faces.match_threshold, 0.45);
        assert_eq!(loaded.index.backend, "flat");
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/photofind.toml"));
        assert!(matches!(result, Err(PhotofindError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_profile_overrides() {
        let mut config = Config::default();
        config.profiles.insert(
            "fast".to_string(),
            ProfileOverrides {
                ocr_enabled: Some(false),
                faces_enabled: Some(false),
                max_image_dimension: Some(512),
                workers: None,
            },
        );

        config.apply_profile("fast").unwrap();
        assert!(!config.ocr.enabled);
        assert!(!config.faces.enabled);
        assert_eq!(config.processing.max_image_dimension, 512);

        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_derived_directories() {
        let config = Config::with_data_dir("/srv/photos");
        assert_eq!(
            config.known_faces_dir().unwrap(),
            PathBuf::from("/srv/photos/known_faces")
        );
        assert_eq!(config.store_dir().unwrap(), PathBuf::from("/srv/photos/store"));
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_path(Path::new("~/pictures")).unwrap();
        assert!(!expanded.starts_with("~"));
        assert_eq!(expand_path(Path::new("/abs")).unwrap(), PathBuf::from("/abs"));
    }
}
