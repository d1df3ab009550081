use crate::config::Config;
use crate::error::{PhotofindError, Result, ValidationError};

/// Supported image/text embedding models
pub const SUPPORTED_EMBEDDING_MODELS: &[&str] = &["clip-vit-b32"];

/// Supported vector index backends
pub const SUPPORTED_INDEX_BACKENDS: &[&str] = &["flat", "hnsw"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_processing(config, &mut errors);
        Self::validate_ocr(config, &mut errors);
        Self::validate_faces(config, &mut errors);
        Self::validate_search(config, &mut errors);
        Self::validate_index(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PhotofindError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let model = &config.embedding.model;
        if !SUPPORTED_EMBEDDING_MODELS.contains(&model.as_str()) {
            errors.push(ValidationError::new(
                "embedding.model",
                format!(
                    "Model must be one of {:?}, got '{}'",
                    SUPPORTED_EMBEDDING_MODELS, model
                ),
            ));
        }
    }

    fn validate_processing(config: &Config, errors: &mut Vec<ValidationError>) {
        // Anything smaller than a face crop is useless for detection
        if config.processing.max_image_dimension < 64 {
            errors.push(ValidationError::new(
                "processing.max_image_dimension",
                "Maximum image dimension must be at least 64",
            ));
        }

        if config.processing.workers == 0 {
            errors.push(ValidationError::new(
                "processing.workers",
                "Worker count must be greater than 0",
            ));
        }

        if config.processing.inference_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "processing.inference_timeout_secs",
                "Inference timeout must be greater than 0",
            ));
        }
    }

    fn validate_ocr(config: &Config, errors: &mut Vec<ValidationError>) {
        let confidence = config.ocr.min_confidence;
        if !(0.0..=1.0).contains(&confidence) {
            errors.push(ValidationError::new(
                "ocr.min_confidence",
                format!("Confidence must be between 0.0 and 1.0, got {}", confidence),
            ));
        }

        if config.ocr.enabled && config.ocr.command.trim().is_empty() {
            errors.push(ValidationError::new(
                "ocr.command",
                "OCR command cannot be empty when OCR is enabled",
            ));
        }
    }

    fn validate_faces(config: &Config, errors: &mut Vec<ValidationError>) {
        let threshold = config.faces.match_threshold;
        if !(threshold > 0.0 && threshold <= 2.0) {
            errors.push(ValidationError::new(
                "faces.match_threshold",
                format!(
                    "Cosine distance threshold must be in (0.0, 2.0], got {}",
                    threshold
                ),
            ));
        }

        let detection = config.faces.detection_threshold;
        if !(0.0..=1.0).contains(&detection) {
            errors.push(ValidationError::new(
                "faces.detection_threshold",
                format!("Detection threshold must be between 0.0 and 1.0, got {}", detection),
            ));
        }

        if config.faces.enabled {
            if config.faces.detector_model.as_os_str().is_empty() {
                errors.push(ValidationError::new(
                    "faces.detector_model",
                    "Detector model path cannot be empty",
                ));
            }
            if config.faces.recognizer_model.as_os_str().is_empty() {
                errors.push(ValidationError::new(
                    "faces.recognizer_model",
                    "Recognizer model path cannot be empty",
                ));
            }
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.search.default_limit == 0 {
            errors.push(ValidationError::new(
                "search.default_limit",
                "Default result count must be greater than 0",
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        let backend = &config.index.backend;
        if !SUPPORTED_INDEX_BACKENDS.contains(&backend.as_str()) {
            errors.push(ValidationError::new(
                "index.backend",
                format!(
                    "Backend must be one of {:?}, got '{}'",
                    SUPPORTED_INDEX_BACKENDS, backend
                ),
            ));
        }

        if config.index.hnsw_m == 0 {
            errors.push(ValidationError::new("index.hnsw_m", "HNSW M must be greater than 0"));
        }

        if config.index.hnsw_ef_construction == 0 || config.index.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_ef",
                "HNSW ef parameters must be greater than 0",
            ));
        }
    }
}
