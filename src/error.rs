use std::path::PathBuf;
use thiserror::Error;

/// Main error type for photofind
#[derive(Error, Debug)]
pub enum PhotofindError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Image could not be read or decoded
    #[error("Failed to decode image {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    /// The embedder could not produce a vector for an image or query
    #[error("Embedding failed: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingError),

    /// OCR or face extraction failed; only surfaced by component-level calls,
    /// a record build degrades the field instead
    #[error("Extraction degraded ({stage}): {reason}")]
    ExtractionDegraded { stage: &'static str, reason: String },

    /// Face identifier errors outside of a record build (gallery management)
    #[error("Face identifier error: {0}")]
    Face(#[from] crate::faces::FaceError),

    /// Persisted store is malformed; requires rebuilding the store
    #[error("Store is corrupt: {0}")]
    StoreCorruption(String),

    /// Operation attempted after close()
    #[error("Store is closed")]
    StoreClosed,

    /// Embedding dimension does not match the store
    #[error("Dimension mismatch: store holds {expected}-d vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Caller supplied an unusable argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PhotofindError {
    /// Shorthand for wrapping an IO error with context
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            source,
            context: context.into(),
        }
    }

    /// Errors that end the whole session rather than a single image
    pub fn is_store_level(&self) -> bool {
        matches!(
            self,
            Self::StoreCorruption(_)
                | Self::StoreClosed
                | Self::DimensionMismatch { .. }
                | Self::Database(_)
                | Self::Pool(_)
        )
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for photofind operations
pub type Result<T> = std::result::Result<T, PhotofindError>;
