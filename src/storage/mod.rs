//! Storage layer for photofind
//!
//! SQLite holds the image records; an in-memory catalog (optionally backed
//! by an HNSW index) answers similarity queries.

pub mod database;
pub mod store;
pub mod vector_index;

pub use database::{Database, DbPool};
pub use store::{ImageStore, ScoredRecord, SqliteImageStore, StoreStats};
pub use vector_index::{HnswIndex, IndexBackend, IndexOptions, VectorIndexError};

use crate::faces::FaceMatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// File name of the record database inside the store directory
pub const DATABASE_FILE: &str = "images.sqlite";
/// File name of the face-embedding cache inside the store directory
pub const FACE_CACHE_FILE: &str = "face_gallery.bin";

/// One indexed image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Derived from the absolute path, see `record_id`
    pub id: String,
    /// Absolute path at index time; may go stale if the file moves
    pub path: PathBuf,
    pub embedding: Vec<f32>,
    /// Possibly empty, never absent
    pub ocr_text: String,
    /// Recognised people, sorted by name, one entry each
    pub faces: Vec<FaceMatch>,
    /// Detected faces that matched nobody
    pub unknown_faces: usize,
    pub searchable_text: String,
    pub indexed_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn face_names(&self) -> BTreeSet<String> {
        self.faces.iter().map(|f| f.name.clone()).collect()
    }

    /// Whether any of `people` appears in this image
    pub fn has_any_person(&self, people: &[String]) -> bool {
        self.faces.iter().any(|f| people.contains(&f.name))
    }
}

/// Stable record id for an absolute image path
pub fn record_id(absolute_path: &Path) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        absolute_path.to_string_lossy().as_bytes(),
    )
    .to_string()
}

/// Format size as human-readable string
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_is_stable_per_path() {
        let a = record_id(Path::new("/photos/a.jpg"));
        assert_eq!(a, record_id(Path::new("/photos/a.jpg")));
        assert_ne!(a, record_id(Path::new("/photos/b.jpg")));
    }

    #[test]
    fn test_has_any_person() {
        let record = ImageRecord {
            id: "x".to_string(),
            path: PathBuf::from("/x.jpg"),
            embedding: vec![1.0],
            ocr_text: String::new(),
            faces: vec![FaceMatch {
                name: "Alice".to_string(),
                confidence: 0.8,
            }],
            unknown_faces: 0,
            searchable_text: String::new(),
            indexed_at: Utc::now(),
        };
        assert!(record.has_any_person(&["Bob".to_string(), "Alice".to_string()]));
        assert!(!record.has_any_person(&["Bob".to_string()]));
        assert!(!record.has_any_person(&[]));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(1023), "1023.00 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1024 * 1024), "1.00 MB");
    }
}
