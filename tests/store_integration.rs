mod common;

use chrono::Utc;
use common::*;
use photofind::error::PhotofindError;
use photofind::faces::FaceMatch;
use photofind::storage::{
    record_id, ImageRecord, ImageStore, IndexBackend, IndexOptions, SqliteImageStore,
    DATABASE_FILE,
};
use std::path::PathBuf;
use tempfile::TempDir;

fn record(name: &str, embedding: Vec<f32>, people: &[&str]) -> ImageRecord {
    let path = PathBuf::from(format!("/photos/{}.jpg", name));
    ImageRecord {
        id: record_id(&path),
        path,
        embedding,
        ocr_text: String::new(),
        faces: people
            .iter()
            .map(|p| FaceMatch {
                name: p.to_string(),
                confidence: 0.9,
            })
            .collect(),
        unknown_faces: 0,
        searchable_text: String::new(),
        indexed_at: Utc::now(),
    }
}

#[test]
fn test_person_filter_before_truncation() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    // R2 is the closest match but shows nobody
    store.upsert(record("r1", vec![0.6, 0.8, 0.0], &["Alice"])).unwrap();
    store.upsert(record("r2", vec![1.0, 0.0, 0.0], &[])).unwrap();
    store.upsert(record("r3", vec![0.0, 1.0, 0.0], &["Alice", "Bob"])).unwrap();

    let alice = vec!["Alice".to_string()];
    let hits = store.search(&[1.0, 0.0, 0.0], 10, &alice).unwrap();
    let paths: Vec<_> = hits.iter().map(|h| h.record.path.clone()).collect();
    assert_eq!(
        paths,
        vec![PathBuf::from("/photos/r1.jpg"), PathBuf::from("/photos/r3.jpg")]
    );

    let hits = store.search(&[1.0, 0.0, 0.0], 1, &alice).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.path, PathBuf::from("/photos/r1.jpg"));

    let unfiltered = store.search(&[1.0, 0.0, 0.0], 1, &[]).unwrap();
    assert_eq!(unfiltered[0].record.path, PathBuf::from("/photos/r2.jpg"));
}

#[test]
fn test_records_survive_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let store = open_store(temp.path());
        store.upsert(record("a", vec![1.0, 0.0, 0.0], &["Alice"])).unwrap();
        store.upsert(record("b", vec![0.0, 1.0, 0.0], &[])).unwrap();
        store.close().unwrap();
    }

    let store = open_store(temp.path());
    let stats = store.stats().unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.people.get("Alice"), Some(&1));

    let hits = store.search(&[0.0, 1.0, 0.0], 1, &[]).unwrap();
    assert_eq!(hits[0].record.path, PathBuf::from("/photos/b.jpg"));
    assert!((hits[0].score - 1.0).abs() < 1e-5);
}

#[test]
fn test_hnsw_backend_reloads_index() {
    let temp = TempDir::new().unwrap();
    let options = IndexOptions {
        backend: IndexBackend::Hnsw,
        ..IndexOptions::default()
    };
    {
        let store = SqliteImageStore::open(temp.path(), DIMENSION, options).unwrap();
        for i in 0..20 {
            let angle = i as f32 * 0.07;
            store
                .upsert(record(&format!("p{}", i), vec![angle.cos(), angle.sin(), 0.0], &[]))
                .unwrap();
        }
        store.close().unwrap();
    }

    let store = SqliteImageStore::open(temp.path(), DIMENSION, options).unwrap();
    let hits = store.search(&[1.0, 0.0, 0.0], 3, &[]).unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].record.path, PathBuf::from("/photos/p0.jpg"));
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn test_corrupt_database_is_reported() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join(DATABASE_FILE),
        vec![0xAB; 8192],
    )
    .unwrap();

    let err = SqliteImageStore::open(temp.path(), DIMENSION, IndexOptions::default())
        .err()
        .unwrap();
    assert!(matches!(err, PhotofindError::StoreCorruption(_)), "{:?}", err);
}

#[test]
fn test_dimension_is_fixed_per_store() {
    let temp = TempDir::new().unwrap();
    {
        let store = open_store(temp.path());
        store.upsert(record("a", vec![1.0, 0.0, 0.0], &[])).unwrap();
        store.close().unwrap();
    }

    let err = SqliteImageStore::open(temp.path(), 512, IndexOptions::default())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        PhotofindError::DimensionMismatch {
            expected: 3,
            actual: 512
        }
    ));

    let store = open_store(temp.path());
    let err = store.search(&[1.0, 0.0], 5, &[]).unwrap_err();
    assert!(matches!(err, PhotofindError::DimensionMismatch { .. }));
}
