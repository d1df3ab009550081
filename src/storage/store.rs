//! Persistent image store with cosine similarity search

use super::database::{corruption_or, Database};
use super::vector_index::{HnswIndex, IndexBackend, IndexOptions, VectorIndexError};
use super::{ImageRecord, DATABASE_FILE};
use crate::embedding::cosine_similarity;
use crate::error::{PhotofindError, Result};
use crate::faces::FaceMatch;
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// HNSW is compacted once stale points outnumber live ones by this much
const COMPACT_MIN_STALE: usize = 1024;
/// Candidates fetched from HNSW per requested result
const CANDIDATE_FACTOR: usize = 4;

/// A stored record with its similarity to the query
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: Arc<ImageRecord>,
    /// Cosine similarity to the query
    pub score: f32,
    /// First-insertion order, used to break score ties
    pub seq: i64,
}

/// Read-only store summary
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub count: usize,
    pub dimension: usize,
    pub backend: String,
    /// Records with non-empty OCR text
    pub with_text: usize,
    /// Photos per recognised person
    pub people: BTreeMap<String, usize>,
    /// Unknown faces across all records
    pub unknown_faces: usize,
    pub db_size_bytes: u64,
}

/// Capability interface of the record store
///
/// Writes are serialised by the implementation; searches may run
/// concurrently with each other and with writes.
pub trait ImageStore: Send + Sync {
    /// Insert or overwrite the record with the same id; true when new
    fn upsert(&self, record: ImageRecord) -> Result<bool>;

    /// Top `top_k` records by cosine similarity, best first
    ///
    /// A non-empty `people` keeps only records showing at least one of them,
    /// applied before truncation. Ties keep insertion order.
    fn search(&self, query: &[f32], top_k: usize, people: &[String]) -> Result<Vec<ScoredRecord>>;

    fn get(&self, id: &str) -> Result<Option<ImageRecord>>;

    fn contains(&self, id: &str) -> Result<bool>;

    /// Number of stored records
    fn count(&self) -> Result<usize>;

    /// Delete a record; false if it did not exist
    fn remove(&self, id: &str) -> Result<bool>;

    /// Records in insertion order
    fn list(&self, limit: Option<usize>) -> Result<Vec<ImageRecord>>;

    fn stats(&self) -> Result<StoreStats>;

    /// Flush and release the store; later calls are no-ops
    fn close(&self) -> Result<()>;
}

struct CatalogEntry {
    seq: i64,
    slot: Option<usize>,
    record: Arc<ImageRecord>,
}

#[derive(Default)]
struct Catalog {
    entries: AHashMap<String, CatalogEntry>,
    /// HNSW slot -> record id, current slots only
    slot_owner: AHashMap<usize, String>,
    next_seq: i64,
}

/// SQLite-backed `ImageStore`
///
/// Every record lives in `<store_dir>/images.sqlite` and in an in-memory
/// catalog loaded at open. Each write is one SQL transaction behind a single
/// writer lock.
pub struct SqliteImageStore {
    db: RwLock<Option<Database>>,
    catalog: RwLock<Catalog>,
    hnsw: Option<HnswIndex>,
    dimension: usize,
    options: IndexOptions,
    writer: Mutex<()>,
    store_dir: PathBuf,
}

impl SqliteImageStore {
    /// Open the store in `store_dir` for `dimension`-d embeddings
    ///
    /// Malformed content fails with `StoreCorruption`; a store written with
    /// another dimension fails with `DimensionMismatch`.
    pub fn open(store_dir: &Path, dimension: usize, options: IndexOptions) -> Result<Self> {
        if dimension == 0 {
            return Err(PhotofindError::InvalidInput(
                "embedding dimension must be positive".to_string(),
            ));
        }

        let db_path = store_dir.join(DATABASE_FILE);
        let db = Database::open(&db_path)?;

        match db.meta("dimension")? {
            Some(stored) => {
                let stored: usize = stored.parse().map_err(|_| {
                    PhotofindError::StoreCorruption(format!(
                        "{}: unreadable dimension {:?}",
                        db_path.display(),
                        stored
                    ))
                })?;
                if stored != dimension {
                    return Err(PhotofindError::DimensionMismatch {
                        expected: stored,
                        actual: dimension,
                    });
                }
            }
            None => db.set_meta("dimension", &dimension.to_string())?,
        }

        let records = load_records(&db, dimension)?;
        let hnsw = match options.backend {
            IndexBackend::Flat => None,
            IndexBackend::Hnsw => Some(HnswIndex::new(dimension, records.len() * 2, options)),
        };

        let mut catalog = Catalog::default();
        for (seq, record) in records {
            let slot = match &hnsw {
                Some(index) => Some(index.insert(&record.embedding, false).map_err(index_error)?),
                None => None,
            };
            if let Some(slot) = slot {
                catalog.slot_owner.insert(slot, record.id.clone());
            }
            catalog.next_seq = catalog.next_seq.max(seq + 1);
            catalog.entries.insert(
                record.id.clone(),
                CatalogEntry {
                    seq,
                    slot,
                    record: Arc::new(record),
                },
            );
        }

        tracing::info!(
            "Opened image store: {} records ({}D, {} index) at {}",
            catalog.entries.len(),
            dimension,
            options.backend.as_str(),
            store_dir.display()
        );

        Ok(Self {
            db: RwLock::new(Some(db)),
            catalog: RwLock::new(catalog),
            hnsw,
            dimension,
            options,
            writer: Mutex::new(()),
            store_dir: store_dir.to_path_buf(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Run `f` with the open database, or fail with `StoreClosed`
    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let guard = self.db.read().map_err(|_| poisoned("database"))?;
        match guard.as_ref() {
            Some(db) => f(db),
            None => Err(PhotofindError::StoreClosed),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(PhotofindError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Approximate candidates for an unfiltered query, or `None` when the
    /// caller should fall back to an exact scan
    fn hnsw_candidates(
        &self,
        catalog: &Catalog,
        query: &[f32],
        top_k: usize,
    ) -> Result<Option<Vec<ScoredRecord>>> {
        let index = match &self.hnsw {
            Some(index) => index,
            None => return Ok(None),
        };

        let wanted = top_k.min(catalog.entries.len());
        let k = (top_k * CANDIDATE_FACTOR + index.stale()).min(index.live() + index.stale());
        let candidates = index.search(query, k).map_err(index_error)?;

        let scored: Vec<ScoredRecord> = candidates
            .into_iter()
            .filter_map(|c| catalog.slot_owner.get(&c.slot))
            .filter_map(|id| catalog.entries.get(id))
            .map(|entry| score_entry(entry, query))
            .collect();

        if scored.len() < wanted {
            tracing::debug!(
                "HNSW returned {} usable candidates for top {}, scanning exactly",
                scored.len(),
                wanted
            );
            return Ok(None);
        }
        Ok(Some(scored))
    }

    /// Rebuild the HNSW graph once stale points dominate
    fn maybe_compact(&self, catalog: &mut Catalog) -> Result<()> {
        let index = match &self.hnsw {
            Some(index) => index,
            None => return Ok(()),
        };
        if index.stale() < COMPACT_MIN_STALE || index.stale() < index.live() {
            return Ok(());
        }

        tracing::info!(
            "Compacting HNSW index: {} live, {} stale points",
            index.live(),
            index.stale()
        );
        index.clear(catalog.entries.len() * 2).map_err(index_error)?;
        catalog.slot_owner.clear();

        let mut ordered: Vec<&mut CatalogEntry> = catalog.entries.values_mut().collect();
        ordered.sort_by_key(|e| e.seq);
        for entry in ordered {
            let slot = index.insert(&entry.record.embedding, false).map_err(index_error)?;
            entry.slot = Some(slot);
            catalog.slot_owner.insert(slot, entry.record.id.clone());
        }
        Ok(())
    }
}

impl ImageStore for SqliteImageStore {
    fn upsert(&self, record: ImageRecord) -> Result<bool> {
        self.check_dimension(&record.embedding)?;
        if record.embedding.iter().any(|v| !v.is_finite()) {
            return Err(PhotofindError::InvalidInput(format!(
                "embedding for {} contains non-finite values",
                record.path.display()
            )));
        }

        let _writer = self.writer.lock().map_err(|_| poisoned("writer"))?;

        let (seq, previous_slot) = {
            let catalog = self.catalog.read().map_err(|_| poisoned("catalog"))?;
            match catalog.entries.get(&record.id) {
                Some(entry) => (entry.seq, Some(entry.slot)),
                None => (catalog.next_seq, None),
            }
        };
        let is_new = previous_slot.is_none();

        let faces = serde_json::to_string(&record.faces).map_err(|e| PhotofindError::Json {
            source: e,
            context: "Failed to encode faces".to_string(),
        })?;
        let embedding = encode_embedding(&record.embedding);

        self.with_db(|db| {
            let mut conn = db.get_conn()?;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO images
                    (id, seq, path, embedding, ocr_text, faces, unknown_faces,
                     searchable_text, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    path = excluded.path,
                    embedding = excluded.embedding,
                    ocr_text = excluded.ocr_text,
                    faces = excluded.faces,
                    unknown_faces = excluded.unknown_faces,
                    searchable_text = excluded.searchable_text,
                    indexed_at = excluded.indexed_at",
                params![
                    record.id,
                    seq,
                    record.path.to_string_lossy(),
                    embedding,
                    record.ocr_text,
                    faces,
                    record.unknown_faces as i64,
                    record.searchable_text,
                    record.indexed_at.to_rfc3339(),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        let mut catalog = self.catalog.write().map_err(|_| poisoned("catalog"))?;
        let slot = match &self.hnsw {
            Some(index) => {
                let replaces_live = matches!(previous_slot, Some(Some(_)));
                Some(index.insert(&record.embedding, replaces_live).map_err(index_error)?)
            }
            None => None,
        };
        if let Some(Some(old)) = previous_slot {
            catalog.slot_owner.remove(&old);
        }
        if let Some(slot) = slot {
            catalog.slot_owner.insert(slot, record.id.clone());
        }
        if is_new {
            catalog.next_seq = seq + 1;
        }

        tracing::debug!(
            "{} record {} ({})",
            if is_new { "Stored" } else { "Replaced" },
            record.id,
            record.path.display()
        );
        catalog.entries.insert(
            record.id.clone(),
            CatalogEntry {
                seq,
                slot,
                record: Arc::new(record),
            },
        );
        self.maybe_compact(&mut catalog)?;

        Ok(is_new)
    }

    fn search(&self, query: &[f32], top_k: usize, people: &[String]) -> Result<Vec<ScoredRecord>> {
        self.with_db(|_| Ok(()))?;
        self.check_dimension(query)?;

        let catalog = self.catalog.read().map_err(|_| poisoned("catalog"))?;
        if top_k == 0 || catalog.entries.is_empty() {
            return Ok(Vec::new());
        }

        let approximate = if people.is_empty() {
            self.hnsw_candidates(&catalog, query, top_k)?
        } else {
            None
        };

        let mut scored = match approximate {
            Some(scored) => scored,
            None => catalog
                .entries
                .values()
                .filter(|entry| people.is_empty() || entry.record.has_any_person(people))
                .map(|entry| score_entry(entry, query))
                .collect(),
        };

        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.seq.cmp(&b.seq)));
        scored.truncate(top_k);
        Ok(scored)
    }

    fn get(&self, id: &str) -> Result<Option<ImageRecord>> {
        self.with_db(|_| Ok(()))?;
        let catalog = self.catalog.read().map_err(|_| poisoned("catalog"))?;
        Ok(catalog.entries.get(id).map(|e| e.record.as_ref().clone()))
    }

    fn contains(&self, id: &str) -> Result<bool> {
        self.with_db(|_| Ok(()))?;
        let catalog = self.catalog.read().map_err(|_| poisoned("catalog"))?;
        Ok(catalog.entries.contains_key(id))
    }

    fn count(&self) -> Result<usize> {
        self.with_db(|_| Ok(()))?;
        let catalog = self.catalog.read().map_err(|_| poisoned("catalog"))?;
        Ok(catalog.entries.len())
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let _writer = self.writer.lock().map_err(|_| poisoned("writer"))?;

        let deleted = self.with_db(|db| {
            let mut conn = db.get_conn()?;
            let tx = conn.transaction()?;
            let deleted = tx.execute("DELETE FROM images WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(deleted > 0)
        })?;

        let mut catalog = self.catalog.write().map_err(|_| poisoned("catalog"))?;
        if let Some(entry) = catalog.entries.remove(id) {
            if let Some(slot) = entry.slot {
                catalog.slot_owner.remove(&slot);
                if let Some(index) = &self.hnsw {
                    index.forget_one().map_err(index_error)?;
                }
            }
        }
        Ok(deleted)
    }

    fn list(&self, limit: Option<usize>) -> Result<Vec<ImageRecord>> {
        self.with_db(|_| Ok(()))?;
        let catalog = self.catalog.read().map_err(|_| poisoned("catalog"))?;

        let mut entries: Vec<&CatalogEntry> = catalog.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        Ok(entries
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|e| e.record.as_ref().clone())
            .collect())
    }

    fn stats(&self) -> Result<StoreStats> {
        let db_size_bytes = self.with_db(|db| Ok(db.size_bytes()))?;
        let catalog = self.catalog.read().map_err(|_| poisoned("catalog"))?;

        let mut people: BTreeMap<String, usize> = BTreeMap::new();
        let mut with_text = 0;
        let mut unknown_faces = 0;
        for entry in catalog.entries.values() {
            let record = &entry.record;
            if !record.ocr_text.is_empty() {
                with_text += 1;
            }
            unknown_faces += record.unknown_faces;
            for name in record.face_names() {
                *people.entry(name).or_insert(0) += 1;
            }
        }

        Ok(StoreStats {
            count: catalog.entries.len(),
            dimension: self.dimension,
            backend: self.options.backend.as_str().to_string(),
            with_text,
            people,
            unknown_faces,
            db_size_bytes,
        })
    }

    fn close(&self) -> Result<()> {
        let _writer = self.writer.lock().map_err(|_| poisoned("writer"))?;
        let db = {
            let mut slot = self.db.write().map_err(|_| poisoned("database"))?;
            slot.take()
        };

        let db = match db {
            Some(db) => db,
            None => return Ok(()),
        };

        if let Err(e) = db.checkpoint() {
            tracing::warn!("WAL checkpoint on close failed: {}", e);
        }
        drop(db);

        let mut catalog = self.catalog.write().map_err(|_| poisoned("catalog"))?;
        *catalog = Catalog::default();
        if let Some(index) = &self.hnsw {
            index.clear(0).map_err(index_error)?;
        }

        tracing::info!("Image store closed: {}", self.store_dir.display());
        Ok(())
    }
}

fn score_entry(entry: &CatalogEntry, query: &[f32]) -> ScoredRecord {
    ScoredRecord {
        record: Arc::clone(&entry.record),
        score: cosine_similarity(query, &entry.record.embedding),
        seq: entry.seq,
    }
}

fn load_records(db: &Database, dimension: usize) -> Result<Vec<(i64, ImageRecord)>> {
    let conn = db.get_conn()?;
    let mut stmt = conn
        .prepare(
            "SELECT id, seq, path, embedding, ocr_text, faces, unknown_faces,
                    searchable_text, indexed_at
             FROM images ORDER BY seq",
        )
        .map_err(|e| corruption_or(e, db.path()))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(RawRow {
                id: row.get(0)?,
                seq: row.get(1)?,
                path: row.get(2)?,
                embedding: row.get(3)?,
                ocr_text: row.get(4)?,
                faces: row.get(5)?,
                unknown_faces: row.get(6)?,
                searchable_text: row.get(7)?,
                indexed_at: row.get(8)?,
            })
        })
        .map_err(|e| corruption_or(e, db.path()))?;

    let mut records = Vec::new();
    for row in rows {
        let row = row.map_err(|e| match e {
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => {
                PhotofindError::StoreCorruption(format!("{}: {}", db.path().display(), e))
            }
            e => corruption_or(e, db.path()),
        })?;
        records.push(row.decode(dimension)?);
    }
    Ok(records)
}

struct RawRow {
    id: String,
    seq: i64,
    path: String,
    embedding: Vec<u8>,
    ocr_text: String,
    faces: String,
    unknown_faces: i64,
    searchable_text: String,
    indexed_at: String,
}

impl RawRow {
    fn decode(self, dimension: usize) -> Result<(i64, ImageRecord)> {
        let corrupt = |what: String| {
            PhotofindError::StoreCorruption(format!("record {} ({}): {}", self.id, self.path, what))
        };

        let embedding = decode_embedding(&self.embedding).ok_or_else(|| {
            corrupt(format!("embedding blob of {} bytes", self.embedding.len()))
        })?;
        if embedding.len() != dimension {
            return Err(corrupt(format!(
                "embedding has {} dimensions, store holds {}",
                embedding.len(),
                dimension
            )));
        }
        let faces: Vec<FaceMatch> = serde_json::from_str(&self.faces)
            .map_err(|e| corrupt(format!("faces column: {}", e)))?;
        let indexed_at = DateTime::parse_from_rfc3339(&self.indexed_at)
            .map_err(|e| corrupt(format!("indexed_at column: {}", e)))?
            .with_timezone(&Utc);
        let unknown_faces = usize::try_from(self.unknown_faces)
            .map_err(|_| corrupt(format!("unknown_faces = {}", self.unknown_faces)))?;

        Ok((
            self.seq,
            ImageRecord {
                id: self.id.clone(),
                path: PathBuf::from(&self.path),
                embedding,
                ocr_text: self.ocr_text.clone(),
                faces,
                unknown_faces,
                searchable_text: self.searchable_text.clone(),
                indexed_at,
            },
        ))
    }
}

/// Little-endian f32 blob
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

fn poisoned(what: &str) -> PhotofindError {
    PhotofindError::Other(anyhow::anyhow!("{} lock poisoned", what))
}

fn index_error(e: VectorIndexError) -> PhotofindError {
    PhotofindError::Other(anyhow::Error::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record_id;
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

    fn open(dir: &Path) -> SqliteImageStore {
        SqliteImageStore::open(dir, 2, IndexOptions::default()).unwrap()
    }

    #[test]
    fn test_upsert_overwrites_and_keeps_order() {
        let temp = TempDir::new().unwrap();
        let store = open(temp.path());

        assert!(store.upsert(record("a", vec![1.0, 0.0], &[])).unwrap());
        assert!(store.upsert(record("b", vec![1.0, 0.0], &[])).unwrap());
        assert!(!store.upsert(record("a", vec![1.0, 0.0], &["Alice"])).unwrap());

        assert_eq!(store.stats().unwrap().count, 2);
        let listed = store.list(None).unwrap();
        assert!(listed[0].path.ends_with("a.jpg"));
        assert_eq!(listed[0].faces.len(), 1);

        // Equal scores fall back to first-insertion order
        let hits = store.search(&[1.0, 0.0], 2, &[]).unwrap();
        assert!(hits[0].record.path.ends_with("a.jpg"));
        assert!(hits[0].seq < hits[1].seq);
    }

    #[test]
    fn test_search_orders_and_truncates() {
        let temp = TempDir::new().unwrap();
        let store = open(temp.path());
        for i in 0..10 {
            let angle = i as f32 * 0.15;
            store
                .upsert(record(&format!("img{}", i), vec![angle.cos(), angle.sin()], &[]))
                .unwrap();
        }

        let hits = store.search(&[1.0, 0.0], 3, &[]).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits[0].record.path.ends_with("img0.jpg"));

        assert!(store.search(&[1.0, 0.0], 0, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_filter_applies_before_truncation() {
        let temp = TempDir::new().unwrap();
        let store = open(temp.path());
        // Unfiltered best match shows nobody
        store.upsert(record("nobody", vec![1.0, 0.0], &[])).unwrap();
        store.upsert(record("alice", vec![0.0, 1.0], &["Alice"])).unwrap();

        let hits = store.search(&[1.0, 0.0], 1, &["Alice".to_string()]).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].record.path.ends_with("alice.jpg"));
    }

    #[test]
    fn test_empty_store_search() {
        let temp = TempDir::new().unwrap();
        let store = open(temp.path());
        assert!(store.search(&[1.0, 0.0], 5, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_checks() {
        let temp = TempDir::new().unwrap();
        let store = open(temp.path());
        assert!(matches!(
            store.upsert(record("a", vec![1.0, 0.0, 0.0], &[])),
            Err(PhotofindError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            store.search(&[1.0], 5, &[]),
            Err(PhotofindError::DimensionMismatch { .. })
        ));
        store.close().unwrap();

        assert!(matches!(
            SqliteImageStore::open(temp.path(), 3, IndexOptions::default()),
            Err(PhotofindError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_records_survive_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let store = open(temp.path());
            store.upsert(record("a", vec![0.6, 0.8], &["Bob"])).unwrap();
            store.close().unwrap();
        }

        let store = open(temp.path());
        let id = record_id(Path::new("/photos/a.jpg"));
        let restored = store.get(&id).unwrap().unwrap();
        assert_eq!(restored.embedding, vec![0.6, 0.8]);
        assert_eq!(restored.faces[0].name, "Bob");
        assert_eq!(store.stats().unwrap().people.get("Bob"), Some(&1));
    }

    #[test]
    fn test_close_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = open(temp.path());
        store.upsert(record("a", vec![1.0, 0.0], &[])).unwrap();

        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(
            store.search(&[1.0, 0.0], 5, &[]),
            Err(PhotofindError::StoreClosed)
        ));
        assert!(matches!(
            store.upsert(record("b", vec![1.0, 0.0], &[])),
            Err(PhotofindError::StoreClosed)
        ));
    }

    #[test]
    fn test_bad_embedding_blob_is_corruption() {
        let temp = TempDir::new().unwrap();
        {
            let store = open(temp.path());
            store.upsert(record("a", vec![1.0, 0.0], &[])).unwrap();
            store.close().unwrap();
        }
        {
            let db = Database::open(&temp.path().join(DATABASE_FILE)).unwrap();
            let conn = db.get_conn().unwrap();
            conn.execute("UPDATE images SET embedding = X'0000'", []).unwrap();
        }

        assert!(matches!(
            SqliteImageStore::open(temp.path(), 2, IndexOptions::default()),
            Err(PhotofindError::StoreCorruption(_))
        ));
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let store = open(temp.path());
        let rec = record("a", vec![1.0, 0.0], &[]);
        let id = rec.id.clone();
        store.upsert(rec).unwrap();

        assert!(store.remove(&id).unwrap());
        assert!(!store.remove(&id).unwrap());
        assert!(!store.contains(&id).unwrap());
        assert_eq!(store.stats().unwrap().count, 0);
    }

    #[test]
    fn test_hnsw_backend_matches_flat() {
        let temp = TempDir::new().unwrap();
        let options = IndexOptions {
            backend: IndexBackend::Hnsw,
            ..IndexOptions::default()
        };
        let hnsw = SqliteImageStore::open(&temp.path().join("hnsw"), 2, options).unwrap();
        let flat = open(&temp.path().join("flat"));

        for i in 0..20 {
            let angle = i as f32 * 0.07;
            let rec = record(&format!("img{}", i), vec![angle.cos(), angle.sin()], &[]);
            hnsw.upsert(rec.clone()).unwrap();
            flat.upsert(rec).unwrap();
        }
        // Overwrite leaves a stale HNSW point behind
        hnsw.upsert(record("img0", vec![0.0, 1.0], &[])).unwrap();
        flat.upsert(record("img0", vec![0.0, 1.0], &[])).unwrap();

        let a: Vec<PathBuf> = hnsw
            .search(&[1.0, 0.0], 5, &[])
            .unwrap()
            .into_iter()
            .map(|h| h.record.path.clone())
            .collect();
        let b: Vec<PathBuf> = flat
            .search(&[1.0, 0.0], 5, &[])
            .unwrap()
            .into_iter()
            .map(|h| h.record.path.clone())
            .collect();
        assert_eq!(a, b);
    }
}
