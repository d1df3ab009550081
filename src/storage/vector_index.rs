/// HNSW vector index for candidate generation
use hnsw_rs::prelude::*;
use std::str::FromStr;
use std::sync::RwLock;
use thiserror::Error;

/// Upper bound on HNSW layers (hnsw_rs clamps to this anyway)
const MAX_LAYERS: usize = 16;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Unknown index backend: {0} (expected 'flat' or 'hnsw')")]
    UnknownBackend(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Index lock poisoned")]
    LockPoisoned,
}

/// How the store generates nearest-neighbour candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    /// Exact scan over every stored embedding
    Flat,
    /// Approximate HNSW candidates, re-scored exactly
    Hnsw,
}

impl IndexBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexBackend::Flat => "flat",
            IndexBackend::Hnsw => "hnsw",
        }
    }
}

impl FromStr for IndexBackend {
    type Err = VectorIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(IndexBackend::Flat),
            "hnsw" => Ok(IndexBackend::Hnsw),
            other => Err(VectorIndexError::UnknownBackend(other.to_string())),
        }
    }
}

/// Index parameters, taken from the `[index]` config section
#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    pub backend: IndexBackend,
    /// HNSW M parameter (connections per layer)
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Flat,
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

/// Search result with slot and similarity score
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    /// Slot the vector was inserted under
    pub slot: usize,
    /// Cosine similarity (1 - cosine distance)
    pub score: f32,
}

/// HNSW vector index wrapper
///
/// hnsw_rs cannot delete or replace points, so every insert takes a fresh
/// slot. The caller remembers which slot is current for each record and
/// ignores stale ones; `stale()` tells it when a rebuild is worthwhile.
pub struct HnswIndex {
    index: RwLock<Hnsw<'static, f32, DistCosine>>,
    dimension: usize,
    options: IndexOptions,
    next_slot: RwLock<usize>,
    live: RwLock<usize>,
}

impl HnswIndex {
    /// Create an empty index sized for roughly `capacity` vectors
    pub fn new(dimension: usize, capacity: usize, options: IndexOptions) -> Self {
        Self {
            index: RwLock::new(Self::fresh(capacity, &options)),
            dimension,
            options,
            next_slot: RwLock::new(0),
            live: RwLock::new(0),
        }
    }

    fn fresh(capacity: usize, options: &IndexOptions) -> Hnsw<'static, f32, DistCosine> {
        Hnsw::<f32, DistCosine>::new(
            options.m.max(2),
            capacity.max(1024),
            MAX_LAYERS,
            options.ef_construction.max(options.m),
            DistCosine,
        )
    }

    /// Insert a vector, returning the slot it was stored under
    ///
    /// `replaces_live` marks the insert as an overwrite of a record that
    /// already had a slot, which becomes stale.
    pub fn insert(&self, vector: &[f32], replaces_live: bool) -> Result<usize, VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let slot = {
            let mut next = self
                .next_slot
                .write()
                .map_err(|_| VectorIndexError::LockPoisoned)?;
            let slot = *next;
            *next += 1;
            slot
        };

        {
            let index = self.index.read().map_err(|_| VectorIndexError::LockPoisoned)?;
            index.insert((vector, slot));
        }

        if !replaces_live {
            let mut live = self.live.write().map_err(|_| VectorIndexError::LockPoisoned)?;
            *live += 1;
        }
        Ok(slot)
    }

    /// Record that a live slot was removed without replacement
    pub fn forget_one(&self) -> Result<(), VectorIndexError> {
        let mut live = self.live.write().map_err(|_| VectorIndexError::LockPoisoned)?;
        *live = live.saturating_sub(1);
        Ok(())
    }

    /// `k` approximate nearest slots, best first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Candidate>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let index = self.index.read().map_err(|_| VectorIndexError::LockPoisoned)?;
        let ef = self.options.ef_search.max(k);
        Ok(index
            .search(query, k, ef)
            .into_iter()
            .map(|neighbour| Candidate {
                slot: neighbour.d_id,
                score: 1.0 - neighbour.distance,
            })
            .collect())
    }

    /// Drop every point and start numbering slots from zero
    pub fn clear(&self, capacity: usize) -> Result<(), VectorIndexError> {
        let mut index = self.index.write().map_err(|_| VectorIndexError::LockPoisoned)?;
        *index = Self::fresh(capacity, &self.options);
        *self
            .next_slot
            .write()
            .map_err(|_| VectorIndexError::LockPoisoned)? = 0;
        *self.live.write().map_err(|_| VectorIndexError::LockPoisoned)? = 0;
        Ok(())
    }

    /// Inserted points that no longer back a record
    pub fn stale(&self) -> usize {
        let total = self.next_slot.read().map(|n| *n).unwrap_or(0);
        total.saturating_sub(self.live())
    }

    pub fn live(&self) -> usize {
        self.live.read().map(|n| *n).unwrap_or(0)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
