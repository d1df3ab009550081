//! Indexing pipeline
//!
//! `RecordBuilder` turns one image into an `ImageRecord`; `BatchIndexer`
//! fans a list of images out over a bounded worker pool and writes the
//! records through the store.

mod batch;
mod builder;

pub(crate) use batch::discard_stale;
pub use batch::{BatchFailure, BatchIndexer, BatchSummary, CancelFlag, FailureKind};
pub use builder::{searchable_text, ProcessedImage, RecordBuilder, StageTimings};
