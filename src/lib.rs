//! photofind - natural-language search over a personal photo collection
//!
//! Each photo is turned into one record combining a CLIP image embedding,
//! OCR text and the names of recognised faces. Text queries are embedded
//! into the same space and ranked by cosine similarity, optionally
//! restricted to photos of particular people.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod faces;
pub mod media;
pub mod ocr;
pub mod pipeline;
pub mod storage;

pub use engine::{SearchEngine, SearchHit};
pub use error::{PhotofindError, Result};
