//! Text extraction from images
//!
//! The `TextExtractor` trait hides the OCR engine. Low-confidence fragments
//! are dropped silently; an empty string means "no qualifying text", while
//! errors are reserved for images or engines that cannot be processed.

mod tesseract;

pub use tesseract::TesseractExtractor;

use crate::media::DecodedImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Image cannot be read by the OCR engine: {0}")]
    Unreadable(String),

    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("OCR engine failed: {0}")]
    EngineFailed(String),

    #[error("OCR timed out after {0}s")]
    Timeout(u64),
}

/// Trait for OCR engines
pub trait TextExtractor: Send + Sync {
    /// Extract whitespace-normalised text in reading order
    fn extract_text(&self, image: &DecodedImage) -> Result<String, OcrError>;

    /// Engine name for logs
    fn name(&self) -> &str;
}

/// One recognised word or line with its position in reading order
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub text: String,
    /// 0.0 - 1.0
    pub confidence: f32,
}

/// Keep fragments at or above `min_confidence` and join them into a single
/// whitespace-normalised string, preserving order
pub fn join_fragments(fragments: &[TextFragment], min_confidence: f32) -> String {
    let kept: Vec<&str> = fragments
        .iter()
        .filter(|f| f.confidence >= min_confidence)
        .map(|f| f.text.as_str())
        .collect();
    normalize_whitespace(&kept.join(" "))
}

/// Collapse every run of whitespace into a single space and trim the ends
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(text: &str, confidence: f32) -> TextFragment {
        TextFragment {
            text: text.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_low_confidence_fragments_dropped() {
        let fragments = vec![
            fragment("GRAND", 0.96),
            fragment("~~", 0.12),
            fragment("OPENING", 0.91),
        ];
        assert_eq!(join_fragments(&fragments, 0.5), "GRAND OPENING");
    }

    #[test]
    fn test_nothing_qualifies_is_empty() {
        let fragments = vec![fragment("blur", 0.2)];
        assert_eq!(join_fragments(&fragments, 0.5), "");
        assert_eq!(join_fragments(&[], 0.5), "");
    }

    #[test]
    fn test_whitespace_normalised() {
        assert_eq!(normalize_whitespace("  Total:\n\t 12.50  EUR "), "Total: 12.50 EUR");
    }
}
