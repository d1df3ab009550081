/// Embedding provider trait and FastEmbed CLIP implementation
use crate::media::DecodedImage;
use fastembed::{
    EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions,
    TextEmbedding,
};
use image::ImageFormat;
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding timed out after {0}s")]
    Timeout(u64),
}

/// Trait for embedding providers
///
/// Image and text vectors must live in the same space so that the cosine
/// similarity between a photo and a query is meaningful.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a decoded image
    fn embed_image(&self, image: &DecodedImage) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a free-text query
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// CLIP ViT-B/32 through FastEmbed
///
/// **Important**: both towers are downloaded on first use (~350MB total) into
/// the FastEmbed cache directory. Loading takes seconds, so each tower is
/// initialised once and shared for the lifetime of the provider.
pub struct ClipEmbedder {
    image_model: OnceCell<ImageEmbedding>,
    text_model: OnceCell<TextEmbedding>,
    model_name: String,
    cache_dir: Option<PathBuf>,
    show_download_progress: bool,
}

const CLIP_DIMENSION: usize = 512;

impl ClipEmbedder {
    /// Create a provider for the named model; nothing is loaded yet
    pub fn new(
        model_name: &str,
        cache_dir: Option<PathBuf>,
        show_download_progress: bool,
    ) -> Result<Self, EmbeddingError> {
        match model_name {
            "clip-vit-b32" | "clip-ViT-B-32" => {}
            _ => {
                return Err(EmbeddingError::InitializationError(format!(
                    "Unsupported model: {}. Supported: clip-vit-b32",
                    model_name
                )));
            }
        }

        Ok(Self {
            image_model: OnceCell::new(),
            text_model: OnceCell::new(),
            model_name: model_name.to_string(),
            cache_dir,
            show_download_progress,
        })
    }

    /// Create provider with the default CLIP model
    pub fn with_default_model() -> Result<Self, EmbeddingError> {
        Self::new("clip-vit-b32", None, true)
    }

    fn image_model(&self) -> Result<&ImageEmbedding, EmbeddingError> {
        self.image_model.get_or_try_init(|| {
            tracing::info!(
                "Loading image embedding model: {} ({}D)",
                self.model_name,
                CLIP_DIMENSION
            );
            let mut options = ImageInitOptions::new(ImageEmbeddingModel::ClipVitB32)
                .with_show_download_progress(self.show_download_progress);
            if let Some(dir) = &self.cache_dir {
                options = options.with_cache_dir(dir.clone());
            }
            ImageEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::InitializationError(e.to_string()))
        })
    }

    fn text_model(&self) -> Result<&TextEmbedding, EmbeddingError> {
        self.text_model.get_or_try_init(|| {
            tracing::info!(
                "Loading text embedding model: {} ({}D)",
                self.model_name,
                CLIP_DIMENSION
            );
            let mut options = InitOptions::new(EmbeddingModel::ClipVitB32)
                .with_show_download_progress(self.show_download_progress);
            if let Some(dir) = &self.cache_dir {
                options = options.with_cache_dir(dir.clone());
            }
            TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::InitializationError(e.to_string()))
        })
    }

    fn check(&self, mut embeddings: Vec<Vec<f32>>) -> Result<Vec<f32>, EmbeddingError> {
        let mut embedding = embeddings
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationError("No embeddings generated".to_string()))?;

        if embedding.len() != CLIP_DIMENSION {
            return Err(EmbeddingError::DimensionMismatch {
                expected: CLIP_DIMENSION,
                actual: embedding.len(),
            });
        }

        super::l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

impl EmbeddingProvider for ClipEmbedder {
    fn embed_image(&self, image: &DecodedImage) -> Result<Vec<f32>, EmbeddingError> {
        let model = self.image_model()?;

        // FastEmbed only reads files: hand it the decoded working copy
        let scratch = tempfile::Builder::new()
            .prefix("photofind-clip-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| EmbeddingError::GenerationError(format!("temp file: {}", e)))?;
        image
            .pixels
            .save_with_format(scratch.path(), ImageFormat::Png)
            .map_err(|e| EmbeddingError::InvalidInput(e.to_string()))?;

        let embeddings = model
            .embed(vec![scratch.path().to_path_buf()], None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;
        self.check(embeddings)
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        let model = self.text_model()?;
        let embeddings = model
            .embed(vec![text.to_string()], None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;
        self.check(embeddings)
    }

    fn dimension(&self) -> usize {
        CLIP_DIMENSION
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;
    use image::{DynamicImage, Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn test_unknown_model_rejected() {
        let result = ClipEmbedder::new("resnet-50", None, false);
        assert!(matches!(
            result,
            Err(EmbeddingError::InitializationError(_))
        ));
    }

    #[test]
    fn test_construction_is_lazy() {
        // No download happens until the first embed call
        let provider = ClipEmbedder::new("clip-vit-b32", None, false).unwrap();
        assert_eq!(provider.dimension(), 512);
        assert_eq!(provider.model_name(), "clip-vit-b32");
        assert!(provider.image_model.get().is_none());
        assert!(provider.text_model.get().is_none());
    }

    #[test]
    fn test_empty_query_rejected_before_loading() {
        let provider = ClipEmbedder::new("clip-vit-b32", None, false).unwrap();
        assert!(matches!(
            provider.embed_text("   "),
            Err(EmbeddingError::InvalidInput(_))
        ));
        assert!(provider.text_model.get().is_none());
    }

    #[test]
    #[ignore] // Requires model download (~350MB) - run with: cargo test -- --ignored
    fn test_text_and_image_share_space() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("red.png");
        RgbImage::from_pixel(224, 224, Rgb([220, 20, 20]))
            .save(&path)
            .unwrap();
        let image = DecodedImage::from_image(
            path,
            DynamicImage::ImageRgb8(RgbImage::from_pixel(224, 224, Rgb([220, 20, 20]))),
            1024,
        );

        let provider = ClipEmbedder::with_default_model().unwrap();
        let image_vec = provider.embed_image(&image).unwrap();
        let red = provider.embed_text("a plain red square").unwrap();
        let dog = provider.embed_text("a dog playing fetch on the beach").unwrap();

        assert_eq!(image_vec.len(), 512);
        assert!(cosine_similarity(&image_vec, &red) > cosine_similarity(&image_vec, &dog));
    }

    #[test]
    #[ignore] // Requires model download (~350MB) - run with: cargo test -- --ignored
    fn test_embeds_decoded_pixels_without_source_file() {
        // The working copy is embedded even when the original file is gone
        let image = DecodedImage::from_image(
            PathBuf::from("/nonexistent/photo.jpg"),
            DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 200, Rgb([20, 20, 220]))),
            1024,
        );

        let provider = ClipEmbedder::with_default_model().unwrap();
        let vector = provider.embed_image(&image).unwrap();
        assert_eq!(vector.len(), 512);
    }
}
