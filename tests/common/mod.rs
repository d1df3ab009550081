//! Deterministic stand-ins for the perception models
//!
//! Colours drive everything: the embedder maps an image to its mean RGB and
//! the words "red", "green" and "blue" to the matching axis, and the face
//! model reports one face per image half, embedded as that half's centre
//! pixel.
#![allow(dead_code)]

use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use photofind::embedding::{EmbeddingError, EmbeddingProvider};
use photofind::engine::{EngineComponents, EngineOptions, SearchEngine};
use photofind::faces::{BoundingBox, DetectedFace, FaceError, FaceIdentifier, FaceModel};
use photofind::media::DecodedImage;
use photofind::ocr::{OcrError, TextExtractor};
use photofind::storage::{IndexOptions, SqliteImageStore, FACE_CACHE_FILE};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DIMENSION: usize = 3;

fn normalize(v: [f32; 3]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

/// Mean colour embedder; files named `broken*` fail
pub struct ColorEmbedder;

impl EmbeddingProvider for ColorEmbedder {
    fn embed_image(&self, image: &DecodedImage) -> Result<Vec<f32>, EmbeddingError> {
        let broken = image
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("broken"));
        if broken {
            return Err(EmbeddingError::GenerationError("simulated failure".to_string()));
        }

        let rgb = image.pixels.to_rgb8();
        let mut sum = [0f32; 3];
        for pixel in rgb.pixels() {
            for (channel, total) in sum.iter_mut().enumerate() {
                *total += pixel[channel] as f32;
            }
        }
        if sum.iter().all(|c| *c == 0.0) {
            return Err(EmbeddingError::GenerationError("black image".to_string()));
        }
        Ok(normalize(sum))
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = [0.1f32; 3];
        for word in text.to_lowercase().split_whitespace() {
            match word {
                "red" => v[0] += 1.0,
                "green" => v[1] += 1.0,
                "blue" => v[2] += 1.0,
                _ => {}
            }
        }
        Ok(normalize(v))
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "test-color"
    }
}

/// Image tower that can be switched off; text queries always fail
pub struct SwitchableEmbedder {
    failing: AtomicBool,
}

impl SwitchableEmbedder {
    pub fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
        }
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl EmbeddingProvider for SwitchableEmbedder {
    fn embed_image(&self, image: &DecodedImage) -> Result<Vec<f32>, EmbeddingError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbeddingError::GenerationError("model crashed".to_string()));
        }
        ColorEmbedder.embed_image(image)
    }

    fn embed_text(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::InitializationError("text model offline".to_string()))
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "test-switchable"
    }
}

/// Colour embedder that hangs on files named `slow*`
pub struct SlowEmbedder(pub Duration);

impl EmbeddingProvider for SlowEmbedder {
    fn embed_image(&self, image: &DecodedImage) -> Result<Vec<f32>, EmbeddingError> {
        let slow = image
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("slow"));
        if slow {
            std::thread::sleep(self.0);
        }
        ColorEmbedder.embed_image(image)
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        ColorEmbedder.embed_text(text)
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "test-slow"
    }
}

/// Extractor that always fails
pub struct FailingOcr;

impl TextExtractor for FailingOcr {
    fn extract_text(&self, _image: &DecodedImage) -> Result<String, OcrError> {
        Err(OcrError::EngineFailed("simulated OCR crash".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Extractor that reads the same text from every image
pub struct FixedOcr(pub &'static str);

impl TextExtractor for FixedOcr {
    fn extract_text(&self, _image: &DecodedImage) -> Result<String, OcrError> {
        Ok(self.0.to_string())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Extractor that hangs before answering
pub struct SlowOcr(pub Duration);

impl TextExtractor for SlowOcr {
    fn extract_text(&self, _image: &DecodedImage) -> Result<String, OcrError> {
        std::thread::sleep(self.0);
        Ok("too late".to_string())
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Face model whose detector hangs
pub struct SlowFaceModel(pub Duration);

impl FaceModel for SlowFaceModel {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>, FaceError> {
        std::thread::sleep(self.0);
        HalvesFaceModel.detect(image)
    }

    fn embed(&self, image: &DynamicImage, face: &DetectedFace) -> Result<Vec<f32>, FaceError> {
        HalvesFaceModel.embed(image, face)
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Two faces per image, one per half; black halves have no face
pub struct HalvesFaceModel;

impl FaceModel for HalvesFaceModel {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>, FaceError> {
        let (w, h) = image.dimensions();
        let half = w / 2;
        let faces = [
            BoundingBox::new(0, 0, half, h),
            BoundingBox::new(half, 0, w - half, h),
        ];
        Ok(faces
            .into_iter()
            .filter(|bbox| {
                let p = image.get_pixel(bbox.x + bbox.width / 2, bbox.y + bbox.height / 2);
                p[0] > 0 || p[1] > 0 || p[2] > 0
            })
            .map(|bbox| DetectedFace { bbox, score: 1.0 })
            .collect())
    }

    fn embed(&self, image: &DynamicImage, face: &DetectedFace) -> Result<Vec<f32>, FaceError> {
        let b = face.bbox;
        let p = image.get_pixel(b.x + b.width / 2, b.y + b.height / 2);
        Ok(vec![p[0] as f32, p[1] as f32, p[2] as f32])
    }

    fn name(&self) -> &str {
        "halves"
    }
}

/// Solid-colour PNG
pub fn write_solid(dir: &Path, name: &str, rgb: [u8; 3]) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    RgbImage::from_pixel(32, 16, Rgb(rgb)).save(&path).unwrap();
    path
}

/// PNG whose left and right halves have different colours
pub fn write_split(dir: &Path, name: &str, left: [u8; 3], right: [u8; 3]) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    let img = RgbImage::from_fn(32, 16, |x, _| if x < 16 { Rgb(left) } else { Rgb(right) });
    img.save(&path).unwrap();
    path
}

pub fn open_store(store_dir: &Path) -> Arc<SqliteImageStore> {
    Arc::new(SqliteImageStore::open(store_dir, DIMENSION, IndexOptions::default()).unwrap())
}

pub fn face_identifier(data_dir: &Path, threshold: f32) -> Arc<FaceIdentifier> {
    face_identifier_with(data_dir, Arc::new(HalvesFaceModel), threshold)
}

pub fn face_identifier_with(
    data_dir: &Path,
    model: Arc<dyn FaceModel>,
    threshold: f32,
) -> Arc<FaceIdentifier> {
    let (identifier, _report) = FaceIdentifier::open(
        model,
        data_dir.join("known_faces"),
        data_dir.join("store").join(FACE_CACHE_FILE),
        threshold,
        1024,
    )
    .unwrap();
    Arc::new(identifier)
}

pub fn test_options() -> EngineOptions {
    EngineOptions {
        max_image_dimension: 1024,
        inference_timeout: Duration::from_secs(10),
        workers: 2,
        default_limit: 10,
        auto_person_filter: true,
    }
}

pub fn engine(
    data_dir: &Path,
    ocr: Option<Arc<dyn TextExtractor>>,
    faces: Option<Arc<FaceIdentifier>>,
) -> SearchEngine {
    engine_with(data_dir, Arc::new(ColorEmbedder), ocr, faces, test_options())
}

pub fn engine_with(
    data_dir: &Path,
    embedder: Arc<dyn EmbeddingProvider>,
    ocr: Option<Arc<dyn TextExtractor>>,
    faces: Option<Arc<FaceIdentifier>>,
    options: EngineOptions,
) -> SearchEngine {
    SearchEngine::with_components(
        EngineComponents {
            embedder,
            ocr,
            faces,
            store: open_store(&data_dir.join("store")),
        },
        options,
    )
}
