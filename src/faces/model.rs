//! Face detector + recognizer models
//!
//! Production models are ONNX graphs run through `ort`:
//! - detector: UltraFace RFB-320 (1x3x240x320 in, `scores` [1,N,2] and
//!   `boxes` [1,N,4] normalised corners out)
//! - recognizer: ArcFace-style 112x112 crop in, 512-d embedding out

use super::FaceError;
use anyhow::{anyhow, Context};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::Array4;
use once_cell::sync::OnceCell;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};

const DETECTOR_WIDTH: u32 = 320;
const DETECTOR_HEIGHT: u32 = 240;
const RECOGNIZER_SIZE: u32 = 112;
const NMS_IOU: f32 = 0.3;
/// Crop margin around the detected box, as a fraction of its size
const CROP_MARGIN: f32 = 0.1;

/// Axis-aligned face box in pixel coordinates of the analysed image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Intersection over union
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }
        let intersection = (x2 - x1) as f32 * (y2 - y1) as f32;
        let union = self.area() as f32 + other.area() as f32 - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    /// Detector confidence, 0.0 - 1.0
    pub score: f32,
}

impl DetectedFace {
    /// Pseudo-detection covering the whole frame
    pub fn whole(width: u32, height: u32) -> Self {
        Self {
            bbox: BoundingBox::new(0, 0, width, height),
            score: 0.0,
        }
    }
}

/// Detector and recognizer pair
///
/// Implementations must be usable from several worker threads at once.
pub trait FaceModel: Send + Sync {
    /// Locate faces; an empty vector is a valid answer
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>, FaceError>;

    /// Identity embedding for one detected face
    fn embed(&self, image: &DynamicImage, face: &DetectedFace) -> Result<Vec<f32>, FaceError>;

    /// Model identifier, used to invalidate cached gallery embeddings
    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct OnnxFaceModelOptions {
    pub detector_path: PathBuf,
    pub recognizer_path: PathBuf,
    /// Minimum detector score for a box to count as a face
    pub detection_threshold: f32,
    pub intra_threads: usize,
}

/// ONNX Runtime backed face model
///
/// Sessions are created on first use, so an engine can start (and index
/// without faces) when the model files are missing.
pub struct OnnxFaceModel {
    options: OnnxFaceModelOptions,
    name: String,
    detector: OnceCell<Session>,
    recognizer: OnceCell<Session>,
}

impl OnnxFaceModel {
    pub fn new(options: OnnxFaceModelOptions) -> Self {
        let name = format!(
            "onnx:{}+{}",
            file_stem(&options.detector_path),
            file_stem(&options.recognizer_path)
        );
        Self {
            options,
            name,
            detector: OnceCell::new(),
            recognizer: OnceCell::new(),
        }
    }

    /// Fail early if either model file is missing
    pub fn check_available(&self) -> Result<(), FaceError> {
        for path in [&self.options.detector_path, &self.options.recognizer_path] {
            if !path.is_file() {
                return Err(FaceError::ModelUnavailable(format!(
                    "model file not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    fn detector(&self) -> Result<&Session, FaceError> {
        self.detector
            .get_or_try_init(|| self.load_session(&self.options.detector_path))
    }

    fn recognizer(&self) -> Result<&Session, FaceError> {
        self.recognizer
            .get_or_try_init(|| self.load_session(&self.options.recognizer_path))
    }

    fn load_session(&self, path: &Path) -> Result<Session, FaceError> {
        if !path.is_file() {
            return Err(FaceError::ModelUnavailable(format!(
                "model file not found: {}",
                path.display()
            )));
        }
        tracing::info!("Loading face model: {}", path.display());

        let build = || -> anyhow::Result<Session> {
            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(self.options.intra_threads.max(1))?
                .commit_from_file(path)?;
            Ok(session)
        };
        build().map_err(|e| FaceError::ModelUnavailable(format!("{}: {:#}", path.display(), e)))
    }

    fn run_detector(&self, image: &DynamicImage) -> anyhow::Result<Vec<DetectedFace>> {
        let session = self.detector().map_err(|e| anyhow!(e))?;
        let (width, height) = image.dimensions();

        let resized = image
            .resize_exact(DETECTOR_WIDTH, DETECTOR_HEIGHT, FilterType::Triangle)
            .to_rgb8();
        let input = Array4::from_shape_fn(
            (1, 3, DETECTOR_HEIGHT as usize, DETECTOR_WIDTH as usize),
            |(_, c, y, x)| (resized.get_pixel(x as u32, y as u32)[c] as f32 - 127.0) / 128.0,
        );

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .context("detector has no inputs")?;
        let scores_name = output_name(session, 0)?;
        let boxes_name = output_name(session, 1)?;

        let outputs = session.run(ort::inputs![input_name => Tensor::from_array(input)?]?)?;
        let scores = outputs[scores_name.as_str()].try_extract_tensor::<f32>()?;
        let boxes = outputs[boxes_name.as_str()].try_extract_tensor::<f32>()?;

        let scores = scores.to_shape((scores.len() / 2, 2))?.to_owned();
        let boxes = boxes.to_shape((boxes.len() / 4, 4))?.to_owned();

        let mut candidates = Vec::new();
        for (score_row, box_row) in scores.outer_iter().zip(boxes.outer_iter()) {
            let score = score_row[1];
            if score < self.options.detection_threshold {
                continue;
            }
            if let Some(bbox) = to_pixels(
                [box_row[0], box_row[1], box_row[2], box_row[3]],
                width,
                height,
            ) {
                candidates.push(DetectedFace { bbox, score });
            }
        }

        Ok(non_max_suppression(candidates, NMS_IOU))
    }

    fn run_recognizer(
        &self,
        image: &DynamicImage,
        face: &DetectedFace,
    ) -> anyhow::Result<Vec<f32>> {
        let session = self.recognizer().map_err(|e| anyhow!(e))?;
        let crop = crop_face(image, &face.bbox)
            .resize_exact(RECOGNIZER_SIZE, RECOGNIZER_SIZE, FilterType::Triangle)
            .to_rgb8();

        let size = RECOGNIZER_SIZE as usize;
        let input = Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            (crop.get_pixel(x as u32, y as u32)[c] as f32 - 127.5) / 127.5
        });

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .context("recognizer has no inputs")?;
        let output = output_name(session, 0)?;

        let outputs = session.run(ort::inputs![input_name => Tensor::from_array(input)?]?)?;
        let embedding = outputs[output.as_str()].try_extract_tensor::<f32>()?;

        let mut embedding: Vec<f32> = embedding.iter().copied().collect();
        if embedding.is_empty() {
            return Err(anyhow!("recognizer produced an empty embedding"));
        }
        crate::embedding::l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

impl FaceModel for OnnxFaceModel {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>, FaceError> {
        // Surface a missing model as such rather than as an inference error
        self.detector()?;
        self.run_detector(image)
            .map_err(|e| FaceError::Inference(format!("detection: {:#}", e)))
    }

    fn embed(&self, image: &DynamicImage, face: &DetectedFace) -> Result<Vec<f32>, FaceError> {
        self.recognizer()?;
        self.run_recognizer(image, face)
            .map_err(|e| FaceError::Inference(format!("recognition: {:#}", e)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn output_name(session: &Session, index: usize) -> anyhow::Result<String> {
    session
        .outputs
        .get(index)
        .map(|o| o.name.clone())
        .with_context(|| format!("model has no output #{}", index))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("model")
        .to_string()
}

/// Convert normalised corners to a clamped pixel box; degenerate boxes are dropped
fn to_pixels(corners: [f32; 4], width: u32, height: u32) -> Option<BoundingBox> {
    let clamp = |v: f32| v.clamp(0.0, 1.0);
    let x1 = (clamp(corners[0]) * width as f32).round() as u32;
    let y1 = (clamp(corners[1]) * height as f32).round() as u32;
    let x2 = (clamp(corners[2]) * width as f32).round() as u32;
    let y2 = (clamp(corners[3]) * height as f32).round() as u32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(BoundingBox::new(x1, y1, x2 - x1, y2 - y1))
}

/// Greedy NMS: keep the highest-scoring box, drop everything overlapping it
pub(crate) fn non_max_suppression(
    mut faces: Vec<DetectedFace>,
    iou_threshold: f32,
) -> Vec<DetectedFace> {
    faces.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<DetectedFace> = Vec::new();
    for face in faces {
        if kept.iter().all(|k| k.bbox.iou(&face.bbox) <= iou_threshold) {
            kept.push(face);
        }
    }
    kept
}

/// Crop the box plus a small margin, clamped to the frame
fn crop_face(image: &DynamicImage, bbox: &BoundingBox) -> DynamicImage {
    let (width, height) = image.dimensions();
    let margin_x = (bbox.width as f32 * CROP_MARGIN) as u32;
    let margin_y = (bbox.height as f32 * CROP_MARGIN) as u32;

    let x = bbox.x.saturating_sub(margin_x).min(width.saturating_sub(1));
    let y = bbox.y.saturating_sub(margin_y).min(height.saturating_sub(1));
    let right = (bbox.x + bbox.width + margin_x).min(width);
    let bottom = (bbox.y + bbox.height + margin_y).min(height);

    image.crop_imm(x, y, right.saturating_sub(x).max(1), bottom.saturating_sub(y).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn face(x: u32, y: u32, w: u32, h: u32, score: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox::new(x, y, w, h),
            score,
        }
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0, 0, 10, 10);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&BoundingBox::new(20, 20, 5, 5)), 0.0);

        let half = BoundingBox::new(5, 0, 10, 10);
        // 50 overlap / 150 union
        assert!((a.iou(&half) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let faces = vec![
            face(0, 0, 100, 100, 0.8),
            face(5, 5, 100, 100, 0.95),
            face(300, 300, 50, 50, 0.9),
        ];
        let kept = non_max_suppression(faces, NMS_IOU);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.95);
        assert_eq!(kept[1].bbox.x, 300);
    }

    #[test]
    fn test_to_pixels_clamps_and_drops_degenerate() {
        let bbox = to_pixels([-0.1, 0.25, 0.5, 1.2], 200, 100).unwrap();
        assert_eq!(bbox, BoundingBox::new(0, 25, 100, 75));
        assert!(to_pixels([0.5, 0.5, 0.5, 0.9], 200, 100).is_none());
    }

    #[test]
    fn test_crop_stays_inside_frame() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 40, Rgb([1, 2, 3])));
        let crop = crop_face(&img, &BoundingBox::new(40, 30, 20, 20));
        assert!(crop.width() >= 1 && crop.width() <= 50);
        assert!(crop.height() >= 1 && crop.height() <= 40);
    }

    #[test]
    fn test_missing_model_file_is_unavailable() {
        let model = OnnxFaceModel::new(OnnxFaceModelOptions {
            detector_path: PathBuf::from("/nonexistent/detector.onnx"),
            recognizer_path: PathBuf::from("/nonexistent/recognizer.onnx"),
            detection_threshold: 0.7,
            intra_threads: 1,
        });
        assert!(matches!(model.check_available(), Err(FaceError::ModelUnavailable(_))));

        let img = DynamicImage::ImageRgb8(RgbImage::new(32, 32));
        assert!(matches!(model.detect(&img), Err(FaceError::ModelUnavailable(_))));
        assert_eq!(model.name(), "onnx:detector+recognizer");
    }

    #[test]
    #[ignore] // Requires ONNX face models in ~/.photofind/models - run with: cargo test -- --ignored
    fn test_blank_image_has_no_faces() {
        let models = dirs::home_dir().unwrap().join(".photofind/models");
        let model = OnnxFaceModel::new(OnnxFaceModelOptions {
            detector_path: models.join("face_detector.onnx"),
            recognizer_path: models.join("face_recognizer.onnx"),
            detection_threshold: 0.7,
            intra_threads: 1,
        });
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(640, 480, Rgb([255, 255, 255])));
        assert!(model.detect(&img).unwrap().is_empty());
    }
}
