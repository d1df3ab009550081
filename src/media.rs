//! Image decoding and the downscaled working copy shared by the perception steps

use crate::error::{PhotofindError, Result};
use image::{DynamicImage, GenericImageView};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File extensions picked up when indexing a directory
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "gif", "tif", "tiff"];

/// A decoded image plus the path it was read from
///
/// `pixels` is already bounded by the configured maximum dimension; the
/// original file stays on disk for backends that prefer to read it
/// themselves.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub path: PathBuf,
    pub pixels: Arc<DynamicImage>,
    /// Dimensions of the file before any downscaling
    pub original_size: (u32, u32),
}

impl DecodedImage {
    /// Decode `path` and downscale it so neither side exceeds `max_dimension`
    pub fn open(path: &Path, max_dimension: u32) -> Result<Self> {
        let img = image::open(path).map_err(|e| PhotofindError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_image(path.to_path_buf(), img, max_dimension))
    }

    /// Wrap an in-memory image
    pub fn from_image(path: PathBuf, img: DynamicImage, max_dimension: u32) -> Self {
        let original_size = img.dimensions();
        let pixels = fit_within(img, max_dimension);
        Self {
            path,
            pixels: Arc::new(pixels),
            original_size,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Downscale preserving aspect ratio; smaller images are returned untouched
pub fn fit_within(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w.max(h) <= max_dimension {
        return img;
    }
    img.thumbnail(max_dimension, max_dimension)
}

/// Whether a path carries one of the supported image extensions
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Collect image files under `root` (or `root` itself if it is a file),
/// sorted for a stable processing order
pub fn collect_images(root: &Path, limit: Option<usize>) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(PhotofindError::InvalidInput(format!(
            "Path does not exist: {}",
            root.display()
        )));
    }

    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut images = Vec::new();
    for entry in walkdir::WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable directory entry: {}", e);
                continue;
            }
        };
        if entry.file_type().is_file() && is_image_path(entry.path()) {
            images.push(entry.into_path());
        }
    }
    images.sort();

    if let Some(limit) = limit {
        images.truncate(limit);
    }
    Ok(images)
}

/// Absolute form of a path without requiring it to exist
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| PhotofindError::io(e, "Failed to resolve current directory"))?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn test_fit_within_downscales_long_side() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(2000, 1000));
        let fitted = fit_within(img, 1024);
        assert_eq!(fitted.width(), 1024);
        assert_eq!(fitted.height(), 512);
    }

    #[test]
    fn test_fit_within_keeps_small_images() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(300, 200));
        let fitted = fit_within(img, 1024);
        assert_eq!((fitted.width(), fitted.height()), (300, 200));
    }

    #[test]
    fn test_open_reports_decode_failure() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let result = DecodedImage::open(&path, 1024);
        assert!(matches!(result, Err(PhotofindError::Decode { .. })));
    }

    #[test]
    fn test_collect_images_filters_and_sorts() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("2024");
        std::fs::create_dir_all(&nested).unwrap();

        RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]))
            .save(nested.join("b.png"))
            .unwrap();
        std::fs::rename(nested.join("b.png"), nested.join("b.PNG")).unwrap();
        RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]))
            .save(temp.path().join("a.png"))
            .unwrap();
        std::fs::write(temp.path().join("notes.txt"), "skip me").unwrap();

        let images = collect_images(temp.path(), None).unwrap();
        assert_eq!(images.len(), 2);
        assert!(images[0].ends_with("2024/b.PNG"));
        assert!(images[1].ends_with("a.png"));

        let limited = collect_images(temp.path(), Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }
}
