use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView, ImageReader};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::{Path, PathBuf};

use super::FaceRegion;

/// Locate a model file, downloading it first when a URL is known.
pub fn ensure_model(models_dir: &Path, filename: &str, url: Option<&str>) -> Result<PathBuf> {
    std::fs::create_dir_all(models_dir)?;
    let model_path = models_dir.join(filename);

    if model_path.exists() {
        return Ok(model_path);
    }

    let url = url.ok_or_else(|| {
        anyhow!(
            "Model file {:?} not found; place the ONNX export there",
            model_path
        )
    })?;

    tracing::info!(model = %filename, "Downloading model...");
    let response = ureq::get(url)
        .call()
        .map_err(|e| anyhow!("Failed to download model: {}", e))?;

    // Download next to the target so a partial file is never mistaken for a model
    let partial = model_path.with_extension("part");
    let mut file = std::fs::File::create(&partial)?;
    std::io::copy(&mut response.into_reader(), &mut file)?;
    file.sync_all()?;
    std::fs::rename(&partial, &model_path)?;

    tracing::info!(model = %filename, path = ?model_path, "Model downloaded");
    Ok(model_path)
}

pub fn build_session(model_path: &Path, intra_threads: usize) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .commit_from_file(model_path)?;

    tracing::debug!(path = ?model_path, "Loaded ONNX session");
    Ok(session)
}

/// Decode an image, trusting its content over its extension.
///
/// Downloaded files are always stored as `.jpg` even when the server sent
/// PNG or WebP.
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| anyhow!("Failed to load image {:?}: {}", path, e))
}

/// Crop face region from image with 20% padding on every side.
pub fn crop_face(img: &DynamicImage, region: &FaceRegion) -> DynamicImage {
    let (img_width, img_height) = img.dimensions();
    let padding_x = (region.width as f32 * 0.2) as i32;
    let padding_y = (region.height as f32 * 0.2) as i32;

    let x = ((region.x - padding_x).max(0) as u32).min(img_width.saturating_sub(1));
    let y = ((region.y - padding_y).max(0) as u32).min(img_height.saturating_sub(1));
    let w = ((region.width + padding_x * 2).max(1) as u32).min(img_width - x);
    let h = ((region.height + padding_y * 2).max(1) as u32).min(img_height - y);

    img.crop_imm(x, y, w.max(1), h.max(1))
}

pub fn most_confident(regions: &[FaceRegion]) -> Option<FaceRegion> {
    regions
        .iter()
        .copied()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

/// Flatten an RGB image into a normalized NHWC buffer.
pub fn to_nhwc(img: &DynamicImage, size: u32, bgr: bool, normalize: impl Fn(f32) -> f32) -> Vec<f32> {
    let resized = img.resize_exact(size, size, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let mut data = Vec::with_capacity((3 * size * size) as usize);
    for pixel in rgb.pixels() {
        let [r, g, b] = pixel.0;
        let channels = if bgr { [b, g, r] } else { [r, g, b] };
        data.extend(channels.iter().map(|&c| normalize(c as f32)));
    }
    data
}

/// Flatten an RGB image into a normalized NCHW buffer.
pub fn to_nchw(img: &DynamicImage, size: u32, normalize: impl Fn(f32) -> f32) -> Vec<f32> {
    let resized = img.resize_exact(size, size, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();
    let plane = (size * size) as usize;

    let mut data = vec![0.0f32; 3 * plane];
    for (idx, pixel) in rgb.pixels().enumerate() {
        data[idx] = normalize(pixel[0] as f32);
        data[plane + idx] = normalize(pixel[1] as f32);
        data[2 * plane + idx] = normalize(pixel[2] as f32);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn region(x: i32, y: i32, w: i32, h: i32, confidence: f32) -> FaceRegion {
        FaceRegion { x, y, width: w, height: h, confidence }
    }

    #[test]
    fn test_crop_face_clamps_to_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(100, 80));
        let crop = crop_face(&img, &region(80, 60, 40, 40, 0.9));
        let (w, h) = crop.dimensions();
        assert!(w >= 1 && w <= 100);
        assert!(h >= 1 && h <= 80);
    }

    #[test]
    fn test_most_confident() {
        let regions = [region(0, 0, 5, 5, 0.75), region(1, 1, 5, 5, 0.95), region(2, 2, 5, 5, 0.8)];
        assert_eq!(most_confident(&regions).unwrap().x, 1);
        assert!(most_confident(&[]).is_none());
    }

    #[test]
    fn test_tensor_layouts() {
        let mut rgb = RgbImage::new(2, 2);
        for p in rgb.pixels_mut() {
            *p = Rgb([10, 20, 30]);
        }
        let img = DynamicImage::ImageRgb8(rgb);

        let nhwc = to_nhwc(&img, 2, true, |c| c);
        assert_eq!(&nhwc[..3], &[30.0, 20.0, 10.0]);

        let nchw = to_nchw(&img, 2, |c| c);
        assert_eq!(nchw.len(), 12);
        assert_eq!(nchw[0], 10.0);
        assert_eq!(nchw[4], 20.0);
        assert_eq!(nchw[8], 30.0);
    }

    #[test]
    fn test_load_image_ignores_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("really_a_png.jpg");
        DynamicImage::ImageRgb8(RgbImage::new(4, 3))
            .save_with_format(&path, image::ImageFormat::Png)
            .unwrap();

        let img = load_image(&path).unwrap();
        assert_eq!(img.dimensions(), (4, 3));
    }

    #[test]
    fn test_missing_model_without_url() {
        let dir = tempdir().unwrap();
        let err = ensure_model(dir.path(), "facenet.onnx", None).unwrap_err();
        assert!(err.to_string().contains("facenet.onnx"));
    }
}
