use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::Session;
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};

use super::models::{build_session, ensure_model, load_image};
use super::{FaceDetector, FaceRegion};
use crate::config::ModelsConfig;

const ULTRAFACE_FILE: &str = "ultraface-320.onnx";
const ULTRAFACE_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx";

/// Detector backends understood by the bundled models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorBackend {
    UltraFace,
    /// No detection; the whole image is treated as the face.
    Skip,
}

impl DetectorBackend {
    pub fn name(&self) -> &'static str {
        match self {
            DetectorBackend::UltraFace => "ultraface",
            DetectorBackend::Skip => "skip",
        }
    }
}

impl FromStr for DetectorBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ultraface" => Ok(DetectorBackend::UltraFace),
            "skip" => Ok(DetectorBackend::Skip),
            other => Err(anyhow!(
                "Unsupported detector backend {:?} (expected ultraface or skip)",
                other
            )),
        }
    }
}

/// UltraFace RFB-320 detector, lightweight and fast.
pub struct UltraFaceDetector {
    models_dir: PathBuf,
    intra_threads: usize,
    session: OnceLock<Mutex<Session>>,
}

impl UltraFaceDetector {
    pub fn new(config: &ModelsConfig) -> Self {
        Self {
            models_dir: config.dir.clone(),
            intra_threads: config.intra_threads,
            session: OnceLock::new(),
        }
    }

    fn session(&self) -> Result<&Mutex<Session>> {
        if let Some(session) = self.session.get() {
            return Ok(session);
        }

        let model_path = ensure_model(&self.models_dir, ULTRAFACE_FILE, Some(ULTRAFACE_URL))?;
        let session = build_session(&model_path, self.intra_threads)?;
        let _ = self.session.set(Mutex::new(session));

        self.session
            .get()
            .ok_or_else(|| anyhow!("Detection model not initialized"))
    }

    /// Detect faces in an already decoded image.
    pub fn detect_in_image(&self, img: &DynamicImage) -> Result<Vec<FaceRegion>> {
        let mut session = self
            .session()?
            .lock()
            .map_err(|e| anyhow!("Failed to lock detection model: {}", e))?;

        let faces = run_ultraface_detection(&mut session, img)?;
        Ok(faces
            .into_iter()
            .filter(|face| face.width > 0 && face.height > 0)
            .collect())
    }
}

impl FaceDetector for UltraFaceDetector {
    fn detect(&self, image_path: &Path) -> Result<Vec<FaceRegion>> {
        let img = load_image(image_path)?;
        self.detect_in_image(&img)
    }

    fn prepare(&self) -> Result<()> {
        self.session().map(|_| ())
    }
}

/// Reports the whole image as a single face.
pub struct WholeImageDetector;

impl FaceDetector for WholeImageDetector {
    fn detect(&self, image_path: &Path) -> Result<Vec<FaceRegion>> {
        let (width, height) = load_image(image_path)?.dimensions();
        Ok(vec![FaceRegion {
            x: 0,
            y: 0,
            width: width as i32,
            height: height as i32,
            confidence: 1.0,
        }])
    }
}

/// Run UltraFace detection model
fn run_ultraface_detection(session: &mut Session, img: &DynamicImage) -> Result<Vec<FaceRegion>> {
    const INPUT_WIDTH: u32 = 320;
    const INPUT_HEIGHT: u32 = 240;
    const CONFIDENCE_THRESHOLD: f32 = 0.7;
    const NMS_THRESHOLD: f32 = 0.3;

    let (orig_width, orig_height) = img.dimensions();

    let resized = img.resize_exact(INPUT_WIDTH, INPUT_HEIGHT, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    // NCHW, (pixel - 127) / 128
    let plane = (INPUT_HEIGHT * INPUT_WIDTH) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];
    for (idx, pixel) in rgb.pixels().enumerate() {
        input_data[idx] = (pixel[0] as f32 - 127.0) / 128.0;
        input_data[plane + idx] = (pixel[1] as f32 - 127.0) / 128.0;
        input_data[2 * plane + idx] = (pixel[2] as f32 - 127.0) / 128.0;
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize],
        input_data.into_boxed_slice(),
    ))?;

    let outputs = session.run(ort::inputs!["input" => input_tensor])?;

    let scores_value = outputs.get("scores").ok_or_else(|| anyhow!("No scores output"))?;
    let boxes_value = outputs.get("boxes").ok_or_else(|| anyhow!("No boxes output"))?;

    let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>()?;
    let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>()?;

    // scores: [1, anchors, 2] (background, face); boxes: [1, anchors, 4] normalized corners
    let num_anchors = scores_shape[1] as usize;
    let mut faces = Vec::new();

    for i in 0..num_anchors {
        let confidence = scores_data[i * 2 + 1];
        if confidence <= CONFIDENCE_THRESHOLD {
            continue;
        }

        let x1 = (boxes_data[i * 4] * orig_width as f32) as i32;
        let y1 = (boxes_data[i * 4 + 1] * orig_height as f32) as i32;
        let x2 = (boxes_data[i * 4 + 2] * orig_width as f32) as i32;
        let y2 = (boxes_data[i * 4 + 3] * orig_height as f32) as i32;

        faces.push(FaceRegion {
            x: x1.max(0),
            y: y1.max(0),
            width: (x2 - x1).max(1),
            height: (y2 - y1).max(1),
            confidence,
        });
    }

    Ok(nms(faces, NMS_THRESHOLD))
}

/// Non-maximum suppression to remove overlapping detections
fn nms(mut faces: Vec<FaceRegion>, threshold: f32) -> Vec<FaceRegion> {
    faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceRegion> = Vec::new();
    for face in faces {
        if keep.iter().all(|kept| compute_iou(kept, &face) <= threshold) {
            keep.push(face);
        }
    }
    keep
}

/// Intersection over Union between two regions
fn compute_iou(a: &FaceRegion, b: &FaceRegion) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = ((x2 - x1).max(0) as i64 * (y2 - y1).max(0) as i64) as f32;
    let area_a = (a.width as i64 * a.height as i64) as f32;
    let area_b = (b.width as i64 * b.height as i64) as f32;
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
