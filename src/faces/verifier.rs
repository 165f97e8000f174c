use anyhow::{anyhow, Result};
use image::DynamicImage;
use ort::session::Session;
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use super::detector::{DetectorBackend, UltraFaceDetector};
use super::models::{build_session, crop_face, ensure_model, load_image, most_confident, to_nchw, to_nhwc};
use super::{FaceDetector, FaceVerifier, Verification, VerifyOptions};
use crate::config::ModelsConfig;

const ARCFACE_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx";

/// How embedding distance is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// One minus cosine similarity
    Cosine,
    Euclidean,
    /// Euclidean distance between L2-normalized embeddings
    #[default]
    EuclideanL2,
}

impl DistanceMetric {
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::EuclideanL2 => "euclidean_l2",
        }
    }

    /// Distance between two embeddings; `f32::MAX` when their sizes differ.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return f32::MAX;
        }

        match self {
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
            DistanceMetric::Euclidean => euclidean_distance(a, b),
            DistanceMetric::EuclideanL2 => euclidean_distance(&l2_normalize(a), &l2_normalize(b)),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DistanceMetric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "euclidean_l2" => Ok(DistanceMetric::EuclideanL2),
            other => Err(anyhow!("Unknown distance metric {:?}", other)),
        }
    }
}

/// Face recognition models whose ONNX exports can be used for verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecognitionModel {
    ArcFace,
    Facenet,
    Facenet512,
    OpenFace,
}

impl RecognitionModel {
    pub fn name(&self) -> &'static str {
        match self {
            RecognitionModel::ArcFace => "ArcFace",
            RecognitionModel::Facenet => "Facenet",
            RecognitionModel::Facenet512 => "Facenet512",
            RecognitionModel::OpenFace => "OpenFace",
        }
    }

    fn file_name(&self) -> &'static str {
        match self {
            RecognitionModel::ArcFace => "arcface-resnet100.onnx",
            RecognitionModel::Facenet => "facenet.onnx",
            RecognitionModel::Facenet512 => "facenet512.onnx",
            RecognitionModel::OpenFace => "openface.onnx",
        }
    }

    /// Only ArcFace has a public ONNX release to fetch.
    fn download_url(&self) -> Option<&'static str> {
        match self {
            RecognitionModel::ArcFace => Some(ARCFACE_URL),
            _ => None,
        }
    }

    fn input_size(&self) -> u32 {
        match self {
            RecognitionModel::ArcFace => 112,
            RecognitionModel::Facenet | RecognitionModel::Facenet512 => 160,
            RecognitionModel::OpenFace => 96,
        }
    }

    /// Largest distance at which two faces still count as the same person.
    pub fn threshold(&self, metric: DistanceMetric) -> f32 {
        match (self, metric) {
            (RecognitionModel::ArcFace, DistanceMetric::Cosine) => 0.68,
            (RecognitionModel::ArcFace, DistanceMetric::Euclidean) => 4.15,
            (RecognitionModel::ArcFace, DistanceMetric::EuclideanL2) => 1.13,
            (RecognitionModel::Facenet, DistanceMetric::Cosine) => 0.40,
            (RecognitionModel::Facenet, DistanceMetric::Euclidean) => 10.0,
            (RecognitionModel::Facenet, DistanceMetric::EuclideanL2) => 0.80,
            (RecognitionModel::Facenet512, DistanceMetric::Cosine) => 0.30,
            (RecognitionModel::Facenet512, DistanceMetric::Euclidean) => 23.56,
            (RecognitionModel::Facenet512, DistanceMetric::EuclideanL2) => 1.04,
            (RecognitionModel::OpenFace, DistanceMetric::Cosine) => 0.10,
            (RecognitionModel::OpenFace, DistanceMetric::Euclidean) => 0.55,
            (RecognitionModel::OpenFace, DistanceMetric::EuclideanL2) => 0.55,
        }
    }

    /// Input tensor for a face crop, in the layout the model was exported with.
    fn input_tensor(&self, face: &DynamicImage) -> Result<Tensor<f32>> {
        let size = self.input_size();
        let side = size as usize;

        let tensor = match self {
            RecognitionModel::ArcFace => {
                let data = to_nchw(face, size, |c| (c - 127.5) / 127.5);
                Tensor::from_array(([1usize, 3, side, side], data.into_boxed_slice()))?
            }
            RecognitionModel::Facenet | RecognitionModel::Facenet512 => {
                let data = standardize(to_nhwc(face, size, false, |c| c));
                Tensor::from_array(([1usize, side, side, 3], data.into_boxed_slice()))?
            }
            RecognitionModel::OpenFace => {
                let data = to_nhwc(face, size, false, |c| c / 255.0);
                Tensor::from_array(([1usize, side, side, 3], data.into_boxed_slice()))?
            }
        };

        Ok(tensor)
    }
}

impl FromStr for RecognitionModel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "arcface" => Ok(RecognitionModel::ArcFace),
            "facenet" => Ok(RecognitionModel::Facenet),
            "facenet512" => Ok(RecognitionModel::Facenet512),
            "openface" => Ok(RecognitionModel::OpenFace),
            other => Err(anyhow!("Unsupported recognition model {:?}", other)),
        }
    }
}

/// Verifies faces by embedding both images and thresholding their distance.
pub struct EmbeddingVerifier {
    detector: Arc<UltraFaceDetector>,
    models_dir: PathBuf,
    intra_threads: usize,
    sessions: Mutex<HashMap<RecognitionModel, Session>>,
}

impl EmbeddingVerifier {
    pub fn new(config: &ModelsConfig, detector: Arc<UltraFaceDetector>) -> Self {
        Self {
            detector,
            models_dir: config.dir.clone(),
            intra_threads: config.intra_threads,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Load `model`'s session unless it is already loaded.
    pub fn load_model(&self, model: RecognitionModel) -> Result<()> {
        let mut sessions = self.lock_sessions()?;
        if !sessions.contains_key(&model) {
            let model_path = ensure_model(&self.models_dir, model.file_name(), model.download_url())?;
            sessions.insert(model, build_session(&model_path, self.intra_threads)?);
        }
        Ok(())
    }

    fn lock_sessions(&self) -> Result<MutexGuard<'_, HashMap<RecognitionModel, Session>>> {
        self.sessions
            .lock()
            .map_err(|e| anyhow!("Failed to lock embedding models: {}", e))
    }

    /// Embedding of the most confident face, or of the whole image when none is found.
    pub fn embed(
        &self,
        image_path: &Path,
        model: RecognitionModel,
        backend: DetectorBackend,
    ) -> Result<Vec<f32>> {
        let img = load_image(image_path)?;
        let face = match backend {
            DetectorBackend::UltraFace => match most_confident(&self.detector.detect_in_image(&img)?) {
                Some(region) => crop_face(&img, &region),
                None => {
                    tracing::debug!(path = ?image_path, "No face found, embedding whole image");
                    img
                }
            },
            DetectorBackend::Skip => img,
        };

        let input_tensor = model.input_tensor(&face)?;

        self.load_model(model)?;
        let mut sessions = self.lock_sessions()?;
        let session = sessions
            .get_mut(&model)
            .ok_or_else(|| anyhow!("Embedding model not initialized"))?;

        let outputs = session.run(ort::inputs![input_tensor])?;
        let (_shape, embedding) = outputs[0].try_extract_tensor::<f32>()?;

        Ok(embedding.to_vec())
    }
}

impl FaceVerifier for EmbeddingVerifier {
    fn verify(&self, image_a: &Path, image_b: &Path, options: &VerifyOptions) -> Result<Verification> {
        let model: RecognitionModel = options.model.parse()?;
        let backend: DetectorBackend = options.detector_backend.parse()?;

        let embedding_a = self.embed(image_a, model, backend)?;
        let embedding_b = self.embed(image_b, model, backend)?;

        let distance = options.metric.distance(&embedding_a, &embedding_b);
        let threshold = model.threshold(options.metric);

        Ok(Verification {
            verified: distance <= threshold,
            distance,
            threshold,
            model: model.name().to_string(),
            detector_backend: backend.name().to_string(),
            metric: options.metric,
        })
    }

    fn prepare(&self, options: &VerifyOptions) -> Result<()> {
        let model: RecognitionModel = options.model.parse()?;
        if options.detector_backend.parse::<DetectorBackend>()? == DetectorBackend::UltraFace {
            self.detector.prepare()?;
        }
        self.load_model(model)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// Per-image whitening used by the Facenet family.
fn standardize(data: Vec<f32>) -> Vec<f32> {
    let n = data.len().max(1) as f32;
    let mean = data.iter().sum::<f32>() / n;
    let std = (data.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n).sqrt();
    let std = std.max(1.0 / n.sqrt());
    data.into_iter().map(|x| (x - mean) / std).collect()
}
