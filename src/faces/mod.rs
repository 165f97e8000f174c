//! Face detection, verification and demographic classification.
//!
//! The pipelines only see the traits in this module. The bundled
//! implementations run ONNX models through `ort`.

pub mod demography;
pub mod detector;
pub mod models;
pub mod verifier;

pub use demography::{RaceAnalysis, RaceCategory, RaceClassifier, RaceScores};
pub use detector::{DetectorBackend, UltraFaceDetector, WholeImageDetector};
pub use verifier::{DistanceMetric, EmbeddingVerifier, RecognitionModel};

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::config::ModelsConfig;

/// Pixel bounding box of a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceRegion {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub confidence: f32,
}

/// Finds faces in an image file. Zero, one or many faces are all valid results.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image_path: &Path) -> Result<Vec<FaceRegion>>;

    /// Load the detection model up front so a missing model fails the run,
    /// not every image.
    fn prepare(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyOptions {
    pub model: String,
    pub metric: DistanceMetric,
    pub detector_backend: String,
}

/// Outcome of comparing the faces in two images.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    /// Both images show the same face.
    pub verified: bool,
    pub distance: f32,
    pub threshold: f32,
    pub model: String,
    pub detector_backend: String,
    pub metric: DistanceMetric,
}

/// Decides whether two images depict the same face.
///
/// Detection is not enforced: an image without a detectable face is
/// compared as a whole.
pub trait FaceVerifier: Send + Sync {
    fn verify(&self, image_a: &Path, image_b: &Path, options: &VerifyOptions)
        -> Result<Verification>;

    /// Load the models `options` name before any comparison runs.
    fn prepare(&self, _options: &VerifyOptions) -> Result<()> {
        Ok(())
    }
}

/// Predicts a race/ethnicity distribution for the face in an image.
///
/// Detection is not enforced here either; images were already screened
/// when they were acquired.
pub trait DemographyClassifier: Send + Sync {
    fn analyze(&self, image_path: &Path, detector_backend: &str) -> Result<RaceAnalysis>;

    fn prepare(&self, _detector_backend: &str) -> Result<()> {
        Ok(())
    }
}

/// Build the detector named by `backend`.
pub fn detector_for_backend(
    backend: &str,
    ultraface: &Arc<UltraFaceDetector>,
) -> Result<Arc<dyn FaceDetector>> {
    match backend.parse::<DetectorBackend>()? {
        DetectorBackend::UltraFace => Ok(ultraface.clone()),
        DetectorBackend::Skip => Ok(Arc::new(WholeImageDetector)),
    }
}

/// The bundled model stack, sharing one detector session.
pub struct FaceModels {
    pub detector: Arc<UltraFaceDetector>,
    pub verifier: EmbeddingVerifier,
    pub classifier: RaceClassifier,
}

impl FaceModels {
    /// Models are loaded lazily on first use.
    pub fn new(config: &ModelsConfig) -> Self {
        let detector = Arc::new(UltraFaceDetector::new(config));
        Self {
            verifier: EmbeddingVerifier::new(config, detector.clone()),
            classifier: RaceClassifier::new(config, detector.clone()),
            detector,
        }
    }
}
