use anyhow::{anyhow, Result};
use ort::session::Session;
use ort::value::Tensor;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use super::detector::{DetectorBackend, UltraFaceDetector};
use super::models::{build_session, crop_face, load_image, most_confident, to_nhwc};
use super::{DemographyClassifier, FaceDetector};
use crate::config::ModelsConfig;

const RACE_INPUT_SIZE: u32 = 224;

/// Race/ethnicity categories, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RaceCategory {
    Asian,
    Indian,
    Black,
    White,
    MiddleEastern,
    LatinoHispanic,
}

impl RaceCategory {
    pub const ALL: [RaceCategory; 6] = [
        RaceCategory::Asian,
        RaceCategory::Indian,
        RaceCategory::Black,
        RaceCategory::White,
        RaceCategory::MiddleEastern,
        RaceCategory::LatinoHispanic,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RaceCategory::Asian => "asian",
            RaceCategory::Indian => "indian",
            RaceCategory::Black => "black",
            RaceCategory::White => "white",
            RaceCategory::MiddleEastern => "middle eastern",
            RaceCategory::LatinoHispanic => "latino hispanic",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for RaceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Percentage score (0-100) per category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RaceScores([f32; 6]);

impl RaceScores {
    pub fn new(scores: [f32; 6]) -> Self {
        Self(scores)
    }

    /// Build percentages from raw model output, applying softmax when the
    /// output is not already a probability distribution.
    pub fn from_model_output(raw: &[f32]) -> Result<Self> {
        let raw: [f32; 6] = raw
            .try_into()
            .map_err(|_| anyhow!("Expected 6 race scores, got {}", raw.len()))?;

        let sum: f32 = raw.iter().sum();
        let is_distribution = raw.iter().all(|p| (0.0..=1.0).contains(p)) && (sum - 1.0).abs() < 1e-3;
        let probabilities = if is_distribution { raw } else { softmax(raw) };

        Ok(Self(probabilities.map(|p| p * 100.0)))
    }

    pub fn get(&self, category: RaceCategory) -> f32 {
        self.0[category.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (RaceCategory, f32)> + '_ {
        RaceCategory::ALL.iter().map(|c| (*c, self.get(*c)))
    }

    /// Highest scoring category; the first one listed wins ties.
    pub fn dominant(&self) -> RaceCategory {
        let mut best = RaceCategory::ALL[0];
        for category in RaceCategory::ALL {
            if self.get(category) > self.get(best) {
                best = category;
            }
        }
        best
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaceAnalysis {
    pub scores: RaceScores,
    pub dominant: RaceCategory,
}

impl RaceAnalysis {
    pub fn from_scores(scores: RaceScores) -> Self {
        Self {
            dominant: scores.dominant(),
            scores,
        }
    }
}

/// Race classifier over a VGG-Face style ONNX export.
///
/// Input is a 224x224 BGR crop scaled to [0, 1] in NHWC layout; output is
/// six class scores in [`RaceCategory::ALL`] order.
pub struct RaceClassifier {
    detector: Arc<UltraFaceDetector>,
    model_path: Option<PathBuf>,
    intra_threads: usize,
    session: OnceLock<Mutex<Session>>,
}

impl RaceClassifier {
    pub fn new(config: &ModelsConfig, detector: Arc<UltraFaceDetector>) -> Self {
        Self {
            detector,
            model_path: config.race_model.clone(),
            intra_threads: config.intra_threads,
            session: OnceLock::new(),
        }
    }

    fn session(&self) -> Result<&Mutex<Session>> {
        if let Some(session) = self.session.get() {
            return Ok(session);
        }

        let model_path = self
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("No race model configured (set models.race_model)"))?;
        if !model_path.exists() {
            return Err(anyhow!("Race model {:?} not found", model_path));
        }

        let session = build_session(model_path, self.intra_threads)?;
        let _ = self.session.set(Mutex::new(session));

        self.session
            .get()
            .ok_or_else(|| anyhow!("Race model not initialized"))
    }
}

impl DemographyClassifier for RaceClassifier {
    fn analyze(&self, image_path: &Path, detector_backend: &str) -> Result<RaceAnalysis> {
        let backend: DetectorBackend = detector_backend.parse()?;
        let img = load_image(image_path)?;

        let face = match backend {
            DetectorBackend::UltraFace => match most_confident(&self.detector.detect_in_image(&img)?) {
                Some(region) => crop_face(&img, &region),
                None => img,
            },
            DetectorBackend::Skip => img,
        };

        let side = RACE_INPUT_SIZE as usize;
        let data = to_nhwc(&face, RACE_INPUT_SIZE, true, |c| c / 255.0);
        let input_tensor = Tensor::from_array(([1usize, side, side, 3], data.into_boxed_slice()))?;

        let mut session = self
            .session()?
            .lock()
            .map_err(|e| anyhow!("Failed to lock race model: {}", e))?;

        let outputs = session.run(ort::inputs![input_tensor])?;
        let (_shape, raw) = outputs[0].try_extract_tensor::<f32>()?;

        let scores = RaceScores::from_model_output(raw)?;
        Ok(RaceAnalysis::from_scores(scores))
    }

    fn prepare(&self, detector_backend: &str) -> Result<()> {
        if detector_backend.parse::<DetectorBackend>()? == DetectorBackend::UltraFace {
            self.detector.prepare()?;
        }
        self.session().map(|_| ())
    }
}

fn softmax(logits: [f32; 6]) -> [f32; 6] {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps = logits.map(|x| (x - max).exp());
    let sum: f32 = exps.iter().sum();
    exps.map(|e| e / sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(race_model: Option<PathBuf>) -> RaceClassifier {
        let config = ModelsConfig {
            race_model,
            ..ModelsConfig::default()
        };
        RaceClassifier::new(&config, Arc::new(UltraFaceDetector::new(&config)))
    }

    #[test]
    fn test_prepare_requires_configured_model() {
        let err = classifier(None).prepare("skip").unwrap_err();
        assert!(err.to_string().contains("models.race_model"));

        let dir = tempfile::tempdir().unwrap();
        let err = classifier(Some(dir.path().join("race.onnx")))
            .prepare("skip")
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_probabilities_become_percentages() {
        let scores = RaceScores::from_model_output(&[0.1, 0.05, 0.05, 0.6, 0.1, 0.1]).unwrap();
        assert!((scores.get(RaceCategory::White) - 60.0).abs() < 1e-3);
        assert_eq!(scores.dominant(), RaceCategory::White);
    }

    #[test]
    fn test_logits_are_softmaxed() {
        let scores = RaceScores::from_model_output(&[0.0, 0.0, 5.0, 0.0, 0.0, 0.0]).unwrap();
        let total: f32 = scores.iter().map(|(_, s)| s).sum();
        assert!((total - 100.0).abs() < 1e-2);
        assert_eq!(scores.dominant(), RaceCategory::Black);
    }

    #[test]
    fn test_wrong_output_size() {
        assert!(RaceScores::from_model_output(&[0.5, 0.5]).is_err());
    }

    #[test]
    fn test_dominant_tie_prefers_first() {
        let scores = RaceScores::new([10.0, 40.0, 40.0, 10.0, 0.0, 0.0]);
        assert_eq!(RaceAnalysis::from_scores(scores).dominant, RaceCategory::Indian);
    }

    #[test]
    fn test_labels() {
        let labels: Vec<&str> = RaceCategory::ALL.iter().map(|c| c.label()).collect();
        assert_eq!(
            labels,
            vec!["asian", "indian", "black", "white", "middle eastern", "latino hispanic"]
        );
    }
}
