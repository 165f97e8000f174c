use std::path::Path;

use super::{default_image_extensions, discover_images};
use crate::error::{PipelineError, PipelineResult};
use crate::export::{DuplicatePairRecord, FaceCountRecord, IntegrityReport};
use crate::faces::{DistanceMetric, FaceDetector, FaceVerifier, VerifyOptions};

/// Audits a folder: faces per image and every pairwise duplicate check.
pub struct IntegrityChecker<'a> {
    detector: &'a dyn FaceDetector,
    verifier: &'a dyn FaceVerifier,
    extensions: Vec<String>,
}

impl<'a> IntegrityChecker<'a> {
    pub fn new(detector: &'a dyn FaceDetector, verifier: &'a dyn FaceVerifier) -> Self {
        Self {
            detector,
            verifier,
            extensions: default_image_extensions(),
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn check(
        &self,
        folder: &Path,
        detector_backend: &str,
        metric: DistanceMetric,
        model: &str,
    ) -> PipelineResult<IntegrityReport> {
        let images = discover_images(folder, &self.extensions);
        if images.is_empty() {
            return Err(PipelineError::NoImages {
                folder: folder.to_path_buf(),
            });
        }

        let options = VerifyOptions {
            model: model.to_string(),
            metric,
            detector_backend: detector_backend.to_string(),
        };

        self.detector.prepare().map_err(PipelineError::ModelUnavailable)?;
        self.verifier
            .prepare(&options)
            .map_err(PipelineError::ModelUnavailable)?;

        let pairs = images.len() * (images.len() - 1) / 2;
        tracing::info!(
            folder = ?folder,
            images = images.len(),
            pairs,
            "Checking image set"
        );

        let mut face_counts = Vec::with_capacity(images.len());
        for image in &images {
            match self.detector.detect(image) {
                Ok(faces) => face_counts.push(FaceCountRecord {
                    image: image.clone(),
                    n_faces: faces.len(),
                }),
                Err(e) => tracing::warn!(path = ?image, error = %e, "Face detection failed"),
            }
        }

        if face_counts.is_empty() {
            return Err(PipelineError::AllFailed {
                folder: folder.to_path_buf(),
                what: "images",
                attempted: images.len(),
            });
        }

        let mut duplicate_pairs = Vec::new();
        for (i, image1) in images.iter().enumerate() {
            for image2 in &images[i + 1..] {
                match self.verifier.verify(image1, image2, &options) {
                    Ok(verification) => duplicate_pairs.push(DuplicatePairRecord {
                        image1: image1.clone(),
                        image2: image2.clone(),
                        dupe: verification.verified,
                        distance: verification.distance,
                        model: verification.model,
                        detector: verification.detector_backend,
                    }),
                    Err(e) => tracing::warn!(
                        image1 = ?image1,
                        image2 = ?image2,
                        error = %e,
                        "Verification failed"
                    ),
                }
            }
        }

        if pairs > 0 && duplicate_pairs.is_empty() {
            return Err(PipelineError::AllFailed {
                folder: folder.to_path_buf(),
                what: "image pairs",
                attempted: pairs,
            });
        }

        let report = IntegrityReport {
            face_counts,
            duplicate_pairs,
        };

        tracing::info!(
            irregular = report.irregular().count(),
            duplicates = report.duplicates().count(),
            "Check finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{payload, MissingModelVerifier, StubDetector, StubVerifier};
    use std::collections::HashSet;
    use std::fs;
    use tempfile::tempdir;

    fn write(folder: &Path, name: &str, person: &str, faces: usize) {
        fs::write(folder.join(name), payload(person, faces)).unwrap();
    }

    #[test]
    fn test_pair_count_and_findings() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.jpg", "jane", 1);
        write(dir.path(), "b.jpeg", "jane", 1);
        write(dir.path(), "c.png", "crowd", 3);
        write(dir.path(), "d.jpg", "john", 0);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let report = IntegrityChecker::new(&StubDetector, &StubVerifier)
            .check(dir.path(), "opencv", DistanceMetric::EuclideanL2, "OpenFace")
            .unwrap();

        assert_eq!(report.face_counts.len(), 4);
        assert_eq!(report.duplicate_pairs.len(), 4 * 3 / 2);

        let unique: HashSet<_> = report
            .duplicate_pairs
            .iter()
            .map(|p| (p.image1.clone(), p.image2.clone()))
            .collect();
        assert_eq!(unique.len(), 6);
        assert!(report.duplicate_pairs.iter().all(|p| p.image1 != p.image2));

        let dupes: Vec<_> = report.duplicates().collect();
        assert_eq!(dupes.len(), 1);
        assert_eq!(dupes[0].image1, dir.path().join("a.jpg"));
        assert_eq!(dupes[0].image2, dir.path().join("b.jpeg"));
        assert_eq!(dupes[0].model, "OpenFace");
        assert_eq!(dupes[0].detector, "opencv");

        let irregular: Vec<usize> = report.irregular().map(|r| r.n_faces).collect();
        assert_eq!(irregular, vec![3, 0]);
    }

    #[test]
    fn test_single_image_has_no_pairs() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.jpg", "jane", 1);

        let report = IntegrityChecker::new(&StubDetector, &StubVerifier)
            .check(dir.path(), "opencv", DistanceMetric::Cosine, "ArcFace")
            .unwrap();

        assert_eq!(report.face_counts.len(), 1);
        assert!(report.duplicate_pairs.is_empty());
    }

    #[test]
    fn test_missing_model_is_reported() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.jpg", "jane", 1);
        write(dir.path(), "b.jpg", "john", 1);
        write(dir.path(), "c.jpg", "mary", 1);

        let err = IntegrityChecker::new(&StubDetector, &MissingModelVerifier)
            .check(dir.path(), "opencv", DistanceMetric::EuclideanL2, "Facenet")
            .unwrap_err();

        assert!(matches!(err, PipelineError::ModelUnavailable(_)));
        assert!(err.to_string().contains("facenet.onnx"));
    }

    #[test]
    fn test_every_image_failing_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), "garbage").unwrap();
        fs::write(dir.path().join("b.jpg"), "garbage").unwrap();

        let err = IntegrityChecker::new(&StubDetector, &StubVerifier)
            .check(dir.path(), "opencv", DistanceMetric::Cosine, "ArcFace")
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::AllFailed { what: "images", attempted: 2, .. }
        ));
    }

    #[test]
    fn test_empty_folder_is_reported() {
        let dir = tempdir().unwrap();
        let err = IntegrityChecker::new(&StubDetector, &StubVerifier)
            .check(dir.path(), "opencv", DistanceMetric::Cosine, "ArcFace")
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoImages { .. }));
    }
}
