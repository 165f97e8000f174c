use std::path::Path;

use super::{default_image_extensions, discover_images, discover_subject_images};
use crate::error::{PipelineError, PipelineResult};
use crate::export::{PredictionRecord, PredictionTable, PREDICTIONS_FILE};
use crate::faces::DemographyClassifier;
use crate::subject::normalize;

/// Runs the demographic classifier over acquired subject folders.
pub struct Predictor<'a> {
    classifier: &'a dyn DemographyClassifier,
    extensions: Vec<String>,
}

impl<'a> Predictor<'a> {
    pub fn new(classifier: &'a dyn DemographyClassifier) -> Self {
        Self {
            classifier,
            extensions: default_image_extensions(),
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Predict every image in every subject folder under `root`, or only in
    /// `subject`'s folder when given.
    ///
    /// With `export_csv` the table is also written to `root/img_pred.csv`.
    pub fn predict(
        &self,
        root: &Path,
        subject: Option<&str>,
        detector_backend: &str,
        export_csv: bool,
    ) -> PipelineResult<PredictionTable> {
        let (folder, images) = match subject {
            Some(name) => {
                let folder = root.join(normalize(name));
                let images = discover_images(&folder, &self.extensions);
                (folder, images)
            }
            None => (root.to_path_buf(), discover_subject_images(root, &self.extensions)),
        };

        if images.is_empty() {
            return Err(PipelineError::NoImages { folder });
        }

        self.classifier
            .prepare(detector_backend)
            .map_err(PipelineError::ModelUnavailable)?;

        tracing::info!(folder = ?folder, images = images.len(), detector_backend, "Predicting demographics");

        let attempted = images.len();
        let records: Vec<PredictionRecord> = images
            .into_iter()
            .filter_map(|path| match self.classifier.analyze(&path, detector_backend) {
                Ok(analysis) => Some(PredictionRecord {
                    path,
                    scores: analysis.scores,
                    dominant: analysis.dominant,
                    detector: detector_backend.to_string(),
                }),
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Prediction failed, skipping image");
                    None
                }
            })
            .collect();

        if records.is_empty() {
            return Err(PipelineError::AllFailed {
                folder,
                what: "images",
                attempted,
            });
        }

        let table = PredictionTable::new(records);

        if export_csv {
            let output = root.join(PREDICTIONS_FILE);
            table.write_csv(&output)?;
            tracing::info!(path = ?output, rows = table.len(), "Predictions exported");
        }

        Ok(table)
    }
}
