use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::PipelineResult;
use crate::faces::{RaceCategory, RaceScores};

/// File name of the prediction export, written in the scanned root folder.
pub const PREDICTIONS_FILE: &str = "img_pred.csv";
pub const FACE_COUNTS_FILE: &str = "img_nface.csv";
pub const DUPLICATES_FILE: &str = "img_dupes.csv";

/// Demographic prediction for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub path: PathBuf,
    pub scores: RaceScores,
    pub dominant: RaceCategory,
    pub detector: String,
}

/// Predictions for one run, in scan order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionTable {
    pub records: Vec<PredictionRecord>,
}

impl PredictionTable {
    pub fn new(records: Vec<PredictionRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the table as CSV, replacing any previous file.
    pub fn write_csv(&self, output_path: &Path) -> PipelineResult<()> {
        let mut wtr = csv::Writer::from_path(output_path)?;

        let mut headers: Vec<&str> = RaceCategory::ALL.iter().map(|c| c.label()).collect();
        headers.extend(["dominant_race", "fn", "detector"]);
        wtr.write_record(&headers)?;

        for record in &self.records {
            let mut row: Vec<String> = record.scores.iter().map(|(_, s)| s.to_string()).collect();
            row.push(record.dominant.label().to_string());
            row.push(record.path.display().to_string());
            row.push(record.detector.clone());
            wtr.write_record(&row)?;
        }

        wtr.flush()?;
        Ok(())
    }
}

/// Number of faces found in one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceCountRecord {
    pub image: PathBuf,
    pub n_faces: usize,
}

/// Verification outcome for one unordered pair of images.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicatePairRecord {
    pub image1: PathBuf,
    pub image2: PathBuf,
    pub dupe: bool,
    pub distance: f32,
    pub model: String,
    pub detector: String,
}

/// Face counts and pairwise duplicate findings for one folder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrityReport {
    pub face_counts: Vec<FaceCountRecord>,
    pub duplicate_pairs: Vec<DuplicatePairRecord>,
}

impl IntegrityReport {
    pub fn duplicates(&self) -> impl Iterator<Item = &DuplicatePairRecord> {
        self.duplicate_pairs.iter().filter(|pair| pair.dupe)
    }

    /// Images whose face count is anything other than one.
    pub fn irregular(&self) -> impl Iterator<Item = &FaceCountRecord> {
        self.face_counts.iter().filter(|record| record.n_faces != 1)
    }

    /// Write both tables into `folder`.
    pub fn write_csv(&self, folder: &Path) -> PipelineResult<()> {
        write_rows(&folder.join(FACE_COUNTS_FILE), &self.face_counts)?;
        write_rows(&folder.join(DUPLICATES_FILE), &self.duplicate_pairs)?;
        Ok(())
    }
}

fn write_rows<T: Serialize>(output_path: &Path, rows: &[T]) -> PipelineResult<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_prediction_csv_layout() {
        let dir = tempdir().unwrap();
        let output = dir.path().join(PREDICTIONS_FILE);
        let scores = RaceScores::new([5.0, 5.0, 10.0, 70.0, 5.0, 5.0]);

        let table = PredictionTable::new(vec![PredictionRecord {
            path: PathBuf::from("/tmp/out/jane_doe/jane_doe_0.jpg"),
            scores,
            dominant: scores.dominant(),
            detector: "opencv".to_string(),
        }]);
        table.write_csv(&output).unwrap();

        let mut rdr = csv::Reader::from_path(&output).unwrap();
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec![
                "asian",
                "indian",
                "black",
                "white",
                "middle eastern",
                "latino hispanic",
                "dominant_race",
                "fn",
                "detector"
            ]
        );

        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][3], "70");
        assert_eq!(&rows[0][6], "white");
        assert_eq!(&rows[0][7], "/tmp/out/jane_doe/jane_doe_0.jpg");
        assert_eq!(&rows[0][8], "opencv");
    }

    #[test]
    fn test_integrity_csv() {
        let dir = tempdir().unwrap();
        let report = IntegrityReport {
            face_counts: vec![
                FaceCountRecord { image: PathBuf::from("a.jpg"), n_faces: 1 },
                FaceCountRecord { image: PathBuf::from("b.jpg"), n_faces: 2 },
            ],
            duplicate_pairs: vec![DuplicatePairRecord {
                image1: PathBuf::from("a.jpg"),
                image2: PathBuf::from("b.jpg"),
                dupe: true,
                distance: 0.25,
                model: "ArcFace".to_string(),
                detector: "ultraface".to_string(),
            }],
        };
        report.write_csv(dir.path()).unwrap();

        assert_eq!(report.irregular().count(), 1);
        assert_eq!(report.duplicates().count(), 1);

        let dupes = std::fs::read_to_string(dir.path().join(DUPLICATES_FILE)).unwrap();
        let mut lines = dupes.lines();
        assert_eq!(lines.next(), Some("image1,image2,dupe,distance,model,detector"));
        assert_eq!(lines.next(), Some("a.jpg,b.jpg,true,0.25,ArcFace,ultraface"));

        let counts = std::fs::read_to_string(dir.path().join(FACE_COUNTS_FILE)).unwrap();
        assert!(counts.starts_with("image,n_faces\n"));
    }
}
