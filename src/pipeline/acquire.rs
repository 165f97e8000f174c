use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::download::Fetcher;
use crate::error::{DownloadError, PipelineError, PipelineResult};
use crate::faces::{FaceDetector, FaceVerifier, VerifyOptions};
use crate::search::{ImageResult, ImageSearch, SearchResults};
use crate::subject::Subject;

/// What happened to one search candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateOutcome {
    Accepted,
    DownloadFailed(String),
    NoFace,
    MultipleFaces(usize),
    /// Same face as an image already accepted for this subject.
    Duplicate { of: PathBuf, distance: f32 },
    DetectionFailed(String),
    VerificationFailed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RejectionCounts {
    pub download_failed: usize,
    pub no_face: usize,
    pub multiple_faces: usize,
    pub duplicate: usize,
    pub detection_failed: usize,
    pub verification_failed: usize,
}

impl RejectionCounts {
    fn record(&mut self, outcome: &CandidateOutcome) {
        match outcome {
            CandidateOutcome::Accepted => {}
            CandidateOutcome::DownloadFailed(_) => self.download_failed += 1,
            CandidateOutcome::NoFace => self.no_face += 1,
            CandidateOutcome::MultipleFaces(_) => self.multiple_faces += 1,
            CandidateOutcome::Duplicate { .. } => self.duplicate += 1,
            CandidateOutcome::DetectionFailed(_) => self.detection_failed += 1,
            CandidateOutcome::VerificationFailed(_) => self.verification_failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.download_failed
            + self.no_face
            + self.multiple_faces
            + self.duplicate
            + self.detection_failed
            + self.verification_failed
    }
}

/// Summary of one acquisition run.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionReport {
    pub subject: String,
    pub folder: PathBuf,
    /// Candidates considered, including rejected ones.
    pub attempted: usize,
    pub accepted: Vec<PathBuf>,
    pub rejected: RejectionCounts,
    /// Search results ran out before the target was reached.
    pub exhausted: bool,
}

/// Builds a deduplicated, single-face image set for a subject from web search results.
pub struct Acquisition<'a> {
    search: &'a dyn ImageSearch,
    fetcher: &'a dyn Fetcher,
    detector: &'a dyn FaceDetector,
    verifier: &'a dyn FaceVerifier,
    verify_options: VerifyOptions,
    retry_delays: Vec<Duration>,
}

impl<'a> Acquisition<'a> {
    pub fn new(
        search: &'a dyn ImageSearch,
        fetcher: &'a dyn Fetcher,
        detector: &'a dyn FaceDetector,
        verifier: &'a dyn FaceVerifier,
        verify_options: VerifyOptions,
    ) -> Self {
        Self {
            search,
            fetcher,
            detector,
            verifier,
            verify_options,
            retry_delays: (1..=5).map(Duration::from_secs).collect(),
        }
    }

    /// Delays to pick from at random before retrying a failed search.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Collect up to `target_count` images of `subject_name` under `root`.
    ///
    /// The subject folder is emptied first. Stops when the target is reached
    /// or the search results run out.
    pub fn run(
        &self,
        subject_name: &str,
        target_count: usize,
        root: &Path,
    ) -> PipelineResult<AcquisitionReport> {
        let subject = Subject::new(subject_name)?;
        let folder = subject.folder(root);

        self.detector.prepare().map_err(PipelineError::ModelUnavailable)?;
        self.verifier
            .prepare(&self.verify_options)
            .map_err(PipelineError::ModelUnavailable)?;

        reset_folder(&folder)?;

        tracing::info!(subject = %subject, folder = ?folder, target_count, "Starting acquisition");

        let mut candidates = self.search_with_retry(&subject.query())?;
        let mut accepted: Vec<PathBuf> = Vec::new();
        let mut rejected = RejectionCounts::default();
        let mut attempted = 0;
        let mut exhausted = false;

        while accepted.len() < target_count {
            let Some(candidate) = candidates.next() else {
                exhausted = true;
                break;
            };

            let path = subject.image_path(&folder, attempted);
            attempted += 1;

            let outcome = self.consider(&candidate, &path, &accepted);
            tracing::debug!(candidate = attempted, path = ?path, outcome = ?outcome, "Candidate considered");

            if outcome == CandidateOutcome::Accepted {
                accepted.push(path);
            } else {
                discard(&path)?;
                rejected.record(&outcome);
            }
        }

        if exhausted {
            tracing::warn!(
                subject = %subject,
                accepted = accepted.len(),
                target_count,
                "Search results exhausted before target was reached"
            );
        }

        tracing::info!(
            subject = %subject,
            attempted,
            accepted = accepted.len(),
            rejected = rejected.total(),
            "Acquisition finished"
        );

        Ok(AcquisitionReport {
            subject: subject.name().to_string(),
            folder,
            attempted,
            accepted,
            rejected,
            exhausted,
        })
    }

    /// Run each subject independently; one subject failing does not stop the rest.
    pub fn run_all<S: AsRef<str>>(
        &self,
        subject_names: &[S],
        target_count: usize,
        root: &Path,
    ) -> Vec<(String, PipelineResult<AcquisitionReport>)> {
        subject_names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                let result = self.run(name, target_count, root);
                if let Err(e) = &result {
                    tracing::error!(subject = name, error = %e, "Acquisition aborted");
                }
                (name.to_string(), result)
            })
            .collect()
    }

    /// Query once, and once more after a random delay if that fails.
    fn search_with_retry(&self, query: &str) -> PipelineResult<SearchResults<'a>> {
        match self.search.search(query) {
            Ok(results) => Ok(results),
            Err(first) => {
                let delay = self
                    .retry_delays
                    .choose(&mut rand::thread_rng())
                    .copied()
                    .unwrap_or_default();

                tracing::warn!(
                    query,
                    provider = self.search.provider_name(),
                    error = %first,
                    delay_secs = delay.as_secs_f32(),
                    "Image search failed, retrying"
                );
                std::thread::sleep(delay);

                self.search
                    .search(query)
                    .map_err(|source| PipelineError::SearchFailed { attempts: 2, source })
            }
        }
    }

    fn consider(&self, candidate: &ImageResult, path: &Path, accepted: &[PathBuf]) -> CandidateOutcome {
        if let Err(e) = self.download(candidate, path) {
            return CandidateOutcome::DownloadFailed(e.to_string());
        }

        let faces = match self.detector.detect(path) {
            Ok(faces) => faces,
            Err(e) => return CandidateOutcome::DetectionFailed(e.to_string()),
        };

        match faces.len() {
            0 => return CandidateOutcome::NoFace,
            1 => {}
            n => return CandidateOutcome::MultipleFaces(n),
        }

        for previous in accepted {
            match self.verifier.verify(path, previous, &self.verify_options) {
                Ok(verification) if verification.verified => {
                    return CandidateOutcome::Duplicate {
                        of: previous.clone(),
                        distance: verification.distance,
                    };
                }
                Ok(_) => {}
                Err(e) => return CandidateOutcome::VerificationFailed(e.to_string()),
            }
        }

        CandidateOutcome::Accepted
    }

    /// Thumbnail first, full-size image as fallback.
    fn download(&self, candidate: &ImageResult, path: &Path) -> Result<u64, DownloadError> {
        let mut last_error = DownloadError::Empty {
            url: candidate.image.clone(),
        };

        for url in [&candidate.thumbnail, &candidate.image] {
            if url.is_empty() {
                continue;
            }
            match self.fetcher.fetch(url, path) {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "Download failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

fn reset_folder(folder: &Path) -> std::io::Result<()> {
    if folder.exists() {
        std::fs::remove_dir_all(folder)?;
    }
    std::fs::create_dir_all(folder)
}

fn discard(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
