//! Acquisition, prediction and integrity-check pipelines.

pub mod acquire;
pub mod check;
pub mod predict;

pub use acquire::{Acquisition, AcquisitionReport, CandidateOutcome, RejectionCounts};
pub use check::IntegrityChecker;
pub use predict::Predictor;

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Raster formats scanned when no extension list is configured.
pub fn default_image_extensions() -> Vec<String> {
    vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()]
}

/// Images directly inside `directory`, sorted by path.
pub fn discover_images(directory: &Path, extensions: &[String]) -> Vec<PathBuf> {
    discover_at_depth(directory, 1, extensions)
}

/// Images inside each immediate subdirectory of `root`, sorted by path.
pub fn discover_subject_images(root: &Path, extensions: &[String]) -> Vec<PathBuf> {
    discover_at_depth(root, 2, extensions)
}

fn discover_at_depth(directory: &Path, depth: usize, extensions: &[String]) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(directory)
        .follow_links(false)
        .min_depth(depth)
        .max_depth(depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| has_extension(path, extensions))
        .collect();

    // Sort by path for consistent ordering
    images.sort();
    images
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| extensions.iter().any(|e| e.to_lowercase() == ext))
}
