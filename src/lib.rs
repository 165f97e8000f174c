//! Collect face images of a named person from web image search, keep only
//! single-face, non-duplicate images, and predict demographics for them.

pub mod config;
pub mod download;
pub mod error;
pub mod export;
pub mod faces;
pub mod logging;
pub mod pipeline;
pub mod search;
pub mod subject;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{DownloadError, PipelineError, PipelineResult, SearchError};
pub use subject::Subject;
