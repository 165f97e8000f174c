use std::path::PathBuf;
use thiserror::Error;

/// Failure of an image search query.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Http(String),

    #[error("could not obtain search token for query {query:?}")]
    MissingToken { query: String },

    #[error("malformed search response: {0}")]
    Malformed(String),
}

/// Failure of a single download.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("response from {url} was empty")]
    Empty { url: String },

    #[error("response from {url} exceeded {limit} bytes")]
    TooLarge { url: String, limit: u64 },

    #[error("incomplete write to {path:?}: expected {expected} bytes, found {found}")]
    Incomplete {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the acquisition, prediction and integrity pipelines.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("subject name must not be empty")]
    InvalidSubject,

    #[error("image search failed after {attempts} attempts: {source}")]
    SearchFailed {
        attempts: usize,
        #[source]
        source: SearchError,
    },

    #[error("no images found in {folder:?}")]
    NoImages { folder: PathBuf },

    #[error("face model unavailable: {0:#}")]
    ModelUnavailable(anyhow::Error),

    /// Every item failed on its own, so there is nothing to report.
    #[error("all {attempted} {what} in {folder:?} failed")]
    AllFailed {
        folder: PathBuf,
        what: &'static str,
        attempted: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
