//! Web image search.

pub mod duckduckgo;

pub use duckduckgo::DuckDuckGoSearch;

use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// One candidate returned by an image search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResult {
    pub thumbnail: String,
    pub image: String,
    #[serde(default)]
    pub title: String,
    /// Page the image was found on.
    #[serde(default)]
    pub url: String,
}

/// Lazily produced, finite sequence of results in ranking order.
pub type SearchResults<'a> = Box<dyn Iterator<Item = ImageResult> + 'a>;

/// Provider of image search results.
///
/// A failed query cannot be resumed; callers reissue [`ImageSearch::search`]
/// from scratch.
pub trait ImageSearch: Send + Sync {
    fn search(&self, query: &str) -> Result<SearchResults<'_>, SearchError>;

    /// Provider name for logs
    fn provider_name(&self) -> &'static str;
}
