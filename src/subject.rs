use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};

/// A named person whose images are collected into one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    name: String,
}

impl Subject {
    pub fn new(name: &str) -> PipelineResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PipelineError::InvalidSubject);
        }
        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Text sent to the image search provider.
    pub fn query(&self) -> String {
        self.name.to_lowercase()
    }

    /// Lowercased, spaces replaced by underscores.
    pub fn folder_name(&self) -> String {
        normalize(&self.name)
    }

    pub fn folder(&self, root: &Path) -> PathBuf {
        root.join(self.folder_name())
    }

    /// Path of the `index`-th candidate file inside `folder`.
    pub fn image_path(&self, folder: &Path, index: usize) -> PathBuf {
        folder.join(format!("{}_{}.jpg", self.folder_name(), index))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}
