use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::faces::DistanceMetric;
use crate::pipeline::default_image_extensions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root folder that receives one subfolder per subject.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SafeSearch {
    Off,
    #[default]
    Moderate,
    Strict,
}

impl SafeSearch {
    /// Value of the `p` parameter DuckDuckGo expects.
    pub fn query_value(&self) -> &'static str {
        match self {
            SafeSearch::Off => "-1",
            SafeSearch::Moderate => "",
            SafeSearch::Strict => "1",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub safesearch: SafeSearch,

    /// Stop paging after this many results (unbounded when unset).
    #[serde(default)]
    pub max_results: Option<usize>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// One of these is picked at random before retrying a failed query.
    #[serde(default = "default_retry_delays_secs")]
    pub retry_delays_secs: Vec<u64>,
}

fn default_region() -> String {
    "wt-wt".to_string()
}

fn default_timeout_secs() -> u64 {
    90
}

fn default_retry_delays_secs() -> Vec<u64> {
    vec![1, 2, 3, 4, 5]
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            safesearch: SafeSearch::default(),
            max_results: None,
            timeout_secs: default_timeout_secs(),
            retry_delays_secs: default_retry_delays_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

fn default_max_bytes() -> u64 {
    20 * 1024 * 1024 // 20MB
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_bytes: default_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Where ONNX models are cached and looked up.
    #[serde(default = "default_models_dir")]
    pub dir: PathBuf,

    /// Race classifier model. Prediction is unavailable until this is set.
    #[serde(default)]
    pub race_model: Option<PathBuf>,

    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("facegather")
        .join("models")
}

fn default_intra_threads() -> usize {
    4
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: default_models_dir(),
            race_model: None,
            intra_threads: default_intra_threads(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_detector_backend")]
    pub detector_backend: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub distance_metric: DistanceMetric,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

fn default_detector_backend() -> String {
    "ultraface".to_string()
}

fn default_model() -> String {
    "ArcFace".to_string()
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            detector_backend: default_detector_backend(),
            model: default_model(),
            distance_metric: DistanceMetric::default(),
            image_extensions: default_image_extensions(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Stderr,
    Journald,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub target: LogTarget,

    /// Directory for the `file` target; defaults next to the config file.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("imagefolder")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            search: SearchConfig::default(),
            download: DownloadConfig::default(),
            models: ModelsConfig::default(),
            analysis: AnalysisConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            // Create default config
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("facegather")
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("FACEGATHER_CONFIG") {
            return PathBuf::from(path);
        }

        Self::config_dir().join("config.toml")
    }
}
