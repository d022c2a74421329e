use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{Result, TunerError};
use crate::grid::ParameterRange;

/// Resampling filter used when the target is resized onto the processed image grid
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    /// Bilinear (default)
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl Default for ResizeFilter {
    fn default() -> Self {
        ResizeFilter::Triangle
    }
}

/// Regression model used as the metric surrogate
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SurrogateKind {
    /// CART regression tree (default)
    DecisionTree,
    /// Mean of the k nearest observed tuples
    NearestNeighbors { k: usize },
}

impl Default for SurrogateKind {
    fn default() -> Self {
        SurrogateKind::DecisionTree
    }
}

/// Which tuples the best-point selector ranks
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionScope {
    /// Only tuples present in the observation table
    Observed,
    /// Every grid point, including points whose evaluation failed
    Grid,
}

impl Default for SelectionScope {
    fn default() -> Self {
        SelectionScope::Observed
    }
}

/// What happens when a single grid point fails to evaluate
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the whole run on the first failure
    Abort,
    /// Record the failure and continue with the next point
    Skip,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Abort
    }
}

/// The four per-parameter search ranges
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GridConfig {
    #[serde(default = "default_brightness_range")]
    pub brightness: ParameterRange<i32>,
    #[serde(default = "default_contrast_range")]
    pub contrast: ParameterRange<f64>,
    #[serde(default = "default_threshold_range")]
    pub threshold: ParameterRange<i32>,
    #[serde(default = "default_morph_size_range")]
    pub morph_size: ParameterRange<i32>,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            brightness: default_brightness_range(),
            contrast: default_contrast_range(),
            threshold: default_threshold_range(),
            morph_size: default_morph_size_range(),
        }
    }
}

/// Settings for the PSNR/SSIM comparison
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SimilaritySettings {
    #[serde(default = "default_data_range")]
    pub data_range: f64,
    #[serde(default)]
    pub resize_filter: ResizeFilter,
}

impl Default for SimilaritySettings {
    fn default() -> Self {
        SimilaritySettings {
            data_range: default_data_range(),
            resize_filter: ResizeFilter::default(),
        }
    }
}

impl SimilaritySettings {
    /// Get filter type based on configuration
    pub fn get_filter_type(&self) -> FilterType {
        match self.resize_filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Surrogate model selection and hyperparameters
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SurrogateConfig {
    #[serde(default)]
    pub kind: SurrogateKind,
    /// Maximum tree depth, unlimited when absent
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: usize,
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,
    /// Value substituted for infinite PSNR before fitting, raised above the
    /// largest finite PSNR of the run when that exceeds it
    #[serde(default = "default_psnr_cap")]
    pub psnr_cap: f64,
}

impl Default for SurrogateConfig {
    fn default() -> Self {
        SurrogateConfig {
            kind: SurrogateKind::default(),
            max_depth: None,
            min_samples_split: default_min_samples_split(),
            min_samples_leaf: default_min_samples_leaf(),
            psnr_cap: default_psnr_cap(),
        }
    }
}

/// Application configuration structure that matches config.json
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    // Directory paths
    #[serde(default = "default_input_directory")]
    pub input_directory: String,
    #[serde(default = "default_target_image")]
    pub target_image: String,
    #[serde(default = "default_output_directory")]
    pub output_directory: String,
    #[serde(default = "default_supported_formats")]
    pub supported_formats: Vec<String>,

    // Search space and scoring
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub similarity: SimilaritySettings,
    #[serde(default)]
    pub surrogate: SurrogateConfig,
    #[serde(default)]
    pub selection_scope: SelectionScope,
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    // Optional stages and outputs
    #[serde(default)]
    pub invert_source: bool,
    #[serde(default = "default_save_best_images")]
    pub save_best_images: bool,

    // Threading
    #[serde(default)]
    pub use_multi_threading: bool,
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,

    // General settings
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default functions for parameters
fn default_input_directory() -> String {
    "input".to_string()
}

fn default_target_image() -> String {
    "target/target.png".to_string()
}

fn default_output_directory() -> String {
    "output".to_string()
}

fn default_supported_formats() -> Vec<String> {
    vec![
        "jpg".to_string(),
        "jpeg".to_string(),
        "png".to_string(),
        "bmp".to_string(),
        "tif".to_string(),
        "tiff".to_string(),
        "webp".to_string(),
    ]
}

fn default_brightness_range() -> ParameterRange<i32> {
    ParameterRange::new(-100, 100, 10)
}

fn default_contrast_range() -> ParameterRange<f64> {
    ParameterRange::new(1.0, 2.1, 0.5)
}

fn default_threshold_range() -> ParameterRange<i32> {
    ParameterRange::new(50, 200, 10)
}

fn default_morph_size_range() -> ParameterRange<i32> {
    ParameterRange::new(1, 10, 2)
}

fn default_data_range() -> f64 {
    1.0
}

fn default_min_samples_split() -> usize {
    2
}

fn default_min_samples_leaf() -> usize {
    1
}

fn default_psnr_cap() -> f64 {
    100.0
}

fn default_save_best_images() -> bool {
    true
}

fn default_thread_count() -> usize {
    // Default to the number of logical cores, but at least 2
    std::thread::available_parallelism().map(|p| p.get()).unwrap_or(2)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_directory: default_input_directory(),
            target_image: default_target_image(),
            output_directory: default_output_directory(),
            supported_formats: default_supported_formats(),
            grid: GridConfig::default(),
            similarity: SimilaritySettings::default(),
            surrogate: SurrogateConfig::default(),
            selection_scope: SelectionScope::default(),
            failure_policy: FailurePolicy::default(),
            invert_source: false,
            save_best_images: default_save_best_images(),
            use_multi_threading: false,
            thread_count: default_thread_count(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_json::from_reader(reader)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Get source directory
    pub fn get_source_dir(&self) -> PathBuf {
        PathBuf::from(&self.input_directory)
    }

    /// Get target image path
    pub fn get_target_path(&self) -> PathBuf {
        PathBuf::from(&self.target_image)
    }

    /// Get output directory
    pub fn get_output_dir(&self) -> PathBuf {
        PathBuf::from(&self.output_directory)
    }

    /// Check if a file extension is supported
    pub fn is_supported_format(&self, extension: &str) -> bool {
        self.supported_formats
            .iter()
            .any(|format| format.eq_ignore_ascii_case(extension))
    }

    /// Reject settings that can never produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if !(self.similarity.data_range.is_finite() && self.similarity.data_range > 0.0) {
            return Err(TunerError::invalid(
                "data_range",
                self.similarity.data_range,
                "must be a positive finite number",
            ));
        }
        if !self.surrogate.psnr_cap.is_finite() {
            return Err(TunerError::invalid("psnr_cap", self.surrogate.psnr_cap, "must be finite"));
        }
        if self.supported_formats.is_empty() {
            return Err(TunerError::invalid("supported_formats", "[]", "at least one format is required"));
        }
        if self.surrogate.min_samples_split < 2 {
            return Err(TunerError::invalid(
                "min_samples_split",
                self.surrogate.min_samples_split,
                "must be at least 2",
            ));
        }
        if self.surrogate.min_samples_leaf < 1 {
            return Err(TunerError::invalid(
                "min_samples_leaf",
                self.surrogate.min_samples_leaf,
                "must be at least 1",
            ));
        }
        if let SurrogateKind::NearestNeighbors { k } = self.surrogate.kind {
            if k == 0 {
                return Err(TunerError::invalid("k", k, "must be at least 1"));
            }
        }
        if self.use_multi_threading && self.thread_count == 0 {
            return Err(TunerError::invalid("thread_count", 0, "must be at least 1"));
        }
        Ok(())
    }
}

/// Load the configuration, creating a default one if it doesn't exist
pub fn load_config() -> Result<Config> {
    load_config_from("config.json")
}

/// Same as [`load_config`] with an explicit path
pub fn load_config_from<P: AsRef<Path>>(config_path: P) -> Result<Config> {
    let config_path = config_path.as_ref();

    if !config_path.exists() {
        let default_config = Config::default();
        default_config.save_to_file(config_path)?;
        println!("Created default configuration file: {}", config_path.display());
    }

    let mut config = Config::from_file(config_path)?;

    // Validate and apply post-load logic
    if config.log_level.is_empty() {
        config.log_level = default_log_level();
    }
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let json = r#"{ "input_directory": "frames", "failure_policy": "skip" }"#;
        let config: Config = serde_json::from_str(json).expect("partial config should parse");

        assert_eq!(config.input_directory, "frames");
        assert_eq!(config.failure_policy, FailurePolicy::Skip);
        assert_eq!(config.grid, GridConfig::default());
        assert_eq!(config.similarity.data_range, 1.0);
        assert_eq!(config.surrogate.kind, SurrogateKind::DecisionTree);
        assert_eq!(config.selection_scope, SelectionScope::Observed);
        assert!(!config.invert_source);
    }

    #[test]
    fn test_nearest_neighbors_kind_parses() {
        let json = r#"{ "surrogate": { "kind": { "nearest_neighbors": { "k": 3 } } } }"#;
        let config: Config = serde_json::from_str(json).expect("surrogate kind should parse");
        assert_eq!(config.surrogate.kind, SurrogateKind::NearestNeighbors { k: 3 });
    }

    #[test]
    fn test_load_config_creates_default_file() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("config.json");

        let config = load_config_from(&path).expect("default config should load");
        assert!(path.exists());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.grid.threshold, ParameterRange::new(50, 200, 10));

        let reloaded = Config::from_file(&path).expect("saved config should reload");
        assert_eq!(reloaded.grid, config.grid);
    }

    #[test]
    fn test_validate_rejects_bad_data_range() {
        let mut config = Config::default();
        config.similarity.data_range = 0.0;
        assert!(matches!(
            config.validate(),
            Err(TunerError::InvalidParameter { name: "data_range", .. })
        ));
    }

    #[test]
    fn test_supported_format_is_case_insensitive() {
        let config = Config::default();
        assert!(config.is_supported_format("PNG"));
        assert!(config.is_supported_format("jpeg"));
        assert!(!config.is_supported_format("txt"));
    }

    #[test]
    fn test_filter_type_mapping() {
        let mut settings = SimilaritySettings::default();
        assert_eq!(settings.get_filter_type(), FilterType::Triangle);
        settings.resize_filter = ResizeFilter::Lanczos3;
        assert_eq!(settings.get_filter_type(), FilterType::Lanczos3);
    }
}
