//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::services::analysis::{AnalysisConfig, AnalysisMode};
use crate::services::clustering::KMeansParams;
use crate::services::inferencer::{InferenceConfig, StationOrdering};
use crate::services::segmenter::SegmentConfig;
use anyhow::Context;
use chrono::TimeDelta;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceSection {
    #[serde(default = "default_k_min")]
    pub k_min: usize,
    #[serde(default = "default_k_max")]
    pub k_max: usize,
    #[serde(default = "default_restarts")]
    pub restarts: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_radius_percentile")]
    pub radius_percentile: f64,
    /// 0 scores every point
    #[serde(default = "default_silhouette_sample_size")]
    pub silhouette_sample_size: usize,
    /// Soft threshold, warns only
    #[serde(default)]
    pub min_quality: Option<f64>,
    #[serde(default)]
    pub ordering: StationOrdering,
}

fn default_k_min() -> usize {
    3
}

fn default_k_max() -> usize {
    9
}

fn default_restarts() -> usize {
    10
}

fn default_max_iterations() -> usize {
    300
}

fn default_tolerance() -> f64 {
    1e-4
}

fn default_seed() -> u64 {
    42
}

fn default_radius_percentile() -> f64 {
    75.0
}

fn default_silhouette_sample_size() -> usize {
    2000
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            k_min: default_k_min(),
            k_max: default_k_max(),
            restarts: default_restarts(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            seed: default_seed(),
            radius_percentile: default_radius_percentile(),
            silhouette_sample_size: default_silhouette_sample_size(),
            min_quality: None,
            ordering: StationOrdering::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationSection {
    #[serde(default = "default_min_dwell_secs")]
    pub min_dwell_secs: f64,
}

fn default_min_dwell_secs() -> f64 {
    30.0
}

impl Default for SegmentationSection {
    fn default() -> Self {
        Self { min_dwell_secs: default_min_dwell_secs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisSection {
    #[serde(default)]
    pub mode: AnalysisMode,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

fn default_parallel() -> bool {
    true
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self { mode: AnalysisMode::default(), parallel: default_parallel() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSection {
    /// Directory for stations.json and reports.jsonl
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

fn default_output_dir() -> String {
    "output".to_string()
}

impl Default for OutputSection {
    fn default() -> Self {
        Self { dir: default_output_dir() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub inference: InferenceSection,
    #[serde(default)]
    pub segmentation: SegmentationSection,
    #[serde(default)]
    pub analysis: AnalysisSection,
    #[serde(default)]
    pub output: OutputSection,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    k_min: usize,
    k_max: usize,
    restarts: usize,
    max_iterations: usize,
    tolerance: f64,
    seed: u64,
    radius_percentile: f64,
    silhouette_sample_size: usize,
    min_quality: Option<f64>,
    ordering: StationOrdering,
    min_dwell_secs: f64,
    mode: AnalysisMode,
    parallel: bool,
    output_dir: PathBuf,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let TomlConfig { inference, segmentation, analysis, output } = toml_config;
        Self {
            k_min: inference.k_min,
            k_max: inference.k_max,
            restarts: inference.restarts,
            max_iterations: inference.max_iterations,
            tolerance: inference.tolerance,
            seed: inference.seed,
            radius_percentile: inference.radius_percentile,
            silhouette_sample_size: inference.silhouette_sample_size,
            min_quality: inference.min_quality,
            ordering: inference.ordering,
            min_dwell_secs: segmentation.min_dwell_secs,
            mode: analysis.mode,
            parallel: analysis.parallel,
            output_dir: PathBuf::from(output.dir),
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, path.display().to_string());
        config.validate().with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration - tries the TOML file, falls back to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Resolve the path from args/env, then load it
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(Self::resolve_config_path(args))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.k_min > self.k_max {
            anyhow::bail!("k_min {} is greater than k_max {}", self.k_min, self.k_max);
        }
        if !self.min_dwell_secs.is_finite() || self.min_dwell_secs < 0.0 {
            anyhow::bail!("min_dwell_secs must be a non-negative number, got {}", self.min_dwell_secs);
        }
        self.inference_config().validate()?;
        Ok(())
    }

    /// Inference policy built from the [inference] section
    pub fn inference_config(&self) -> InferenceConfig {
        InferenceConfig {
            k_candidates: (self.k_min..=self.k_max).collect(),
            kmeans: KMeansParams {
                restarts: self.restarts,
                max_iterations: self.max_iterations,
                tolerance: self.tolerance,
                seed: self.seed,
            },
            radius_percentile: self.radius_percentile,
            silhouette_sample_size: self.silhouette_sample_size,
            min_quality: self.min_quality,
            ordering: self.ordering,
        }
    }

    pub fn segment_config(&self) -> SegmentConfig {
        SegmentConfig { min_dwell: self.min_dwell() }
    }

    pub fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            inference: self.inference_config(),
            segmentation: self.segment_config(),
            mode: self.mode,
            parallel: self.parallel,
        }
    }

    /// Override the analysis mode (command line takes precedence)
    pub fn with_mode(mut self, mode: AnalysisMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn k_min(&self) -> usize {
        self.k_min
    }

    pub fn k_max(&self) -> usize {
        self.k_max
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn radius_percentile(&self) -> f64 {
        self.radius_percentile
    }

    pub fn ordering(&self) -> StationOrdering {
        self.ordering
    }

    pub fn min_dwell(&self) -> TimeDelta {
        TimeDelta::milliseconds((self.min_dwell_secs * 1000.0).round() as i64)
    }

    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    pub fn parallel(&self) -> bool {
        self.parallel
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
