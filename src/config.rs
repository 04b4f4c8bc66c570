//! Pipeline configuration.
//!
//! Every stage receives its settings explicitly; nothing is read from
//! ambient paths or globals.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{validate_fraction, PipelineError, Result};

/// Locations of the source tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePaths {
    #[serde(default = "default_races_path")]
    pub races: PathBuf,
    #[serde(default = "default_results_path")]
    pub results: PathBuf,
    /// Tracking is optional; without it every row has missing tracking
    #[serde(default)]
    pub tracking: Option<PathBuf>,
}

fn default_races_path() -> PathBuf {
    PathBuf::from("data/races.csv")
}

fn default_results_path() -> PathBuf {
    PathBuf::from("data/results.csv")
}

impl Default for SourcePaths {
    fn default() -> Self {
        Self {
            races: default_races_path(),
            results: default_results_path(),
            tracking: None,
        }
    }
}

impl SourcePaths {
    /// Conventional file names inside one directory
    pub fn in_dir<P: AsRef<Path>>(dir: P, with_tracking: bool) -> Self {
        let dir = dir.as_ref();
        Self {
            races: dir.join("races.csv"),
            results: dir.join("results.csv"),
            tracking: with_tracking.then(|| dir.join("tracking.csv")),
        }
    }
}

/// Output destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/processed")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

impl OutputConfig {
    pub fn features_path(&self) -> PathBuf {
        self.dir.join("features.csv")
    }

    pub fn train_path(&self) -> PathBuf {
        self.dir.join("train.csv")
    }

    pub fn eval_path(&self) -> PathBuf {
        self.dir.join("eval.csv")
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join("evaluation.json")
    }
}

/// Which rows feed a row's historical aggregates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMode {
    /// Only the horse's races on strictly earlier dates
    #[default]
    PointInTime,
    /// Every race of the horse in the input, later ones included
    FullHistory,
}

/// Historical aggregation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub mode: HistoryMode,
}

/// Critical-field filter settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Drop rows that have no complete tracking sample
    #[serde(default)]
    pub require_tracking: bool,
}

/// Grouped split settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    #[serde(default = "default_eval_fraction")]
    pub eval_fraction: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_eval_fraction() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            eval_fraction: default_eval_fraction(),
            seed: default_seed(),
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub sources: SourcePaths,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub split: SplitConfig,
}

impl PipelineConfig {
    /// Load from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML content
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_fraction(self.split.eval_fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.split.seed, 42);
        assert!((config.split.eval_fraction - 0.2).abs() < 1e-12);
        assert_eq!(config.history.mode, HistoryMode::PointInTime);
        assert!(!config.filter.require_tracking);
        assert!(config.sources.tracking.is_none());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = PipelineConfig::from_toml(
            r#"
            [sources]
            races = "in/races.csv"
            tracking = "in/tracking.csv"

            [history]
            mode = "full_history"

            [split]
            seed = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.sources.races, PathBuf::from("in/races.csv"));
        assert_eq!(config.sources.results, PathBuf::from("data/results.csv"));
        assert_eq!(
            config.sources.tracking,
            Some(PathBuf::from("in/tracking.csv"))
        );
        assert_eq!(config.history.mode, HistoryMode::FullHistory);
        assert_eq!(config.split.seed, 7);
        assert!((config.split.eval_fraction - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_from_toml_rejects_bad_fraction() {
        let err = PipelineConfig::from_toml("[split]\neval_fraction = 1.5\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFraction(_)));
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        assert!(matches!(
            PipelineConfig::from_toml("[split\n"),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_sources_in_dir() {
        let paths = SourcePaths::in_dir("raw", false);
        assert_eq!(paths.races, PathBuf::from("raw/races.csv"));
        assert!(paths.tracking.is_none());
        assert!(SourcePaths::in_dir("raw", true).tracking.is_some());
    }
}
