//! racerank - horse racing feature table and race-grouped ranking evaluation
//!
//! This library provides:
//! - Normalization of race, result and tracking records
//! - Race × Result join, left-extended with tracking
//! - Point-in-time per-horse historical features with median imputation
//! - Race-grouped train/evaluation split with a seeded shuffle
//! - Top-1 accuracy and error-gap evaluation of ranking scores
//!
//! # Example
//!
//! ```no_run
//! use racerank::config::PipelineConfig;
//! use racerank::pipeline::Pipeline;
//! use racerank::scorer::FormScorer;
//!
//! let config = PipelineConfig::load("racerank.toml")?;
//! let pipeline = Pipeline::new(config)?;
//! let report = pipeline.run(&FormScorer::new())?;
//! println!("Top-1 accuracy: {:.3}", report.ranking.top1_accuracy);
//! # Ok::<(), racerank::error::PipelineError>(())
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod models;
pub mod pipeline;
pub mod scorer;

// Re-export commonly used types
pub use config::{HistoryMode, PipelineConfig};
pub use error::{PipelineError, Result};
pub use evaluation::{evaluate_rankings, GroupSplit, GroupSplitter, RankingReport};
pub use models::{EntrantResult, FinishRank, Race, ScoredRow, TrackingSample};
pub use pipeline::{DataQualityReport, Pipeline, RunReport};
pub use scorer::{FormScorer, Scorer};
