use polars::prelude::PolarsError;
use thiserror::Error;

/// Pipeline error types
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Tabular read/write failure
    #[error("Data error: {0}")]
    Polars(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Pattern error: {0}")]
    Regex(#[from] regex::Error),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A source table lacks a column the loader cannot do without
    #[error("Missing required column `{column}` in {table}")]
    MissingColumn { table: &'static str, column: String },

    /// A fraction outside the open interval (0, 1)
    #[error("Fraction must be strictly between 0 and 1, got {0}")]
    InvalidFraction(f64),

    /// Grouped split left one partition without any race
    #[error("Degenerate split: {train_groups} train race(s), {eval_groups} evaluation race(s) from {total_groups} race(s)")]
    DegenerateSplit {
        total_groups: usize,
        train_groups: usize,
        eval_groups: usize,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Validation functions
pub fn validate_fraction(fraction: f64) -> Result<()> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(PipelineError::InvalidFraction(fraction));
    }
    Ok(())
}

pub fn validate_partition(total_groups: usize, eval_groups: usize) -> Result<()> {
    let train_groups = total_groups.saturating_sub(eval_groups);
    if train_groups == 0 || eval_groups == 0 {
        return Err(PipelineError::DegenerateSplit {
            total_groups,
            train_groups,
            eval_groups,
        });
    }
    Ok(())
}
