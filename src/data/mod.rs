//! Data loading, joining and feature engineering modules

pub mod csv_loader;
pub mod features;
pub mod history;
pub mod join;
pub mod parser;

// Re-export commonly used types
pub use csv_loader::{NormalizeStats, SourceLoader, SourceTables};
pub use features::{
    get_categorical_feature_names, get_numeric_feature_names, FeatureEngineering, FeatureRow,
    FilterStats,
};
pub use history::{HistoricalFeatures, HorseHistoryAggregator, ImputationMedians};
pub use join::{flatten, JoinOutput, JoinStats, JoinedRow};
