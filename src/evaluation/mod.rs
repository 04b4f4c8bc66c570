//! Race-grouped splitting and ranking evaluation

pub mod ranking;
pub mod split;

pub use ranking::{evaluate_rankings, roc_auc, GapSummary, RaceOutcome, RankingReport};
pub use split::{group_sizes, GroupSplit, GroupSplitter};
