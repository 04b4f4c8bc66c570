//! Horse history aggregation
//!
//! Per-horse running statistics (count, finishing-rank mean and standard
//! deviation, podium rate, mean max speed) with dataset-median imputation
//! for horses without enough history.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::HistoryMode;
use crate::models::FinishRank;

/// Past-race fields the aggregator reads from one row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry<'a> {
    pub horse: &'a str,
    pub date: NaiveDate,
    pub rank: FinishRank,
    pub max_speed: Option<f64>,
}

/// Sufficient statistics for one horse
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningStats {
    /// Races with a known finishing position
    ranked: u32,
    rank_mean: f64,
    /// Welford sum of squared deviations
    rank_m2: f64,
    podiums: u32,
    speed_sum: f64,
    speed_count: u32,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one race into the statistics
    pub fn update(&mut self, rank: FinishRank, max_speed: Option<f64>) {
        if let Some(position) = rank.position() {
            let x = position as f64;
            self.ranked += 1;
            let delta = x - self.rank_mean;
            self.rank_mean += delta / self.ranked as f64;
            self.rank_m2 += delta * (x - self.rank_mean);
            if rank.is_podium() {
                self.podiums += 1;
            }
        }
        if let Some(speed) = max_speed {
            self.speed_sum += speed;
            self.speed_count += 1;
        }
    }

    pub fn race_count(&self) -> u32 {
        self.ranked
    }

    pub fn mean_rank(&self) -> Option<f64> {
        (self.ranked > 0).then_some(self.rank_mean)
    }

    /// Sample standard deviation (n - 1); needs two ranked races
    pub fn std_rank(&self) -> Option<f64> {
        (self.ranked > 1).then(|| (self.rank_m2 / (self.ranked - 1) as f64).max(0.0).sqrt())
    }

    pub fn podium_rate(&self) -> Option<f64> {
        (self.ranked > 0).then(|| self.podiums as f64 / self.ranked as f64)
    }

    pub fn mean_max_speed(&self) -> Option<f64> {
        (self.speed_count > 0).then(|| self.speed_sum / self.speed_count as f64)
    }

    fn snapshot(&self) -> HistoryAggregate {
        HistoryAggregate {
            horse_races: self.race_count(),
            avg_rank: self.mean_rank(),
            std_rank: self.std_rank(),
            podium_rate: self.podium_rate(),
            avg_max_speed: self.mean_max_speed(),
        }
    }
}

/// Aggregates for one row before imputation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryAggregate {
    pub horse_races: u32,
    pub avg_rank: Option<f64>,
    pub std_rank: Option<f64>,
    pub podium_rate: Option<f64>,
    pub avg_max_speed: Option<f64>,
}

/// Aggregates for one row after imputation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalFeatures {
    pub horse_races: u32,
    pub horse_avg_rank: f64,
    pub horse_std_rank: f64,
    pub horse_podium_rate: f64,
    pub horse_avg_max_speed: f64,
}

/// Dataset-wide medians used to fill undefined aggregates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImputationMedians {
    pub avg_rank: f64,
    pub std_rank: f64,
    pub podium_rate: f64,
    pub avg_max_speed: f64,
    /// Number of individual values replaced by a median
    pub imputed_values: usize,
}

/// Computes per-row horse aggregates over a row set
pub struct HorseHistoryAggregator {
    mode: HistoryMode,
}

impl HorseHistoryAggregator {
    pub fn new(mode: HistoryMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> HistoryMode {
        self.mode
    }

    /// Raw aggregates, aligned with `entries`
    pub fn aggregate(&self, entries: &[HistoryEntry<'_>]) -> Vec<HistoryAggregate> {
        match self.mode {
            HistoryMode::PointInTime => Self::aggregate_point_in_time(entries),
            HistoryMode::FullHistory => Self::aggregate_full(entries),
        }
    }

    /// Aggregates with median imputation, aligned with `entries`
    pub fn compute(&self, entries: &[HistoryEntry<'_>]) -> (Vec<HistoricalFeatures>, ImputationMedians) {
        let aggregates = self.aggregate(entries);
        impute(&aggregates)
    }

    /// Single ordered pass; a date's rows are featured before any of them is folded in
    fn aggregate_point_in_time(entries: &[HistoryEntry<'_>]) -> Vec<HistoryAggregate> {
        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by_key(|&i| (entries[i].date, i));

        let mut stats: HashMap<&str, RunningStats> = HashMap::new();
        let mut out = vec![HistoryAggregate::default(); entries.len()];

        let mut start = 0;
        while start < order.len() {
            let date = entries[order[start]].date;
            let end = order[start..]
                .iter()
                .position(|&i| entries[i].date != date)
                .map_or(order.len(), |offset| start + offset);

            for &i in &order[start..end] {
                if let Some(s) = stats.get(entries[i].horse) {
                    out[i] = s.snapshot();
                }
            }
            for &i in &order[start..end] {
                let entry = &entries[i];
                stats
                    .entry(entry.horse)
                    .or_default()
                    .update(entry.rank, entry.max_speed);
            }

            start = end;
        }

        debug!("Point-in-time history for {} horses", stats.len());
        out
    }

    fn aggregate_full(entries: &[HistoryEntry<'_>]) -> Vec<HistoryAggregate> {
        let mut stats: HashMap<&str, RunningStats> = HashMap::new();
        for entry in entries {
            stats
                .entry(entry.horse)
                .or_default()
                .update(entry.rank, entry.max_speed);
        }

        entries
            .iter()
            .map(|e| stats.get(e.horse).map(RunningStats::snapshot).unwrap_or_default())
            .collect()
    }
}

/// Median of the defined values, `None` when there are none
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

fn column_median(
    aggregates: &[HistoryAggregate],
    name: &str,
    pick: impl Fn(&HistoryAggregate) -> Option<f64>,
) -> f64 {
    let values: Vec<f64> = aggregates.iter().filter_map(&pick).collect();
    median(&values).unwrap_or_else(|| {
        if !aggregates.is_empty() {
            warn!("No row defines {}; imputing 0.0", name);
        }
        0.0
    })
}

/// Fill undefined aggregates with the dataset median of each statistic
///
/// `horse_races` is never imputed: no history means 0 races.
pub fn impute(aggregates: &[HistoryAggregate]) -> (Vec<HistoricalFeatures>, ImputationMedians) {
    let mut medians = ImputationMedians {
        avg_rank: column_median(aggregates, "horse_avg_rank", |a| a.avg_rank),
        std_rank: column_median(aggregates, "horse_std_rank", |a| a.std_rank),
        podium_rate: column_median(aggregates, "horse_podium_rate", |a| a.podium_rate),
        avg_max_speed: column_median(aggregates, "horse_avg_max_speed", |a| a.avg_max_speed),
        imputed_values: 0,
    };

    let mut imputed = 0;
    let mut fill = |value: Option<f64>, fallback: f64| {
        value.unwrap_or_else(|| {
            imputed += 1;
            fallback
        })
    };

    let features = aggregates
        .iter()
        .map(|a| HistoricalFeatures {
            horse_races: a.horse_races,
            horse_avg_rank: fill(a.avg_rank, medians.avg_rank),
            horse_std_rank: fill(a.std_rank, medians.std_rank),
            horse_podium_rate: fill(a.podium_rate, medians.podium_rate),
            horse_avg_max_speed: fill(a.avg_max_speed, medians.avg_max_speed),
        })
        .collect();

    medians.imputed_values = imputed;
    (features, medians)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn entry(horse: &str, d: u32, rank: u32, speed: Option<f64>) -> HistoryEntry<'_> {
        HistoryEntry {
            horse,
            date: day(d),
            rank: FinishRank::Placed(rank),
            max_speed: speed,
        }
    }

    #[test]
    fn test_running_stats_match_direct_computation() {
        let ranks = [2.0, 5.0, 1.0, 3.0];
        let mut stats = RunningStats::new();
        for r in ranks {
            stats.update(FinishRank::Placed(r as u32), None);
        }

        let mean = ranks.iter().sum::<f64>() / 4.0;
        let var = ranks.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / 3.0;

        assert_eq!(stats.race_count(), 4);
        assert!((stats.mean_rank().unwrap() - mean).abs() < 1e-12);
        assert!((stats.std_rank().unwrap() - var.sqrt()).abs() < 1e-12);
        assert!((stats.podium_rate().unwrap() - 0.75).abs() < 1e-12);
        assert_eq!(stats.mean_max_speed(), None);
    }

    #[test]
    fn test_non_finisher_does_not_count_as_race() {
        let mut stats = RunningStats::new();
        stats.update(FinishRank::NonFinisher, Some(55.0));
        assert_eq!(stats.race_count(), 0);
        assert_eq!(stats.mean_rank(), None);
        assert_eq!(stats.mean_max_speed(), Some(55.0));
    }

    #[test]
    fn test_std_needs_two_races() {
        let mut stats = RunningStats::new();
        stats.update(FinishRank::Placed(4), None);
        assert_eq!(stats.std_rank(), None);
    }

    #[test]
    fn test_point_in_time_uses_only_earlier_dates() {
        let entries = vec![
            entry("A", 3, 1, Some(60.0)),
            entry("A", 1, 4, Some(50.0)),
            entry("A", 2, 2, Some(56.0)),
            entry("B", 2, 1, None),
        ];
        let aggregator = HorseHistoryAggregator::new(HistoryMode::PointInTime);
        let aggs = aggregator.aggregate(&entries);

        // A on day 1: nothing earlier
        assert_eq!(aggs[1].horse_races, 0);
        assert_eq!(aggs[1].avg_rank, None);
        // A on day 2: only day 1
        assert_eq!(aggs[2].horse_races, 1);
        assert_eq!(aggs[2].avg_rank, Some(4.0));
        assert_eq!(aggs[2].avg_max_speed, Some(50.0));
        // A on day 3: days 1 and 2
        assert_eq!(aggs[0].horse_races, 2);
        assert_eq!(aggs[0].avg_rank, Some(3.0));
        assert_eq!(aggs[0].podium_rate, Some(0.5));
        assert_eq!(aggs[0].avg_max_speed, Some(53.0));
        // B's first race
        assert_eq!(aggs[3].horse_races, 0);
    }

    #[test]
    fn test_point_in_time_excludes_same_day_races() {
        let entries = vec![entry("A", 5, 1, None), entry("A", 5, 3, None)];
        let aggs = HorseHistoryAggregator::new(HistoryMode::PointInTime).aggregate(&entries);
        assert!(aggs.iter().all(|a| a.horse_races == 0));
    }

    #[test]
    fn test_later_race_never_changes_earlier_row() {
        let mut entries = vec![entry("A", 1, 2, None), entry("A", 2, 6, None)];
        let aggregator = HorseHistoryAggregator::new(HistoryMode::PointInTime);
        let before = aggregator.aggregate(&entries);

        entries.push(entry("A", 9, 1, Some(70.0)));
        let after = aggregator.aggregate(&entries);

        assert_eq!(before[0], after[0]);
        assert_eq!(before[1], after[1]);
    }

    #[test]
    fn test_full_history_includes_every_row() {
        let entries = vec![entry("A", 1, 1, None), entry("A", 2, 3, None), entry("B", 1, 5, None)];
        let aggs = HorseHistoryAggregator::new(HistoryMode::FullHistory).aggregate(&entries);

        assert_eq!(aggs[0], aggs[1]);
        assert_eq!(aggs[0].horse_races, 2);
        assert_eq!(aggs[0].avg_rank, Some(2.0));
        assert_eq!(aggs[2].horse_races, 1);
        assert_eq!(aggs[2].std_rank, None);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0]), Some(3.0));
        assert_eq!(median(&[4.0, 1.0, 3.0]), Some(3.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn test_impute_zero_history_with_medians() {
        let aggregates = vec![
            HistoryAggregate {
                horse_races: 2,
                avg_rank: Some(2.0),
                std_rank: Some(1.0),
                podium_rate: Some(1.0),
                avg_max_speed: Some(55.0),
            },
            HistoryAggregate {
                horse_races: 3,
                avg_rank: Some(4.0),
                std_rank: Some(3.0),
                podium_rate: Some(0.0),
                avg_max_speed: None,
            },
            HistoryAggregate::default(),
        ];

        let (features, medians) = impute(&aggregates);

        assert_eq!(features[2].horse_races, 0);
        assert_eq!(features[2].horse_avg_rank, 3.0);
        assert_eq!(features[2].horse_std_rank, 2.0);
        assert_eq!(features[2].horse_podium_rate, 0.5);
        assert_eq!(features[2].horse_avg_max_speed, 55.0);
        assert_eq!(features[1].horse_avg_max_speed, 55.0);
        assert_eq!(medians.imputed_values, 5);
    }

    #[test]
    fn test_impute_without_any_defined_value() {
        let (features, medians) = impute(&[HistoryAggregate::default()]);
        assert_eq!(features[0].horse_avg_rank, 0.0);
        assert_eq!(medians.avg_rank, 0.0);
    }

    #[test]
    fn test_compute_is_deterministic() {
        let entries = vec![
            entry("A", 1, 2, Some(51.0)),
            entry("B", 1, 1, Some(53.0)),
            entry("A", 2, 1, None),
            entry("B", 3, 4, Some(49.5)),
            entry("C", 3, 2, None),
        ];
        let aggregator = HorseHistoryAggregator::new(HistoryMode::PointInTime);
        assert_eq!(aggregator.compute(&entries), aggregator.compute(&entries));
    }
}
