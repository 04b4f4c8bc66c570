//! Feature Engineering
//!
//! Turns joined rows into model-ready Feature Rows: critical-field filter,
//! temporal features, horse history, guarded ratios and the winner label.

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config::{FilterConfig, HistoryMode};
use crate::data::history::{HistoricalFeatures, HistoryEntry, HorseHistoryAggregator, ImputationMedians};
use crate::data::join::JoinedRow;
use crate::error::Result;
use crate::models::{FinishRank, TrackingSample};

/// Numeric race/result fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseFeatures {
    pub entrant_count: u32,
    pub purse: f64,
    pub temperature: f64,
    pub wind_speed: f64,
    /// Not critical: missing stays missing
    pub weight: Option<f64>,
    pub betting_pool: Option<f64>,
}

/// Categorical fields, one-hot encoded by the external model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalFeatures {
    pub venue: String,
    pub style: String,
    pub discipline: String,
    pub track_condition: String,
    pub sky_condition: String,
    pub wind_direction: String,
}

/// Tracking measurements of an attached sample, possibly partial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingFeatures {
    pub max_speed: Option<f64>,
    pub official_time: Option<f64>,
    pub sectional_600m: Option<f64>,
    pub sectional_200m: Option<f64>,
    pub sectional_100m: Option<f64>,
    pub actual_distance: Option<f64>,
    pub distance_behind_winner: Option<f64>,
}

impl TrackingFeatures {
    fn from_sample(sample: &TrackingSample) -> Self {
        Self {
            max_speed: sample.max_speed,
            official_time: sample.official_time,
            sectional_600m: sample.sectional_600m,
            sectional_200m: sample.sectional_200m,
            sectional_100m: sample.sectional_100m,
            actual_distance: sample.actual_distance,
            distance_behind_winner: sample.distance_behind_winner,
        }
    }

    pub fn is_complete(&self) -> bool {
        [
            self.max_speed,
            self.official_time,
            self.sectional_600m,
            self.sectional_200m,
            self.sectional_100m,
            self.actual_distance,
            self.distance_behind_winner,
        ]
        .iter()
        .all(Option::is_some)
    }
}

/// Calendar features of the race date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalFeatures {
    /// Monday = 0
    pub day_of_week: u32,
    pub month: u32,
    pub year: i32,
}

impl TemporalFeatures {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            day_of_week: date.weekday().num_days_from_monday(),
            month: date.month(),
            year: date.year(),
        }
    }
}

/// Derived ratios; `None` when the divisor is zero
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioFeatures {
    pub weight_per_entrant: Option<f64>,
    pub purse_per_entrant: Option<f64>,
    pub podium_per_race: f64,
    pub speed_per_entrant: Option<f64>,
}

/// Division that refuses a zero divisor
pub fn safe_ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 || !denominator.is_finite() {
        None
    } else {
        Some(numerator / denominator)
    }
}

impl RatioFeatures {
    pub fn compute(base: &BaseFeatures, historical: &HistoricalFeatures) -> Self {
        let entrants = base.entrant_count as f64;
        Self {
            weight_per_entrant: base.weight.and_then(|w| safe_ratio(w, entrants)),
            purse_per_entrant: safe_ratio(base.purse, entrants),
            // offset divisor, never zero
            podium_per_race: historical.horse_podium_rate / (historical.horse_races as f64 + 1.0),
            speed_per_entrant: safe_ratio(historical.horse_avg_max_speed, entrants),
        }
    }
}

/// One (race, entrant) row of the model-ready table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub race_id: String,
    pub bib_number: String,
    pub horse: String,
    pub date: NaiveDate,
    pub jockey: Option<String>,
    pub trainer: Option<String>,
    pub lane: Option<String>,
    pub prize_name: Option<String>,
    pub margin: Option<String>,
    pub finishing_rank: FinishRank,
    pub base: BaseFeatures,
    pub categorical: CategoricalFeatures,
    pub tracking: Option<TrackingFeatures>,
    pub temporal: TemporalFeatures,
    pub historical: HistoricalFeatures,
    pub ratios: RatioFeatures,
    /// 1 iff the entrant finished first
    pub is_winner: u8,
}

impl FeatureRow {
    /// Numeric features in `get_numeric_feature_names` order; missing is NaN
    pub fn to_vec(&self) -> Vec<f64> {
        let missing = |v: Option<f64>| v.unwrap_or(f64::NAN);
        vec![
            self.base.entrant_count as f64,
            self.base.purse,
            self.base.temperature,
            self.base.wind_speed,
            missing(self.base.weight),
            self.historical.horse_avg_rank,
            self.historical.horse_std_rank,
            self.historical.horse_races as f64,
            self.historical.horse_podium_rate,
            self.historical.horse_avg_max_speed,
            self.temporal.day_of_week as f64,
            self.temporal.month as f64,
            self.temporal.year as f64,
            missing(self.ratios.weight_per_entrant),
            missing(self.ratios.purse_per_entrant),
            self.ratios.podium_per_race,
            missing(self.ratios.speed_per_entrant),
        ]
    }

    /// Categorical features in `get_categorical_feature_names` order
    pub fn categorical_values(&self) -> [&str; 6] {
        [
            &self.categorical.venue,
            &self.categorical.style,
            &self.categorical.discipline,
            &self.categorical.track_condition,
            &self.categorical.sky_condition,
            &self.categorical.wind_direction,
        ]
    }
}

/// Numeric feature column names (17 features)
pub fn get_numeric_feature_names() -> Vec<&'static str> {
    vec![
        "entrant_count",
        "purse",
        "temperature",
        "wind_speed",
        "weight",
        "horse_avg_rank",
        "horse_std_rank",
        "horse_races",
        "horse_podium_rate",
        "horse_avg_max_speed",
        "day_of_week",
        "month",
        "year",
        "weight_per_entrant",
        "purse_per_entrant",
        "podium_per_race",
        "speed_per_entrant",
    ]
}

/// Categorical feature column names (6 features)
pub fn get_categorical_feature_names() -> Vec<&'static str> {
    vec![
        "venue",
        "style",
        "discipline",
        "track_condition",
        "sky_condition",
        "wind_direction",
    ]
}

/// Rows removed by the critical-field filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub rows_in: usize,
    pub rows_out: usize,
    /// First missing critical field -> rows dropped for it
    pub missing_by_field: BTreeMap<String, usize>,
}

impl FilterStats {
    pub fn dropped(&self) -> usize {
        self.rows_in - self.rows_out
    }
}

/// Joined row that passed the critical-field filter
struct CandidateRow<'a> {
    row: &'a JoinedRow,
    horse: &'a str,
    date: NaiveDate,
    rank: FinishRank,
    base: BaseFeatures,
    categorical: CategoricalFeatures,
    tracking: Option<TrackingFeatures>,
}

/// First critical field a row lacks, if any
fn critical_candidate<'a>(
    row: &'a JoinedRow,
    filter: &FilterConfig,
) -> std::result::Result<CandidateRow<'a>, &'static str> {
    let race = &row.race;
    let text = |v: &Option<String>, name: &'static str| v.clone().ok_or(name);

    let date = race.date.ok_or("date")?;
    let venue = text(&race.venue, "venue")?;
    let style = text(&race.style, "style")?;
    let discipline = text(&race.discipline, "discipline")?;
    let entrant_count = race.entrant_count.ok_or("entrant_count")?;
    let purse = race.purse.ok_or("purse")?;
    let track_condition = text(&race.track_condition, "track_condition")?;
    let temperature = race.weather.temperature.ok_or("temperature")?;
    let sky_condition = text(&race.weather.sky_condition, "sky_condition")?;
    let wind_speed = race.weather.wind_speed.ok_or("wind_speed")?;
    let wind_direction = text(&race.weather.wind_direction, "wind_direction")?;
    let horse = row.result.horse.as_deref().ok_or("horse")?;
    let rank = row.result.finishing_rank.ok_or("finishing_rank")?;

    let tracking = row.tracking.as_ref().map(TrackingFeatures::from_sample);
    let complete = tracking.as_ref().is_some_and(TrackingFeatures::is_complete);
    if filter.require_tracking && !complete {
        return Err("tracking");
    }

    Ok(CandidateRow {
        row,
        horse,
        date,
        rank,
        base: BaseFeatures {
            entrant_count,
            purse,
            temperature,
            wind_speed,
            weight: row.result.weight,
            betting_pool: race.betting_pool,
        },
        categorical: CategoricalFeatures {
            venue,
            style,
            discipline,
            track_condition,
            sky_condition,
            wind_direction,
        },
        tracking,
    })
}

/// Output of the feature stage
#[derive(Debug, Clone, Default)]
pub struct FeatureOutput {
    pub rows: Vec<FeatureRow>,
    pub filter_stats: FilterStats,
    pub medians: ImputationMedians,
}

/// Feature engineering for joined rows
pub struct FeatureEngineering {
    aggregator: HorseHistoryAggregator,
    filter: FilterConfig,
}

impl FeatureEngineering {
    pub fn new(mode: HistoryMode, filter: FilterConfig) -> Self {
        Self {
            aggregator: HorseHistoryAggregator::new(mode),
            filter,
        }
    }

    /// Filter, aggregate and assemble Feature Rows, preserving input order
    pub fn build(&self, rows: &[JoinedRow]) -> FeatureOutput {
        let mut filter_stats = FilterStats {
            rows_in: rows.len(),
            ..Default::default()
        };

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            match critical_candidate(row, &self.filter) {
                Ok(candidate) => candidates.push(candidate),
                Err(field) => {
                    *filter_stats
                        .missing_by_field
                        .entry(field.to_string())
                        .or_default() += 1;
                }
            }
        }
        filter_stats.rows_out = candidates.len();

        if filter_stats.dropped() > 0 {
            warn!(
                "Dropped {} of {} rows missing a critical field: {:?}",
                filter_stats.dropped(),
                filter_stats.rows_in,
                filter_stats.missing_by_field
            );
        }

        let entries: Vec<HistoryEntry<'_>> = candidates
            .iter()
            .map(|c| HistoryEntry {
                horse: c.horse,
                date: c.date,
                rank: c.rank,
                max_speed: c.row.tracking.as_ref().and_then(|t| t.max_speed),
            })
            .collect();
        let (historical, medians) = self.aggregator.compute(&entries);

        info!(
            "Built {} feature rows ({:?} history, {} values imputed)",
            candidates.len(),
            self.aggregator.mode(),
            medians.imputed_values
        );

        let rows = candidates
            .into_iter()
            .zip(historical)
            .map(|(c, historical)| {
                let ratios = RatioFeatures::compute(&c.base, &historical);
                FeatureRow {
                    race_id: c.row.race_id.clone(),
                    bib_number: c.row.bib_number.clone(),
                    horse: c.horse.to_string(),
                    date: c.date,
                    jockey: c.row.result.jockey.clone(),
                    trainer: c.row.result.trainer.clone(),
                    lane: c.row.result.lane.clone(),
                    prize_name: c.row.race.prize_name.clone(),
                    margin: c.row.result.margin.clone(),
                    finishing_rank: c.rank,
                    is_winner: u8::from(c.rank.is_winner()),
                    temporal: TemporalFeatures::from_date(c.date),
                    base: c.base,
                    categorical: c.categorical,
                    tracking: c.tracking,
                    historical,
                    ratios,
                }
            })
            .collect();

        FeatureOutput {
            rows,
            filter_stats,
            medians,
        }
    }
}

/// Feature table as a DataFrame: identifiers, race/result attributes,
/// categoricals, numeric features, tracking columns, rank and label
pub fn to_dataframe(rows: &[FeatureRow]) -> Result<DataFrame> {
    let mut columns = vec![
        Series::new("race_id", rows.iter().map(|r| r.race_id.as_str()).collect::<Vec<_>>()),
        Series::new(
            "date",
            rows.iter().map(|r| r.date.format("%Y-%m-%d").to_string()).collect::<Vec<_>>(),
        ),
        Series::new("bib_number", rows.iter().map(|r| r.bib_number.as_str()).collect::<Vec<_>>()),
        Series::new("horse", rows.iter().map(|r| r.horse.as_str()).collect::<Vec<_>>()),
        Series::new("jockey", rows.iter().map(|r| r.jockey.as_deref()).collect::<Vec<_>>()),
        Series::new("trainer", rows.iter().map(|r| r.trainer.as_deref()).collect::<Vec<_>>()),
        Series::new("lane", rows.iter().map(|r| r.lane.as_deref()).collect::<Vec<_>>()),
        Series::new("prize_name", rows.iter().map(|r| r.prize_name.as_deref()).collect::<Vec<_>>()),
        Series::new("margin", rows.iter().map(|r| r.margin.as_deref()).collect::<Vec<_>>()),
        Series::new("betting_pool", rows.iter().map(|r| r.base.betting_pool).collect::<Vec<_>>()),
    ];

    for (idx, name) in get_categorical_feature_names().into_iter().enumerate() {
        let values: Vec<&str> = rows.iter().map(|r| r.categorical_values()[idx]).collect();
        columns.push(Series::new(name, values));
    }

    let vectors: Vec<Vec<f64>> = rows.iter().map(FeatureRow::to_vec).collect();
    for (idx, name) in get_numeric_feature_names().into_iter().enumerate() {
        let values: Vec<Option<f64>> = vectors
            .iter()
            .map(|v| Some(v[idx]).filter(|x| !x.is_nan()))
            .collect();
        columns.push(Series::new(name, values));
    }

    let tracking_columns: [(&str, fn(&TrackingFeatures) -> Option<f64>); 7] = [
        ("max_speed", |t| t.max_speed),
        ("official_time", |t| t.official_time),
        ("sectional_600m", |t| t.sectional_600m),
        ("sectional_200m", |t| t.sectional_200m),
        ("sectional_100m", |t| t.sectional_100m),
        ("actual_distance", |t| t.actual_distance),
        ("distance_behind_winner", |t| t.distance_behind_winner),
    ];
    for (name, pick) in tracking_columns {
        let values: Vec<Option<f64>> = rows.iter().map(|r| r.tracking.as_ref().and_then(pick)).collect();
        columns.push(Series::new(name, values));
    }

    columns.push(Series::new(
        "finishing_rank",
        rows.iter().map(|r| r.finishing_rank.to_string()).collect::<Vec<_>>(),
    ));
    columns.push(Series::new(
        "is_winner",
        rows.iter().map(|r| r.is_winner as i32).collect::<Vec<_>>(),
    ));

    Ok(DataFrame::new(columns)?)
}
