//! CSV loading for race, result, tracking and prediction tables
//!
//! Every column is read as text so that the field normalizers see the raw
//! value and decide what is malformed.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

use crate::config::SourcePaths;
use crate::data::parser::{
    parse_count, parse_date, parse_key, parse_non_negative, parse_number, parse_text,
    parse_weight, FieldParser,
};
use crate::error::{PipelineError, Result};
use crate::models::{EntrantResult, Race, ScoredRow, TrackingSample, Weather};

/// Counters for values that were present but could not be normalized
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizeStats {
    pub rows_read: usize,
    pub malformed_fields: usize,
    /// Prediction rows without a usable race id, label or score
    pub unusable_predictions: usize,
}

impl NormalizeStats {
    fn check<T>(&mut self, raw: &str, parsed: Option<T>) -> Option<T> {
        if parsed.is_none() && !raw.trim().is_empty() {
            self.malformed_fields += 1;
        }
        parsed
    }
}

/// The three source tables of one run
#[derive(Debug, Clone, Default)]
pub struct SourceTables {
    pub races: Vec<Race>,
    pub results: Vec<EntrantResult>,
    pub tracking: Vec<TrackingSample>,
}

/// Column access over an all-text DataFrame
struct TextColumns<'a> {
    df: &'a DataFrame,
    table: &'static str,
}

impl<'a> TextColumns<'a> {
    fn new(df: &'a DataFrame, table: &'static str) -> Self {
        Self { df, table }
    }

    fn required(&self, name: &str) -> Result<&'a StringChunked> {
        let column = self
            .df
            .column(name)
            .map_err(|_| PipelineError::MissingColumn {
                table: self.table,
                column: name.to_string(),
            })?;
        Ok(column.str()?)
    }

    fn optional(&self, name: &str) -> Option<&'a StringChunked> {
        self.df.column(name).ok().and_then(|c| c.str().ok())
    }
}

fn cell<'a>(column: Option<&'a StringChunked>, i: usize) -> &'a str {
    column.and_then(|c| c.get(i)).unwrap_or("")
}

/// Read a CSV file with every column typed as text
pub fn read_text_csv<P: AsRef<Path>>(csv_path: P) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(csv_path.as_ref().to_path_buf()))?
        .finish()?;
    debug!(
        "Read {} rows x {} columns from {:?}",
        df.height(),
        df.width(),
        csv_path.as_ref()
    );
    Ok(df)
}

/// Write a DataFrame as CSV with a header line
pub fn write_csv<P: AsRef<Path>>(df: &mut DataFrame, csv_path: P) -> Result<()> {
    if let Some(parent) = csv_path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(csv_path.as_ref())?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}

/// Loads source tables and normalizes every field
pub struct SourceLoader {
    parser: FieldParser,
    stats: NormalizeStats,
}

impl SourceLoader {
    pub fn new() -> Result<Self> {
        Ok(Self {
            parser: FieldParser::new()?,
            stats: NormalizeStats::default(),
        })
    }

    pub fn stats(&self) -> &NormalizeStats {
        &self.stats
    }

    /// Load races, results and (when configured) tracking
    pub fn load_sources(&mut self, paths: &SourcePaths) -> Result<SourceTables> {
        let races = self.load_races(&paths.races)?;
        let results = self.load_results(&paths.results)?;
        let tracking = match &paths.tracking {
            Some(path) => self.load_tracking(path)?,
            None => Vec::new(),
        };

        info!(
            "Loaded {} races, {} results, {} tracking samples ({} malformed fields)",
            races.len(),
            results.len(),
            tracking.len(),
            self.stats.malformed_fields
        );

        Ok(SourceTables {
            races,
            results,
            tracking,
        })
    }

    pub fn load_races<P: AsRef<Path>>(&mut self, csv_path: P) -> Result<Vec<Race>> {
        let df = read_text_csv(csv_path)?;
        self.races_from_frame(&df)
    }

    pub fn load_results<P: AsRef<Path>>(&mut self, csv_path: P) -> Result<Vec<EntrantResult>> {
        let df = read_text_csv(csv_path)?;
        self.results_from_frame(&df)
    }

    pub fn load_tracking<P: AsRef<Path>>(&mut self, csv_path: P) -> Result<Vec<TrackingSample>> {
        let df = read_text_csv(csv_path)?;
        self.tracking_from_frame(&df)
    }

    pub fn load_predictions<P: AsRef<Path>>(&mut self, csv_path: P) -> Result<Vec<ScoredRow>> {
        let df = read_text_csv(csv_path)?;
        self.predictions_from_frame(&df)
    }

    /// Convert an all-text race frame to typed races
    pub fn races_from_frame(&mut self, df: &DataFrame) -> Result<Vec<Race>> {
        let cols = TextColumns::new(df, "races");
        let race_id = Some(cols.required("race_id")?);
        let date = Some(cols.required("date")?);
        let meeting = cols.optional("meeting");
        let race_number = cols.optional("race_number");
        let prize_name = cols.optional("prize_name");
        let venue = cols.optional("venue");
        let style = cols.optional("style");
        let discipline = cols.optional("discipline");
        let entrant_count = cols.optional("entrant_count");
        let purse = cols.optional("purse");
        let track_condition = cols.optional("track_condition");
        let temperature = cols.optional("temperature");
        let sky_condition = cols.optional("sky_condition");
        let wind_speed = cols.optional("wind_speed");
        let wind_direction = cols.optional("wind_direction");
        let betting_pool = cols.optional("betting_pool");

        let mut races = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let stats = &mut self.stats;
            stats.rows_read += 1;

            let raw_date = cell(date, i);
            let raw_number = cell(race_number, i);
            let raw_count = cell(entrant_count, i);
            let raw_purse = cell(purse, i);
            let raw_temp = cell(temperature, i);
            let raw_wind = cell(wind_speed, i);
            let raw_pool = cell(betting_pool, i);

            races.push(Race {
                race_id: parse_key(cell(race_id, i)),
                date: stats.check(raw_date, parse_date(raw_date)),
                meeting: parse_text(cell(meeting, i)),
                race_number: stats.check(raw_number, parse_count(raw_number)),
                prize_name: parse_text(cell(prize_name, i)),
                venue: parse_text(cell(venue, i)),
                style: parse_text(cell(style, i)),
                discipline: parse_text(cell(discipline, i)),
                entrant_count: stats.check(raw_count, parse_count(raw_count)),
                purse: stats.check(raw_purse, parse_non_negative(raw_purse)),
                track_condition: parse_text(cell(track_condition, i)),
                weather: Weather {
                    temperature: stats.check(raw_temp, parse_number(raw_temp)),
                    sky_condition: parse_text(cell(sky_condition, i)),
                    wind_speed: stats.check(raw_wind, parse_non_negative(raw_wind)),
                    wind_direction: parse_text(cell(wind_direction, i)),
                },
                betting_pool: stats.check(raw_pool, parse_non_negative(raw_pool)),
            });
        }

        Ok(races)
    }

    /// Convert an all-text result frame to typed results
    pub fn results_from_frame(&mut self, df: &DataFrame) -> Result<Vec<EntrantResult>> {
        let cols = TextColumns::new(df, "results");
        let race_id = Some(cols.required("race_id")?);
        let bib = Some(cols.required("bib_number")?);
        let horse = cols.optional("horse");
        let jockey = cols.optional("jockey");
        let trainer = cols.optional("trainer");
        let lane = cols.optional("lane");
        let weight = cols.optional("weight");
        let rank = cols.optional("finishing_rank");
        let margin = cols.optional("margin");

        let mut results = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            self.stats.rows_read += 1;

            let raw_weight = cell(weight, i);
            let raw_rank = cell(rank, i);
            let parsed_rank = self.parser.parse_rank(raw_rank);

            let stats = &mut self.stats;
            results.push(EntrantResult {
                race_id: parse_key(cell(race_id, i)),
                bib_number: parse_key(cell(bib, i)),
                horse: parse_text(cell(horse, i)),
                jockey: parse_text(cell(jockey, i)),
                trainer: parse_text(cell(trainer, i)),
                lane: parse_key(cell(lane, i)),
                weight: stats.check(raw_weight, parse_weight(raw_weight)),
                finishing_rank: stats.check(raw_rank, parsed_rank),
                margin: parse_text(cell(margin, i)),
            });
        }

        Ok(results)
    }

    /// Convert an all-text tracking frame to typed samples
    pub fn tracking_from_frame(&mut self, df: &DataFrame) -> Result<Vec<TrackingSample>> {
        let cols = TextColumns::new(df, "tracking");
        let race_id = Some(cols.required("race_id")?);
        let bib = Some(cols.required("bib_number")?);
        let max_speed = cols.optional("max_speed");
        let official_time = cols.optional("official_time");
        let s600 = cols.optional("sectional_600m");
        let s200 = cols.optional("sectional_200m");
        let s100 = cols.optional("sectional_100m");
        let actual_distance = cols.optional("actual_distance");
        let behind = cols.optional("distance_behind_winner");

        let mut samples = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            self.stats.rows_read += 1;

            let times: Vec<(&str, Option<f64>)> = [official_time, s600, s200, s100]
                .iter()
                .map(|col| {
                    let raw = cell(*col, i);
                    (raw, self.parser.parse_time_seconds(raw))
                })
                .collect();
            let raw_speed = cell(max_speed, i);
            let raw_distance = cell(actual_distance, i);
            let raw_behind = cell(behind, i);

            let stats = &mut self.stats;
            samples.push(TrackingSample {
                race_id: parse_key(cell(race_id, i)),
                bib_number: parse_key(cell(bib, i)),
                max_speed: stats.check(raw_speed, parse_weight(raw_speed)),
                official_time: stats.check(times[0].0, times[0].1),
                sectional_600m: stats.check(times[1].0, times[1].1),
                sectional_200m: stats.check(times[2].0, times[2].1),
                sectional_100m: stats.check(times[3].0, times[3].1),
                actual_distance: stats.check(raw_distance, parse_weight(raw_distance)),
                distance_behind_winner: stats.check(raw_behind, parse_weight(raw_behind)),
            });
        }

        Ok(samples)
    }

    /// Convert an all-text prediction frame to scored rows
    ///
    /// Rows without a race id, a 0/1 label or a finite score are skipped and
    /// counted.
    pub fn predictions_from_frame(&mut self, df: &DataFrame) -> Result<Vec<ScoredRow>> {
        let cols = TextColumns::new(df, "predictions");
        let race_id = Some(cols.required("race_id")?);
        let label = Some(cols.required("label")?);
        let score = Some(cols.required("score")?);

        let mut rows = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            self.stats.rows_read += 1;

            let parsed = (
                parse_key(cell(race_id, i)),
                parse_count(cell(label, i)).filter(|l| *l <= 1),
                parse_number(cell(score, i)),
            );
            match parsed {
                (Some(race_id), Some(label), Some(score)) => {
                    rows.push(ScoredRow::new(race_id, label as u8, score));
                }
                _ => self.stats.unusable_predictions += 1,
            }
        }

        Ok(rows)
    }
}
