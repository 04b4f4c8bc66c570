//! Pipeline orchestration
//!
//! Runs load → join → features → split → score → evaluate, one stage after
//! the other, and rolls every stage's counters into a `DataQualityReport`.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::config::{HistoryMode, PipelineConfig};
use crate::data::csv_loader::{write_csv, NormalizeStats, SourceLoader, SourceTables};
use crate::data::features::{to_dataframe, FeatureEngineering, FeatureRow, FilterStats};
use crate::data::history::ImputationMedians;
use crate::data::join::{flatten, JoinStats};
use crate::error::Result;
use crate::evaluation::{evaluate_rankings, GroupSplit, GroupSplitter, RankingReport};
use crate::models::ScoredRow;
use crate::scorer::Scorer;

/// Row-level counters of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub normalize: NormalizeStats,
    pub join: JoinStats,
    pub filter: FilterStats,
    pub imputation: ImputationMedians,
}

impl DataQualityReport {
    /// Rows that never reached the feature table
    pub fn rows_dropped(&self) -> usize {
        self.join.results_without_keys + self.join.orphan_results + self.filter.dropped()
    }

    pub fn log(&self) {
        info!(
            "Data quality: {} rows read, {} malformed fields, {} rows joined, {} kept",
            self.normalize.rows_read,
            self.normalize.malformed_fields,
            self.join.rows_out,
            self.filter.rows_out
        );
        if self.rows_dropped() > 0 {
            warn!(
                "Data quality: {} rows dropped ({} orphan results, {} results without keys, {} missing critical fields)",
                self.rows_dropped(),
                self.join.orphan_results,
                self.join.results_without_keys,
                self.filter.dropped()
            );
        }
        if self.join.duplicate_races + self.join.rank_conflicts > 0 {
            warn!(
                "Data quality: {} duplicate races, {} conflicting ranks",
                self.join.duplicate_races, self.join.rank_conflicts
            );
        }
    }
}

/// Feature table with the counters gathered while building it
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub rows: Vec<FeatureRow>,
    pub quality: DataQualityReport,
}

/// Summary of a complete run, written as the evaluation report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub history_mode: HistoryMode,
    pub seed: u64,
    pub eval_fraction: f64,
    pub train_races: usize,
    pub eval_races: usize,
    pub train_rows: usize,
    pub eval_rows: usize,
    pub ranking: RankingReport,
    pub quality: DataQualityReport,
}

/// Stage runner bound to one configuration
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read the configured source tables
    pub fn load_sources(&self) -> Result<(SourceTables, NormalizeStats)> {
        let mut loader = SourceLoader::new()?;
        let tables = loader.load_sources(&self.config.sources)?;
        Ok((tables, loader.stats().clone()))
    }

    /// Join and enrich already-loaded tables
    pub fn build_from_tables(&self, tables: &SourceTables, normalize: NormalizeStats) -> FeatureTable {
        let joined = flatten(&tables.races, &tables.results, &tables.tracking);
        let engineering =
            FeatureEngineering::new(self.config.history.mode, self.config.filter.clone());
        let features = engineering.build(&joined.rows);

        let quality = DataQualityReport {
            normalize,
            join: joined.stats,
            filter: features.filter_stats,
            imputation: features.medians,
        };
        quality.log();

        FeatureTable {
            rows: features.rows,
            quality,
        }
    }

    /// Load the sources and build the feature table
    pub fn build_features(&self) -> Result<FeatureTable> {
        let (tables, normalize) = self.load_sources()?;
        Ok(self.build_from_tables(&tables, normalize))
    }

    pub fn split(&self, rows: &[FeatureRow]) -> Result<GroupSplit<FeatureRow>> {
        GroupSplitter::new(&self.config.split)?.split_features(rows)
    }

    /// Score evaluation rows and compute ranking metrics
    pub fn evaluate<S: Scorer>(&self, scorer: &S, split: &GroupSplit<FeatureRow>) -> RankingReport {
        let scored = scorer.score_rows(&split.eval);
        evaluate_rankings(&scored)
    }

    /// Build, split, score and evaluate, writing every artifact
    pub fn run<S: Scorer>(&self, scorer: &S) -> Result<RunReport> {
        let table = self.build_features()?;
        self.write_features(&table.rows, &self.config.output.features_path())?;

        let split = self.split(&table.rows)?;
        self.write_features(&split.train, &self.config.output.train_path())?;
        self.write_features(&split.eval, &self.config.output.eval_path())?;

        let scored = scorer.score_rows(&split.eval);
        write_predictions(&scored, self.config.output.dir.join("predictions.csv"))?;
        let ranking = evaluate_rankings(&scored);

        info!(
            "Top-1 accuracy {:.4} over {} races ({} gaps, {} undefined)",
            ranking.top1_accuracy,
            ranking.races,
            ranking.gaps.len(),
            ranking.undefined_gaps
        );

        let report = RunReport {
            history_mode: self.config.history.mode,
            seed: self.config.split.seed,
            eval_fraction: self.config.split.eval_fraction,
            train_races: split.train_races.len(),
            eval_races: split.eval_races.len(),
            train_rows: split.train.len(),
            eval_rows: split.eval.len(),
            ranking,
            quality: table.quality,
        };
        write_json(&report, self.config.output.report_path())?;
        Ok(report)
    }

    pub fn write_features<P: AsRef<Path>>(&self, rows: &[FeatureRow], path: P) -> Result<()> {
        let mut df = to_dataframe(rows)?;
        write_csv(&mut df, &path)?;
        info!("Wrote {} feature rows to {:?}", rows.len(), path.as_ref());
        Ok(())
    }
}

/// Evaluate an externally produced predictions CSV (`race_id,label,score`)
pub fn evaluate_predictions_file<P: AsRef<Path>>(path: P) -> Result<(RankingReport, NormalizeStats)> {
    let mut loader = SourceLoader::new()?;
    let rows = loader.load_predictions(path)?;
    let stats = loader.stats().clone();
    if stats.unusable_predictions > 0 {
        warn!("Skipped {} unusable prediction rows", stats.unusable_predictions);
    }
    Ok((evaluate_rankings(&rows), stats))
}

pub fn write_predictions<P: AsRef<Path>>(rows: &[ScoredRow], path: P) -> Result<()> {
    let mut df = DataFrame::new(vec![
        Series::new("race_id", rows.iter().map(|r| r.race_id.as_str()).collect::<Vec<_>>()),
        Series::new("label", rows.iter().map(|r| r.label as i32).collect::<Vec<_>>()),
        Series::new("score", rows.iter().map(|r| r.score).collect::<Vec<_>>()),
    ])?;
    write_csv(&mut df, path)
}

pub fn write_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntrantResult, FinishRank, Race, Weather};
    use crate::scorer::FormScorer;
    use chrono::NaiveDate;

    fn tables(races: usize) -> SourceTables {
        let mut tables = SourceTables::default();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for r in 0..races {
            let race_id = format!("R{:02}", r);
            tables.races.push(Race {
                race_id: Some(race_id.clone()),
                date: start.checked_add_days(chrono::Days::new(r as u64 * 7)),
                venue: Some("Vincennes".to_string()),
                style: Some("Attelé".to_string()),
                discipline: Some("Trot".to_string()),
                entrant_count: Some(3),
                purse: Some(25000.0),
                track_condition: Some("Bon".to_string()),
                weather: Weather {
                    temperature: Some(10.0),
                    sky_condition: Some("Clair".to_string()),
                    wind_speed: Some(3.0),
                    wind_direction: Some("Sud".to_string()),
                },
                ..Default::default()
            });
            for (bib, horse) in ["Alpha", "Beta", "Gamma"].iter().enumerate() {
                let rank = ((bib + r) % 3) as u32 + 1;
                tables.results.push(EntrantResult {
                    race_id: Some(race_id.clone()),
                    bib_number: Some((bib + 1).to_string()),
                    horse: Some(horse.to_string()),
                    finishing_rank: Some(FinishRank::Placed(rank)),
                    ..Default::default()
                });
            }
        }
        tables
    }

    #[test]
    fn test_build_from_tables_counts() {
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let mut source = tables(4);
        source.results.push(EntrantResult {
            race_id: Some("R99".to_string()),
            bib_number: Some("1".to_string()),
            ..Default::default()
        });

        let table = pipeline.build_from_tables(&source, NormalizeStats::default());

        assert_eq!(table.rows.len(), 12);
        assert_eq!(table.quality.join.orphan_results, 1);
        assert_eq!(table.quality.rows_dropped(), 1);
    }

    #[test]
    fn test_build_is_idempotent() {
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let source = tables(6);
        let a = pipeline.build_from_tables(&source, NormalizeStats::default());
        let b = pipeline.build_from_tables(&source, NormalizeStats::default());
        assert_eq!(a.rows, b.rows);
        assert_eq!(a.quality, b.quality);
    }

    #[test]
    fn test_split_and_evaluate() {
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let table = pipeline.build_from_tables(&tables(10), NormalizeStats::default());
        let split = pipeline.split(&table.rows).unwrap();

        assert_eq!(split.eval_races.len(), 2);
        assert_eq!(split.eval_group_sizes(), vec![3, 3]);

        let report = pipeline.evaluate(&FormScorer::new(), &split);
        assert_eq!(report.races, 2);
        assert!((0.0..=1.0).contains(&report.top1_accuracy));
    }
}
