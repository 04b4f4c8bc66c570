//! Race × Result join, left-extended with tracking
//!
//! Produces one row per (race, entrant). Tracking is matched on
//! (race id, bib number) compared as normalized text and never removes a
//! row when absent. Partial samples are attached as they are; field-level
//! requirements belong to the feature filter.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::models::{EntrantResult, Race, TrackingSample};

/// One (race, entrant) row before feature enrichment
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRow {
    pub race_id: String,
    pub bib_number: String,
    pub race: Race,
    pub result: EntrantResult,
    pub tracking: Option<TrackingSample>,
}

/// Rows dropped or altered by the join, by cause
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinStats {
    pub races_without_id: usize,
    pub duplicate_races: usize,
    pub results_without_keys: usize,
    pub orphan_results: usize,
    pub rank_conflicts: usize,
    pub tracking_without_keys: usize,
    pub orphan_tracking: usize,
    /// Attached samples with at least one missing field
    pub incomplete_tracking: usize,
    pub duplicate_tracking: usize,
    pub rows_out: usize,
    pub rows_with_tracking: usize,
}

/// Output of the join stage
#[derive(Debug, Clone, Default)]
pub struct JoinOutput {
    pub rows: Vec<JoinedRow>,
    pub stats: JoinStats,
}

type TrackingKey = (String, String);

/// Join the three source tables into flat rows
pub fn flatten(races: &[Race], results: &[EntrantResult], tracking: &[TrackingSample]) -> JoinOutput {
    let mut stats = JoinStats::default();

    // Races by id, first occurrence wins
    let mut race_index: HashMap<&str, usize> = HashMap::new();
    let mut natural_keys = HashSet::new();
    let mut kept_races: Vec<(&str, &Race)> = Vec::new();
    for race in races {
        let Some(race_id) = race.race_id.as_deref() else {
            stats.races_without_id += 1;
            continue;
        };
        if race_index.contains_key(race_id) {
            stats.duplicate_races += 1;
            continue;
        }
        if let Some(key) = race.natural_key() {
            if !natural_keys.insert(key) {
                stats.duplicate_races += 1;
                continue;
            }
        }
        race_index.insert(race_id, kept_races.len());
        kept_races.push((race_id, race));
    }

    let tracking_index = index_tracking(tracking, &race_index, &mut stats);

    // Results grouped under their race, input order preserved
    let mut entrants: Vec<Vec<(&str, EntrantResult)>> = vec![Vec::new(); kept_races.len()];
    let mut seen_ranks: Vec<HashSet<u32>> = vec![HashSet::new(); kept_races.len()];
    for result in results {
        let (Some(race_id), Some(bib)) = (result.race_id.as_deref(), result.bib_number.as_deref())
        else {
            stats.results_without_keys += 1;
            continue;
        };
        let Some(&idx) = race_index.get(race_id) else {
            stats.orphan_results += 1;
            continue;
        };

        let mut result = result.clone();
        if let Some(position) = result.finishing_rank.and_then(|r| r.position()) {
            if !seen_ranks[idx].insert(position) {
                stats.rank_conflicts += 1;
                result.finishing_rank = None;
            }
        }
        entrants[idx].push((bib, result));
    }

    let mut rows = Vec::with_capacity(results.len());
    for ((race_id, race), race_entrants) in kept_races.iter().zip(entrants) {
        for (bib, result) in race_entrants {
            let tracking = tracking_index
                .get(&(race_id.to_string(), bib.to_string()))
                .map(|t| (*t).clone());
            if tracking.is_some() {
                stats.rows_with_tracking += 1;
            }
            rows.push(JoinedRow {
                race_id: race_id.to_string(),
                bib_number: bib.to_string(),
                race: (*race).clone(),
                result,
                tracking,
            });
        }
    }
    stats.rows_out = rows.len();

    let dropped = stats.results_without_keys + stats.orphan_results;
    if dropped > 0 {
        warn!(
            "Dropped {} result rows ({} without keys, {} orphans)",
            dropped, stats.results_without_keys, stats.orphan_results
        );
    }
    info!(
        "Joined {} rows from {} races ({} with tracking)",
        stats.rows_out,
        kept_races.len(),
        stats.rows_with_tracking
    );

    JoinOutput { rows, stats }
}

/// Tracking samples keyed by (race id, bib), first occurrence wins
fn index_tracking<'a>(
    tracking: &'a [TrackingSample],
    race_index: &HashMap<&str, usize>,
    stats: &mut JoinStats,
) -> HashMap<TrackingKey, &'a TrackingSample> {
    let mut index = HashMap::new();
    for sample in tracking {
        let (Some(race_id), Some(bib)) = (sample.race_id.as_deref(), sample.bib_number.as_deref())
        else {
            stats.tracking_without_keys += 1;
            continue;
        };
        if !race_index.contains_key(race_id) {
            stats.orphan_tracking += 1;
            continue;
        }
        let key = (race_id.to_string(), bib.to_string());
        if index.contains_key(&key) {
            stats.duplicate_tracking += 1;
            continue;
        }
        if !sample.is_complete() {
            stats.incomplete_tracking += 1;
        }
        index.insert(key, sample);
    }
    index
}
