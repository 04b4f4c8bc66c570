//! Group-aware train/evaluation split
//!
//! Every row of a race lands in the same partition.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeSet, HashSet};
use tracing::info;

use crate::config::SplitConfig;
use crate::data::features::FeatureRow;
use crate::error::{validate_fraction, validate_partition, Result};

/// Rows partitioned by race
#[derive(Debug, Clone)]
pub struct GroupSplit<T> {
    pub train: Vec<T>,
    pub eval: Vec<T>,
    pub train_races: BTreeSet<String>,
    pub eval_races: BTreeSet<String>,
}

impl GroupSplit<FeatureRow> {
    /// Entrants per race in train row order
    pub fn train_group_sizes(&self) -> Vec<usize> {
        group_sizes(&self.train, |r| r.race_id.as_str())
    }

    /// Entrants per race in evaluation row order
    pub fn eval_group_sizes(&self) -> Vec<usize> {
        group_sizes(&self.eval, |r| r.race_id.as_str())
    }
}

/// Lengths of consecutive runs of rows sharing a race id
///
/// This is the `group` argument of a learning-to-rank trainer, so rows of a
/// race are expected to be contiguous.
pub fn group_sizes<T>(rows: &[T], race_id: impl Fn(&T) -> &str) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut current: Option<&str> = None;
    for row in rows {
        let id = race_id(row);
        if current == Some(id) {
            if let Some(last) = sizes.last_mut() {
                *last += 1;
            }
        } else {
            sizes.push(1);
            current = Some(id);
        }
    }
    sizes
}

/// Slack absorbed before rounding the evaluation count up, so that
/// 0.3 × 10 = 3.0000000000000004 still yields 3 races
const EVAL_COUNT_TOLERANCE: f64 = 1e-9;

/// Number of evaluation races: `ceil(fraction × groups)`, ignoring float noise
pub fn eval_group_count(eval_fraction: f64, total_groups: usize) -> usize {
    let exact = eval_fraction * total_groups as f64;
    (exact - EVAL_COUNT_TOLERANCE).ceil().max(0.0) as usize
}

/// Seeded race-level splitter
pub struct GroupSplitter {
    eval_fraction: f64,
    seed: u64,
}

impl GroupSplitter {
    pub fn new(config: &SplitConfig) -> Result<Self> {
        validate_fraction(config.eval_fraction)?;
        Ok(Self {
            eval_fraction: config.eval_fraction,
            seed: config.seed,
        })
    }

    /// (train, eval) race ids, drawn from the sorted distinct ids
    pub fn eval_races<'a, I>(&self, race_ids: I) -> Result<(BTreeSet<String>, BTreeSet<String>)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let distinct: BTreeSet<&str> = race_ids.into_iter().collect();
        let mut groups: Vec<&str> = distinct.into_iter().collect();

        let eval_count = eval_group_count(self.eval_fraction, groups.len());
        validate_partition(groups.len(), eval_count)?;

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        groups.shuffle(&mut rng);

        let eval = groups[..eval_count].iter().map(|s| s.to_string()).collect();
        let train = groups[eval_count..].iter().map(|s| s.to_string()).collect();
        Ok((train, eval))
    }

    /// Partition rows by race, keeping input order inside each partition
    pub fn split<T: Clone>(&self, rows: &[T], race_id: impl Fn(&T) -> &str) -> Result<GroupSplit<T>> {
        let (train_races, eval_races) = self.eval_races(rows.iter().map(&race_id))?;

        let eval_lookup: HashSet<&str> = eval_races.iter().map(String::as_str).collect();
        let (eval, train): (Vec<T>, Vec<T>) = rows
            .iter()
            .cloned()
            .partition(|row| eval_lookup.contains(race_id(row)));

        info!(
            "Split {} races: {} train ({} rows), {} eval ({} rows), seed {}",
            train_races.len() + eval_races.len(),
            train_races.len(),
            train.len(),
            eval_races.len(),
            eval.len(),
            self.seed
        );

        Ok(GroupSplit {
            train,
            eval,
            train_races,
            eval_races,
        })
    }

    pub fn split_features(&self, rows: &[FeatureRow]) -> Result<GroupSplit<FeatureRow>> {
        self.split(rows, |r| r.race_id.as_str())
    }
}
