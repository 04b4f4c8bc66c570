//! Ranking Metrics
//!
//! Race-grouped top-1 accuracy, error gaps for misranked races, and
//! score diagnostics over externally predicted scores.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::data::history::median;
use crate::models::ScoredRow;

/// Per-race evaluation outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceOutcome {
    pub race_id: String,
    pub entrants: usize,
    /// Index within the race of the top-scored row
    pub predicted_index: usize,
    pub top_score: f64,
    /// Score of the first label-1 row, if the race has one
    pub winner_score: Option<f64>,
    pub correct: bool,
    /// Only for misranked races with a true winner
    pub gap: Option<f64>,
}

/// Distribution of defined error gaps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GapSummary {
    pub count: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub max: Option<f64>,
}

impl GapSummary {
    pub fn from_gaps(gaps: &[f64]) -> Self {
        if gaps.is_empty() {
            return Self::default();
        }
        Self {
            count: gaps.len(),
            mean: Some(gaps.iter().sum::<f64>() / gaps.len() as f64),
            median: median(gaps),
            max: gaps.iter().copied().reduce(f64::max),
        }
    }
}

/// Ranking evaluation report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingReport {
    pub races: usize,
    pub correct_races: usize,
    /// Mean per-race correctness; 0.0 when there are no races
    pub top1_accuracy: f64,

    // Error gap
    pub gaps: Vec<f64>,
    /// Misranked races without a usable gap: no true winner, or a
    /// non-finite top or winner score
    pub undefined_gaps: usize,
    pub gap_summary: GapSummary,

    // Score diagnostics
    pub roc_auc: Option<f64>,
    pub mean_winner_score: Option<f64>,
    pub mean_non_winner_score: Option<f64>,

    pub outcomes: Vec<RaceOutcome>,
}

/// Rows grouped by race id, races in first-appearance order
fn group_by_race(rows: &[ScoredRow]) -> Vec<(&str, Vec<&ScoredRow>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&ScoredRow>)> = Vec::new();
    for row in rows {
        let idx = *index.entry(row.race_id.as_str()).or_insert_with(|| {
            groups.push((row.race_id.as_str(), Vec::new()));
            groups.len() - 1
        });
        groups[idx].1.push(row);
    }
    groups
}

/// First row holding the maximum score; NaN scores only win when all are NaN
pub fn top_scored_index(scores: &[f64]) -> usize {
    let mut best: Option<(usize, f64)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((i, score)),
        }
    }
    best.map_or(0, |(i, _)| i)
}

fn evaluate_race(race_id: &str, rows: &[&ScoredRow]) -> RaceOutcome {
    let scores: Vec<f64> = rows.iter().map(|r| r.score).collect();
    let predicted_index = top_scored_index(&scores);
    let top_score = scores[predicted_index];
    let winner_score = rows.iter().find(|r| r.label == 1).map(|r| r.score);
    let correct = rows[predicted_index].label == 1;

    let gap = if correct {
        None
    } else {
        winner_score
            .map(|w| top_score - w)
            .filter(|g| g.is_finite())
    };

    RaceOutcome {
        race_id: race_id.to_string(),
        entrants: rows.len(),
        predicted_index,
        top_score,
        winner_score,
        correct,
        gap,
    }
}

/// Rank-based ROC AUC with average ranks for ties
///
/// Rows with a non-finite score are ignored; `None` when either class is
/// absent.
pub fn roc_auc(rows: &[ScoredRow]) -> Option<f64> {
    let mut scored: Vec<(f64, bool)> = rows
        .iter()
        .filter(|r| r.score.is_finite())
        .map(|r| (r.score, r.label == 1))
        .collect();
    let positives = scored.iter().filter(|(_, p)| *p).count();
    let negatives = scored.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    scored.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < scored.len() {
        let mut end = start;
        while end + 1 < scored.len() && scored[end + 1].0 == scored[start].0 {
            end += 1;
        }
        // ranks are 1-based; ties share the mean rank of their run
        let average_rank = (start + end) as f64 / 2.0 + 1.0;
        let tied_positives = scored[start..=end].iter().filter(|(_, p)| *p).count();
        positive_rank_sum += average_rank * tied_positives as f64;
        start = end + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Evaluate scored rows race by race
pub fn evaluate_rankings(rows: &[ScoredRow]) -> RankingReport {
    if rows.is_empty() {
        return RankingReport::default();
    }

    let outcomes: Vec<RaceOutcome> = group_by_race(rows)
        .iter()
        .map(|(race_id, race_rows)| evaluate_race(race_id, race_rows))
        .collect();

    let races = outcomes.len();
    let correct_races = outcomes.iter().filter(|o| o.correct).count();
    let top1_accuracy = correct_races as f64 / races as f64;

    let gaps: Vec<f64> = outcomes.iter().filter_map(|o| o.gap).collect();
    let undefined_gaps = outcomes
        .iter()
        .filter(|o| !o.correct && o.gap.is_none())
        .count();
    let gap_summary = GapSummary::from_gaps(&gaps);

    let finite = rows.iter().filter(|r| r.score.is_finite());
    let mean_winner_score = mean(finite.clone().filter(|r| r.label == 1).map(|r| r.score));
    let mean_non_winner_score = mean(finite.filter(|r| r.label != 1).map(|r| r.score));

    RankingReport {
        races,
        correct_races,
        top1_accuracy,
        gaps,
        undefined_gaps,
        gap_summary,
        roc_auc: roc_auc(rows),
        mean_winner_score,
        mean_non_winner_score,
        outcomes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn race(id: &str, labels: &[u8], scores: &[f64]) -> Vec<ScoredRow> {
        labels
            .iter()
            .zip(scores)
            .map(|(&l, &s)| ScoredRow::new(id, l, s))
            .collect()
    }

    #[test]
    fn test_misranked_race_gap() {
        let rows = race("R", &[0, 0, 1], &[0.9, 0.2, 0.85]);
        let report = evaluate_rankings(&rows);

        assert_eq!(report.races, 1);
        assert_eq!(report.top1_accuracy, 0.0);
        assert_eq!(report.gaps.len(), 1);
        assert!((report.gaps[0] - 0.05).abs() < 1e-9);
        assert_eq!(report.outcomes[0].predicted_index, 0);
    }

    #[test]
    fn test_two_race_aggregate() {
        let mut rows = race("R", &[0, 0, 1], &[0.9, 0.2, 0.85]);
        rows.extend(race("R2", &[0, 1], &[0.3, 0.7]));
        let report = evaluate_rankings(&rows);

        assert_eq!(report.races, 2);
        assert_eq!(report.correct_races, 1);
        assert!((report.top1_accuracy - 0.5).abs() < 1e-12);
        assert_eq!(report.outcomes[1].race_id, "R2");
        assert!(report.outcomes[1].correct);
        assert_eq!(report.outcomes[1].gap, None);
        assert_eq!(report.gap_summary.count, 1);
    }

    #[test]
    fn test_tie_breaks_to_first_row() {
        let report = evaluate_rankings(&race("R", &[1, 0], &[0.5, 0.5]));
        assert_eq!(report.top1_accuracy, 1.0);

        let report = evaluate_rankings(&race("R", &[0, 1], &[0.5, 0.5]));
        assert_eq!(report.top1_accuracy, 0.0);
        assert_eq!(report.gaps, vec![0.0]);
    }

    #[test]
    fn test_missing_winner_is_undefined_not_zero() {
        let mut rows = race("R", &[0, 0], &[0.4, 0.6]);
        rows.extend(race("R2", &[1, 0], &[0.8, 0.1]));
        let report = evaluate_rankings(&rows);

        assert_eq!(report.races, 2);
        assert!((report.top1_accuracy - 0.5).abs() < 1e-12);
        assert!(report.gaps.is_empty());
        assert_eq!(report.undefined_gaps, 1);
        assert_eq!(report.gap_summary, GapSummary::default());
    }

    #[test]
    fn test_nan_winner_score_is_undefined_gap() {
        let report = evaluate_rankings(&race("R", &[0, 1], &[0.4, f64::NAN]));

        assert!(!report.outcomes[0].correct);
        assert_eq!(report.outcomes[0].gap, None);
        assert!(report.gaps.is_empty());
        assert_eq!(report.undefined_gaps, 1);
    }

    #[test]
    fn test_single_entrant() {
        let report = evaluate_rankings(&race("R", &[1], &[0.1]));
        assert_eq!(report.top1_accuracy, 1.0);
        assert!(report.gaps.is_empty());
        assert_eq!(report.undefined_gaps, 0);
    }

    #[test]
    fn test_interleaved_rows_grouped() {
        let rows = vec![
            ScoredRow::new("A", 0, 0.9),
            ScoredRow::new("B", 1, 0.8),
            ScoredRow::new("A", 1, 0.3),
            ScoredRow::new("B", 0, 0.1),
        ];
        let report = evaluate_rankings(&rows);

        assert_eq!(report.outcomes[0].race_id, "A");
        assert_eq!(report.outcomes[0].entrants, 2);
        assert!(!report.outcomes[0].correct);
        assert!((report.outcomes[0].gap.unwrap() - 0.6).abs() < 1e-9);
        assert!(report.outcomes[1].correct);
    }

    #[test]
    fn test_nan_scores_never_win() {
        assert_eq!(top_scored_index(&[f64::NAN, 0.2, 0.1]), 1);
        assert_eq!(top_scored_index(&[f64::NAN, f64::NAN]), 0);
        assert_eq!(top_scored_index(&[0.3, 0.7, 0.7]), 1);
    }

    #[test]
    fn test_empty_input() {
        let report = evaluate_rankings(&[]);
        assert_eq!(report.races, 0);
        assert_eq!(report.top1_accuracy, 0.0);
        assert_eq!(report.roc_auc, None);
    }

    #[test]
    fn test_roc_auc() {
        let perfect = race("R", &[1, 0, 0], &[0.9, 0.2, 0.1]);
        assert_eq!(roc_auc(&perfect), Some(1.0));

        let inverted = race("R", &[0, 0, 1], &[0.9, 0.2, 0.1]);
        assert_eq!(roc_auc(&inverted), Some(0.0));

        let tied = race("R", &[1, 0], &[0.5, 0.5]);
        assert_eq!(roc_auc(&tied), Some(0.5));

        assert_eq!(roc_auc(&race("R", &[0, 0], &[0.5, 0.1])), None);
    }

    #[test]
    fn test_gap_summary_and_score_means() {
        let mut rows = race("R1", &[0, 1], &[0.9, 0.5]);
        rows.extend(race("R2", &[0, 1], &[0.8, 0.6]));
        rows.extend(race("R3", &[0, 1], &[0.7, 0.6]));
        let report = evaluate_rankings(&rows);

        let summary = &report.gap_summary;
        assert_eq!(summary.count, 3);
        assert!((summary.mean.unwrap() - (0.4 + 0.2 + 0.1) / 3.0).abs() < 1e-9);
        assert!((summary.median.unwrap() - 0.2).abs() < 1e-9);
        assert!((summary.max.unwrap() - 0.4).abs() < 1e-9);

        assert!((report.mean_winner_score.unwrap() - (0.5 + 0.6 + 0.6) / 3.0).abs() < 1e-9);
        assert!((report.mean_non_winner_score.unwrap() - 0.8).abs() < 1e-9);
    }
}
