//! Entrant scoring
//!
//! The ranking model lives outside this crate. `FormScorer` is a
//! hand-weighted stand-in built from historical form so the evaluation
//! stage can run end to end without one.

use crate::data::features::FeatureRow;
use crate::models::ScoredRow;

/// Anything that assigns a ranking score to a Feature Row
pub trait Scorer {
    /// Higher means more likely to win
    fn score(&self, row: &FeatureRow) -> f64;

    fn score_rows(&self, rows: &[FeatureRow]) -> Vec<ScoredRow> {
        rows.iter()
            .map(|row| ScoredRow::new(row.race_id.as_str(), row.is_winner, self.score(row)))
            .collect()
    }
}

/// Form-based baseline scorer
pub struct FormScorer {
    avg_rank_weight: f64,
    podium_weight: f64,
    speed_weight: f64,
    experience_weight: f64,
}

impl FormScorer {
    pub fn new() -> Self {
        Self {
            avg_rank_weight: -0.3,
            podium_weight: 2.0,
            speed_weight: 0.02,
            experience_weight: 0.01,
        }
    }
}

impl Scorer for FormScorer {
    fn score(&self, row: &FeatureRow) -> f64 {
        let h = &row.historical;
        let mut score = 0.0;
        score += h.horse_avg_rank * self.avg_rank_weight;
        score += h.horse_podium_rate * self.podium_weight;
        score += h.horse_avg_max_speed * self.speed_weight;
        // long careers saturate
        score += (h.horse_races.min(50) as f64) * self.experience_weight;
        score
    }
}

impl Default for FormScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::features::{
        BaseFeatures, CategoricalFeatures, RatioFeatures, TemporalFeatures,
    };
    use crate::data::history::HistoricalFeatures;
    use crate::models::FinishRank;
    use chrono::NaiveDate;

    fn row(race_id: &str, winner: bool, historical: HistoricalFeatures) -> FeatureRow {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let base = BaseFeatures {
            entrant_count: 8,
            purse: 30000.0,
            temperature: 18.0,
            wind_speed: 5.0,
            weight: None,
            betting_pool: None,
        };
        FeatureRow {
            race_id: race_id.to_string(),
            bib_number: "1".to_string(),
            horse: "Alpha".to_string(),
            date,
            jockey: None,
            trainer: None,
            lane: None,
            prize_name: None,
            margin: None,
            finishing_rank: if winner {
                FinishRank::Placed(1)
            } else {
                FinishRank::Placed(4)
            },
            ratios: RatioFeatures::compute(&base, &historical),
            base,
            categorical: CategoricalFeatures {
                venue: "Vincennes".to_string(),
                style: "Attelé".to_string(),
                discipline: "Trot".to_string(),
                track_condition: "Bon".to_string(),
                sky_condition: "Clair".to_string(),
                wind_direction: "Ouest".to_string(),
            },
            tracking: None,
            temporal: TemporalFeatures::from_date(date),
            historical,
            is_winner: u8::from(winner),
        }
    }

    #[test]
    fn test_better_form_scores_higher() {
        let scorer = FormScorer::new();
        let strong = row(
            "R1",
            true,
            HistoricalFeatures {
                horse_races: 10,
                horse_avg_rank: 2.0,
                horse_std_rank: 1.0,
                horse_podium_rate: 0.7,
                horse_avg_max_speed: 58.0,
            },
        );
        let weak = row(
            "R1",
            false,
            HistoricalFeatures {
                horse_races: 10,
                horse_avg_rank: 7.0,
                horse_std_rank: 2.0,
                horse_podium_rate: 0.1,
                horse_avg_max_speed: 52.0,
            },
        );
        assert!(scorer.score(&strong) > scorer.score(&weak));
    }

    #[test]
    fn test_score_rows_carries_labels() {
        let scorer = FormScorer::default();
        let rows = vec![
            row("R1", true, HistoricalFeatures::default()),
            row("R1", false, HistoricalFeatures::default()),
        ];
        let scored = scorer.score_rows(&rows);

        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].race_id, "R1");
        assert_eq!(scored[0].label, 1);
        assert_eq!(scored[1].label, 0);
        assert_eq!(scored[0].score, scored[1].score);
    }
}
