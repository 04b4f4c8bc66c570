use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Finishing state of an entrant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishRank {
    /// Finished at the given position (1 = winner)
    Placed(u32),
    /// Disqualified, pulled up, fell, did not start...
    NonFinisher,
}

impl FinishRank {
    pub fn position(&self) -> Option<u32> {
        match self {
            FinishRank::Placed(p) => Some(*p),
            FinishRank::NonFinisher => None,
        }
    }

    pub fn is_winner(&self) -> bool {
        matches!(self, FinishRank::Placed(1))
    }

    pub fn is_podium(&self) -> bool {
        matches!(self, FinishRank::Placed(p) if *p <= 3)
    }
}

impl fmt::Display for FinishRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishRank::Placed(p) => write!(f, "{}", p),
            FinishRank::NonFinisher => write!(f, "NF"),
        }
    }
}

/// Weather snapshot taken at the start of a race
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    pub temperature: Option<f64>,
    pub sky_condition: Option<String>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<String>,
}

/// Race-level record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Race {
    pub race_id: Option<String>,
    pub date: Option<NaiveDate>,
    /// Meeting identifier within the day (e.g. "R1")
    pub meeting: Option<String>,
    pub race_number: Option<u32>,
    pub prize_name: Option<String>,
    pub venue: Option<String>,
    pub style: Option<String>,
    pub discipline: Option<String>,
    pub entrant_count: Option<u32>,
    pub purse: Option<f64>,
    pub track_condition: Option<String>,
    pub weather: Weather,
    pub betting_pool: Option<f64>,
}

impl Race {
    /// Natural key (date, meeting, race number), when all three are known
    pub fn natural_key(&self) -> Option<(NaiveDate, String, u32)> {
        Some((self.date?, self.meeting.clone()?, self.race_number?))
    }
}

/// Per-entrant result of a race
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntrantResult {
    pub race_id: Option<String>,
    pub bib_number: Option<String>,
    pub horse: Option<String>,
    pub jockey: Option<String>,
    pub trainer: Option<String>,
    pub lane: Option<String>,
    /// Weight carried (kg)
    pub weight: Option<f64>,
    pub finishing_rank: Option<FinishRank>,
    /// Margin to the leader, kept as published ("1 L 1/2", "Nez"...)
    pub margin: Option<String>,
}

/// Optional timing data for an entrant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingSample {
    pub race_id: Option<String>,
    pub bib_number: Option<String>,
    /// km/h
    pub max_speed: Option<f64>,
    /// Seconds
    pub official_time: Option<f64>,
    pub sectional_600m: Option<f64>,
    pub sectional_200m: Option<f64>,
    pub sectional_100m: Option<f64>,
    /// Metres
    pub actual_distance: Option<f64>,
    pub distance_behind_winner: Option<f64>,
}

impl TrackingSample {
    /// All seven measurement fields are present
    pub fn is_complete(&self) -> bool {
        self.max_speed.is_some()
            && self.official_time.is_some()
            && self.sectional_600m.is_some()
            && self.sectional_200m.is_some()
            && self.sectional_100m.is_some()
            && self.actual_distance.is_some()
            && self.distance_behind_winner.is_some()
    }
}

/// One externally scored row handed to the ranking evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRow {
    pub race_id: String,
    /// 1 for the true winner, 0 otherwise
    pub label: u8,
    pub score: f64,
}

impl ScoredRow {
    pub fn new(race_id: impl Into<String>, label: u8, score: f64) -> Self {
        Self {
            race_id: race_id.into(),
            label,
            score,
        }
    }
}
