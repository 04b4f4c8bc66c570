//! Field normalization for raw race data
//!
//! Source exports carry numbers with grouping spaces, French decimal commas,
//! chronometer notation (`1'30''50`) and free-text placings. Every function
//! here is total: malformed input becomes `None`, never a panic and never a
//! silent zero.
//!
//! # Example
//!
//! ```
//! use racerank::data::parser::{parse_weight, FieldParser};
//!
//! let parser = FieldParser::new().unwrap();
//! assert_eq!(parser.parse_time_seconds("1'30''50"), Some(90.5));
//! assert_eq!(parse_weight("57,5"), Some(57.5));
//! ```

use chrono::NaiveDate;
use regex::Regex;

use crate::error::Result;
use crate::models::FinishRank;

/// Placing codes published for entrants that did not finish
const NON_FINISHER_CODES: [&str; 8] = ["DAI", "DIS", "NP", "ARR", "TOMBE", "RET", "ABS", "DISQ"];

/// Characters used as thousands separators in the sources
fn is_grouping_char(c: char) -> bool {
    c.is_whitespace() || c == '\u{a0}' || c == '\u{202f}'
}

/// Trimmed text, `None` when empty
pub fn parse_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Numeric value with grouping separators removed
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| !is_grouping_char(*c)).collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Numeric value that must be physically non-negative (purse, wind speed...)
pub fn parse_non_negative(raw: &str) -> Option<f64> {
    parse_number(raw).filter(|v| *v >= 0.0)
}

/// Non-negative whole count (entrants, race number)
pub fn parse_count(raw: &str) -> Option<u32> {
    parse_non_negative(raw)
        .filter(|v| v.fract() == 0.0 && *v <= u32::MAX as f64)
        .map(|v| v as u32)
}

/// Weight-like value: decimal comma accepted
pub fn parse_weight(raw: &str) -> Option<f64> {
    parse_non_negative(&raw.replace(',', "."))
}

/// ISO-8601 calendar date, a trailing time component is ignored
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = match trimmed.char_indices().nth(10) {
        Some((idx, 'T')) | Some((idx, ' ')) => &trimmed[..idx],
        _ => trimmed,
    };
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Join-key normalization: `"7"`, `" 7 "` and `"7.0"` compare equal
pub fn parse_key(raw: &str) -> Option<String> {
    let text = parse_text(raw)?;
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 => {
            Some(format!("{}", v as i64))
        }
        _ => Some(text),
    }
}

/// Parser for fields that need pattern matching
pub struct FieldParser {
    time_pattern: Regex,
    rank_pattern: Regex,
}

impl FieldParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            // [minutes'] seconds [''fraction]
            time_pattern: Regex::new(r"^(?:(\d+)')?(\d{1,2})(?:''(\d{1,3}))?$")?,
            // integer placing with an optional French ordinal suffix
            rank_pattern: Regex::new(r"(?i)^(\d+)\s*(?:er|ère|re|ème|e)?$")?,
        })
    }

    /// Chronometer notation to seconds
    ///
    /// `M'SS''HH`, `SS''HH` and `M'SS` are accepted, as is a plain number of
    /// seconds. Seconds must stay below 60 once minutes are given.
    pub fn parse_time_seconds(&self, raw: &str) -> Option<f64> {
        let compact: String = raw
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| match c {
                '\u{2019}' | '\u{2032}' => '\'',
                other => other,
            })
            .collect::<String>()
            .replace(['"', '\u{2033}'], "''");

        if compact.is_empty() {
            return None;
        }

        if !compact.contains('\'') {
            return parse_non_negative(&compact);
        }

        let caps = self.time_pattern.captures(&compact)?;
        let minutes = caps.get(1);
        let fraction = caps.get(3);

        // "12" alone was handled above; a lone quote pattern is malformed
        if minutes.is_none() && fraction.is_none() {
            return None;
        }

        let seconds: f64 = caps.get(2)?.as_str().parse().ok()?;
        let minutes: f64 = match minutes {
            Some(m) => {
                if seconds >= 60.0 {
                    return None;
                }
                m.as_str().parse().ok()?
            }
            None => 0.0,
        };
        let fraction: f64 = match fraction {
            Some(f) => format!("0.{}", f.as_str()).parse().ok()?,
            None => 0.0,
        };

        Some(minutes * 60.0 + seconds + fraction)
    }

    /// Free-text placing to a finishing rank
    ///
    /// `"1"`, `"1er"`, `"3e"` are placings; `DAI`, `NP`, `0`... are
    /// non-finishers; anything else is missing.
    pub fn parse_rank(&self, raw: &str) -> Option<FinishRank> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let upper = trimmed.to_uppercase();
        if NON_FINISHER_CODES.iter().any(|code| upper.starts_with(code)) {
            return Some(FinishRank::NonFinisher);
        }

        let caps = self.rank_pattern.captures(trimmed)?;
        match caps.get(1)?.as_str().parse::<u32>().ok()? {
            0 => Some(FinishRank::NonFinisher),
            p => Some(FinishRank::Placed(p)),
        }
    }
}
