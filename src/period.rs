//! Fiscal period parsing, ordering, and comparison-period arithmetic
//!
//! Accepted expressions are `Q<1-4> <year>` and `FY<year>`. Anything else is
//! a temporal parse error; nothing is guessed at this layer. Lenient
//! inference from document source strings (filenames, headings) lives in
//! [`Period::infer_from_source`] and is used only when retrieval metadata
//! carries no explicit period.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Normalized fiscal period. Immutable value type with a total order:
/// years compare first, and within a year the fiscal-year summary sorts
/// after all four quarters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Period {
    Quarter { year: i32, quarter: u8 },
    FiscalYear { year: i32 },
}

impl Period {
    pub fn quarter(year: i32, quarter: u8) -> Self {
        debug_assert!((1..=4).contains(&quarter));
        Period::Quarter { year, quarter }
    }

    pub fn fiscal_year(year: i32) -> Self {
        Period::FiscalYear { year }
    }

    pub fn year(&self) -> i32 {
        match self {
            Period::Quarter { year, .. } => *year,
            Period::FiscalYear { year } => *year,
        }
    }

    /// Within-year rank: quarters 1-4, fiscal-year summary after them.
    fn rank(&self) -> u8 {
        match self {
            Period::Quarter { quarter, .. } => *quarter,
            Period::FiscalYear { .. } => 5,
        }
    }

    /// Same-quarter prior year (or prior fiscal year).
    pub fn prior_year(&self) -> Period {
        match self {
            Period::Quarter { year, quarter } => Period::Quarter {
                year: year - 1,
                quarter: *quarter,
            },
            Period::FiscalYear { year } => Period::FiscalYear { year: year - 1 },
        }
    }

    /// Immediately preceding quarter. Undefined for fiscal-year periods.
    pub fn prior_quarter(&self) -> Result<Period> {
        match self {
            Period::Quarter { year, quarter: 1 } => Ok(Period::quarter(year - 1, 4)),
            Period::Quarter { year, quarter } => Ok(Period::quarter(*year, quarter - 1)),
            Period::FiscalYear { year } => Err(PipelineError::TemporalParse(format!(
                "prior quarter is undefined for FY{}",
                year
            ))),
        }
    }

    /// Lazy, finite, restartable sequence of all quarter-periods between
    /// `a` and `b` inclusive. Fiscal-year endpoints widen to their Q1/Q4
    /// boundary. Empty when `a` is after `b`.
    pub fn range(a: Period, b: Period) -> QuarterRange {
        let start = match a {
            Period::Quarter { year, quarter } => quarter_index(year, quarter),
            Period::FiscalYear { year } => quarter_index(year, 1),
        };
        let end = match b {
            Period::Quarter { year, quarter } => quarter_index(year, quarter),
            Period::FiscalYear { year } => quarter_index(year, 4),
        };
        QuarterRange { next: start, end }
    }

    /// Number of periods between `self` and `end`, used as the exponent
    /// base `n` for compound growth. Both periods must be the same kind:
    /// quarters count in quarters, fiscal years in years.
    pub fn periods_until(&self, end: &Period) -> Result<i64> {
        match (self, end) {
            (
                Period::Quarter { year: y1, quarter: q1 },
                Period::Quarter { year: y2, quarter: q2 },
            ) => Ok(quarter_index(*y2, *q2) - quarter_index(*y1, *q1)),
            (Period::FiscalYear { year: y1 }, Period::FiscalYear { year: y2 }) => {
                Ok((*y2 - *y1) as i64)
            }
            _ => Err(PipelineError::TemporalParse(format!(
                "cannot count periods between {} and {}",
                self, end
            ))),
        }
    }

    /// Best-effort year/quarter inference from a document source string,
    /// e.g. `FAB-Q3-2024-results.pdf` or `Earnings presentation March 2023`.
    /// Month names map to the quarter they close.
    pub fn infer_from_source(source: &str) -> Option<Period> {
        let lower = source.to_lowercase();

        let year = find_year(&lower)?;
        if let Some(q) = find_quarter_token(&lower) {
            return Some(Period::quarter(year, q));
        }

        const MONTHS: &[(&str, u8)] = &[
            ("march", 1),
            ("mar", 1),
            ("june", 2),
            ("jun", 2),
            ("september", 3),
            ("sept", 3),
            ("sep", 3),
            ("december", 4),
            ("dec", 4),
        ];
        for (name, q) in MONTHS {
            if contains_word(&lower, name) {
                return Some(Period::quarter(year, *q));
            }
        }

        Some(Period::fiscal_year(year))
    }
}

fn quarter_index(year: i32, quarter: u8) -> i64 {
    year as i64 * 4 + (quarter as i64 - 1)
}

fn find_year(lower: &str) -> Option<i32> {
    let bytes = lower.as_bytes();
    for i in 0..bytes.len().saturating_sub(3) {
        if bytes[i] == b'2'
            && bytes[i + 1] == b'0'
            && bytes[i + 2].is_ascii_digit()
            && bytes[i + 3].is_ascii_digit()
        {
            // reject digits that are part of a longer number
            let prev_digit = i > 0 && bytes[i - 1].is_ascii_digit();
            let next_digit = i + 4 < bytes.len() && bytes[i + 4].is_ascii_digit();
            if !prev_digit && !next_digit {
                let year = 2000 + (bytes[i + 2] - b'0') as i32 * 10 + (bytes[i + 3] - b'0') as i32;
                return Some(year);
            }
        }
    }
    None
}

fn find_quarter_token(lower: &str) -> Option<u8> {
    let bytes = lower.as_bytes();
    for i in 0..bytes.len().saturating_sub(1) {
        if bytes[i] == b'q' && (b'1'..=b'4').contains(&bytes[i + 1]) {
            let prev_alnum = i > 0 && bytes[i - 1].is_ascii_alphanumeric();
            let next_alnum = i + 2 < bytes.len() && bytes[i + 2].is_ascii_alphanumeric();
            if !prev_alnum && !next_alnum {
                return Some(bytes[i + 1] - b'0');
            }
        }
    }
    None
}

fn contains_word(haystack: &str, word: &str) -> bool {
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(word) {
        let start = from + pos;
        let end = start + word.len();
        let prev_ok = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let next_ok = end == bytes.len() || !bytes[end].is_ascii_alphanumeric();
        if prev_ok && next_ok {
            return true;
        }
        from = start + 1;
    }
    false
}

impl PartialOrd for Period {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Period {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.year(), self.rank()).cmp(&(other.year(), other.rank()))
    }
}

impl FromStr for Period {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let upper = trimmed.to_uppercase();

        if let Some(rest) = upper.strip_prefix("FY") {
            let year: i32 = rest.trim().parse().map_err(|_| {
                PipelineError::TemporalParse(format!("unparseable fiscal year: {:?}", trimmed))
            })?;
            return Ok(Period::fiscal_year(year));
        }

        if let Some(rest) = upper.strip_prefix('Q') {
            let mut parts = rest.split_whitespace();
            let q: u8 = parts
                .next()
                .and_then(|p| p.parse().ok())
                .filter(|q| (1..=4).contains(q))
                .ok_or_else(|| {
                    PipelineError::TemporalParse(format!("invalid quarter in {:?}", trimmed))
                })?;
            let year: i32 = parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| {
                    PipelineError::TemporalParse(format!("missing year in {:?}", trimmed))
                })?;
            if parts.next().is_some() {
                return Err(PipelineError::TemporalParse(format!(
                    "trailing tokens in {:?}",
                    trimmed
                )));
            }
            return Ok(Period::quarter(year, q));
        }

        Err(PipelineError::TemporalParse(format!(
            "expected 'Q<1-4> <year>' or 'FY<year>', got {:?}",
            trimmed
        )))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Quarter { year, quarter } => write!(f, "Q{} {}", quarter, year),
            Period::FiscalYear { year } => write!(f, "FY{}", year),
        }
    }
}

/// Iterator over quarter-periods, inclusive on both ends. Cloneable, so a
/// range can be restarted.
#[derive(Debug, Clone)]
pub struct QuarterRange {
    next: i64,
    end: i64,
}

impl Iterator for QuarterRange {
    type Item = Period;

    fn next(&mut self) -> Option<Period> {
        if self.next > self.end {
            return None;
        }
        let year = self.next.div_euclid(4) as i32;
        let quarter = (self.next.rem_euclid(4) + 1) as u8;
        self.next += 1;
        Some(Period::quarter(year, quarter))
    }
}
