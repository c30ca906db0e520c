//! Weighted prize selection.
//!
//! Prizes are chosen with a cumulative-distribution scan over normalized
//! weights. The draw value comes from a seed derived from, but not equal to,
//! the decision seed so that the prize choice is independent of how close the
//! caller was to the win boundary.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Label used when no prize list is configured or every weight is zero.
pub const FALLBACK_PRIZE_LABEL: &str = "500 fichas";

/// Suffix appended to the decision seed to derive the prize draw seed.
pub const PRIZE_SEED_SUFFIX: &str = ":prize";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prize {
    pub label: String,
    pub weight: u32,
}

impl Prize {
    pub fn new(label: impl Into<String>, weight: u32) -> Self {
        Self {
            label: label.into(),
            weight,
        }
    }

    fn fallback() -> Self {
        Self::new(FALLBACK_PRIZE_LABEL, 1)
    }
}

impl fmt::Display for Prize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.weight)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrizeParseError {
    #[error("prize list is empty")]
    Empty,
    #[error("prize entry {0:?} is missing a label")]
    MissingLabel(String),
    #[error("prize entry {entry:?} has invalid weight {weight:?}")]
    InvalidWeight { entry: String, weight: String },
    #[error("prize {0:?} has zero weight")]
    ZeroWeight(String),
}

/// Immutable, cheaply cloneable prize list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrizeTable {
    prizes: Arc<[Prize]>,
}

impl PrizeTable {
    pub fn new(prizes: Vec<Prize>) -> Self {
        Self {
            prizes: prizes.into(),
        }
    }

    pub fn prizes(&self) -> &[Prize] {
        &self.prizes
    }

    pub fn select(&self, draw: f64) -> Prize {
        select(&self.prizes, draw)
    }
}

impl Default for PrizeTable {
    fn default() -> Self {
        Self::new(vec![Prize::fallback()])
    }
}

impl fmt::Display for PrizeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, prize) in self.prizes.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{prize}")?;
        }
        Ok(())
    }
}

/// Parses `label:weight` entries separated by commas, e.g.
/// `500 fichas:70,1000 fichas:25,bono x2:5`. A missing weight means 1.
impl FromStr for PrizeTable {
    type Err = PrizeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut prizes = Vec::new();
        for entry in value.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let (label, weight) = match entry.rsplit_once(':') {
                Some((label, weight)) => {
                    let weight = weight.trim().parse::<u32>().map_err(|_| {
                        PrizeParseError::InvalidWeight {
                            entry: entry.to_string(),
                            weight: weight.to_string(),
                        }
                    })?;
                    (label.trim(), weight)
                }
                None => (entry, 1),
            };
            if label.is_empty() {
                return Err(PrizeParseError::MissingLabel(entry.to_string()));
            }
            if weight == 0 {
                return Err(PrizeParseError::ZeroWeight(label.to_string()));
            }
            prizes.push(Prize::new(label, weight));
        }
        if prizes.is_empty() {
            return Err(PrizeParseError::Empty);
        }
        Ok(Self::new(prizes))
    }
}

/// Derive the prize draw seed from a decision seed.
pub fn prize_seed(decision_seed: &str) -> String {
    format!("{decision_seed}{PRIZE_SEED_SUFFIX}")
}

/// Select the prize whose cumulative share first reaches `draw`.
///
/// `draw` is expected in `[0, 1)`; out-of-range values are clamped. Zero-weight
/// entries are never selected. The last positive-weight prize catches any
/// draw that floating-point accumulation leaves unmatched.
pub fn select(prizes: &[Prize], draw: f64) -> Prize {
    let total: u64 = prizes.iter().map(|prize| u64::from(prize.weight)).sum();
    if total == 0 {
        return Prize::fallback();
    }
    let draw = if draw.is_nan() { 0.0 } else { draw.clamp(0.0, 1.0) };

    let mut cumulative = 0.0;
    let mut last = None;
    for prize in prizes.iter().filter(|prize| prize.weight > 0) {
        cumulative += f64::from(prize.weight) / total as f64;
        if cumulative >= draw {
            return prize.clone();
        }
        last = Some(prize);
    }
    last.cloned().unwrap_or_else(Prize::fallback)
}
