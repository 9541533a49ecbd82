//! Step-pattern DSL for scheduling proofs, snapshots, info lines and stops.

use std::str::FromStr;
use thiserror::Error;

/// A compiled predicate over the step counter.
///
/// Parsed from `never`, `always`, `=N` (exactly step N) or `%N` (every N
/// steps, N ≥ 1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StepPattern {
    #[default]
    Never,
    Always,
    Exactly(u64),
    EveryN(u64),
}

impl StepPattern {
    pub fn matches(&self, step: u64) -> bool {
        match *self {
            StepPattern::Never => false,
            StepPattern::Always => true,
            StepPattern::Exactly(n) => step == n,
            StepPattern::EveryN(n) => step % n == 0,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PatternParseError {
    #[error("invalid step pattern {0:?}, expected 'never', 'always', '=N' or '%N'")]
    Unrecognized(String),
    #[error("invalid step number in pattern {0:?}")]
    BadNumber(String),
    #[error("step interval must be at least 1")]
    ZeroInterval,
}

impl FromStr for StepPattern {
    type Err = PatternParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(StepPattern::Never),
            "always" => Ok(StepPattern::Always),
            _ => {
                if let Some(num) = s.strip_prefix('=') {
                    let n = num
                        .parse::<u64>()
                        .map_err(|_| PatternParseError::BadNumber(s.to_string()))?;
                    Ok(StepPattern::Exactly(n))
                } else if let Some(num) = s.strip_prefix('%') {
                    let n = num
                        .parse::<u64>()
                        .map_err(|_| PatternParseError::BadNumber(s.to_string()))?;
                    if n == 0 {
                        return Err(PatternParseError::ZeroInterval);
                    }
                    Ok(StepPattern::EveryN(n))
                } else {
                    Err(PatternParseError::Unrecognized(s.to_string()))
                }
            }
        }
    }
}
