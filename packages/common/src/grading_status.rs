use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Grading status of a submission.
///
/// Statuses only move forward: `Pending` -> `SystemGraded` -> `Graded`.
/// `Graded` is terminal and is the only status under which a final score exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GradingStatus {
    /// No automatic result yet.
    #[serde(rename = "pending")]
    #[default]
    Pending,
    /// Automatic result present, waiting on an instructor (or none required yet).
    #[serde(rename = "system graded")]
    SystemGraded,
    /// Final score fixed.
    #[serde(rename = "graded")]
    Graded,
}

impl GradingStatus {
    /// Returns true if grading is complete and a final score is recorded.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Graded)
    }

    /// Returns true if moving from `self` to `next` does not go backward.
    ///
    /// Staying in place is allowed (a re-grade keeps `Graded`).
    pub fn can_advance_to(&self, next: GradingStatus) -> bool {
        next >= *self
    }

    /// All possible status values.
    pub const ALL: &'static [GradingStatus] = &[Self::Pending, Self::SystemGraded, Self::Graded];

    /// Returns the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::SystemGraded => "system graded",
            Self::Graded => "graded",
        }
    }
}

impl fmt::Display for GradingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid grading status string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid grading status '{invalid}'. Valid values: pending, system graded, graded")]
pub struct ParseGradingStatusError {
    invalid: String,
}

impl FromStr for GradingStatus {
    type Err = ParseGradingStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "system graded" => Ok(Self::SystemGraded),
            "graded" => Ok(Self::Graded),
            _ => Err(ParseGradingStatusError {
                invalid: s.to_string(),
            }),
        }
    }
}
