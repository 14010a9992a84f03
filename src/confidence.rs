//! Confidence values and aggregation.
//!
//! Confidence is an integer score in `[0, 100]`. A derived relationship is
//! only as confident as its weakest supporting link, so every rule combines
//! its inputs with [`compute_rule_confidence`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A confidence score in `[0, 100]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Confidence(u8);

impl Confidence {
    /// Minimum valid confidence value.
    pub const MIN: Self = Self(0);

    /// Maximum valid confidence value.
    pub const MAX: Self = Self(100);

    /// Creates a new confidence with validation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ConfidenceOutOfRange` if `value` is outside `[0, 100]`.
    pub fn new(value: i64) -> Result<Self, ValidationError> {
        match u8::try_from(value) {
            Ok(v) if v <= Self::MAX.0 => Ok(Self(v)),
            _ => Err(ValidationError::ConfidenceOutOfRange { value }),
        }
    }

    /// Returns the raw score.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Confidence {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Confidence> for u8 {
    fn from(c: Confidence) -> Self {
        c.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Combines the confidences of a rule's inputs into the derived confidence.
///
/// Weakest link: the minimum of the inputs. Order-independent and monotonic.
/// An empty input yields [`Confidence::MIN`].
#[must_use]
pub fn compute_rule_confidence(confidences: &[Confidence]) -> Confidence {
    confidences.iter().copied().min().unwrap_or(Confidence::MIN)
}

/// Combines the confidences of independent contributions to one inferred
/// relationship: the rounded mean.
#[must_use]
pub fn aggregate_contributions(confidences: &[Confidence]) -> Confidence {
    if confidences.is_empty() {
        return Confidence::MIN;
    }
    let sum: u64 = confidences.iter().map(|c| u64::from(c.0)).sum();
    let len = confidences.len() as u64;
    let mean = (sum + len / 2) / len;
    Confidence(u8::try_from(mean).unwrap_or(Confidence::MAX.0).min(Confidence::MAX.0))
}
