//! Temporal periods for relationships.
//!
//! A relationship is valid over a period bounded by optional `start_time`
//! and `stop_time`. A missing bound is unbounded in that direction.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An open or bounded time interval.
///
/// `start <= end` is not enforced: intersecting two disjoint periods yields a
/// degenerate period (see [`Period::is_degenerate`]).
///
/// # Examples
///
/// ```
/// use stixrule::time::{build_period_from_dates, compute_range_intersection};
/// use chrono::{TimeZone, Utc};
///
/// let a = build_period_from_dates(Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()), None);
/// let b = build_period_from_dates(None, Some(Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap()));
/// let both = compute_range_intersection(&a, &b);
/// assert!(!both.is_degenerate());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    /// Start of the period. None means since forever.
    pub start: Option<DateTime<Utc>>,

    /// End of the period. None means open-ended.
    pub end: Option<DateTime<Utc>>,
}

impl Period {
    /// A period with no bounds.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// True when neither bound is set.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// True when both bounds are set and the start is after the end.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        matches!((self.start, self.end), (Some(start), Some(end)) if start > end)
    }

    /// Check if a timestamp falls within this period (bounds inclusive).
    #[must_use]
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| time >= s) && self.end.map_or(true, |e| time <= e)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.start, self.end) {
            (Some(s), Some(e)) => write!(f, "[{s} → {e}]"),
            (Some(s), None) => write!(f, "[{s} → ∞)"),
            (None, Some(e)) => write!(f, "(-∞ → {e}]"),
            (None, None) => write!(f, "(-∞ → ∞)"),
        }
    }
}

/// Builds a period from optional start and stop timestamps, unchanged.
#[must_use]
pub const fn build_period_from_dates(
    start: Option<DateTime<Utc>>,
    stop: Option<DateTime<Utc>>,
) -> Period {
    Period { start, end: stop }
}

/// Intersects two periods.
///
/// The start is the latest of both starts (None is −∞), the end the earliest
/// of both ends (None is +∞). The result is not validated.
#[must_use]
pub fn compute_range_intersection(p1: &Period, p2: &Period) -> Period {
    let start = match (p1.start, p2.start) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    };
    let end = match (p1.end, p2.end) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    };
    Period { start, end }
}
