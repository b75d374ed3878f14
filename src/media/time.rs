//! Rational media timestamps

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A timestamp expressed as `value / timescale` seconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
}

impl MediaTime {
    /// Marker for an absent timestamp (timescale 0)
    pub const INVALID: Self = Self {
        value: 0,
        timescale: 0,
    };

    pub const ZERO: Self = Self {
        value: 0,
        timescale: 1,
    };

    pub const fn new(value: i64, timescale: i32) -> Self {
        Self { value, timescale }
    }

    /// Timestamp from a count of nanoseconds
    pub const fn from_nanos(nanos: i64) -> Self {
        Self::new(nanos, 1_000_000_000)
    }

    pub fn from_seconds(seconds: f64, timescale: i32) -> Self {
        Self::new((seconds * f64::from(timescale)).round() as i64, timescale)
    }

    pub const fn is_valid(&self) -> bool {
        self.timescale > 0
    }

    pub fn seconds(&self) -> f64 {
        if !self.is_valid() {
            return f64::NAN;
        }
        self.value as f64 / f64::from(self.timescale)
    }

    /// Rescale to another timescale, rounding toward zero
    pub fn convert_scale(&self, timescale: i32) -> Self {
        if !self.is_valid() || timescale <= 0 {
            return Self::INVALID;
        }
        let value = i128::from(self.value) * i128::from(timescale) / i128::from(self.timescale);
        Self::new(value as i64, timescale)
    }

    /// Offset between two timestamps, in this timestamp's timescale
    pub fn saturating_sub(&self, other: &Self) -> Self {
        if !self.is_valid() || !other.is_valid() {
            return Self::INVALID;
        }
        let other = other.convert_scale(self.timescale);
        Self::new(self.value.saturating_sub(other.value), self.timescale)
    }

    fn cross(&self, other: &Self) -> (i128, i128) {
        (
            i128::from(self.value) * i128::from(other.timescale),
            i128::from(other.value) * i128::from(self.timescale),
        )
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::INVALID
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    /// Invalid timestamps sort before every valid one and equal each other
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => Ordering::Equal,
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            (true, true) => {
                let (lhs, rhs) = self.cross(other);
                lhs.cmp(&rhs)
            }
        }
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}/{}", self.value, self.timescale)
        } else {
            write!(f, "invalid")
        }
    }
}
