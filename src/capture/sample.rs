//! Sample values and timestamps.

use std::fmt;

use chrono::NaiveDateTime;

/// Literal used for a "no data" sample when rendering.
pub const NO_DATA: &str = "n/a";

/// Placeholders the producer emits when a counter has no value for a tick.
/// Compared case-insensitively after trimming.
const NO_DATA_TOKENS: &[&str] = &["", "n/a", "-", "null"];

/// Value of a single observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    Number(f64),
    /// The producer reported no value for this tick.
    NoData,
}

impl SampleValue {
    /// Interpret a raw field. Returns `None` when the field is neither a
    /// finite number nor a recognized no-data placeholder.
    pub fn from_field(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();

        if NO_DATA_TOKENS
            .iter()
            .any(|token| trimmed.eq_ignore_ascii_case(token))
        {
            return Some(Self::NoData);
        }

        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => Some(Self::Number(v)),
            _ => None,
        }
    }

    /// Returns the numeric value, or `None` for a no-data sample.
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(v),
            Self::NoData => None,
        }
    }

    pub fn is_no_data(self) -> bool {
        matches!(self, Self::NoData)
    }
}

impl fmt::Display for SampleValue {
    /// Locale-independent rendering: shortest representation that parses
    /// back to the same `f64`, never in exponent form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::NoData => f.write_str(NO_DATA),
        }
    }
}

/// One timestamped observation of a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    timestamp: NaiveDateTime,
    value: SampleValue,
}

impl Sample {
    pub fn new(timestamp: NaiveDateTime, value: SampleValue) -> Self {
        Self { timestamp, value }
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn value(&self) -> SampleValue {
        self.value
    }
}
