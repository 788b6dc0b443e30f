//! Parsed, immutable time series of one capture.

pub mod parse;
pub mod record;
pub mod sample;

use std::collections::HashMap;

use thiserror::Error;

pub use self::parse::{parse, parse_text, EmptyReason, ParseError, ParseOptions, ParsedCapture};
pub use self::sample::{Sample, SampleValue, NO_DATA};

/// Errors from looking up data in a [`Capture`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown metric: {name}")]
    UnknownMetric { name: String },
}

/// Ordered samples of one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSeries {
    name: String,
    samples: Vec<Sample>,
}

impl MetricSeries {
    pub(crate) fn with_capacity(name: String, capacity: usize) -> Self {
        Self {
            name,
            samples: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Producer-assigned metric identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Samples in capture order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }
}

/// All series gathered during one sampling run.
///
/// Built once by the parser and never mutated afterwards, so it can be read
/// from any number of consumers without locking. Every series has the same
/// length.
#[derive(Debug, Clone)]
pub struct Capture {
    series: Vec<MetricSeries>,
    index: HashMap<String, usize>,
    was_cancelled: bool,
    dropped_partial_row: bool,
}

impl Capture {
    /// Assemble a capture from parsed series.
    ///
    /// Callers guarantee unique names and equal series lengths.
    pub(crate) fn new(
        series: Vec<MetricSeries>,
        was_cancelled: bool,
        dropped_partial_row: bool,
    ) -> Self {
        debug_assert!(series.windows(2).all(|w| w[0].len() == w[1].len()));

        let index = series
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        Self {
            series,
            index,
            was_cancelled,
            dropped_partial_row,
        }
    }

    /// Metric names in header order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.iter().map(|s| s.name.as_str())
    }

    /// Look up the series for a metric.
    pub fn series(&self, name: &str) -> Result<&MetricSeries, StoreError> {
        self.index
            .get(name)
            .and_then(|&i| self.series.get(i))
            .ok_or_else(|| StoreError::UnknownMetric {
                name: name.to_string(),
            })
    }

    /// Series in header order.
    pub fn iter(&self) -> impl Iterator<Item = &MetricSeries> {
        self.series.iter()
    }

    /// Number of metrics.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Number of complete rows, which is the length of every series.
    pub fn row_count(&self) -> usize {
        self.series.first().map_or(0, MetricSeries::len)
    }

    /// Whether sampling was stopped early by the operator.
    pub fn was_cancelled(&self) -> bool {
        self.was_cancelled
    }

    /// Whether a truncated trailing row was discarded while parsing.
    pub fn dropped_partial_row(&self) -> bool {
        self.dropped_partial_row
    }
}
