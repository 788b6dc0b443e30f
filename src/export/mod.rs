//! Tabular export of metric series.
//!
//! Each series becomes one text file with one `<timestamp>,<value>` row per
//! sample. Rendering is byte-for-byte deterministic: fixed timestamp layout,
//! shortest round-trip decimal values, `\n` line endings on every platform.

pub mod naming;

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capture::{Capture, MetricSeries, Sample, SampleValue};

/// Timestamp layout of exported rows. The fraction is written only when
/// non-zero, and parses back losslessly.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const COLUMN_DELIMITER: char = ',';

/// Errors from exporting or re-importing series.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("export destination for {metric} already exists: {}", path.display())]
    Collision { metric: String, path: PathBuf },

    #[error("writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Render one series as tabular text.
pub fn render_series(series: &MetricSeries) -> String {
    // "YYYY-MM-DD HH:MM:SS.fffffffff,<value>\n" fits comfortably in 48 bytes.
    let mut out = String::with_capacity(series.len() * 48);

    for sample in series.samples() {
        out.push_str(&sample.timestamp().format(TIMESTAMP_FORMAT).to_string());
        out.push(COLUMN_DELIMITER);
        out.push_str(&sample.value().to_string());
        out.push('\n');
    }

    out
}

/// Read back rows written by [`render_series`].
pub fn parse_rendered(text: &str) -> Result<Vec<Sample>, ExportError> {
    let mut samples = Vec::new();

    for (i, row) in text.lines().enumerate() {
        let line = i + 1;
        let malformed = |reason: String| ExportError::Malformed { line, reason };

        let (ts, value) = row
            .split_once(COLUMN_DELIMITER)
            .ok_or_else(|| malformed("missing delimiter".to_string()))?;

        let timestamp = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
            .map_err(|e| malformed(format!("invalid timestamp {ts:?}: {e}")))?;
        let value = SampleValue::from_field(value)
            .ok_or_else(|| malformed(format!("invalid value {value:?}")))?;

        samples.push(Sample::new(timestamp, value));
    }

    Ok(samples)
}

/// Outcome of exporting a capture.
#[derive(Debug, Default)]
pub struct ExportReport {
    /// Files written, in metric order.
    pub written: Vec<PathBuf>,
    /// Metrics that were not written, with the reason.
    pub skipped: Vec<(String, ExportError)>,
}

impl ExportReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Writes every series of a capture into one directory.
pub struct Exporter {
    dir: PathBuf,
}

impl Exporter {
    /// Creates an exporter targeting `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Export all series. Per-metric failures are collected in the report;
    /// only failing to create the target directory aborts the batch.
    pub fn export_capture(&self, capture: &Capture) -> Result<ExportReport, ExportError> {
        fs::create_dir_all(&self.dir).map_err(|source| ExportError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut report = ExportReport::default();
        let mut used = HashSet::with_capacity(capture.len());

        for series in capture.iter() {
            let file_name = naming::file_name(series.name());
            let path = self.dir.join(&file_name);

            let result = if used.insert(file_name) {
                write_new(&path, series)
            } else {
                Err(ExportError::Collision {
                    metric: series.name().to_string(),
                    path: path.clone(),
                })
            };

            match result {
                Ok(()) => {
                    debug!(metric = series.name(), path = %path.display(), "exported series");
                    report.written.push(path);
                }
                Err(e) => {
                    warn!(metric = series.name(), error = %e, "skipping metric export");
                    report.skipped.push((series.name().to_string(), e));
                }
            }
        }

        info!(
            dir = %self.dir.display(),
            written = report.written.len(),
            skipped = report.skipped.len(),
            "export finished",
        );

        Ok(report)
    }
}

/// Write a series to a file that must not exist yet.
fn write_new(path: &Path, series: &MetricSeries) -> Result<(), ExportError> {
    let io_err = |source: io::Error| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(ExportError::Collision {
                metric: series.name().to_string(),
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(io_err(e)),
    };

    file.write_all(render_series(series).as_bytes())
        .map_err(io_err)?;
    file.sync_all().map_err(io_err)
}
