//! One sampling run from launch to exported files.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::{parse_text, EmptyReason, ParsedCapture};
use crate::config::Config;
use crate::export::{ExportReport, Exporter};
use crate::supervisor::{Producer, RunOutcome, SampleRequest, Supervisor};

/// Layout of run directory and raw capture names.
pub const RUN_STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Subdirectory of the data directory that holds raw captures.
pub const RAW_DIR: &str = "raw";

const RAW_EXTENSION: &str = "txt";

/// Per-run choices made by the operator.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Export directory name under the data directory. Defaults to the run
    /// start stamp.
    pub name: Option<String>,
    /// Explicit export directory, overriding `name`.
    pub out_dir: Option<PathBuf>,
    /// Parse and summarize only; nothing is exported.
    pub discard: bool,
}

/// What a run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub raw_path: PathBuf,
    /// Present for supervised runs, absent for offline parsing.
    pub outcome: Option<RunOutcome>,
    pub metrics: usize,
    pub rows: usize,
    pub dropped_partial_row: bool,
    /// The raw capture was not valid UTF-8 and invalid bytes were replaced
    /// with U+FFFD.
    pub lossy_decoded: bool,
    /// Set when there was nothing to export.
    pub empty: Option<EmptyReason>,
    pub export: Option<ExportReport>,
    pub raw_kept: bool,
}

/// Orchestrates supervision, parsing and export for one capture.
pub struct Pipeline {
    cfg: Config,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(cfg: Config, cancel: CancellationToken) -> Self {
        Self { cfg, cancel }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Sample with `producer`, then parse and export the capture.
    pub async fn sample<P: Producer + ?Sized>(
        &self,
        producer: &mut P,
        request: &SampleRequest,
        opts: &RunOptions,
        started_at: NaiveDateTime,
    ) -> Result<RunSummary> {
        let stamp = started_at.format(RUN_STAMP_FORMAT).to_string();

        let raw_dir = self.cfg.data_dir.join(RAW_DIR);
        fs::create_dir_all(&raw_dir)
            .with_context(|| format!("creating raw capture directory {}", raw_dir.display()))?;
        let raw_path = unique_path(&raw_dir, &stamp, RAW_EXTENSION);

        let supervisor = Supervisor::new(self.cfg.poll_interval, self.cancel.clone());
        supervisor.on_progress(Box::new(|p| {
            info!(
                tick = p.tick,
                elapsed_secs = p.elapsed.as_secs(),
                "sampling in progress (enter 'stop' to finish early)",
            );
        }));

        let outcome = supervisor
            .run(producer, request, &raw_path)
            .await
            .context("supervising producer")?;

        let export_dir = match (&opts.out_dir, &opts.name) {
            (Some(dir), _) => dir.clone(),
            (None, Some(name)) => self.cfg.data_dir.join(name),
            (None, None) => self.cfg.data_dir.join(&stamp),
        };

        let mut summary =
            self.process(&raw_path, outcome.was_cancelled, &export_dir, opts.discard, true)?;
        summary.outcome = Some(outcome);
        Ok(summary)
    }

    /// Parse an existing raw capture and export it. The raw file is never
    /// deleted.
    pub fn parse_existing(
        &self,
        raw_path: &Path,
        was_cancelled: bool,
        opts: &RunOptions,
    ) -> Result<RunSummary> {
        let export_dir = match (&opts.out_dir, &opts.name) {
            (Some(dir), _) => dir.clone(),
            (None, Some(name)) => self.cfg.data_dir.join(name),
            (None, None) => {
                let stem = raw_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "capture".to_string());
                self.cfg.data_dir.join(stem)
            }
        };

        self.process(raw_path, was_cancelled, &export_dir, opts.discard, false)
    }

    fn process(
        &self,
        raw_path: &Path,
        was_cancelled: bool,
        export_dir: &Path,
        discard: bool,
        owns_raw: bool,
    ) -> Result<RunSummary> {
        // The producer is gone at this point, so the file is complete.
        let bytes = fs::read(raw_path)
            .with_context(|| format!("reading raw capture {}", raw_path.display()))?;
        let text = String::from_utf8_lossy(&bytes);
        let lossy_decoded = matches!(text, Cow::Owned(_));
        if lossy_decoded {
            warn!(
                path = %raw_path.display(),
                "raw capture is not valid UTF-8, invalid bytes replaced with U+FFFD",
            );
        }

        let parsed = parse_text(&text, was_cancelled, &self.cfg.parse.options())
            .with_context(|| format!("parsing raw capture {}", raw_path.display()))?;

        let mut summary = RunSummary {
            raw_path: raw_path.to_path_buf(),
            outcome: None,
            metrics: 0,
            rows: 0,
            dropped_partial_row: false,
            lossy_decoded,
            empty: None,
            export: None,
            raw_kept: true,
        };

        let capture = match parsed {
            ParsedCapture::Capture(capture) => capture,
            ParsedCapture::Empty(reason) => {
                info!(reason = reason.as_str(), "nothing to export");
                summary.empty = Some(reason);
                if owns_raw {
                    summary.raw_kept = !remove_raw(raw_path);
                }
                return Ok(summary);
            }
        };

        summary.metrics = capture.len();
        summary.rows = capture.row_count();
        summary.dropped_partial_row = capture.dropped_partial_row();

        info!(
            metrics = summary.metrics,
            rows = summary.rows,
            cancelled = capture.was_cancelled(),
            dropped_partial_row = summary.dropped_partial_row,
            "capture parsed",
        );

        if discard {
            if owns_raw {
                summary.raw_kept = !remove_raw(raw_path);
            }
            return Ok(summary);
        }

        let report = Exporter::new(export_dir)
            .export_capture(&capture)
            .context("exporting capture")?;

        if owns_raw && !self.cfg.keep_raw && report.is_complete() {
            summary.raw_kept = !remove_raw(raw_path);
        }

        summary.export = Some(report);
        Ok(summary)
    }
}

/// First `<stem>[-n].<ext>` in `dir` that does not exist yet.
fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{stem}.{ext}"));
    if !first.exists() {
        return first;
    }

    (1u32..)
        .map(|n| dir.join(format!("{stem}-{n}.{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

/// Delete a raw capture, returning whether it is gone.
fn remove_raw(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove raw capture");
            false
        }
    }
}
