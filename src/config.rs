use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::capture::ParseOptions;
use crate::capture::parse::TYPEPERF_TIMESTAMP_FORMAT;
use crate::supervisor::DEFAULT_POLL_INTERVAL;

/// Top-level configuration for perfcap.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Root directory for raw captures and exports. Default: "data".
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Keep the raw capture after a successful export. Default: true.
    #[serde(default = "default_true")]
    pub keep_raw: bool,

    /// How often the supervisor checks the producer. Default: 2s.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// External sampler configuration.
    #[serde(default)]
    pub producer: ProducerConfig,

    /// Raw capture parsing configuration.
    #[serde(default)]
    pub parse: ParseConfig,
}

/// External sampler invocation.
///
/// The command line is assembled as
/// `program [counters..] interval_flag <secs> [count_flag <n>] [output_flag <path>] [extra_args..]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    /// Executable to launch. Default: "typeperf".
    #[serde(default = "default_program")]
    pub program: String,

    /// Counter paths to sample.
    #[serde(default)]
    pub counters: Vec<String>,

    /// Flag preceding the sampling interval in seconds. Default: "-si".
    #[serde(default = "default_interval_flag")]
    pub interval_flag: String,

    /// Flag preceding the sample count; omitted when sampling is unbounded.
    /// Default: "-sc".
    #[serde(default = "default_count_flag")]
    pub count_flag: String,

    /// Flag preceding the capture file path. When empty, the producer's
    /// stdout is redirected into the capture file. Default: "-o".
    #[serde(default = "default_output_flag")]
    pub output_flag: String,

    /// Arguments appended after everything else. Default: ["-f", "CSV", "-y"].
    #[serde(default = "default_extra_args")]
    pub extra_args: Vec<String>,
}

/// Raw capture parsing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ParseConfig {
    /// chrono format of the timestamp column. Must match the producer.
    /// Default: "%m/%d/%Y %H:%M:%S%.f", as written by typeperf.
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_program() -> String {
    "typeperf".to_string()
}

fn default_interval_flag() -> String {
    "-si".to_string()
}

fn default_count_flag() -> String {
    "-sc".to_string()
}

fn default_output_flag() -> String {
    "-o".to_string()
}

fn default_extra_args() -> Vec<String> {
    vec!["-f".to_string(), "CSV".to_string(), "-y".to_string()]
}

fn default_timestamp_format() -> String {
    TYPEPERF_TIMESTAMP_FORMAT.to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            keep_raw: true,
            poll_interval: default_poll_interval(),
            producer: ProducerConfig::default(),
            parse: ParseConfig::default(),
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            counters: Vec::new(),
            interval_flag: default_interval_flag(),
            count_flag: default_count_flag(),
            output_flag: default_output_flag(),
            extra_args: default_extra_args(),
        }
    }
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            timestamp_format: default_timestamp_format(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            bail!("poll_interval must be positive");
        }

        if self.data_dir.as_os_str().is_empty() {
            bail!("data_dir is required");
        }

        if self.producer.program.trim().is_empty() {
            bail!("producer.program is required");
        }

        if self.producer.interval_flag.is_empty() {
            bail!("producer.interval_flag is required");
        }

        if self.producer.count_flag.is_empty() {
            bail!("producer.count_flag is required");
        }

        if self.producer.counters.iter().any(|c| c.trim().is_empty()) {
            bail!("producer.counters must not contain empty entries");
        }

        if self.parse.timestamp_format.trim().is_empty() {
            bail!("parse.timestamp_format is required");
        }

        Ok(())
    }
}

impl ParseConfig {
    /// Parser options derived from this section.
    pub fn options(&self) -> ParseOptions {
        ParseOptions {
            timestamp_format: self.timestamp_format.clone(),
        }
    }
}
