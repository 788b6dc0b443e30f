use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use perfcap::config::Config;
use perfcap::pipeline::{Pipeline, RunOptions, RunSummary};
use perfcap::supervisor::cancel::listen_for_stop;
use perfcap::supervisor::{CommandProducer, SampleRequest};

/// Performance counter sampler.
#[derive(Parser)]
#[command(name = "perfcap", about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sample counters, then export one file per metric.
    Sample {
        /// Seconds between samples (at least 1).
        interval: u64,

        /// Number of samples; negative samples until 'stop' is entered.
        #[arg(allow_negative_numbers = true)]
        count: i64,

        /// Export directory (default: <data_dir>/<name or start time>).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Name of the export directory under the data directory.
        #[arg(short, long)]
        name: Option<String>,

        /// Parse and summarize without exporting; the raw capture is removed.
        #[arg(long)]
        discard: bool,
    },

    /// Parse an existing raw capture and export it.
    Parse {
        /// Raw capture file.
        raw: PathBuf,

        /// Treat the capture as stopped early (drop a truncated final row).
        #[arg(long)]
        cancelled: bool,

        /// Export directory (default: <data_dir>/<raw file stem>).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via RUSTFLAGS or the environment.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Command::Version = &cli.command {
        println!("perfcap {}", version::full());
        return Ok(());
    }

    let cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    // Initialize tracing. The command line wins over the config file.
    let level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?;

    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting perfcap",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let result = rt.block_on(async { run(cli.command, cfg).await });

    // Stdin is read on a blocking thread that may never return.
    rt.shutdown_background();

    result
}

async fn run(command: Command, cfg: Config) -> Result<()> {
    match command {
        Command::Sample {
            interval,
            count,
            out,
            name,
            discard,
        } => {
            // Reject bad parameters before anything is launched.
            let request =
                SampleRequest::new(interval, count).context("invalid sampling parameters")?;

            if cfg.producer.counters.is_empty() {
                tracing::warn!("no counters configured, the producer decides what to sample");
            }

            let cancel = CancellationToken::new();
            spawn_cancel_sources(cancel.clone());

            println!("Enter 'stop' at any point to finish early");

            let mut producer = CommandProducer::new(cfg.producer.clone());
            let opts = RunOptions {
                name,
                out_dir: out,
                discard,
            };
            let started_at = chrono::Local::now().naive_local();

            let pipeline = Pipeline::new(cfg, cancel.clone());
            let summary = pipeline
                .sample(&mut producer, &request, &opts, started_at)
                .await?;

            // Release the stop listener.
            cancel.cancel();
            report(&summary);
        }
        Command::Parse {
            raw,
            cancelled,
            out,
        } => {
            let pipeline = Pipeline::new(cfg, CancellationToken::new());
            let opts = RunOptions {
                out_dir: out,
                ..Default::default()
            };
            let summary = pipeline.parse_existing(&raw, cancelled, &opts)?;
            report(&summary);
        }
        Command::Version => unreachable!("handled before startup"),
    }

    Ok(())
}

/// Cancel `token` on an operator "stop" line, SIGINT, or SIGTERM.
fn spawn_cancel_sources(token: CancellationToken) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    tokio::spawn(listen_for_stop(stdin, token.clone()));

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to register SIGTERM handler");
                    return;
                }
            };

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received SIGINT, stopping early");
                }
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM, stopping early");
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received Ctrl-C, stopping early");
                }
            }
        }

        token.cancel();
    });
}

fn report(summary: &RunSummary) {
    if summary.lossy_decoded {
        println!("Warning: raw capture was not valid UTF-8; some characters were replaced");
    }

    if let Some(reason) = summary.empty {
        println!("Nothing to export ({})", reason.as_str());
        return;
    }

    println!(
        "Done! Metrics sampled: {}, rows: {}{}",
        summary.metrics,
        summary.rows,
        if summary.dropped_partial_row {
            " (partial final row dropped)"
        } else {
            ""
        }
    );

    match &summary.export {
        Some(export) => {
            for (metric, err) in &export.skipped {
                println!("  skipped {metric}: {err}");
            }
            if let Some(dir) = export.written.first().and_then(|p| p.parent()) {
                println!("Saved {} series to {}", export.written.len(), dir.display());
            }
        }
        None => println!("Samples discarded"),
    }

    if summary.raw_kept {
        println!("Raw capture: {}", summary.raw_path.display());
    }
}
