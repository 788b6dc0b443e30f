//! Supervision of the external sampler.
//!
//! The supervisor launches a [`Producer`], then wakes once per polling
//! quantum to check whether the producer exited and whether the operator
//! asked to stop. Both checks are non-blocking; the sleep is the only
//! suspension point.

pub mod cancel;
pub mod producer;
pub mod scripted;

use std::io;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use self::producer::{CommandProducer, Producer};
pub use self::scripted::ScriptedProducer;

/// Default polling quantum.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Rejected sampling parameters. Raised before anything is launched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("sample interval must be at least 1 second")]
    ZeroInterval,

    #[error("sample count must be non-zero (negative samples until stopped)")]
    ZeroSampleCount,
}

/// Errors while supervising a producer.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to launch producer {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to poll producer {program}: {source}")]
    Poll {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to terminate producer {program}: {source}")]
    Terminate {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// How many rows the producer should emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleCount {
    Bounded(u64),
    /// Sample until cancelled.
    Unbounded,
}

/// Validated sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRequest {
    interval_secs: u64,
    count: SampleCount,
}

impl SampleRequest {
    /// Validate raw operator input. A negative count means unbounded.
    pub fn new(interval_secs: u64, sample_count: i64) -> Result<Self, RequestError> {
        if interval_secs == 0 {
            return Err(RequestError::ZeroInterval);
        }

        let count = match sample_count {
            0 => return Err(RequestError::ZeroSampleCount),
            n if n < 0 => SampleCount::Unbounded,
            n => SampleCount::Bounded(n.unsigned_abs()),
        };

        Ok(Self {
            interval_secs,
            count,
        })
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    pub fn count(&self) -> SampleCount {
        self.count
    }
}

/// How the producer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerOutcome {
    /// Exited on its own. `code` is `None` when killed by a signal.
    Exited { code: Option<i32> },
    /// Forcibly stopped after a cancellation request.
    Terminated,
}

/// Result of one supervised run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub producer: ProducerOutcome,
    pub was_cancelled: bool,
    /// Polling quanta that elapsed while the producer was running.
    pub ticks: u64,
}

/// Progress notification emitted once per polling quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub tick: u64,
    pub elapsed: Duration,
}

/// Callback invoked on every progress tick.
pub type ProgressFn = Box<dyn Fn(Progress) + Send + Sync>;

/// Drives one producer from launch to exit or cancellation.
pub struct Supervisor {
    poll_interval: Duration,
    cancel: CancellationToken,
    callbacks: parking_lot::Mutex<Vec<ProgressFn>>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("poll_interval", &self.poll_interval)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Supervisor {
    /// Create a supervisor that stops the producer once `cancel` fires.
    pub fn new(poll_interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            poll_interval,
            cancel,
            callbacks: parking_lot::Mutex::new(Vec::with_capacity(2)),
        }
    }

    /// Register a callback for progress ticks.
    pub fn on_progress(&self, f: ProgressFn) {
        self.callbacks.lock().push(f);
    }

    /// Launch the producer and poll it until it exits or a stop is requested.
    ///
    /// When this returns, the producer is gone and the capture file is no
    /// longer being written.
    pub async fn run<P: Producer + ?Sized>(
        &self,
        producer: &mut P,
        request: &SampleRequest,
        capture_path: &Path,
    ) -> Result<RunOutcome, SupervisorError> {
        producer
            .start(request, capture_path)
            .map_err(|source| SupervisorError::Launch {
                program: producer.name().to_string(),
                source,
            })?;

        info!(
            producer = producer.name(),
            interval_secs = request.interval_secs(),
            count = ?request.count(),
            capture = %capture_path.display(),
            "sampling started",
        );

        let started = Instant::now();
        let mut ticks = 0u64;

        loop {
            tokio::time::sleep(self.poll_interval).await;

            let alive = match producer.is_alive() {
                Ok(alive) => alive,
                Err(source) => {
                    // Do not leave the producer appending to the capture.
                    if let Err(e) = producer.terminate() {
                        warn!(error = %e, "failed to terminate producer after poll error");
                    }
                    return Err(SupervisorError::Poll {
                        program: producer.name().to_string(),
                        source,
                    });
                }
            };

            if !alive {
                let code = producer.exit_code();
                match code {
                    Some(0) => info!(ticks, "producer finished"),
                    // Whatever was captured is still parsed.
                    other => warn!(code = ?other, ticks, "producer exited abnormally"),
                }

                return Ok(RunOutcome {
                    producer: ProducerOutcome::Exited { code },
                    was_cancelled: false,
                    ticks,
                });
            }

            if self.cancel.is_cancelled() {
                info!(ticks, "stopping producer early");
                producer
                    .terminate()
                    .map_err(|source| SupervisorError::Terminate {
                        program: producer.name().to_string(),
                        source,
                    })?;

                return Ok(RunOutcome {
                    producer: ProducerOutcome::Terminated,
                    was_cancelled: true,
                    ticks,
                });
            }

            ticks += 1;
            let progress = Progress {
                tick: ticks,
                elapsed: started.elapsed(),
            };
            debug!(tick = progress.tick, "producer still running");

            let cbs = self.callbacks.lock();
            for cb in cbs.iter() {
                cb(progress);
            }
        }
    }
}
