//! Fake producer that replays scripted rows.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use super::producer::Producer;
use super::{SampleCount, SampleRequest};

/// In-process stand-in for the external sampler.
///
/// Writes the header on start and one scripted row per liveness poll, then
/// exits once its rows are used up (unless told to keep running). On
/// terminate it can leave a partial row without a line terminator, the way
/// a killed producer does.
pub struct ScriptedProducer {
    header: String,
    rows: VecDeque<String>,
    partial_row: Option<String>,
    exit_code: Option<i32>,
    keep_running: bool,
    fail_launch: bool,
    fail_poll_after: Option<u64>,
    file: Option<File>,
    alive: bool,
    started: bool,
    terminated: bool,
    polls: u64,
}

impl ScriptedProducer {
    pub fn new<I, S>(header: impl Into<String>, rows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            header: header.into(),
            rows: rows.into_iter().map(Into::into).collect(),
            partial_row: None,
            exit_code: Some(0),
            keep_running: false,
            fail_launch: false,
            fail_poll_after: None,
            file: None,
            alive: false,
            started: false,
            terminated: false,
            polls: 0,
        }
    }

    /// Exit with this code after the last row.
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Leave this text, unterminated, in the capture when terminated.
    pub fn with_partial_row(mut self, partial: impl Into<String>) -> Self {
        self.partial_row = Some(partial.into());
        self
    }

    /// Stay alive after the last row until terminated.
    pub fn keep_running(mut self) -> Self {
        self.keep_running = true;
        self
    }

    /// Fail to launch.
    pub fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    /// Answer `n` liveness polls, then fail every poll after that.
    pub fn failing_poll_after(mut self, n: u64) -> Self {
        self.fail_poll_after = Some(n);
        self
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn terminated(&self) -> bool {
        self.terminated
    }

    /// Number of liveness polls answered.
    pub fn polls(&self) -> u64 {
        self.polls
    }

    fn write_line(&mut self, text: &str, terminated: bool) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(text.as_bytes())?;
            if terminated {
                file.write_all(b"\n")?;
            }
            file.flush()?;
        }
        Ok(())
    }
}

impl Producer for ScriptedProducer {
    fn name(&self) -> &str {
        "scripted"
    }

    fn start(&mut self, request: &SampleRequest, capture_path: &Path) -> io::Result<()> {
        if self.fail_launch {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "scripted producer configured to fail",
            ));
        }

        if let SampleCount::Bounded(n) = request.count() {
            self.rows.truncate(usize::try_from(n).unwrap_or(usize::MAX));
        }

        self.file = Some(File::create(capture_path)?);
        let header = self.header.clone();
        self.write_line(&header, true)?;

        self.started = true;
        self.alive = true;
        Ok(())
    }

    fn is_alive(&mut self) -> io::Result<bool> {
        if !self.alive {
            return Ok(false);
        }
        self.polls += 1;

        if self.fail_poll_after.is_some_and(|n| self.polls > n) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "scripted producer configured to fail polling",
            ));
        }

        if let Some(row) = self.rows.pop_front() {
            self.write_line(&row, true)?;
            return Ok(true);
        }

        if self.keep_running {
            return Ok(true);
        }

        self.alive = false;
        self.file = None;
        Ok(false)
    }

    fn exit_code(&self) -> Option<i32> {
        if self.terminated || self.alive {
            None
        } else {
            self.exit_code
        }
    }

    fn terminate(&mut self) -> io::Result<()> {
        if !self.alive {
            return Ok(());
        }

        if let Some(partial) = self.partial_row.take() {
            self.write_line(&partial, false)?;
        }

        self.alive = false;
        self.terminated = true;
        self.file = None;
        Ok(())
    }
}
