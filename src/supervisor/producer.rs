//! Producer capability and the OS-process implementation.

use std::fs::File;
use std::io;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};

use tracing::{debug, info, warn};

use super::{SampleCount, SampleRequest};
use crate::config::ProducerConfig;

/// An external process that continuously samples counters into a capture
/// file.
pub trait Producer: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Launch the producer, writing raw rows to `capture_path`.
    fn start(&mut self, request: &SampleRequest, capture_path: &Path) -> io::Result<()>;

    /// Non-blocking liveness check.
    fn is_alive(&mut self) -> io::Result<bool>;

    /// Exit code once the producer has exited on its own, if it had one.
    fn exit_code(&self) -> Option<i32>;

    /// Forcibly stop the producer and wait for it to be gone, so everything
    /// it flushed is visible in the capture file.
    fn terminate(&mut self) -> io::Result<()>;
}

/// Producer backed by an OS process.
pub struct CommandProducer {
    cfg: ProducerConfig,
    child: Option<Child>,
    status: Option<ExitStatus>,
}

impl CommandProducer {
    pub fn new(cfg: ProducerConfig) -> Self {
        Self {
            cfg,
            child: None,
            status: None,
        }
    }

    /// OS process id of the launched producer.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Build the argument list for a request.
    ///
    /// Layout: counters, interval flag, optional count flag, optional output
    /// flag, then any extra arguments.
    pub fn build_args(&self, request: &SampleRequest, capture_path: &Path) -> Vec<String> {
        let mut args = Vec::with_capacity(self.cfg.counters.len() + self.cfg.extra_args.len() + 6);

        args.extend(self.cfg.counters.iter().cloned());

        args.push(self.cfg.interval_flag.clone());
        args.push(request.interval_secs().to_string());

        if let SampleCount::Bounded(n) = request.count() {
            args.push(self.cfg.count_flag.clone());
            args.push(n.to_string());
        }

        if !self.cfg.output_flag.is_empty() {
            args.push(self.cfg.output_flag.clone());
            args.push(capture_path.display().to_string());
        }

        args.extend(self.cfg.extra_args.iter().cloned());
        args
    }
}

impl Producer for CommandProducer {
    fn name(&self) -> &str {
        &self.cfg.program
    }

    fn start(&mut self, request: &SampleRequest, capture_path: &Path) -> io::Result<()> {
        let args = self.build_args(request, capture_path);

        let mut cmd = Command::new(&self.cfg.program);
        cmd.args(&args).stdin(Stdio::null()).stderr(Stdio::null());

        if self.cfg.output_flag.is_empty() {
            // The producer writes rows to stdout; the capture file is its only sink.
            cmd.stdout(File::create(capture_path)?);
        } else {
            cmd.stdout(Stdio::null());
        }

        let child = cmd.spawn()?;
        info!(
            program = %self.cfg.program,
            pid = child.id(),
            args = ?args,
            "producer started",
        );

        self.child = Some(child);
        self.status = None;
        Ok(())
    }

    fn is_alive(&mut self) -> io::Result<bool> {
        if self.status.is_some() {
            return Ok(false);
        }

        let Some(child) = self.child.as_mut() else {
            return Ok(false);
        };

        match child.try_wait()? {
            Some(status) => {
                debug!(%status, "producer exited");
                self.status = Some(status);
                Ok(false)
            }
            None => Ok(true),
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    fn terminate(&mut self) -> io::Result<()> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };

        if self.status.is_none() {
            // The child may exit between the last poll and the kill.
            if let Err(e) = child.kill() {
                if e.kind() != io::ErrorKind::InvalidInput {
                    return Err(e);
                }
            }
            let status = child.wait()?;
            debug!(%status, "producer terminated");
            self.status = Some(status);
        }

        Ok(())
    }
}

impl Drop for CommandProducer {
    // `Child` is not killed on drop.
    fn drop(&mut self) {
        if self.child.is_some() && self.status.is_none() {
            if let Err(e) = self.terminate() {
                warn!(program = %self.cfg.program, error = %e, "failed to stop producer on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn cfg(output_flag: &str) -> ProducerConfig {
        ProducerConfig {
            program: "typeperf".to_string(),
            counters: vec![r"\Processor(_Total)\% Processor Time".to_string()],
            interval_flag: "-si".to_string(),
            count_flag: "-sc".to_string(),
            output_flag: output_flag.to_string(),
            extra_args: vec!["-f".to_string(), "CSV".to_string()],
        }
    }

    #[test]
    fn test_build_args_bounded() {
        let producer = CommandProducer::new(cfg("-o"));
        let request = SampleRequest::new(2, 10).expect("valid request");
        let args = producer.build_args(&request, &PathBuf::from("raw.txt"));
        assert_eq!(
            args,
            vec![
                r"\Processor(_Total)\% Processor Time",
                "-si",
                "2",
                "-sc",
                "10",
                "-o",
                "raw.txt",
                "-f",
                "CSV",
            ]
        );
    }

    #[test]
    fn test_build_args_unbounded_without_output_flag() {
        let producer = CommandProducer::new(cfg(""));
        let request = SampleRequest::new(1, -1).expect("valid request");
        let args = producer.build_args(&request, &PathBuf::from("raw.txt"));
        assert_eq!(
            args,
            vec![r"\Processor(_Total)\% Processor Time", "-si", "1", "-f", "CSV"]
        );
    }

    #[test]
    fn test_start_missing_program_fails() {
        let mut c = cfg("");
        c.program = "perfcap-definitely-missing-producer".to_string();
        let mut producer = CommandProducer::new(c);

        let dir = tempfile::tempdir().expect("tempdir");
        let request = SampleRequest::new(1, 1).expect("valid request");
        let err = producer
            .start(&request, &dir.path().join("raw.txt"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!producer.is_alive().expect("liveness"));
    }

    #[cfg(unix)]
    #[test]
    fn test_natural_exit_is_observed() {
        let mut c = cfg("");
        c.program = "true".to_string();
        let mut producer = CommandProducer::new(c);

        let dir = tempfile::tempdir().expect("tempdir");
        let request = SampleRequest::new(1, 1).expect("valid request");
        producer
            .start(&request, &dir.path().join("raw.txt"))
            .expect("start");

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while producer.is_alive().expect("liveness") {
            assert!(std::time::Instant::now() < deadline, "producer never exited");
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(producer.exit_code(), Some(0));
        producer.terminate().expect("terminate after exit is a no-op");
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_kills_running_producer() {
        let mut c = cfg("");
        // Trailing sampling arguments land in the script's positional params.
        c.program = "sh".to_string();
        c.counters = vec!["-c".to_string(), "sleep 30".to_string(), "sh".to_string()];
        c.extra_args.clear();
        let mut producer = CommandProducer::new(c);

        let dir = tempfile::tempdir().expect("tempdir");
        let request = SampleRequest::new(1, -1).expect("valid request");
        producer
            .start(&request, &dir.path().join("raw.txt"))
            .expect("start");
        assert!(producer.is_alive().expect("liveness"));

        producer.terminate().expect("terminate");
        assert!(!producer.is_alive().expect("liveness"));
        assert_eq!(producer.exit_code(), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_drop_kills_running_producer() {
        let mut c = cfg("");
        c.program = "sh".to_string();
        c.counters = vec!["-c".to_string(), "sleep 30".to_string(), "sh".to_string()];
        c.extra_args.clear();
        let mut producer = CommandProducer::new(c);

        let dir = tempfile::tempdir().expect("tempdir");
        let request = SampleRequest::new(1, -1).expect("valid request");
        producer
            .start(&request, &dir.path().join("raw.txt"))
            .expect("start");
        let pid = producer.id().expect("pid");
        let proc_entry = PathBuf::from(format!("/proc/{pid}"));
        assert!(proc_entry.exists());

        drop(producer);
        // Killed and reaped, so not even a zombie remains.
        assert!(!proc_entry.exists());
    }
}
