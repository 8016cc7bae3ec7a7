use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use wait_timeout::ChildExt;

/// Point in time after which no further external process may be started or
/// waited on for the current request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn unbounded() -> Self {
        Self { at: None }
    }

    pub fn after(budget: Duration) -> Self {
        Self {
            at: Some(Instant::now() + budget),
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Shorter of `timeout` and the time left before the deadline.
    pub fn bound(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(left) => left.min(timeout),
            None => timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Trimmed stderr, falling back to stdout when stderr is empty.
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start process: {0}")]
    Spawn(#[source] io::Error),
    #[error("process did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),
}

/// Runs `command` to completion with piped output, killing it once `timeout`
/// elapses.
pub fn run_with_timeout(
    command: &mut Command,
    timeout: Duration,
) -> Result<ProcessOutput, ProcessError> {
    if timeout.is_zero() {
        return Err(ProcessError::TimedOut(timeout));
    }

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(ProcessError::Spawn)?;

    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::TimedOut(timeout));
        }
        Err(error) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::Wait(error));
        }
    };

    Ok(ProcessOutput {
        code: status.code(),
        stdout: join_reader(stdout_reader),
        stderr: join_reader(stderr_reader),
    })
}

fn spawn_reader<R>(mut stream: R) -> thread::JoinHandle<Vec<u8>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = stream.read_to_end(&mut buffer);
        buffer
    })
}

fn join_reader(reader: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Deadline;

    #[test]
    fn unbounded_deadline_keeps_timeout() {
        let deadline = Deadline::unbounded();
        assert!(!deadline.is_expired());
        assert_eq!(
            deadline.bound(Duration::from_secs(3)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn deadline_caps_timeout() {
        let deadline = Deadline::after(Duration::from_millis(50));
        assert!(deadline.bound(Duration::from_secs(30)) <= Duration::from_millis(50));
    }

    #[test]
    fn elapsed_deadline_is_expired() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        assert_eq!(deadline.bound(Duration::from_secs(1)), Duration::ZERO);
    }

    #[cfg(unix)]
    #[test]
    fn run_with_timeout_kills_slow_process() {
        let mut command = std::process::Command::new("sleep");
        command.arg("5");
        let error = super::run_with_timeout(&mut command, Duration::from_millis(100))
            .expect_err("must time out");
        assert!(matches!(error, super::ProcessError::TimedOut(_)));
    }

    #[cfg(unix)]
    #[test]
    fn run_with_timeout_captures_output() {
        let mut command = std::process::Command::new("sh");
        command.args(["-c", "printf out; printf err >&2; exit 3"]);
        let output =
            super::run_with_timeout(&mut command, Duration::from_secs(5)).expect("runs");
        assert_eq!(output.code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout, "out");
        assert_eq!(output.message(), "err");
    }
}
