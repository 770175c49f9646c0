//! Time-bounded subprocess execution.
//!
//! Both the git client and the container runtime are driven through external
//! commands, and every invocation carries a hard deadline: the child is
//! killed when the deadline passes and the caller receives a distinct
//! timeout error instead of a fabricated exit code.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    /// Stdout and stderr interleaved the way the validation logs expect.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}{}", self.stdout, self.stderr)
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug)]
pub enum WaitOutcome {
    Finished(CommandOutput),
    /// Deadline passed; the child was killed. Partial output is discarded —
    /// a timed-out run is never parsed for results.
    TimedOut {
        limit: Duration,
    },
}

/// Run a command to completion or kill it at the deadline.
pub fn run_with_timeout(command: &mut Command, timeout: Duration) -> Result<WaitOutcome> {
    let started = Instant::now();

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {:?}", command.get_program()))?;

    let stdout_handle = spawn_reader(child.stdout.take());
    let stderr_handle = spawn_reader(child.stderr.take());

    let status = loop {
        if let Some(status) = child.try_wait().context("failed to poll child process")? {
            break status;
        }

        if started.elapsed() >= timeout {
            kill_and_reap(&mut child);
            // Drain the reader threads so the pipes close cleanly.
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            return Ok(WaitOutcome::TimedOut { limit: timeout });
        }

        std::thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();

    Ok(WaitOutcome::Finished(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
        duration: started.elapsed(),
    }))
}

fn spawn_reader<R: Read + Send + 'static>(
    source: Option<R>,
) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut reader) = source {
            let mut bytes = Vec::new();
            if reader.read_to_end(&mut bytes).is_ok() {
                buffer = String::from_utf8_lossy(&bytes).into_owned();
            }
        }
        buffer
    })
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
