//! Structured run log — JSON lines per batch.
//!
//! Every validation run appends to `run_events.jsonl` in the output
//! directory: instance lifecycle, patch applications, test executions, and
//! teardown. Each line is a self-contained JSON object with a timestamp,
//! easy to grep, stream, and post-process.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    #[serde(flatten)]
    pub event: LogEvent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    BatchStarted {
        dataset: String,
        total_instances: usize,
        remaining_instances: usize,
    },
    InstanceStarted {
        instance_id: String,
        index: usize,
        total: usize,
    },
    RepoCloned {
        instance_id: String,
        repo: String,
    },
    ContainerCreated {
        instance_id: String,
        container: String,
    },
    PatchApplied {
        instance_id: String,
        label: String,
    },
    PatchFailed {
        instance_id: String,
        label: String,
    },
    StubStep {
        instance_id: String,
        outcome: String,
    },
    TestsExecuted {
        instance_id: String,
        phase: String,
        total: usize,
        passed: usize,
        failed: usize,
        build_successful: bool,
    },
    InstanceCompleted {
        instance_id: String,
        success: bool,
        duration_secs: f64,
        error: String,
    },
    ContainerRemoved {
        instance_id: String,
    },
    BatchInterrupted {
        completed: usize,
    },
    BatchCompleted {
        succeeded: usize,
        failed: usize,
    },
}

/// Writer for the JSON-lines run log.
pub struct RunLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl RunLog {
    /// Open (or create) the log at `path`, appending to an existing file so
    /// a resumed run continues the same log.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open run log {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    pub fn log(&self, event: LogEvent) -> Result<()> {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize log entry")?;
        debug!(event = %json, "run log");

        let mut writer = self.writer.lock().unwrap();
        writeln!(writer, "{json}").context("failed to write log entry")?;
        writer.flush().context("failed to flush run log")?;
        Ok(())
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_serialize_with_event_tag() {
        let entry = LogEntry {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            event: LogEvent::InstanceStarted {
                instance_id: "app-1".to_string(),
                index: 1,
                total: 3,
            },
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"event\":\"instance_started\""));
        assert!(json.contains("\"instance_id\":\"app-1\""));
        assert!(json.contains("\"timestamp\":"));
    }

    #[test]
    fn all_event_types_serialize() {
        let events = vec![
            LogEvent::BatchStarted {
                dataset: "d.jsonl".to_string(),
                total_instances: 10,
                remaining_instances: 7,
            },
            LogEvent::InstanceStarted {
                instance_id: "a".to_string(),
                index: 1,
                total: 10,
            },
            LogEvent::RepoCloned {
                instance_id: "a".to_string(),
                repo: "example/app".to_string(),
            },
            LogEvent::ContainerCreated {
                instance_id: "a".to_string(),
                container: "patchbench-x-a".to_string(),
            },
            LogEvent::PatchApplied {
                instance_id: "a".to_string(),
                label: "test_patch".to_string(),
            },
            LogEvent::PatchFailed {
                instance_id: "a".to_string(),
                label: "solution_patch".to_string(),
            },
            LogEvent::StubStep {
                instance_id: "a".to_string(),
                outcome: "skipped: not configured".to_string(),
            },
            LogEvent::TestsExecuted {
                instance_id: "a".to_string(),
                phase: "pre".to_string(),
                total: 5,
                passed: 3,
                failed: 2,
                build_successful: true,
            },
            LogEvent::InstanceCompleted {
                instance_id: "a".to_string(),
                success: true,
                duration_secs: 120.5,
                error: String::new(),
            },
            LogEvent::ContainerRemoved {
                instance_id: "a".to_string(),
            },
            LogEvent::BatchInterrupted { completed: 3 },
            LogEvent::BatchCompleted {
                succeeded: 8,
                failed: 2,
            },
        ];

        for event in events {
            let entry = LogEntry {
                timestamp: "0".to_string(),
                event,
            };
            let json = serde_json::to_string(&entry);
            assert!(json.is_ok(), "failed to serialize: {entry:?}");
            assert!(json.unwrap().contains("\"event\":"));
        }
    }

    #[test]
    fn writes_one_json_line_per_event() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run_events.jsonl");

        let log = RunLog::new(&path).unwrap();
        log.log(LogEvent::BatchStarted {
            dataset: "d.jsonl".to_string(),
            total_instances: 2,
            remaining_instances: 2,
        })
        .unwrap();
        log.log(LogEvent::BatchCompleted {
            succeeded: 2,
            failed: 0,
        })
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed.get("event").is_some());
            assert!(parsed.get("timestamp").is_some());
        }
        assert!(lines[0].contains("batch_started"));
        assert!(lines[1].contains("batch_completed"));
    }

    #[test]
    fn appends_across_reopens_for_resumed_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run_events.jsonl");

        {
            let log = RunLog::new(&path).unwrap();
            log.log(LogEvent::BatchInterrupted { completed: 1 }).unwrap();
        }
        {
            let log = RunLog::new(&path).unwrap();
            log.log(LogEvent::BatchCompleted {
                succeeded: 2,
                failed: 0,
            })
            .unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
