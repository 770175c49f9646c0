//! Benchmark instance records and dataset loading.
//!
//! A dataset is JSON Lines (one instance per line) or a plain JSON array.
//! Instances are immutable once loaded; filtering happens before validation
//! starts and never mutates the records.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One benchmark candidate: a repository, a base commit, and a patch pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: String,
    /// `owner/name` reference on the code host.
    pub repo: String,
    pub base_commit: String,
    /// The solution fix, unified-diff text.
    pub patch: String,
    /// Adds or changes tests, unified-diff text.
    pub test_patch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_statement: Option<String>,
}

/// Load instances from a `.jsonl` file (one JSON object per non-empty line)
/// or any other extension treated as a JSON array.
pub fn load_dataset(path: &Path) -> Result<Vec<Instance>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;

    let instances = if path.extension().is_some_and(|ext| ext == "jsonl") {
        let mut parsed = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let instance: Instance = serde_json::from_str(line).with_context(|| {
                format!("invalid instance record on line {} of {}", index + 1, path.display())
            })?;
            parsed.push(instance);
        }
        parsed
    } else {
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse dataset {}", path.display()))?
    };

    info!(count = instances.len(), dataset = %path.display(), "loaded dataset");
    Ok(instances)
}

/// Whether `filter` selects `instance_id`: exact match, or a numeric-suffix
/// match where `6044` selects `some-project-6044` / `some_project_6044`.
pub fn id_matches(instance_id: &str, filter: &str) -> bool {
    instance_id == filter
        || instance_id.ends_with(&format!("-{filter}"))
        || instance_id.ends_with(&format!("_{filter}"))
}

/// Include/exclude/cap filtering for a batch run.
///
/// Exclude takes precedence when an id appears in both lists.
#[derive(Debug, Default, Clone)]
pub struct DatasetFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_instances: Option<usize>,
}

impl DatasetFilter {
    pub fn apply(&self, instances: Vec<Instance>) -> Vec<Instance> {
        let mut selected: Vec<Instance> = instances
            .into_iter()
            .filter(|inst| {
                self.include.is_empty()
                    || self.include.iter().any(|id| id_matches(&inst.instance_id, id))
            })
            .filter(|inst| {
                !self.exclude.iter().any(|id| id_matches(&inst.instance_id, id))
            })
            .collect();

        if let Some(cap) = self.max_instances {
            selected.truncate(cap);
        }

        selected
    }
}

/// Drop instances whose ids are in `done` (already completed or failed in a
/// previous run). Order is preserved.
pub fn remaining_instances(instances: Vec<Instance>, done: &BTreeSet<String>) -> Vec<Instance> {
    instances
        .into_iter()
        .filter(|inst| !done.contains(&inst.instance_id))
        .collect()
}
