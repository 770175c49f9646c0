//! The validation orchestrator.
//!
//! Per instance this is a strictly sequential state machine: clone,
//! configure, provision, check out, patch, test (pre), patch the fresh
//! workspace, test (post), classify. Any step failure short-circuits to a
//! persisted failure record; teardown runs on every path. Across instances
//! nothing is shared except the container registry (keyed per instance)
//! and the per-instance output directories, so one instance can never
//! poison another.
//!
//! Batch runs are resumable: completed and failed instance ids persist to
//! `validation_progress.json` after every instance, and prior results are
//! reconstructed from each instance's `test_analysis.json`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::buildcfg::{self, BuildConfig};
use crate::config::RunnerConfig;
use crate::container::{ContainerHandle, ContainerManager};
use crate::dataset::{self, DatasetFilter, Instance};
use crate::patch;
use crate::repo::{self, RepositoryManager, Workspace};
use crate::report;
use crate::runlog::{LogEvent, RunLog};
use crate::stubs::{StubGenerator, StubOutcome};
use crate::testing::{self, TestExecutionResult};
use crate::transitions::{self, TransitionSet};

const CHECKPOINT_INTERVAL: usize = 10;

/// States of the per-instance machine, in order. Used for progress
/// reporting; the phase flags on [`ValidationResult`] record how far an
/// instance got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Cloned,
    Configured,
    ContainerReady,
    CommitCheckedOut,
    TestPatchApplied,
    StubsApplied,
    PreTestsRun,
    PostWorkspaceReady,
    SolutionPatchApplied,
    PostTestsRun,
    TransitionsComputed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Cloned => "cloned",
            Phase::Configured => "configured",
            Phase::ContainerReady => "container_ready",
            Phase::CommitCheckedOut => "commit_checked_out",
            Phase::TestPatchApplied => "test_patch_applied",
            Phase::StubsApplied => "stubs_applied",
            Phase::PreTestsRun => "pre_tests_run",
            Phase::PostWorkspaceReady => "post_workspace_ready",
            Phase::SolutionPatchApplied => "solution_patch_applied",
            Phase::PostTestsRun => "post_tests_run",
            Phase::TransitionsComputed => "transitions_computed",
        }
    }
}

/// Serializable summary of one test run (raw output is persisted separately
/// as a log file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub duration_secs: f64,
    pub exit_code: i32,
    pub build_successful: bool,
    pub gradle_command: String,
    pub passed_tests: Vec<String>,
    pub failed_tests: Vec<String>,
}

impl From<&TestExecutionResult> for ExecutionSummary {
    fn from(result: &TestExecutionResult) -> Self {
        Self {
            total_tests: result.total(),
            passed: result.passed(),
            failed: result.failed(),
            skipped: result.skipped(),
            errors: result.errors(),
            duration_secs: result.duration_secs,
            exit_code: result.exit_code,
            build_successful: result.build_successful,
            gradle_command: result.gradle_command.clone(),
            passed_tests: result.passed_tests(),
            failed_tests: result.failed_tests(),
        }
    }
}

/// The per-instance record, created at instance start and persisted at
/// completion. Transition counts are derived from the sets, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub instance_id: String,
    pub success: bool,
    #[serde(default)]
    pub error_message: String,

    pub repo_cloned: bool,
    pub config_detected: bool,
    pub container_created: bool,
    pub base_commit_checked_out: bool,
    pub test_patch_applied: bool,
    pub solution_patch_applied: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_config: Option<BuildConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_test_execution: Option<ExecutionSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_test_execution: Option<ExecutionSummary>,

    #[serde(default)]
    pub transitions: TransitionSet,
    #[serde(default)]
    pub skipped_instrumented_tests: BTreeSet<String>,

    pub total_duration_secs: f64,
}

impl ValidationResult {
    pub fn new(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            success: false,
            error_message: String::new(),
            repo_cloned: false,
            config_detected: false,
            container_created: false,
            base_commit_checked_out: false,
            test_patch_applied: false,
            solution_patch_applied: false,
            build_config: None,
            pre_test_execution: None,
            post_test_execution: None,
            transitions: TransitionSet::default(),
            skipped_instrumented_tests: BTreeSet::new(),
            total_duration_secs: 0.0,
        }
    }

    /// A terminal failure record for an instance that never got past `Init`.
    #[cfg(test)]
    pub fn failed(instance_id: &str, error_message: impl Into<String>) -> Self {
        let mut result = Self::new(instance_id);
        result.error_message = error_message.into();
        result
    }

    /// The `test_analysis.json` payload: transition sets with derived
    /// counts, execution summaries, skipped and dropped tests.
    pub fn analysis_json(&self) -> serde_json::Value {
        let bucket = |tests: &BTreeSet<String>| {
            serde_json::json!({
                "count": tests.len(),
                "tests": tests.iter().collect::<Vec<_>>(),
            })
        };

        serde_json::json!({
            "test_transitions": {
                "fail_to_pass": bucket(&self.transitions.fail_to_pass),
                "pass_to_pass": bucket(&self.transitions.pass_to_pass),
                "pass_to_fail": bucket(&self.transitions.pass_to_fail),
                "fail_to_fail": bucket(&self.transitions.fail_to_fail),
            },
            "dropped_tests": bucket(&self.transitions.dropped),
            "execution_summary": {
                "pre_execution": &self.pre_test_execution,
                "post_execution": &self.post_test_execution,
            },
            "skipped_instrumented_tests": bucket(&self.skipped_instrumented_tests),
        })
    }

    /// Rebuild a successful result from a persisted `test_analysis.json`.
    pub fn from_analysis(instance_id: &str, analysis: &serde_json::Value) -> Option<Self> {
        let tests_of = |value: &serde_json::Value| -> BTreeSet<String> {
            value
                .get("tests")
                .and_then(|t| t.as_array())
                .map(|tests| {
                    tests
                        .iter()
                        .filter_map(|t| t.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default()
        };

        let transitions_value = analysis.get("test_transitions")?;
        let mut result = Self::new(instance_id);
        result.success = true;
        result.transitions = TransitionSet {
            fail_to_pass: tests_of(transitions_value.get("fail_to_pass")?),
            pass_to_pass: tests_of(transitions_value.get("pass_to_pass")?),
            pass_to_fail: tests_of(transitions_value.get("pass_to_fail")?),
            fail_to_fail: tests_of(transitions_value.get("fail_to_fail")?),
            dropped: analysis.get("dropped_tests").map(tests_of).unwrap_or_default(),
        };
        result.skipped_instrumented_tests = analysis
            .get("skipped_instrumented_tests")
            .map(tests_of)
            .unwrap_or_default();

        if let Some(summary) = analysis.get("execution_summary") {
            result.pre_test_execution = summary
                .get("pre_execution")
                .and_then(|v| serde_json::from_value(v.clone()).ok());
            result.post_test_execution = summary
                .get("post_execution")
                .and_then(|v| serde_json::from_value(v.clone()).ok());
        }

        Some(result)
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Progress {
    completed_instances: Vec<String>,
    failed_instances: Vec<String>,
    #[serde(default)]
    last_update: String,
}

pub struct ValidatorOptions {
    pub output_dir: PathBuf,
    pub keep_containers: bool,
    pub force_restart: bool,
}

/// Outcome of a batch run.
pub struct BatchOutcome {
    pub results: BTreeMap<String, ValidationResult>,
    pub interrupted: bool,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.success).count()
    }
}

pub struct Validator {
    options: ValidatorOptions,
    runner: RunnerConfig,
    containers: Arc<ContainerManager>,
    repos: RepositoryManager,
    run_log: RunLog,
    stub_generator: Box<dyn StubGenerator>,
    interrupted: Arc<AtomicBool>,
    completed: BTreeSet<String>,
    failed: BTreeSet<String>,
}

impl Validator {
    pub fn new(
        runner: RunnerConfig,
        options: ValidatorOptions,
        stub_generator: Box<dyn StubGenerator>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&options.output_dir).with_context(|| {
            format!("failed to create output directory {}", options.output_dir.display())
        })?;

        let run_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        info!(%run_id, "starting validation run");

        let containers = ContainerManager::new(&runner.container, &run_id)
            .context("container runtime is not usable; aborting before any instance starts")?;
        let repos = RepositoryManager::new(runner.git.clone(), &run_id);
        let run_log = RunLog::new(&options.output_dir.join("run_events.jsonl"))?;

        Ok(Self {
            options,
            runner,
            containers: Arc::new(containers),
            repos,
            run_log,
            stub_generator,
            interrupted: Arc::new(AtomicBool::new(false)),
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
        })
    }

    /// Flag checked between instances; a signal handler sets it to stop the
    /// batch at the next boundary without losing persisted results.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Shared so a signal handler can tear down run-scoped containers even
    /// while an instance is mid-flight.
    pub fn container_manager(&self) -> Arc<ContainerManager> {
        Arc::clone(&self.containers)
    }

    /// Validate a dataset with include/exclude/cap filtering and resume.
    pub fn validate_dataset(
        &mut self,
        dataset_path: &Path,
        filter: &DatasetFilter,
    ) -> Result<BatchOutcome> {
        if self.options.force_restart {
            self.clear_progress();
        }
        self.load_progress();

        let instances = filter.apply(dataset::load_dataset(dataset_path)?);
        let done: BTreeSet<String> = self.completed.union(&self.failed).cloned().collect();
        let remaining = dataset::remaining_instances(instances.clone(), &done);

        self.run_log.log(LogEvent::BatchStarted {
            dataset: dataset_path.display().to_string(),
            total_instances: instances.len(),
            remaining_instances: remaining.len(),
        })?;
        info!(
            total = instances.len(),
            remaining = remaining.len(),
            "dataset validation"
        );

        let mut results: BTreeMap<String, ValidationResult> = BTreeMap::new();
        let mut interrupted = false;

        for (index, instance) in remaining.iter().enumerate() {
            if self.interrupted.load(Ordering::SeqCst) {
                warn!("interrupt received, stopping after {} instances", index);
                let _ = self.run_log.log(LogEvent::BatchInterrupted { completed: index });
                interrupted = true;
                break;
            }

            let _ = self.run_log.log(LogEvent::InstanceStarted {
                instance_id: instance.instance_id.clone(),
                index: index + 1,
                total: remaining.len(),
            });
            info!(
                instance = %instance.instance_id,
                progress = format!("{}/{}", index + 1, remaining.len()),
                "validating instance"
            );

            let result = self.validate_instance(instance);

            if result.success {
                self.completed.insert(instance.instance_id.clone());
                if let Some(pre) = &result.pre_test_execution
                    && let Some(post) = &result.post_test_execution
                {
                    info!(
                        instance = %instance.instance_id,
                        pre = format!("{}/{}", pre.passed, pre.total_tests),
                        post = format!("{}/{}", post.passed, post.total_tests),
                        fixed = result.transitions.fail_to_pass_count(),
                        "instance validated"
                    );
                }
            } else {
                self.failed.insert(instance.instance_id.clone());
                error!(
                    instance = %instance.instance_id,
                    error = %result.error_message,
                    "instance failed"
                );
            }

            self.save_instance_result(&result);
            results.insert(instance.instance_id.clone(), result);
            self.save_progress();

            if (index + 1) % CHECKPOINT_INTERVAL == 0 {
                self.save_checkpoint(&results);
            }
        }

        self.save_checkpoint(&results);

        // Merge results persisted by earlier runs so the summary covers the
        // whole filtered dataset.
        for (id, reconstructed) in self.load_existing_results(&instances) {
            results.entry(id).or_insert(reconstructed);
        }

        report::write_final_summary(&self.options.output_dir, &results)?;
        report::write_human_report(&self.options.output_dir, &results)?;

        let succeeded = results.values().filter(|r| r.success).count();
        let _ = self.run_log.log(LogEvent::BatchCompleted {
            succeeded,
            failed: results.len() - succeeded,
        });

        self.containers.cleanup_all(self.options.keep_containers);
        self.repos.cleanup_all();

        Ok(BatchOutcome { results, interrupted })
    }

    /// Validate one instance. Never panics the batch: every failure is
    /// recorded in the returned result, and teardown runs regardless of
    /// where the state machine stopped.
    pub fn validate_instance(&self, instance: &Instance) -> ValidationResult {
        let started = Instant::now();
        let mut result = ValidationResult::new(&instance.instance_id);
        let mut scratch: Vec<Workspace> = Vec::new();

        if let Err(err) = self.run_instance(instance, &mut result, &mut scratch) {
            result.error_message = format!("{err:#}");
        }

        // Guaranteed teardown: container (unless kept) and host workspaces.
        self.containers
            .cleanup_instance(&instance.instance_id, self.options.keep_containers);
        if !self.options.keep_containers {
            let _ = self.run_log.log(LogEvent::ContainerRemoved {
                instance_id: instance.instance_id.clone(),
            });
        }
        for workspace in &scratch {
            self.repos.cleanup(workspace);
        }

        result.total_duration_secs = started.elapsed().as_secs_f64();
        let _ = self.run_log.log(LogEvent::InstanceCompleted {
            instance_id: instance.instance_id.clone(),
            success: result.success,
            duration_secs: result.total_duration_secs,
            error: result.error_message.clone(),
        });

        result
    }

    fn enter(&self, instance_id: &str, phase: Phase) {
        debug!(instance = instance_id, phase = phase.as_str(), "state advanced");
    }

    fn run_instance(
        &self,
        instance: &Instance,
        result: &mut ValidationResult,
        scratch: &mut Vec<Workspace>,
    ) -> Result<()> {
        let id = &instance.instance_id;
        let gradle = &self.runner.gradle;
        self.enter(id, Phase::Init);

        let pre_ws = self
            .repos
            .clone_repo(&instance.repo, id, "pre")
            .with_context(|| format!("failed to clone {}", instance.repo))?;
        scratch.push(pre_ws.clone());
        result.repo_cloned = true;
        self.enter(id, Phase::Cloned);
        let _ = self.run_log.log(LogEvent::RepoCloned {
            instance_id: id.clone(),
            repo: instance.repo.clone(),
        });

        // Never fails; defaults cover missing descriptors.
        let build = buildcfg::detect(&pre_ws.path);
        result.config_detected = true;
        result.build_config = Some(build.clone());
        self.enter(id, Phase::Configured);

        let handle = self
            .containers
            .create(id, &build)
            .context("container provisioning failed")?;
        self.containers.start(&handle).context("container start failed")?;
        result.container_created = true;
        self.enter(id, Phase::ContainerReady);
        let _ = self.run_log.log(LogEvent::ContainerCreated {
            instance_id: id.clone(),
            container: handle.name.clone(),
        });

        self.containers
            .copy_in(&handle, &pre_ws.path, "/workspace")
            .context("failed to copy workspace into container")?;
        // The container owns its copy now; release the host clone early.
        self.repos.cleanup(&pre_ws);

        repo::checkout_base_commit(&self.containers, &handle, &instance.base_commit, "/workspace")
            .with_context(|| format!("failed to check out base commit {}", instance.base_commit))?;
        result.base_commit_checked_out = true;
        self.enter(id, Phase::CommitCheckedOut);

        self.apply_patch(&handle, &instance.test_patch, "test_patch", "/workspace")?;
        result.test_patch_applied = true;
        self.enter(id, Phase::TestPatchApplied);

        self.stub_step(instance, &handle, &build)?;
        self.enter(id, Phase::StubsApplied);

        testing::prepare_workspace(&self.containers, &handle, "/workspace")
            .context("failed to prepare workspace for pre-phase tests")?;
        let (pre, pre_skipped) = testing::run_tests(
            &self.containers,
            &handle,
            &instance.test_patch,
            &build,
            gradle,
            "pre",
            "/workspace",
        )
        .context("pre-phase test execution failed")?;
        self.save_test_logs(id, "pre", &pre.raw_output);
        self.log_tests(id, "pre", &pre);
        result.pre_test_execution = Some((&pre).into());
        result.skipped_instrumented_tests.extend(pre_skipped);
        self.enter(id, Phase::PreTestsRun);

        // A fresh, independent clone so pre-phase build state cannot
        // contaminate the post run.
        let post_ws = self
            .repos
            .clone_at_commit(&instance.repo, id, &instance.base_commit, "post")
            .context("failed to prepare fresh workspace for post-phase tests")?;
        scratch.push(post_ws.clone());
        self.containers
            .copy_in(&handle, &post_ws.path, "/workspace_post")
            .context("failed to copy fresh workspace into container")?;
        self.repos.cleanup(&post_ws);

        self.apply_patch(&handle, &instance.test_patch, "test_patch_post", "/workspace_post")?;
        self.enter(id, Phase::PostWorkspaceReady);

        self.apply_patch(&handle, &instance.patch, "solution_patch", "/workspace_post")?;
        result.solution_patch_applied = true;
        self.enter(id, Phase::SolutionPatchApplied);

        testing::prepare_workspace(&self.containers, &handle, "/workspace_post")
            .context("failed to prepare workspace for post-phase tests")?;
        let (post, post_skipped) = testing::run_tests(
            &self.containers,
            &handle,
            &instance.test_patch,
            &build,
            gradle,
            "post",
            "/workspace_post",
        )
        .context("post-phase test execution failed")?;
        self.save_test_logs(id, "post", &post.raw_output);
        self.log_tests(id, "post", &post);
        result.post_test_execution = Some((&post).into());
        result.skipped_instrumented_tests.extend(post_skipped);
        self.enter(id, Phase::PostTestsRun);

        result.transitions = transitions::classify(&pre, &post);
        self.enter(id, Phase::TransitionsComputed);
        info!(
            instance = %id,
            fail_to_pass = result.transitions.fail_to_pass_count(),
            pass_to_pass = result.transitions.pass_to_pass_count(),
            pass_to_fail = result.transitions.pass_to_fail_count(),
            fail_to_fail = result.transitions.fail_to_fail_count(),
            dropped = result.transitions.dropped.len(),
            "transitions computed"
        );

        self.save_test_analysis(result)?;
        result.success = true;
        Ok(())
    }

    fn apply_patch(
        &self,
        handle: &ContainerHandle,
        patch_text: &str,
        label: &str,
        workdir: &str,
    ) -> Result<()> {
        match patch::apply_in_container(&self.containers, handle, patch_text, label, workdir) {
            Ok(_) => {
                let _ = self.run_log.log(LogEvent::PatchApplied {
                    instance_id: handle.instance_id.clone(),
                    label: label.to_string(),
                });
                Ok(())
            }
            Err(err) => {
                let _ = self.run_log.log(LogEvent::PatchFailed {
                    instance_id: handle.instance_id.clone(),
                    label: label.to_string(),
                });
                Err(err).with_context(|| format!("failed to apply {label}"))
            }
        }
    }

    /// Best-effort stub step. Runs only when the build probe shows the
    /// workspace does not compile; a stub failure reverts the workspace to
    /// the test-patch-applied state and the pipeline continues.
    fn stub_step(
        &self,
        instance: &Instance,
        handle: &ContainerHandle,
        build: &BuildConfig,
    ) -> Result<()> {
        let id = &instance.instance_id;

        let probe = testing::run_build_probe(
            &self.containers,
            handle,
            &instance.test_patch,
            build,
            &self.runner.gradle,
            "/workspace",
        )
        .context("build probe failed to execute")?;

        if probe.success && !probe.compilation_errors {
            return Ok(());
        }
        info!(
            instance = %id,
            build_success = probe.success,
            compilation_errors = probe.compilation_errors,
            "build probe failed, invoking stub capability"
        );

        let outcome = self.stub_generator.apply_and_stub(
            &self.containers,
            handle,
            &probe.output,
            &instance.test_patch,
            &instance.patch,
            "/workspace",
        );

        let description = match outcome {
            Ok(StubOutcome::Applied { files_changed }) => {
                format!("applied ({files_changed} files)")
            }
            Ok(StubOutcome::Skipped { reason }) => format!("skipped: {reason}"),
            Err(err) => {
                warn!(instance = %id, %err, "stub generation failed, reverting workspace");
                self.revert_to_test_patch(instance, handle)?;
                format!("failed and reverted: {err}")
            }
        };

        let _ = self.run_log.log(LogEvent::StubStep {
            instance_id: id.clone(),
            outcome: description,
        });
        Ok(())
    }

    /// Rewind the container workspace to the TestPatchApplied state after a
    /// failed stub attempt: drop all changes, re-checkout the base commit,
    /// reapply the test patch.
    fn revert_to_test_patch(&self, instance: &Instance, handle: &ContainerHandle) -> Result<()> {
        repo::reset_to_clean_state(&self.containers, handle, "/workspace")
            .context("failed to reset workspace after stub failure")?;
        repo::checkout_base_commit(&self.containers, handle, &instance.base_commit, "/workspace")
            .context("failed to re-checkout base commit after stub failure")?;
        self.apply_patch(handle, &instance.test_patch, "test_patch", "/workspace")
            .context("failed to reapply test patch after stub failure")?;
        Ok(())
    }

    fn log_tests(&self, instance_id: &str, phase: &str, result: &TestExecutionResult) {
        let _ = self.run_log.log(LogEvent::TestsExecuted {
            instance_id: instance_id.to_string(),
            phase: phase.to_string(),
            total: result.total(),
            passed: result.passed(),
            failed: result.failed() + result.errors(),
            build_successful: result.build_successful,
        });
    }

    fn instance_dir(&self, instance_id: &str) -> PathBuf {
        self.options.output_dir.join(instance_id)
    }

    fn save_instance_result(&self, result: &ValidationResult) {
        let dir = self.instance_dir(&result.instance_id);
        if let Err(err) = std::fs::create_dir_all(&dir) {
            warn!(%err, "failed to create instance output directory");
            return;
        }

        match serde_json::to_string_pretty(result) {
            Ok(json) => {
                if let Err(err) = std::fs::write(dir.join("validation_result.json"), json) {
                    warn!(%err, instance = %result.instance_id, "failed to persist validation result");
                }
            }
            Err(err) => warn!(%err, "failed to serialize validation result"),
        }
    }

    fn save_test_analysis(&self, result: &ValidationResult) -> Result<()> {
        let dir = self.instance_dir(&result.instance_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let path = dir.join("test_analysis.json");
        let json = serde_json::to_string_pretty(&result.analysis_json())?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    fn save_test_logs(&self, instance_id: &str, phase: &str, raw_output: &str) {
        let dir = self.instance_dir(instance_id);
        if std::fs::create_dir_all(&dir).is_ok()
            && let Err(err) = std::fs::write(dir.join(format!("test_logs_{phase}.txt")), raw_output)
        {
            warn!(%err, instance = instance_id, phase, "failed to persist test logs");
        }
    }

    fn progress_path(&self) -> PathBuf {
        self.options.output_dir.join("validation_progress.json")
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.options.output_dir.join("validation_checkpoint.json")
    }

    fn clear_progress(&self) {
        for path in [self.progress_path(), self.checkpoint_path()] {
            if path.exists() {
                if let Err(err) = std::fs::remove_file(&path) {
                    warn!(%err, file = %path.display(), "failed to clear progress file");
                } else {
                    info!(file = %path.display(), "cleared previous progress");
                }
            }
        }
    }

    fn load_progress(&mut self) {
        let path = self.progress_path();
        if !path.is_file() {
            return;
        }

        match std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Progress>(&raw).ok())
        {
            Some(progress) => {
                self.completed = progress.completed_instances.into_iter().collect();
                self.failed = progress.failed_instances.into_iter().collect();
                info!(
                    completed = self.completed.len(),
                    failed = self.failed.len(),
                    "loaded progress from previous run"
                );
            }
            None => warn!(file = %path.display(), "could not load previous progress"),
        }
    }

    fn save_progress(&self) {
        let progress = Progress {
            completed_instances: self.completed.iter().cloned().collect(),
            failed_instances: self.failed.iter().cloned().collect(),
            last_update: Utc::now().to_rfc3339(),
        };

        match serde_json::to_string_pretty(&progress) {
            Ok(json) => {
                if let Err(err) = std::fs::write(self.progress_path(), json) {
                    warn!(%err, "failed to save progress");
                }
            }
            Err(err) => warn!(%err, "failed to serialize progress"),
        }
    }

    fn save_checkpoint(&self, results: &BTreeMap<String, ValidationResult>) {
        let summary: BTreeMap<&String, serde_json::Value> = results
            .iter()
            .map(|(id, result)| {
                (
                    id,
                    serde_json::json!({
                        "success": result.success,
                        "error_message": result.error_message,
                        "total_duration_secs": result.total_duration_secs,
                        "tests_fixed": result.transitions.fail_to_pass_count(),
                        "tests_broken": result.transitions.pass_to_fail_count(),
                    }),
                )
            })
            .collect();

        let checkpoint = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "completed_instances": self.completed.iter().collect::<Vec<_>>(),
            "failed_instances": self.failed.iter().collect::<Vec<_>>(),
            "results_summary": summary,
        });

        match serde_json::to_string_pretty(&checkpoint) {
            Ok(json) => {
                if let Err(err) = std::fs::write(self.checkpoint_path(), json) {
                    warn!(%err, "failed to save checkpoint");
                }
            }
            Err(err) => warn!(%err, "failed to serialize checkpoint"),
        }
    }

    fn load_existing_results(
        &self,
        instances: &[Instance],
    ) -> BTreeMap<String, ValidationResult> {
        let mut results = BTreeMap::new();

        for instance in instances {
            let analysis_path = self
                .instance_dir(&instance.instance_id)
                .join("test_analysis.json");
            if !analysis_path.is_file() {
                continue;
            }

            let reconstructed = std::fs::read_to_string(&analysis_path)
                .ok()
                .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
                .and_then(|value| ValidationResult::from_analysis(&instance.instance_id, &value));

            match reconstructed {
                Some(result) => {
                    results.insert(instance.instance_id.clone(), result);
                }
                None => warn!(
                    instance = %instance.instance_id,
                    "could not reconstruct result from saved analysis"
                ),
            }
        }

        results
    }
}
