//! Batch summary artifacts.
//!
//! Written once, after all instances have finished: an aggregate JSON
//! summary (`final_validation_summary.json`) and a human-readable report
//! (`validation_report.txt`). Both only read persisted per-instance
//! results; they never mutate them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::validator::ValidationResult;

pub fn write_final_summary(
    output_dir: &Path,
    results: &BTreeMap<String, ValidationResult>,
) -> Result<PathBuf> {
    let path = output_dir.join("final_validation_summary.json");
    let summary = build_summary(results);

    std::fs::write(&path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(file = %path.display(), "wrote final summary");
    Ok(path)
}

fn build_summary(results: &BTreeMap<String, ValidationResult>) -> serde_json::Value {
    let successful: Vec<&ValidationResult> = results.values().filter(|r| r.success).collect();
    let failed: Vec<&ValidationResult> = results.values().filter(|r| !r.success).collect();

    let total_fail_to_pass: usize = successful.iter().map(|r| r.transitions.fail_to_pass_count()).sum();
    let total_pass_to_pass: usize = successful.iter().map(|r| r.transitions.pass_to_pass_count()).sum();
    let total_pass_to_fail: usize = successful.iter().map(|r| r.transitions.pass_to_fail_count()).sum();
    let total_fail_to_fail: usize = successful.iter().map(|r| r.transitions.fail_to_fail_count()).sum();

    let mut unique_tests: BTreeSet<&String> = BTreeSet::new();
    for result in &successful {
        for summary in [&result.pre_test_execution, &result.post_test_execution]
            .into_iter()
            .flatten()
        {
            unique_tests.extend(summary.passed_tests.iter());
            unique_tests.extend(summary.failed_tests.iter());
        }
    }

    let total_duration: f64 = results.values().map(|r| r.total_duration_secs).sum();
    let avg_duration = if results.is_empty() {
        0.0
    } else {
        total_duration / results.len() as f64
    };
    let longest = results
        .values()
        .max_by(|a, b| a.total_duration_secs.total_cmp(&b.total_duration_secs))
        .map(|r| r.instance_id.clone());
    let shortest = results
        .values()
        .min_by(|a, b| a.total_duration_secs.total_cmp(&b.total_duration_secs))
        .map(|r| r.instance_id.clone());

    let success_rate = if results.is_empty() {
        0.0
    } else {
        successful.len() as f64 / results.len() as f64 * 100.0
    };

    let detailed: BTreeMap<&String, serde_json::Value> = results
        .iter()
        .map(|(id, result)| {
            (
                id,
                serde_json::json!({
                    "success": result.success,
                    "error_message": result.error_message,
                    "total_duration_secs": result.total_duration_secs,
                    "fail_to_pass": result.transitions.fail_to_pass_count(),
                    "pass_to_pass": result.transitions.pass_to_pass_count(),
                    "pass_to_fail": result.transitions.pass_to_fail_count(),
                    "fail_to_fail": result.transitions.fail_to_fail_count(),
                    "dropped": result.transitions.dropped.len(),
                    "skipped_instrumented": result.skipped_instrumented_tests.len(),
                }),
            )
        })
        .collect();

    serde_json::json!({
        "validation_metadata": {
            "completion_time": Utc::now().to_rfc3339(),
            "total_duration_hours": total_duration / 3600.0,
            "execution_summary": format!(
                "Completed {}/{} instances successfully",
                successful.len(),
                results.len()
            ),
        },
        "overall_statistics": {
            "total_instances": results.len(),
            "successful": successful.len(),
            "failed": failed.len(),
            "success_rate": success_rate,
        },
        "test_transition_statistics": {
            "fail_to_pass": total_fail_to_pass,
            "pass_to_pass": total_pass_to_pass,
            "pass_to_fail": total_pass_to_fail,
            "fail_to_fail": total_fail_to_fail,
            "summary": {
                "total_tests_fixed": total_fail_to_pass,
                "total_tests_broken": total_pass_to_fail,
                "total_tests_maintained": total_pass_to_pass,
                "total_tests_still_failing": total_fail_to_fail,
                "unique_tests_found": unique_tests.len(),
            },
        },
        "performance_metrics": {
            "avg_duration_secs": avg_duration,
            "total_duration_hours": total_duration / 3600.0,
            "longest_instance": longest,
            "shortest_instance": shortest,
        },
        "detailed_results": detailed,
    })
}

pub fn write_human_report(
    output_dir: &Path,
    results: &BTreeMap<String, ValidationResult>,
) -> Result<PathBuf> {
    let successful: Vec<&ValidationResult> = results.values().filter(|r| r.success).collect();
    let failed: Vec<&ValidationResult> = results.values().filter(|r| !r.success).collect();

    let total_fixed: usize = successful.iter().map(|r| r.transitions.fail_to_pass_count()).sum();
    let total_broken: usize = successful.iter().map(|r| r.transitions.pass_to_fail_count()).sum();
    let total_maintained: usize = successful.iter().map(|r| r.transitions.pass_to_pass_count()).sum();
    let total_still_failing: usize =
        successful.iter().map(|r| r.transitions.fail_to_fail_count()).sum();
    let total_duration: f64 = results.values().map(|r| r.total_duration_secs).sum();
    let success_rate = if results.is_empty() {
        0.0
    } else {
        successful.len() as f64 / results.len() as f64 * 100.0
    };

    let mut lines = vec![
        "Patchbench Validation Report".to_string(),
        "=".repeat(60),
        format!("Execution completed: {}", Utc::now().format("%Y-%m-%d %H:%M:%S")),
        format!("Total runtime: {:.2} hours", total_duration / 3600.0),
        String::new(),
        "Overall Results:".to_string(),
        "-".repeat(16),
        format!("Total Instances: {}", results.len()),
        format!("Successful: {}", successful.len()),
        format!("Failed: {}", failed.len()),
        format!("Success Rate: {success_rate:.1}%"),
        String::new(),
        "Test Transition Summary:".to_string(),
        "-".repeat(24),
        format!("  Tests Fixed (Fail->Pass): {total_fixed}"),
        format!("  Tests Maintained (Pass->Pass): {total_maintained}"),
        format!("  Tests Broken (Pass->Fail): {total_broken}"),
        format!("  Tests Still Failing (Fail->Fail): {total_still_failing}"),
        String::new(),
    ];

    if !failed.is_empty() {
        lines.push("Failed Instances:".to_string());
        lines.push("-".repeat(17));
        for result in &failed {
            lines.push(format!("  - {}: {}", result.instance_id, result.error_message));
        }
        lines.push(String::new());
    }

    lines.extend([
        "Resume Information:".to_string(),
        "-".repeat(19),
        "To resume after an interruption, re-run the same command.".to_string(),
        "Completed instances are skipped automatically.".to_string(),
        String::new(),
    ]);

    let path = output_dir.join("validation_report.txt");
    std::fs::write(&path, lines.join("\n"))
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(file = %path.display(), "wrote validation report");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::ValidationResult;

    fn results() -> BTreeMap<String, ValidationResult> {
        let mut ok = ValidationResult::new("app-1");
        ok.success = true;
        ok.transitions.fail_to_pass.insert("a.T1".to_string());
        ok.transitions.pass_to_pass.insert("a.T2".to_string());
        ok.total_duration_secs = 100.0;

        let bad = ValidationResult::failed("app-2", "container provisioning failed");

        [("app-1".to_string(), ok), ("app-2".to_string(), bad)]
            .into_iter()
            .collect()
    }

    #[test]
    fn summary_aggregates_transition_counts_from_successful_only() {
        let summary = build_summary(&results());

        assert_eq!(summary["overall_statistics"]["total_instances"], serde_json::json!(2));
        assert_eq!(summary["overall_statistics"]["successful"], serde_json::json!(1));
        assert_eq!(summary["test_transition_statistics"]["fail_to_pass"], serde_json::json!(1));
        assert_eq!(summary["test_transition_statistics"]["pass_to_pass"], serde_json::json!(1));
        assert_eq!(
            summary["test_transition_statistics"]["summary"]["total_tests_fixed"],
            serde_json::json!(1)
        );
    }

    #[test]
    fn summary_never_drops_a_failed_instance() {
        let summary = build_summary(&results());
        let detailed = summary["detailed_results"].as_object().unwrap();
        assert!(detailed.contains_key("app-2"));
        assert_eq!(detailed["app-2"]["success"], serde_json::json!(false));
        assert!(
            detailed["app-2"]["error_message"]
                .as_str()
                .unwrap()
                .contains("provisioning")
        );
    }

    #[test]
    fn empty_batch_summary_has_zero_rate() {
        let summary = build_summary(&BTreeMap::new());
        assert_eq!(summary["overall_statistics"]["success_rate"], serde_json::json!(0.0));
    }

    #[test]
    fn writes_both_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let results = results();

        let summary_path = write_final_summary(tmp.path(), &results).unwrap();
        let report_path = write_human_report(tmp.path(), &results).unwrap();

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(summary_path).unwrap()).unwrap();
        assert!(summary.get("validation_metadata").is_some());

        let report = std::fs::read_to_string(report_path).unwrap();
        assert!(report.contains("Patchbench Validation Report"));
        assert!(report.contains("app-2: container provisioning failed"));
    }
}
