//! Test execution and report parsing.
//!
//! The test patch decides what runs: changed test files map to the
//! narrowest gradle targets (per-module unit-test tasks with class
//! filters), instrumented tests are split out as skipped since they need a
//! device the container cannot provide. After the run, every JUnit XML
//! report is echoed between sentinel markers and parsed out of the combined
//! output; duplicate results across build variants collapse to a single
//! canonical entry.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::buildcfg::BuildConfig;
use crate::config::GradleConfig;
use crate::container::{ContainerHandle, ContainerManager};
use crate::errors::ContainerError;
use crate::patch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl TestStatus {
    /// FAILED and ERROR both count as failing for transition purposes.
    pub fn is_failing(self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::Error)
    }
}

/// One test execution outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub class_name: String,
    pub status: TestStatus,
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl TestCase {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.class_name, self.name)
    }
}

/// The full output of one test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestExecutionResult {
    pub test_cases: Vec<TestCase>,
    pub exit_code: i32,
    pub duration_secs: f64,
    pub build_successful: bool,
    pub gradle_command: String,
    #[serde(skip)]
    pub raw_output: String,
}

impl TestExecutionResult {
    fn vacuous(message: &str) -> Self {
        Self {
            test_cases: Vec::new(),
            exit_code: 0,
            duration_secs: 0.0,
            build_successful: true,
            gradle_command: String::new(),
            raw_output: message.to_string(),
        }
    }

    pub fn total(&self) -> usize {
        self.test_cases.len()
    }

    pub fn passed(&self) -> usize {
        self.count(TestStatus::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(TestStatus::Failed)
    }

    pub fn errors(&self) -> usize {
        self.count(TestStatus::Error)
    }

    pub fn skipped(&self) -> usize {
        self.count(TestStatus::Skipped)
    }

    fn count(&self, status: TestStatus) -> usize {
        self.test_cases.iter().filter(|t| t.status == status).count()
    }

    /// Qualified name -> status for every case in the run.
    pub fn status_map(&self) -> BTreeMap<String, TestStatus> {
        self.test_cases
            .iter()
            .map(|t| (t.qualified_name(), t.status))
            .collect()
    }

    pub fn passed_tests(&self) -> Vec<String> {
        self.named_tests(|s| s == TestStatus::Passed)
    }

    pub fn failed_tests(&self) -> Vec<String> {
        self.named_tests(TestStatus::is_failing)
    }

    fn named_tests(&self, predicate: impl Fn(TestStatus) -> bool) -> Vec<String> {
        let names: BTreeSet<String> = self
            .test_cases
            .iter()
            .filter(|t| predicate(t.status))
            .map(|t| t.qualified_name())
            .collect();
        names.into_iter().collect()
    }
}

/// Recognized source-file kinds in a patch. Everything else is skipped by
/// the extraction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Java,
    Kotlin,
    Unrecognized,
}

impl SourceKind {
    pub fn of(path: &str) -> Self {
        if path.ends_with(".java") {
            SourceKind::Java
        } else if path.ends_with(".kt") {
            SourceKind::Kotlin
        } else {
            SourceKind::Unrecognized
        }
    }
}

/// Unit-test classes grouped by gradle module, with device-dependent tests
/// recorded separately.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TestTargets {
    pub module_tests: BTreeMap<String, Vec<String>>,
    pub skipped_instrumented: Vec<String>,
}

impl TestTargets {
    pub fn is_empty(&self) -> bool {
        self.module_tests.is_empty()
    }

    pub fn unit_test_count(&self) -> usize {
        self.module_tests.values().map(Vec::len).sum()
    }
}

/// Map the test patch to gradle targets.
///
/// Changed test files map to the narrowest target: per-module tasks
/// filtered to the derived classes. When a module's test files yield no
/// runnable class (all helpers), the whole module's unit-test task runs
/// unfiltered instead of running nothing.
pub fn derive_targets(test_patch: &str) -> TestTargets {
    let mut targets = TestTargets::default();
    let mut ambiguous_modules: BTreeSet<String> = BTreeSet::new();

    for file in patch::changed_files(test_patch) {
        if SourceKind::of(&file) == SourceKind::Unrecognized {
            continue;
        }
        if !is_test_file(&file) {
            debug!(%file, "skipping non-test source file");
            continue;
        }
        if is_instrumented(&file) {
            if let Some(class_name) = qualified_class_name(&file) {
                targets.skipped_instrumented.push(class_name);
            }
            continue;
        }

        match qualified_class_name(&file) {
            Some(class_name) => {
                targets
                    .module_tests
                    .entry(module_of(&file))
                    .or_default()
                    .push(class_name);
            }
            None => {
                debug!(%file, "no runnable class derived, falling back to module-wide tests");
                ambiguous_modules.insert(module_of(&file));
            }
        }
    }

    for module in ambiguous_modules {
        targets.module_tests.entry(module).or_default();
    }

    for classes in targets.module_tests.values_mut() {
        classes.sort();
        classes.dedup();
    }
    targets.skipped_instrumented.sort();
    targets.skipped_instrumented.dedup();

    targets
}

fn is_test_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    const INDICATORS: &[&str] = &["/test/", "/androidtest/", "/commontest/", "/unittest/"];
    INDICATORS.iter().any(|marker| lower.contains(marker))
        || lower.ends_with("test.java")
        || lower.ends_with("test.kt")
        || lower.ends_with("tests.java")
        || lower.ends_with("tests.kt")
}

/// Instrumented tests need a device or emulator and are excluded from the
/// container run.
fn is_instrumented(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.contains("/androidtest/") || lower.contains("/instrumentedtest/")
}

/// Gradle module owning a file: everything before the `src` directory.
///
/// `feature/notification/impl/src/commonTest/kotlin/...` -> `:feature:notification:impl`
/// `app/src/test/java/...` -> `:app`
/// `src/test/java/...` -> `:` (root project)
fn module_of(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();

    if let Some(src_index) = parts.iter().position(|p| *p == "src") {
        if src_index == 0 {
            return ":".to_string();
        }
        return format!(":{}", parts[..src_index].join(":"));
    }

    for (index, part) in parts.iter().enumerate() {
        let lower = part.to_lowercase();
        if lower.contains("test") && index > 0 {
            return format!(":{}", parts[..index].join(":"));
        }
    }

    ":app".to_string()
}

const TEST_SOURCE_ROOTS: &[&str] = &[
    "/src/test/java/",
    "/src/test/kotlin/",
    "/src/androidTest/java/",
    "/src/androidTest/kotlin/",
    "/src/commonTest/kotlin/",
    "/src/unitTest/java/",
    "/src/unitTest/kotlin/",
];

/// Helper/infrastructure classes that live in test source trees but are not
/// runnable test classes.
const UTILITY_NAME_MARKERS: &[&str] = &[
    "Mock", "Fake", "Stub", "Dummy", "Helper", "Util", "Utils", "Factory", "Builder", "Fixture",
    "Base", "Abstract", "TestData", "Constants", "Rule", "Runner", "Suite", "Matcher", "Support",
];

fn is_utility_class(class_name: &str) -> bool {
    UTILITY_NAME_MARKERS
        .iter()
        .any(|marker| class_name.starts_with(marker) || class_name.ends_with(marker))
}

/// Fully qualified class name for a test source file, or None for utility
/// classes that should not be run directly.
fn qualified_class_name(path: &str) -> Option<String> {
    let file_name = path.rsplit('/').next()?;
    let simple_name = file_name.trim_end_matches(".java").trim_end_matches(".kt");
    if is_utility_class(simple_name) {
        return None;
    }

    for root in TEST_SOURCE_ROOTS {
        if let Some((_, class_path)) = path.split_once(root) {
            return Some(to_class_name(class_path));
        }
    }

    // Non-standard layout: take everything after the last java/kotlin
    // source root.
    for root in ["/java/", "/kotlin/"] {
        if let Some(index) = path.rfind(root) {
            return Some(to_class_name(&path[index + root.len()..]));
        }
    }

    Some(simple_name.to_string())
}

fn to_class_name(class_path: &str) -> String {
    class_path
        .trim_end_matches(".java")
        .trim_end_matches(".kt")
        .replace('/', ".")
}

/// Compose the gradle task list for the derived targets.
pub fn gradle_tasks(targets: &TestTargets, build: &BuildConfig) -> String {
    let variant = build.variant_task_infix();
    let mut tasks = Vec::new();

    for (module, classes) in &targets.module_tests {
        let task = if module == ":app" || module == ":" {
            format!("test{variant}UnitTest")
        } else {
            format!("{module}:test{variant}UnitTest")
        };

        if classes.is_empty() {
            // Ambiguous mapping: run the module's whole unit-test task.
            tasks.push(task);
        } else {
            let filters: Vec<String> = classes
                .iter()
                .map(|class| format!("--tests \"{class}\""))
                .collect();
            tasks.push(format!("{task} {}", filters.join(" ")));
        }
    }

    tasks.join(" ")
}

fn test_timeout(targets: &TestTargets, gradle: &GradleConfig) -> u64 {
    let modules = targets.module_tests.len().max(1) as u64;
    (modules * gradle.test_timeout_secs_per_module).min(gradle.max_test_timeout_secs)
}

fn execution_script(gradle_args: &str, jvm_args: &str, timeout_secs: u64) -> String {
    format!(
        "mkdir -p /tmp/.gradle\n\
         cat > /tmp/.gradle/gradle.properties << 'GRADLE_PROPS_EOF'\n\
         org.gradle.daemon=false\n\
         org.gradle.parallel=true\n\
         org.gradle.workers.max=4\n\
         org.gradle.jvmargs={jvm_args}\n\
         android.enableJetifier=true\n\
         android.useAndroidX=true\n\
         GRADLE_PROPS_EOF\n\
         if [ -f ./gradlew ]; then\n\
             chmod +x ./gradlew\n\
             ./gradlew --stop >/dev/null 2>&1 || true\n\
             echo \"executing: ./gradlew {gradle_args}\"\n\
             timeout {timeout_secs} ./gradlew {gradle_args} --no-daemon --stacktrace --continue --parallel || echo \"gradle exited nonzero\"\n\
         else\n\
             echo \"ERROR: no gradlew wrapper in workspace\"\n\
         fi\n\
         echo \"=== collecting test reports ===\"\n\
         {{ find . -name 'TEST-*.xml' -type f 2>/dev/null; \
            find . -path '*/test-results/*' -name '*.xml' -type f 2>/dev/null; }} \
         | sort -u | head -60 | while read -r file; do\n\
             echo \"=== REPORT: $file ===\"\n\
             cat \"$file\" 2>/dev/null || echo \"unreadable report: $file\"\n\
             echo \"=== END REPORT ===\"\n\
         done"
    )
}

/// Run the project's tests inside the container and parse the reports.
///
/// Returns the normalized result and the instrumented test classes that
/// were skipped. An empty derived target set is a vacuous success; a run
/// that produced no parsable report while targets existed is a build
/// failure, not "zero tests".
pub fn run_tests(
    containers: &ContainerManager,
    handle: &ContainerHandle,
    test_patch: &str,
    build: &BuildConfig,
    gradle: &GradleConfig,
    phase: &str,
    workdir: &str,
) -> Result<(TestExecutionResult, Vec<String>), ContainerError> {
    let targets = derive_targets(test_patch);
    let skipped = targets.skipped_instrumented.clone();

    if targets.is_empty() {
        if skipped.is_empty() {
            warn!(phase, "no unit test classes found in test patch");
        } else {
            info!(phase, skipped = skipped.len(), "only instrumented tests in patch, all skipped");
        }
        return Ok((
            TestExecutionResult::vacuous("no unit test classes found in test patch"),
            skipped,
        ));
    }

    let gradle_args = gradle_tasks(&targets, build);
    let timeout_secs = test_timeout(&targets, gradle);
    info!(
        phase,
        modules = targets.module_tests.len(),
        tests = targets.unit_test_count(),
        command = %gradle_args,
        "running unit tests"
    );

    let script = execution_script(&gradle_args, &gradle.jvm_args, timeout_secs);
    // The in-container `timeout` wrapper gets a buffer before the hard
    // deadline kills the exec itself.
    let exec = containers.exec(handle, &script, workdir, Duration::from_secs(timeout_secs + 120))?;

    let test_cases = parse_test_reports(&exec.output);
    let build_ok = build_successful(&exec.output, exec.exit_code, test_cases.len(), true);

    info!(
        phase,
        total = test_cases.len(),
        exit_code = exec.exit_code,
        build_successful = build_ok,
        "test execution finished"
    );

    Ok((
        TestExecutionResult {
            test_cases,
            exit_code: exec.exit_code,
            duration_secs: exec.duration.as_secs_f64(),
            build_successful: build_ok,
            gradle_command: format!("./gradlew {gradle_args}"),
            raw_output: exec.output,
        },
        skipped,
    ))
}

/// Clear build artifacts and stop gradle daemons so one phase cannot bleed
/// cached state into the next. Best-effort: a workspace without a wrapper
/// still proceeds.
pub fn prepare_workspace(
    containers: &ContainerManager,
    handle: &ContainerHandle,
    workdir: &str,
) -> Result<(), ContainerError> {
    let script = "rm -rf build/ app/build/ */build/ .gradle/daemon/ 2>/dev/null || true\n\
                  if [ -f ./gradlew ]; then chmod +x ./gradlew; ./gradlew --stop >/dev/null 2>&1 || true; fi";
    containers.exec(handle, script, workdir, Duration::from_secs(120))?;
    Ok(())
}

/// Result of the pre-test build probe.
#[derive(Debug, Clone)]
pub struct BuildProbe {
    pub success: bool,
    pub compilation_errors: bool,
    pub output: String,
    pub command: String,
}

/// Compile the derived targets once before the pre-phase test run. A failed
/// or error-ridden probe triggers the stub capability; a probe timeout is a
/// failed probe, not a failed instance.
pub fn run_build_probe(
    containers: &ContainerManager,
    handle: &ContainerHandle,
    test_patch: &str,
    build: &BuildConfig,
    gradle: &GradleConfig,
    workdir: &str,
) -> Result<BuildProbe, ContainerError> {
    let targets = derive_targets(test_patch);
    if targets.is_empty() {
        return Ok(BuildProbe {
            success: true,
            compilation_errors: false,
            output: "no targets to build".to_string(),
            command: String::new(),
        });
    }

    let gradle_args = gradle_tasks(&targets, build);
    let timeout_secs = test_timeout(&targets, gradle);
    let script = execution_script(&gradle_args, &gradle.jvm_args, timeout_secs);

    let exec = match containers.exec(handle, &script, workdir, Duration::from_secs(timeout_secs + 120)) {
        Ok(exec) => exec,
        Err(err) if err.is_timeout() => {
            warn!(%err, "build probe timed out");
            return Ok(BuildProbe {
                success: false,
                compilation_errors: false,
                output: err.to_string(),
                command: format!("./gradlew {gradle_args}"),
            });
        }
        Err(err) => return Err(err),
    };

    let success = build_successful(&exec.output, exec.exit_code, 1, false);
    let compilation_errors = has_compilation_errors(&exec.output);
    debug!(success, compilation_errors, "build probe finished");

    Ok(BuildProbe {
        success,
        compilation_errors,
        output: exec.output,
        command: format!("./gradlew {gradle_args}"),
    })
}

const COMPILATION_ERROR_INDICATORS: &[&str] = &[
    "cannot find symbol",
    "package does not exist",
    "unresolved reference",
    "unresolved import",
    "compilation failed",
    "could not compile",
    "error: cannot access",
    "no suitable method found",
    "incompatible types",
    "method does not override",
    "missing return statement",
    "undefined symbol",
];

/// The gradle banner can claim success while javac/kotlinc diagnostics show
/// the sources never compiled.
pub fn has_compilation_errors(output: &str) -> bool {
    let lower = output.to_lowercase();
    COMPILATION_ERROR_INDICATORS
        .iter()
        .any(|indicator| lower.contains(indicator))
}

fn build_successful(raw: &str, exit_code: i32, parsed_reports: usize, expect_reports: bool) -> bool {
    if expect_reports && parsed_reports == 0 {
        return false;
    }
    raw.contains("BUILD SUCCESSFUL") || (!raw.contains("BUILD FAILED") && exit_code == 0)
}

/// Parse every sentinel-delimited report in the combined output, resolving
/// duplicate qualified names across build variants to one canonical result:
/// debug-variant report paths win, then the lexicographically first path.
pub fn parse_test_reports(output: &str) -> Vec<TestCase> {
    let section_pattern = Regex::new(r"(?s)=== REPORT: (.+?) ===\n(.*?)=== END REPORT ===").unwrap();

    let mut sections: Vec<(String, String)> = section_pattern
        .captures_iter(output)
        .map(|captures| (captures[1].trim().to_string(), captures[2].to_string()))
        .collect();
    sections.sort_by(|a, b| {
        variant_rank(&a.0)
            .cmp(&variant_rank(&b.0))
            .then_with(|| a.0.cmp(&b.0))
    });

    let mut seen = BTreeSet::new();
    let mut cases = Vec::new();
    for (path, xml) in &sections {
        for case in parse_junit_xml(xml) {
            if seen.insert(case.qualified_name()) {
                cases.push(case);
            } else {
                debug!(report = %path, test = %case.qualified_name(), "dropping duplicate variant result");
            }
        }
    }
    cases
}

fn variant_rank(report_path: &str) -> u8 {
    let lower = report_path.to_lowercase();
    if lower.contains("debug") {
        0
    } else if lower.contains("release") {
        1
    } else {
        2
    }
}

fn parse_junit_xml(xml: &str) -> Vec<TestCase> {
    let testcase_pattern =
        Regex::new(r"(?s)<testcase\b([^>]*?)(?:/>|>(.*?)</testcase>)").unwrap();
    let attr = |attrs: &str, name: &str| -> Option<String> {
        // Anchored on preceding whitespace so `name=` never matches inside
        // `classname=`.
        let pattern = Regex::new(&format!(r#"(?:^|\s){name}="([^"]*)""#)).unwrap();
        pattern.captures(attrs).map(|c| c[1].to_string())
    };

    let mut cases = Vec::new();
    for captures in testcase_pattern.captures_iter(xml) {
        let attrs = &captures[1];
        let Some(name) = attr(attrs, "name") else {
            continue;
        };
        let Some(class_name) = attr(attrs, "classname") else {
            continue;
        };
        let duration = attr(attrs, "time")
            .and_then(|t| t.parse().ok())
            .unwrap_or(0.0);

        let body = captures.get(2).map(|m| m.as_str()).unwrap_or("");
        let (status, failure_message) = parse_case_body(body);

        cases.push(TestCase {
            name: name.trim().to_string(),
            class_name: class_name.trim().to_string(),
            status,
            duration,
            failure_message,
        });
    }
    cases
}

fn parse_case_body(body: &str) -> (TestStatus, Option<String>) {
    if body.contains("<failure") {
        let message = Regex::new(r"(?s)<failure[^>]*>(.*?)</failure>")
            .unwrap()
            .captures(body)
            .map(|c| c[1].trim().to_string());
        (TestStatus::Failed, message)
    } else if body.contains("<error") {
        let message = Regex::new(r"(?s)<error[^>]*>(.*?)</error>")
            .unwrap()
            .captures(body)
            .map(|c| c[1].trim().to_string());
        (TestStatus::Error, message)
    } else if body.contains("<skipped") {
        (TestStatus::Skipped, None)
    } else {
        (TestStatus::Passed, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATCH_WITH_TESTS: &str = "\
diff --git a/feature/notification/impl/src/commonTest/kotlin/net/example/feature/NotifierTest.kt b/feature/notification/impl/src/commonTest/kotlin/net/example/feature/NotifierTest.kt
--- a/feature/notification/impl/src/commonTest/kotlin/net/example/feature/NotifierTest.kt
+++ b/feature/notification/impl/src/commonTest/kotlin/net/example/feature/NotifierTest.kt
diff --git a/app/src/test/java/net/example/app/MainViewModelTest.java b/app/src/test/java/net/example/app/MainViewModelTest.java
--- a/app/src/test/java/net/example/app/MainViewModelTest.java
+++ b/app/src/test/java/net/example/app/MainViewModelTest.java
diff --git a/app/src/androidTest/java/net/example/app/MainScreenTest.java b/app/src/androidTest/java/net/example/app/MainScreenTest.java
--- a/app/src/androidTest/java/net/example/app/MainScreenTest.java
+++ b/app/src/androidTest/java/net/example/app/MainScreenTest.java
diff --git a/app/src/test/java/net/example/app/MockServer.java b/app/src/test/java/net/example/app/MockServer.java
--- a/app/src/test/java/net/example/app/MockServer.java
+++ b/app/src/test/java/net/example/app/MockServer.java
diff --git a/README.md b/README.md
--- a/README.md
+++ b/README.md
";

    #[test]
    fn derives_modules_classes_and_instrumented_split() {
        let targets = derive_targets(PATCH_WITH_TESTS);

        assert_eq!(
            targets.module_tests.get(":app"),
            Some(&vec!["net.example.app.MainViewModelTest".to_string()])
        );
        assert_eq!(
            targets.module_tests.get(":feature:notification:impl"),
            Some(&vec!["net.example.feature.NotifierTest".to_string()])
        );
        assert_eq!(
            targets.skipped_instrumented,
            vec!["net.example.app.MainScreenTest".to_string()]
        );
        assert_eq!(targets.unit_test_count(), 2);
    }

    #[test]
    fn ambiguous_mapping_falls_back_to_module_wide_tests() {
        // Only a helper class changed: the module still runs, unfiltered.
        let patch = "\
diff --git a/parser/media/src/test/java/net/x/MockFeedServer.java b/parser/media/src/test/java/net/x/MockFeedServer.java
--- a/parser/media/src/test/java/net/x/MockFeedServer.java
+++ b/parser/media/src/test/java/net/x/MockFeedServer.java
";
        let targets = derive_targets(patch);
        assert_eq!(targets.module_tests.get(":parser:media"), Some(&Vec::new()));

        let command = gradle_tasks(&targets, &BuildConfig::default());
        assert_eq!(command, ":parser:media:testDebugUnitTest");
    }

    #[test]
    fn utility_classes_are_filtered() {
        assert!(qualified_class_name("app/src/test/java/net/x/MockServer.java").is_none());
        assert!(qualified_class_name("app/src/test/java/net/x/TestUtils.java").is_none());
        assert!(qualified_class_name("app/src/test/java/net/x/BaseTestCase.java").is_none());
        assert!(qualified_class_name("app/src/test/java/net/x/ParserTest.java").is_some());
    }

    #[test]
    fn source_kind_dispatch_is_closed() {
        assert_eq!(SourceKind::of("A.java"), SourceKind::Java);
        assert_eq!(SourceKind::of("A.kt"), SourceKind::Kotlin);
        assert_eq!(SourceKind::of("A.xml"), SourceKind::Unrecognized);
        assert_eq!(SourceKind::of("README.md"), SourceKind::Unrecognized);
    }

    #[test]
    fn module_mapping_handles_root_and_fallback() {
        assert_eq!(module_of("src/test/java/A.java"), ":");
        assert_eq!(module_of("app/src/test/java/A.java"), ":app");
        assert_eq!(module_of("parser/media/src/test/java/A.java"), ":parser:media");
        assert_eq!(module_of("somewhere/else/A.java"), ":app");
    }

    #[test]
    fn gradle_tasks_scope_filters_per_module() {
        let targets = derive_targets(PATCH_WITH_TESTS);
        let build = BuildConfig::default();
        let command = gradle_tasks(&targets, &build);

        assert!(command.contains("testDebugUnitTest --tests \"net.example.app.MainViewModelTest\""));
        assert!(command.contains(
            ":feature:notification:impl:testDebugUnitTest --tests \"net.example.feature.NotifierTest\""
        ));
        // The :app module task carries no module prefix.
        assert!(!command.contains(":app:testDebugUnitTest"));
    }

    const REPORT_OUTPUT: &str = "\
BUILD SUCCESSFUL in 42s
=== collecting test reports ===
=== REPORT: ./app/build/test-results/testDebugUnitTest/TEST-net.example.AppTest.xml ===
<testsuite name=\"net.example.AppTest\">
  <testcase name=\"addsItems\" classname=\"net.example.AppTest\" time=\"0.012\"/>
  <testcase name=\"rejectsEmpty\" classname=\"net.example.AppTest\" time=\"0.003\">
    <failure message=\"expected 1\">java.lang.AssertionError: expected 1 but was 0</failure>
  </testcase>
  <testcase name=\"flaky\" classname=\"net.example.AppTest\" time=\"0.001\">
    <skipped/>
  </testcase>
</testsuite>
=== END REPORT ===
=== REPORT: ./app/build/test-results/testReleaseUnitTest/TEST-net.example.AppTest.xml ===
<testsuite name=\"net.example.AppTest\">
  <testcase name=\"addsItems\" classname=\"net.example.AppTest\" time=\"0.014\">
    <error message=\"boom\">java.lang.IllegalStateException</error>
  </testcase>
</testsuite>
=== END REPORT ===
";

    #[test]
    fn parses_statuses_and_messages_from_reports() {
        let cases = parse_test_reports(REPORT_OUTPUT);
        let by_name: BTreeMap<String, &TestCase> =
            cases.iter().map(|c| (c.qualified_name(), c)).collect();

        let passed = by_name["net.example.AppTest.addsItems"];
        assert_eq!(passed.status, TestStatus::Passed);
        assert!((passed.duration - 0.012).abs() < 1e-9);

        let failed = by_name["net.example.AppTest.rejectsEmpty"];
        assert_eq!(failed.status, TestStatus::Failed);
        assert!(failed.failure_message.as_deref().unwrap().contains("AssertionError"));

        assert_eq!(by_name["net.example.AppTest.flaky"].status, TestStatus::Skipped);
    }

    #[test]
    fn duplicate_variant_resolves_to_debug_report() {
        let cases = parse_test_reports(REPORT_OUTPUT);
        let adds: Vec<&TestCase> = cases
            .iter()
            .filter(|c| c.qualified_name() == "net.example.AppTest.addsItems")
            .collect();

        // Exactly one canonical result, and it is the debug variant's PASSED.
        assert_eq!(adds.len(), 1);
        assert_eq!(adds[0].status, TestStatus::Passed);
    }

    #[test]
    fn duplicate_resolution_is_deterministic_regardless_of_order() {
        // Same reports with the release section first.
        let mut swapped = String::new();
        let sections: Vec<&str> = REPORT_OUTPUT.split("=== REPORT: ").collect();
        swapped.push_str(sections[0]);
        swapped.push_str("=== REPORT: ");
        swapped.push_str(sections[2]);
        swapped.push_str("=== REPORT: ");
        swapped.push_str(sections[1]);

        let original = parse_test_reports(REPORT_OUTPUT);
        let reordered = parse_test_reports(&swapped);

        let status_of = |cases: &[TestCase]| -> BTreeMap<String, TestStatus> {
            cases.iter().map(|c| (c.qualified_name(), c.status)).collect()
        };
        assert_eq!(status_of(&original), status_of(&reordered));
    }

    #[test]
    fn no_reports_with_expected_tests_is_a_build_failure() {
        let output = "Compilation failed; see the compiler error output\nBUILD FAILED in 12s\n";
        assert!(!build_successful(output, 1, 0, true));

        // A vacuous run (no targets) is not a build failure.
        assert!(build_successful("nothing to do", 0, 0, false));
    }

    #[test]
    fn gradle_banner_overrides_exit_code() {
        // `--continue` runs report failure through the exit code while the
        // build itself succeeded.
        assert!(build_successful("BUILD SUCCESSFUL in 3s", 1, 5, true));
        assert!(!build_successful("BUILD FAILED in 3s", 1, 0, true));
    }

    #[test]
    fn compilation_error_indicators_detected() {
        assert!(has_compilation_errors("error: cannot find symbol\n  symbol: class Foo"));
        assert!(has_compilation_errors("e: Unresolved reference: bar"));
        assert!(!has_compilation_errors("BUILD SUCCESSFUL in 10s"));
    }

    #[test]
    fn vacuous_result_counts_are_zero_and_build_ok() {
        let result = TestExecutionResult::vacuous("no unit test classes found in test patch");
        assert_eq!(result.total(), 0);
        assert!(result.build_successful);
        assert!(result.status_map().is_empty());
    }

    #[test]
    fn execution_result_aggregates_by_status() {
        let result = TestExecutionResult {
            test_cases: parse_test_reports(REPORT_OUTPUT),
            exit_code: 0,
            duration_secs: 1.0,
            build_successful: true,
            gradle_command: "./gradlew testDebugUnitTest".to_string(),
            raw_output: String::new(),
        };

        assert_eq!(result.total(), 3);
        assert_eq!(result.passed(), 1);
        assert_eq!(result.failed(), 1);
        assert_eq!(result.skipped(), 1);
        assert_eq!(result.errors(), 0);
        assert_eq!(result.passed_tests(), vec!["net.example.AppTest.addsItems".to_string()]);
        assert_eq!(result.failed_tests(), vec!["net.example.AppTest.rejectsEmpty".to_string()]);
    }

    #[test]
    fn timeout_scales_with_module_count_up_to_cap() {
        let gradle = GradleConfig::default();
        let mut targets = TestTargets::default();
        targets.module_tests.insert(":a".into(), vec!["A".into()]);
        assert_eq!(test_timeout(&targets, &gradle), 600);

        targets.module_tests.insert(":b".into(), vec!["B".into()]);
        targets.module_tests.insert(":c".into(), vec!["C".into()]);
        targets.module_tests.insert(":d".into(), vec!["D".into()]);
        assert_eq!(test_timeout(&targets, &gradle), 1800);
    }
}
