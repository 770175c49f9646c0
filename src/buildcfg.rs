//! Build configuration detection.
//!
//! Pure inspection of a checked-out workspace: gradle wrapper version, the
//! java toolchain the Android Gradle Plugin requires, SDK levels, NDK, and
//! the unit-test variant. Detection never fails an instance — anything that
//! cannot be read falls back to a default with a logged warning, because a
//! best-effort build is still worth attempting.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const SUPPORTED_JAVA_VERSIONS: &[&str] = &["8", "11", "17", "21"];
const SUPPORTED_GRADLE_VERSIONS: &[&str] = &[
    "6.9", "7.0", "7.1", "7.2", "7.3", "7.4", "7.5", "7.6", "8.0", "8.1", "8.6",
];
const MIN_SDK: u32 = 21;
const MAX_SDK: u32 = 35;

/// Per-instance build parameters, read-only after detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub gradle_version: String,
    pub java_version: String,
    pub compile_sdk: String,
    pub target_sdk: String,
    pub min_sdk: String,
    pub ndk_version: Option<String>,
    pub jvm_args: String,
    pub test_variant: String,
    pub has_kotlin: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            gradle_version: "8.6".to_string(),
            java_version: "17".to_string(),
            compile_sdk: "35".to_string(),
            target_sdk: "35".to_string(),
            min_sdk: "21".to_string(),
            ndk_version: None,
            jvm_args: "-Xmx4096m".to_string(),
            test_variant: "debug".to_string(),
            has_kotlin: false,
        }
    }
}

impl BuildConfig {
    /// Capitalized variant for composing gradle task names
    /// (`debug` -> `Debug` -> `testDebugUnitTest`).
    pub fn variant_task_infix(&self) -> String {
        let mut chars = self.test_variant.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    }
}

/// Inspect a workspace and produce a best-effort build configuration.
pub fn detect(workspace: &Path) -> BuildConfig {
    let mut config = BuildConfig::default();

    parse_gradle_wrapper(workspace, &mut config);
    parse_gradle_properties(workspace, &mut config);
    parse_toolchain(workspace, &mut config);
    parse_sdk_levels(workspace, &mut config);
    config.test_variant = detect_test_variant(workspace);
    config.has_kotlin = detect_kotlin(workspace);

    validate(&mut config);

    debug!(?config, "detected build configuration");
    config
}

fn read_if_present(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(err) => {
            warn!(file = %path.display(), %err, "failed to read build descriptor");
            None
        }
    }
}

fn parse_gradle_wrapper(workspace: &Path, config: &mut BuildConfig) {
    let wrapper = workspace
        .join("gradle")
        .join("wrapper")
        .join("gradle-wrapper.properties");
    let Some(content) = read_if_present(&wrapper) else {
        warn!("gradle wrapper not found, assuming gradle {}", config.gradle_version);
        return;
    };

    let pattern = Regex::new(r"gradle-(\d+\.\d+(?:\.\d+)?)-").unwrap();
    if let Some(captures) = pattern.captures(&content) {
        let version = captures[1].to_string();
        if SUPPORTED_GRADLE_VERSIONS.contains(&version.as_str()) {
            config.gradle_version = version;
        } else {
            let closest = closest_version(&version, SUPPORTED_GRADLE_VERSIONS);
            warn!(found = %version, using = %closest, "gradle version not supported by the build image");
            config.gradle_version = closest;
        }
    }
}

fn parse_gradle_properties(workspace: &Path, config: &mut BuildConfig) {
    let Some(content) = read_if_present(&workspace.join("gradle.properties")) else {
        return;
    };

    let pattern = Regex::new(r"org\.gradle\.jvmargs\s*=\s*(.+)").unwrap();
    if let Some(captures) = pattern.captures(&content) {
        config.jvm_args = captures[1].trim().replace(['"', '\''], "");
    }
}

/// Java toolchain selection: the AGP version sets the floor, an explicit
/// source/target compatibility may raise it.
fn parse_toolchain(workspace: &Path, config: &mut BuildConfig) {
    let root_gradle = ["build.gradle", "build.gradle.kts"]
        .iter()
        .find_map(|name| read_if_present(&workspace.join(name)));

    let agp = root_gradle
        .as_deref()
        .and_then(detect_agp_version)
        .or_else(|| detect_agp_from_catalog(workspace));

    let mut floor_set = false;
    if let Some(agp_version) = &agp
        && let Some(required) = java_for_agp(agp_version)
    {
        config.java_version = required.to_string();
        floor_set = true;
    }

    let Some(content) = root_gradle else {
        if agp.is_none() {
            warn!("no project build descriptor found, assuming java {}", config.java_version);
        }
        return;
    };

    let java_patterns = [
        r"sourceCompatibility\s*[=:]\s*JavaVersion\.VERSION_(\d+)",
        r"targetCompatibility\s*[=:]\s*JavaVersion\.VERSION_(\d+)",
        r#"jvmTarget\s*[=:]\s*["'](\d+)["']"#,
        r"JavaVersion\.VERSION_(\d+)",
    ];

    for pattern in java_patterns {
        let regex = Regex::new(pattern).unwrap();
        if let Some(captures) = regex.captures(&content) {
            let explicit = map_java_version(&captures[1]);
            // An explicit declaration cannot go below the plugin's own
            // requirement.
            if !floor_set || parse_u32(&explicit) >= parse_u32(&config.java_version) {
                config.java_version = explicit;
            }
            break;
        }
    }
}

fn detect_agp_version(content: &str) -> Option<String> {
    let patterns = [
        r"com\.android\.tools\.build:gradle:(\d+\.\d+(?:\.\d+)?)",
        r#"id\s*\(?\s*["']com\.android\.application["']\s*\)?\s*version\s*["'](\d+\.\d+(?:\.\d+)?)["']"#,
    ];

    for pattern in patterns {
        let regex = Regex::new(pattern).unwrap();
        if let Some(captures) = regex.captures(content) {
            return Some(captures[1].to_string());
        }
    }
    None
}

fn detect_agp_from_catalog(workspace: &Path) -> Option<String> {
    let catalog = read_if_present(&workspace.join("gradle").join("libs.versions.toml"))?;
    let patterns = [
        r#"(?m)^agp\s*=\s*["'](\d+\.\d+(?:\.\d+)?)["']"#,
        r#"(?m)^androidGradlePlugin\s*=\s*["'](\d+\.\d+(?:\.\d+)?)["']"#,
    ];

    for pattern in patterns {
        let regex = Regex::new(pattern).unwrap();
        if let Some(captures) = regex.captures(&catalog) {
            return Some(captures[1].to_string());
        }
    }
    None
}

/// Minimum java version required by an Android Gradle Plugin release.
fn java_for_agp(agp_version: &str) -> Option<&'static str> {
    let mut parts = agp_version.split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);

    if major >= 8 || (major == 7 && minor >= 4) {
        Some("17")
    } else if major >= 7 || (major == 4 && minor >= 2) {
        Some("11")
    } else {
        Some("8")
    }
}

fn map_java_version(raw: &str) -> String {
    if SUPPORTED_JAVA_VERSIONS.contains(&raw) {
        return raw.to_string();
    }
    match raw.parse::<u32>() {
        Ok(n) if n >= 17 => "17".to_string(),
        Ok(n) if n >= 11 => "11".to_string(),
        Ok(_) => "8".to_string(),
        Err(_) => "11".to_string(),
    }
}

fn parse_u32(value: &str) -> u32 {
    value.parse().unwrap_or(0)
}

fn android_module_descriptors(workspace: &Path) -> Vec<std::path::PathBuf> {
    let mut candidates = vec![
        workspace.join("app").join("build.gradle"),
        workspace.join("app").join("build.gradle.kts"),
        workspace.join("build.gradle"),
        workspace.join("build.gradle.kts"),
    ];

    // Multiplatform layouts keep the Android target in an android* module.
    if let Ok(entries) = std::fs::read_dir(workspace) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir()
                && entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("android")
            {
                candidates.push(path.join("build.gradle"));
                candidates.push(path.join("build.gradle.kts"));
            }
        }
    }

    candidates
}

fn parse_sdk_levels(workspace: &Path, config: &mut BuildConfig) {
    let sdk_patterns: [(&str, &str); 3] = [
        ("compile_sdk", r"compileSdk(?:Version)?\s*[=:]?\s*(\d+)"),
        ("target_sdk", r"targetSdk(?:Version)?\s*[=:]?\s*(\d+)"),
        ("min_sdk", r"minSdk(?:Version)?\s*[=:]?\s*(\d+)"),
    ];
    let ndk_pattern = Regex::new(r#"ndkVersion\s*[=:]?\s*["']([^"']+)["']"#).unwrap();

    for descriptor in android_module_descriptors(workspace) {
        let Some(content) = read_if_present(&descriptor) else {
            continue;
        };
        if !content.contains("android {") && !content.contains("compileSdk") {
            continue;
        }

        for (key, pattern) in sdk_patterns {
            let regex = Regex::new(pattern).unwrap();
            if let Some(captures) = regex.captures(&content) {
                let level: u32 = captures[1].parse().unwrap_or(MAX_SDK);
                let clamped = level.clamp(MIN_SDK, MAX_SDK);
                if clamped != level {
                    warn!(sdk = key, found = level, using = clamped, "sdk level clamped to build image range");
                }
                let value = clamped.to_string();
                match key {
                    "compile_sdk" => config.compile_sdk = value,
                    "target_sdk" => config.target_sdk = value,
                    _ => config.min_sdk = value,
                }
            }
        }

        if let Some(captures) = ndk_pattern.captures(&content) {
            config.ndk_version = Some(captures[1].to_string());
        }

        return;
    }

    warn!("no android build configuration found, using default SDK levels");
}

fn detect_test_variant(workspace: &Path) -> String {
    for descriptor in android_module_descriptors(workspace) {
        let Some(content) = read_if_present(&descriptor) else {
            continue;
        };
        let regex = Regex::new(r"(?s)buildTypes\s*\{([^}]+)").unwrap();
        if let Some(captures) = regex.captures(&content) {
            let body = captures[1].to_lowercase();
            if body.contains("debug") {
                return "debug".to_string();
            }
            if body.contains("release") {
                warn!("no debug build type declared, testing against release");
                return "release".to_string();
            }
        }
    }
    "debug".to_string()
}

fn detect_kotlin(workspace: &Path) -> bool {
    if workspace.join("build.gradle.kts").is_file()
        || workspace.join("settings.gradle.kts").is_file()
    {
        return true;
    }
    ["build.gradle", "settings.gradle"]
        .iter()
        .filter_map(|name| read_if_present(&workspace.join(name)))
        .any(|content| content.contains("org.jetbrains.kotlin") || content.contains("kotlin("))
}

fn validate(config: &mut BuildConfig) {
    if !SUPPORTED_JAVA_VERSIONS.contains(&config.java_version.as_str()) {
        config.java_version = "17".to_string();
    }
    if !SUPPORTED_GRADLE_VERSIONS.contains(&config.gradle_version.as_str()) {
        config.gradle_version = "8.6".to_string();
    }
}

fn closest_version(target: &str, available: &[&str]) -> String {
    let parse = |v: &str| -> Vec<i64> {
        v.split('.').map(|p| p.parse().unwrap_or(0)).collect()
    };
    let target_parts = parse(target);

    available
        .iter()
        .min_by_key(|candidate| {
            let parts = parse(candidate);
            target_parts
                .iter()
                .zip(parts.iter().chain(std::iter::repeat(&0)))
                .enumerate()
                .map(|(i, (t, v))| (t - v).abs() * 10_i64.pow((target_parts.len() - i) as u32))
                .sum::<i64>()
        })
        .unwrap_or(&available[0])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn workspace() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn empty_workspace_yields_defaults() {
        let tmp = workspace();
        let config = detect(tmp.path());
        assert_eq!(config, BuildConfig::default());
    }

    #[test]
    fn reads_gradle_version_from_wrapper() {
        let tmp = workspace();
        write(
            tmp.path(),
            "gradle/wrapper/gradle-wrapper.properties",
            "distributionUrl=https\\://services.gradle.org/distributions/gradle-8.1-bin.zip\n",
        );
        assert_eq!(detect(tmp.path()).gradle_version, "8.1");
    }

    #[test]
    fn unsupported_gradle_version_maps_to_closest() {
        let tmp = workspace();
        write(
            tmp.path(),
            "gradle/wrapper/gradle-wrapper.properties",
            "distributionUrl=https\\://services.gradle.org/distributions/gradle-8.2-all.zip\n",
        );
        let config = detect(tmp.path());
        assert!(SUPPORTED_GRADLE_VERSIONS.contains(&config.gradle_version.as_str()));
        assert_eq!(config.gradle_version, "8.1");
    }

    #[test]
    fn agp_version_sets_java_floor() {
        let tmp = workspace();
        write(
            tmp.path(),
            "build.gradle",
            "dependencies { classpath 'com.android.tools.build:gradle:7.2.1' }\n",
        );
        assert_eq!(detect(tmp.path()).java_version, "11");
    }

    #[test]
    fn agp_version_read_from_version_catalog() {
        let tmp = workspace();
        write(tmp.path(), "gradle/libs.versions.toml", "agp = \"8.2.0\"\n");
        assert_eq!(detect(tmp.path()).java_version, "17");
    }

    #[test]
    fn explicit_java_cannot_go_below_agp_requirement() {
        let tmp = workspace();
        write(
            tmp.path(),
            "build.gradle",
            concat!(
                "dependencies { classpath 'com.android.tools.build:gradle:8.0.2' }\n",
                "sourceCompatibility = JavaVersion.VERSION_11\n",
            ),
        );
        assert_eq!(detect(tmp.path()).java_version, "17");
    }

    #[test]
    fn jvm_target_is_mapped_to_supported_release() {
        let tmp = workspace();
        write(tmp.path(), "build.gradle", "jvmTarget = \"15\"\n");
        assert_eq!(detect(tmp.path()).java_version, "11");
    }

    #[test]
    fn sdk_levels_read_from_app_module_and_clamped() {
        let tmp = workspace();
        write(
            tmp.path(),
            "app/build.gradle",
            concat!(
                "android {\n",
                "    compileSdk 34\n",
                "    defaultConfig { minSdk 19\n targetSdk 34 }\n",
                "    ndkVersion \"25.1.8937393\"\n",
                "}\n",
            ),
        );
        let config = detect(tmp.path());
        assert_eq!(config.compile_sdk, "34");
        assert_eq!(config.target_sdk, "34");
        assert_eq!(config.min_sdk, "21");
        assert_eq!(config.ndk_version.as_deref(), Some("25.1.8937393"));
    }

    #[test]
    fn jvm_args_read_from_gradle_properties() {
        let tmp = workspace();
        write(
            tmp.path(),
            "gradle.properties",
            "org.gradle.jvmargs=-Xmx2g -Dfile.encoding=UTF-8\n",
        );
        assert_eq!(detect(tmp.path()).jvm_args, "-Xmx2g -Dfile.encoding=UTF-8");
    }

    #[test]
    fn kotlin_detected_from_kts_descriptor() {
        let tmp = workspace();
        write(tmp.path(), "build.gradle.kts", "plugins {}\n");
        assert!(detect(tmp.path()).has_kotlin);
    }

    #[test]
    fn variant_task_infix_capitalizes() {
        let config = BuildConfig::default();
        assert_eq!(config.variant_task_infix(), "Debug");
    }
}
