//! Runner configuration.
//!
//! An optional `patchbench.toml` next to the working directory overrides the
//! defaults below. Every field has a default so a missing file (the common
//! case) configures a complete runner.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_FILENAME: &str = "patchbench.toml";

fn default_image() -> String {
    "mingc/android-build-box:latest".to_string()
}

fn default_exec_timeout_secs() -> u64 {
    600
}

fn default_init_timeout_secs() -> u64 {
    1800
}

fn default_copy_timeout_secs() -> u64 {
    300
}

fn default_clone_depth() -> u32 {
    1000
}

fn default_clone_timeout_secs() -> u64 {
    600
}

fn default_clone_retry_timeout_secs() -> u64 {
    1200
}

fn default_checkout_timeout_secs() -> u64 {
    300
}

fn default_test_timeout_secs_per_module() -> u64 {
    600
}

fn default_max_test_timeout_secs() -> u64 {
    1800
}

fn default_jvm_args() -> String {
    "-Xmx6g -XX:MaxMetaspaceSize=1g -XX:+UseG1GC".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfig {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default)]
    pub docker_context: Option<String>,
    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
    #[serde(default = "default_copy_timeout_secs")]
    pub copy_timeout_secs: u64,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            docker_context: None,
            exec_timeout_secs: default_exec_timeout_secs(),
            init_timeout_secs: default_init_timeout_secs(),
            copy_timeout_secs: default_copy_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_clone_depth")]
    pub clone_depth: u32,
    #[serde(default = "default_clone_timeout_secs")]
    pub clone_timeout_secs: u64,
    /// Extended deadline for the single clone retry.
    #[serde(default = "default_clone_retry_timeout_secs")]
    pub clone_retry_timeout_secs: u64,
    #[serde(default = "default_checkout_timeout_secs")]
    pub checkout_timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            clone_depth: default_clone_depth(),
            clone_timeout_secs: default_clone_timeout_secs(),
            clone_retry_timeout_secs: default_clone_retry_timeout_secs(),
            checkout_timeout_secs: default_checkout_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GradleConfig {
    #[serde(default = "default_test_timeout_secs_per_module")]
    pub test_timeout_secs_per_module: u64,
    #[serde(default = "default_max_test_timeout_secs")]
    pub max_test_timeout_secs: u64,
    #[serde(default = "default_jvm_args")]
    pub jvm_args: String,
}

impl Default for GradleConfig {
    fn default() -> Self {
        Self {
            test_timeout_secs_per_module: default_test_timeout_secs_per_module(),
            max_test_timeout_secs: default_max_test_timeout_secs(),
            jvm_args: default_jvm_args(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RunnerConfig {
    #[serde(default)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub gradle: GradleConfig,
}

impl RunnerConfig {
    /// Load `patchbench.toml` from the given directory, or defaults when the
    /// file does not exist. Returns the source path when a file was read.
    pub fn load(dir: &Path) -> Result<(Self, Option<PathBuf>)> {
        let path = dir.join(CONFIG_FILENAME);
        if !path.is_file() {
            return Ok((Self::default(), None));
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok((config, Some(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, path) = RunnerConfig::load(tmp.path()).unwrap();
        assert!(path.is_none());
        assert_eq!(config.container.image, default_image());
        assert_eq!(config.git.clone_depth, 1000);
        assert_eq!(config.gradle.max_test_timeout_secs, 1800);
    }

    #[test]
    fn partial_file_keeps_defaults_for_unset_fields() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILENAME),
            "[container]\nimage = \"example/builder:1\"\n\n[git]\nclone_depth = 50\n",
        )
        .unwrap();

        let (config, path) = RunnerConfig::load(tmp.path()).unwrap();
        assert!(path.is_some());
        assert_eq!(config.container.image, "example/builder:1");
        assert_eq!(config.git.clone_depth, 50);
        // Untouched sections keep their defaults.
        assert_eq!(config.container.exec_timeout_secs, 600);
        assert_eq!(config.gradle.test_timeout_secs_per_module, 600);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILENAME), "container = 3").unwrap();
        assert!(RunnerConfig::load(tmp.path()).is_err());
    }
}
