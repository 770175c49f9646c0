//! Isolated execution environments, one container per instance.
//!
//! Containers are driven through the `docker` CLI. Every container name is
//! scoped by the run id and the instance id so concurrent runs never
//! collide, and every created container is tracked in an explicit registry
//! so a cleanup-all sweep works regardless of which code path created it.
//!
//! The workspace is copied into the container, never mounted: build side
//! effects (caches, lock files, generated sources) stay inside and cannot
//! leak between the pre and post phases or corrupt the host copy.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::buildcfg::BuildConfig;
use crate::config::ContainerConfig;
use crate::errors::ContainerError;
use crate::proc::{self, CommandOutput, WaitOutcome};

/// A container bound to one instance for its lifetime.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub instance_id: String,
    pub name: String,
    /// Java toolchain the exec wrapper exports.
    pub java_version: String,
}

/// Output of a command executed inside a container.
#[derive(Debug)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub output: String,
    pub duration: Duration,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct ContainerManager {
    image: String,
    docker_context: Option<String>,
    exec_timeout: Duration,
    copy_timeout: Duration,
    run_id: String,
    /// instance id -> container name, for guaranteed teardown.
    registry: Mutex<BTreeMap<String, String>>,
}

impl ContainerManager {
    /// Verify the runtime is reachable and the base image is available,
    /// pulling it when missing. A dead runtime aborts the whole batch here,
    /// before any instance starts.
    pub fn new(config: &ContainerConfig, run_id: &str) -> Result<Self, ContainerError> {
        let manager = Self {
            image: config.image.clone(),
            docker_context: config.docker_context.clone(),
            exec_timeout: Duration::from_secs(config.exec_timeout_secs),
            copy_timeout: Duration::from_secs(config.copy_timeout_secs),
            run_id: run_id.to_string(),
            registry: Mutex::new(BTreeMap::new()),
        };

        let info = manager.docker(&["info"], Duration::from_secs(30))?;
        if !info.success() {
            return Err(ContainerError::Provision(format!(
                "container runtime not reachable: {}",
                info.stderr.trim()
            )));
        }

        manager.ensure_image(config)?;
        Ok(manager)
    }

    fn ensure_image(&self, config: &ContainerConfig) -> Result<(), ContainerError> {
        let existing = self.docker(&["images", "-q", &self.image], Duration::from_secs(30))?;
        if existing.success() && !existing.stdout.trim().is_empty() {
            debug!(image = %self.image, "base image present");
            return Ok(());
        }

        info!(image = %self.image, "pulling base image");
        let pull = self.docker(
            &["pull", &self.image],
            Duration::from_secs(config.init_timeout_secs),
        )?;
        if !pull.success() {
            return Err(ContainerError::Provision(format!(
                "failed to pull {}: {}",
                self.image,
                pull.stderr.trim()
            )));
        }
        Ok(())
    }

    /// Run-scoped container name: `patchbench-<run>-<instance>`.
    pub fn container_name(&self, instance_id: &str) -> String {
        let slug: String = instance_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        format!("patchbench-{}-{}", self.run_id, slug.trim_matches('-'))
    }

    /// Create a container for the instance. Any stale container with the
    /// same name (a crashed previous attempt) is removed first.
    pub fn create(
        &self,
        instance_id: &str,
        config: &BuildConfig,
    ) -> Result<ContainerHandle, ContainerError> {
        let name = self.container_name(instance_id);

        let stale = self.docker(
            &["ps", "-a", "-q", "-f", &format!("name=^{name}$")],
            Duration::from_secs(30),
        )?;
        if stale.success() && !stale.stdout.trim().is_empty() {
            warn!(container = %name, "removing stale container from a previous attempt");
            self.force_remove(&name);
        }

        let gradle_volume = format!("{name}-gradle:/tmp/.gradle");
        let sdk_volume = format!("{name}-android:/root/.android");
        let java_home = format!(
            "JAVA_HOME=/usr/lib/jvm/java-{}-openjdk-amd64",
            config.java_version
        );

        let mut args: Vec<String> = vec![
            "create".into(),
            "--name".into(),
            name.clone(),
            "--network".into(),
            "host".into(),
            "-w".into(),
            "/workspace".into(),
            "-v".into(),
            gradle_volume,
            "-v".into(),
            sdk_volume,
            "-e".into(),
            "HOME=/tmp".into(),
            "-e".into(),
            "GRADLE_USER_HOME=/tmp/.gradle".into(),
            "-e".into(),
            java_home,
            "-e".into(),
            "ANDROID_HOME=/opt/android-sdk".into(),
            "-e".into(),
            "ANDROID_SDK_ROOT=/opt/android-sdk".into(),
            "-e".into(),
            format!("GRADLE_OPTS={}", config.jvm_args),
            "--user".into(),
            "root".into(),
        ];

        if let Some(ndk) = &config.ndk_version {
            args.push("-e".into());
            args.push(format!("ANDROID_NDK_HOME=/opt/android-sdk/ndk/{ndk}"));
        }

        args.push(self.image.clone());
        // Keep-alive: the container idles until exec'd into.
        args.push("tail".into());
        args.push("-f".into());
        args.push("/dev/null".into());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let created = self.docker(&arg_refs, Duration::from_secs(120))?;
        if !created.success() {
            return Err(ContainerError::Provision(format!(
                "docker create failed for {name}: {}",
                created.stderr.trim()
            )));
        }

        self.registry
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), name.clone());

        info!(container = %name, instance = instance_id, "container created");
        Ok(ContainerHandle {
            instance_id: instance_id.to_string(),
            name,
            java_version: config.java_version.clone(),
        })
    }

    pub fn start(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        let started = self.docker(&["start", &handle.name], Duration::from_secs(60))?;
        if !started.success() {
            return Err(ContainerError::Provision(format!(
                "docker start failed for {}: {}",
                handle.name,
                started.stderr.trim()
            )));
        }
        Ok(())
    }

    /// Copy a host directory's contents (or a single file) into the
    /// container at `container_path`.
    pub fn copy_in(
        &self,
        handle: &ContainerHandle,
        host_path: &Path,
        container_path: &str,
    ) -> Result<(), ContainerError> {
        let source = if host_path.is_dir() {
            format!("{}/.", host_path.display())
        } else {
            host_path.display().to_string()
        };
        let target = format!("{}:{container_path}", handle.name);

        // docker cp requires the target directory to exist.
        self.exec(
            handle,
            &format!("mkdir -p {container_path}"),
            "/",
            Duration::from_secs(30),
        )?;

        let copied = self.docker(&["cp", &source, &target], self.copy_timeout)?;
        if !copied.success() {
            return Err(ContainerError::Docker(format!(
                "docker cp into {} failed: {}",
                handle.name,
                copied.stderr.trim()
            )));
        }

        // Gradle wrapper must be executable after the copy.
        self.exec(
            handle,
            &format!(
                "chmod -R 755 {container_path} && cd {container_path} && \
                 if [ -f gradlew ]; then chmod +x gradlew; fi"
            ),
            "/",
            Duration::from_secs(60),
        )?;

        debug!(container = %handle.name, path = container_path, "workspace copied in");
        Ok(())
    }

    /// Execute a shell command inside the container with a hard deadline.
    ///
    /// The command runs under the instance's toolchain environment. A
    /// deadline overrun kills the command and surfaces as
    /// [`ContainerError::Timeout`] — never as an exit code.
    pub fn exec(
        &self,
        handle: &ContainerHandle,
        command: &str,
        workdir: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, ContainerError> {
        let wrapped = format!(
            "export JAVA_HOME=/usr/lib/jvm/java-{java}-openjdk-amd64\n\
             export ANDROID_HOME=/opt/android-sdk\n\
             export ANDROID_SDK_ROOT=/opt/android-sdk\n\
             export HOME=/tmp\n\
             export GRADLE_USER_HOME=/tmp/.gradle\n\
             export PATH=\"$JAVA_HOME/bin:/opt/android-sdk/cmdline-tools/latest/bin:/opt/android-sdk/platform-tools:$PATH\"\n\
             git config --global --add safe.directory '*' 2>/dev/null || true\n\
             cd {workdir}\n\
             {command}",
            java = handle.java_version,
        );

        let mut cmd = self.base_command();
        cmd.args(["exec", "-w", workdir, &handle.name, "bash", "-c", &wrapped]);

        match proc::run_with_timeout(&mut cmd, timeout)
            .map_err(|err| ContainerError::Docker(format!("{err:#}")))?
        {
            WaitOutcome::Finished(output) => Ok(ExecOutput {
                exit_code: output.exit_code,
                output: output.combined(),
                duration: output.duration,
            }),
            WaitOutcome::TimedOut { limit } => Err(ContainerError::Timeout {
                limit_secs: limit.as_secs(),
            }),
        }
    }

    /// Exec with the manager's default deadline.
    pub fn exec_default(
        &self,
        handle: &ContainerHandle,
        command: &str,
        workdir: &str,
    ) -> Result<ExecOutput, ContainerError> {
        self.exec(handle, command, workdir, self.exec_timeout)
    }

    /// Tear down the instance's container (stop, then remove) and
    /// deregister it. Idempotent.
    pub fn cleanup_instance(&self, instance_id: &str, keep: bool) {
        let name = match self.registry.lock().unwrap().remove(instance_id) {
            Some(name) => name,
            None => return,
        };

        if keep {
            info!(container = %name, "keeping container for debugging");
            return;
        }

        info!(container = %name, "removing container");
        self.force_remove(&name);
    }

    /// Tear down every registered container, then sweep anything run-scoped
    /// that escaped the registry (a partially created container, a crash
    /// between create and register).
    pub fn cleanup_all(&self, keep: bool) {
        let names: Vec<String> = {
            let mut registry = self.registry.lock().unwrap();
            let names = registry.values().cloned().collect();
            registry.clear();
            names
        };

        if keep {
            if !names.is_empty() {
                info!(count = names.len(), "keeping containers for debugging");
            }
            return;
        }

        for name in names {
            self.force_remove(&name);
        }
        self.sweep_run_scoped();
    }

    fn sweep_run_scoped(&self) {
        let prefix = format!("patchbench-{}-", self.run_id);

        if let Ok(listed) = self.docker(
            &["ps", "-a", "-q", "-f", &format!("name={prefix}")],
            Duration::from_secs(30),
        ) && listed.success()
        {
            let ids: Vec<&str> = listed.stdout.split_whitespace().collect();
            if !ids.is_empty() {
                let mut args = vec!["rm", "-f"];
                args.extend(ids.iter().copied());
                let _ = self.docker(&args, Duration::from_secs(60));
                info!(count = ids.len(), "removed orphaned run-scoped containers");
            }
        }

        if let Ok(volumes) = self.docker(
            &["volume", "ls", "-q", "-f", &format!("name={prefix}")],
            Duration::from_secs(30),
        ) && volumes.success()
        {
            let names: Vec<&str> = volumes.stdout.split_whitespace().collect();
            if !names.is_empty() {
                let mut args = vec!["volume", "rm"];
                args.extend(names.iter().copied());
                let _ = self.docker(&args, Duration::from_secs(60));
            }
        }
    }

    fn force_remove(&self, name: &str) {
        let _ = self.docker(&["stop", name], Duration::from_secs(30));
        let removed = self.docker(&["rm", "-f", name], Duration::from_secs(30));
        match removed {
            Ok(output) if output.success() => {}
            Ok(output) => warn!(container = name, stderr = %output.stderr.trim(), "container removal reported an error"),
            Err(err) => warn!(container = name, %err, "container removal failed"),
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new("docker");
        if let Some(context) = &self.docker_context {
            cmd.args(["--context", context]);
        }
        cmd
    }

    fn docker(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, ContainerError> {
        let mut cmd = self.base_command();
        cmd.args(args);
        match proc::run_with_timeout(&mut cmd, timeout)
            .map_err(|err| ContainerError::Docker(format!("{err:#}")))?
        {
            WaitOutcome::Finished(output) => Ok(output),
            WaitOutcome::TimedOut { limit } => Err(ContainerError::Timeout {
                limit_secs: limit.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerConfig;

    fn manager() -> ContainerManager {
        // Constructed directly so tests never touch a docker daemon.
        ContainerManager {
            image: ContainerConfig::default().image,
            docker_context: None,
            exec_timeout: Duration::from_secs(600),
            copy_timeout: Duration::from_secs(300),
            run_id: "a1b2c3d4".to_string(),
            registry: Mutex::new(BTreeMap::new()),
        }
    }

    #[test]
    fn container_names_are_run_scoped_and_sanitized() {
        let m = manager();
        let name = m.container_name("Thunderbird__thunderbird-android-6044");
        assert_eq!(name, "patchbench-a1b2c3d4-thunderbird--thunderbird-android-6044");
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn same_instance_same_run_is_stable() {
        let m = manager();
        assert_eq!(m.container_name("app-1"), m.container_name("app-1"));
    }

    #[test]
    fn cleanup_of_unregistered_instance_is_a_noop() {
        let m = manager();
        // Nothing registered; must not attempt any docker call that could
        // fail the test on machines without docker.
        m.cleanup_instance("never-created", false);
    }

    #[test]
    fn registry_tracks_instances_independently() {
        let m = manager();
        m.registry
            .lock()
            .unwrap()
            .insert("app-1".to_string(), "patchbench-a1b2c3d4-app-1".to_string());
        m.registry
            .lock()
            .unwrap()
            .insert("app-2".to_string(), "patchbench-a1b2c3d4-app-2".to_string());

        // keep=true must leave the registry drained-or-kept consistent:
        // cleanup_instance removes only its own entry.
        m.cleanup_instance("app-1", true);
        let registry = m.registry.lock().unwrap();
        assert!(!registry.contains_key("app-1"));
        assert!(registry.contains_key("app-2"));
    }
}
