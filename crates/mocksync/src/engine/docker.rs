//! Engine run as a container through the docker CLI.

use super::instance::{Exit, Instance};
use super::managed::Backend;
use super::EngineError;
use crate::config::{PullPolicy, StartOptions};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const IMAGE_REPOSITORY: &str = "outofcoffee/imposter";
/// Where the config dir is mounted inside the container.
pub const CONTAINER_CONFIG_DIR: &str = "/opt/imposter/config";
pub const CONTAINER_PORT: u16 = 8080;
const MANAGED_LABEL: &str = "mocksync.managed=true";

pub fn image_name(version: &str) -> String {
    format!("{IMAGE_REPOSITORY}:{version}")
}

enum Waited {
    Exited(Result<String, EngineError>),
    KillRequested,
}

#[derive(Debug, Clone)]
pub struct DockerBackend {
    program: String,
}

impl Default for DockerBackend {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }
}

impl DockerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `program` instead of `docker` from `PATH`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn image_present(&self, image: &str) -> bool {
        docker(&self.program, &["image", "inspect", image])
            .await
            .is_ok()
    }

    async fn pull(&self, image: &str) -> Result<(), EngineError> {
        info!("pulling engine image {image}");
        docker(&self.program, &["pull", image])
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Pull {
                image: image.to_string(),
                reason: e.to_string(),
            })
    }

    fn follow_logs(&self, container: &str) -> Option<tokio::process::Child> {
        let spawned = Command::new(&self.program)
            .args(["logs", "-f", container])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        match spawned {
            Ok(child) => Some(child),
            Err(e) => {
                warn!("cannot follow logs of container {container}: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl Backend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn prepare(&self, options: &StartOptions) -> Result<(), EngineError> {
        let image = image_name(&options.version);
        match options.pull_policy {
            PullPolicy::Always => self.pull(&image).await,
            PullPolicy::IfNotPresent => {
                if self.image_present(&image).await {
                    debug!("engine image {image} already present");
                    Ok(())
                } else {
                    self.pull(&image).await
                }
            }
        }
    }

    async fn launch(&self, options: &StartOptions) -> Result<Instance, EngineError> {
        let args = run_args(options);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = docker(&self.program, &args).await?;
        let container = short_id(&stdout).ok_or_else(|| EngineError::Command {
            command: format!("{} run", self.program),
            reason: "no container id in output".to_string(),
        })?;
        debug!("started container {container}");

        let logs = self.follow_logs(&container);
        let program = self.program.clone();
        let target = container.clone();
        let instance = Instance::supervise(container, move |kill| async move {
            // Keep the log follower alive for as long as the container runs.
            let _logs = logs;
            let wait_args = ["wait", target.as_str()];
            let kill_args = ["kill", target.as_str()];
            let waited = tokio::select! {
                output = docker(&program, &wait_args) => Waited::Exited(output),
                _ = kill => Waited::KillRequested,
            };
            let output = match waited {
                Waited::Exited(output) => output,
                Waited::KillRequested => {
                    if let Err(e) = docker(&program, &kill_args).await {
                        debug!("kill of container {target} failed: {e}");
                    }
                    docker(&program, &wait_args).await
                }
            };
            output.map(|stdout| parse_wait_output(&stdout))
        });
        Ok(instance)
    }

    async fn terminate(&self, instance: &Instance, options: &StartOptions) {
        instance.mark_stopping();
        let container = instance.id();
        let grace = options.stop_grace.as_secs().to_string();

        if instance.is_running() {
            let stopped = docker(&self.program, &["stop", "-t", grace.as_str(), container]).await;
            if let Err(e) = stopped {
                warn!("failed to stop container {container}: {e}");
                instance.kill();
            }
            instance.wait().await;
        }

        if let Err(e) = docker(&self.program, &["rm", "-f", container]).await {
            debug!("failed to remove container {container}: {e}");
        }
    }
}

/// Arguments for `docker run` that start the engine detached.
fn run_args(options: &StartOptions) -> Vec<String> {
    vec![
        "run".to_string(),
        "-d".to_string(),
        "-p".to_string(),
        format!("{}:{CONTAINER_PORT}", options.port),
        "-v".to_string(),
        format!("{}:{CONTAINER_CONFIG_DIR}:ro", options.config_dir.display()),
        "-e".to_string(),
        format!("IMPOSTER_LOG_LEVEL={}", options.log_level.to_uppercase()),
        "--label".to_string(),
        MANAGED_LABEL.to_string(),
        image_name(&options.version),
        format!("--configDir={CONTAINER_CONFIG_DIR}"),
        format!("--listenPort={CONTAINER_PORT}"),
    ]
}

fn short_id(stdout: &str) -> Option<String> {
    let id = stdout.lines().last()?.trim();
    if id.is_empty() {
        return None;
    }
    Some(id.chars().take(12).collect())
}

/// `docker wait` prints the container's exit code.
fn parse_wait_output(stdout: &str) -> Exit {
    match stdout.trim().parse::<i64>() {
        Ok(0) => Exit::Success,
        Ok(code) => Exit::Failure(format!("exit code {code}")),
        Err(_) => Exit::Failure(format!("unexpected wait output: {}", stdout.trim())),
    }
}

/// Run a docker CLI command to completion, returning its stdout.
async fn docker(program: &str, args: &[&str]) -> Result<String, EngineError> {
    let command = format!("{program} {}", args.first().copied().unwrap_or_default());
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| EngineError::Spawn {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(EngineError::Command {
            command,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_name() {
        assert_eq!(image_name("4.2.0"), "outofcoffee/imposter:4.2.0");
    }

    #[test]
    fn test_run_args_mount_config_read_only() {
        let mut options = StartOptions::new("/work/mocks");
        options.port = 9090;
        let args = run_args(&options);

        assert_eq!(&args[..2], ["run", "-d"]);
        assert!(args.contains(&"9090:8080".to_string()));
        assert!(args.contains(&"/work/mocks:/opt/imposter/config:ro".to_string()));
        assert!(args.contains(&"IMPOSTER_LOG_LEVEL=INFO".to_string()));
        let image = args.iter().position(|a| a == "outofcoffee/imposter:latest");
        assert_eq!(image, Some(args.len() - 3));
    }

    #[test]
    fn test_short_id() {
        assert_eq!(
            short_id("4f1c2b3a9d8e7f6a5b4c3d2e1f0a9b8c\n").as_deref(),
            Some("4f1c2b3a9d8e")
        );
        assert_eq!(short_id("\n"), None);
        assert_eq!(short_id(""), None);
    }

    #[test]
    fn test_parse_wait_output() {
        assert_eq!(parse_wait_output("0\n"), Exit::Success);
        assert_eq!(
            parse_wait_output("137\n"),
            Exit::Failure("exit code 137".to_string())
        );
        assert!(matches!(parse_wait_output("garbage"), Exit::Failure(_)));
    }

    /// A stand-in `docker` CLI. `run` prints a container id, `wait` blocks
    /// until `stop` or `kill` ran, or returns 3 at once if a `crash` file sits
    /// next to the script.
    #[cfg(unix)]
    fn fake_cli(dir: &std::path::Path) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("docker");
        std::fs::write(
            &script,
            r#"#!/bin/sh
state="$(dirname "$0")"
echo "$1" >> "$state/calls"
case "$1" in
  run) echo 0123456789abcdef0123456789abcdef ;;
  logs) exec sleep 30 ;;
  wait)
    while [ ! -f "$state/stopped" ] && [ ! -f "$state/crash" ]; do sleep 0.05; done
    if [ -f "$state/crash" ]; then echo 3; else echo 0; fi ;;
  stop|kill) touch "$state/stopped" ;;
  *) ;;
esac
"#,
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    fn calls(dir: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_then_terminate_stops_and_removes_container() {
        use std::time::Duration;
        use tokio::time::timeout;

        let dir = tempfile::tempdir().unwrap();
        let backend = DockerBackend::with_program(fake_cli(dir.path()).display().to_string());
        let options = StartOptions::new(dir.path());

        let instance = backend.launch(&options).await.unwrap();
        assert_eq!(instance.id(), "0123456789ab");
        assert!(instance.is_running());

        timeout(Duration::from_secs(5), backend.terminate(&instance, &options))
            .await
            .unwrap();
        assert!(!instance.is_running());
        assert_eq!(instance.wait().await, None);

        let calls = calls(dir.path());
        assert_eq!(calls.first().map(String::as_str), Some("run"));
        assert!(calls.contains(&"stop".to_string()));
        assert_eq!(calls.last().map(String::as_str), Some("rm"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_request_kills_container() {
        use std::time::Duration;
        use tokio::time::timeout;

        let dir = tempfile::tempdir().unwrap();
        let backend = DockerBackend::with_program(fake_cli(dir.path()).display().to_string());
        let instance = backend
            .launch(&StartOptions::new(dir.path()))
            .await
            .unwrap();

        instance.mark_stopping();
        instance.kill();
        let error = timeout(Duration::from_secs(5), instance.wait())
            .await
            .unwrap();
        assert_eq!(error, None);
        assert!(calls(dir.path()).contains(&"kill".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_container_exit_code_is_reported() {
        use std::time::Duration;
        use tokio::time::timeout;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("crash"), "").unwrap();
        let backend = DockerBackend::with_program(fake_cli(dir.path()).display().to_string());
        let instance = backend
            .launch(&StartOptions::new(dir.path()))
            .await
            .unwrap();

        let error = timeout(Duration::from_secs(5), instance.wait())
            .await
            .unwrap();
        assert!(matches!(
            error,
            Some(EngineError::Exited { ref detail, .. }) if detail == "exit code 3"
        ));
    }

    #[tokio::test]
    async fn test_missing_cli_is_a_spawn_error() {
        let result = docker("/nonexistent/docker", &["version"]).await;
        assert!(matches!(result, Err(EngineError::Spawn { .. })));
    }
}
