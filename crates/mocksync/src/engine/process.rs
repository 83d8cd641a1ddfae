//! Engine run as a local child process.

use super::instance::{Exit, Instance};
use super::managed::Backend;
use super::EngineError;
use crate::config::StartOptions;
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;
use tracing::{debug, info, warn};

static LAUNCH_SEQ: AtomicU64 = AtomicU64::new(1);

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    KillRequested,
}

/// Launches `engine_binary [engine_args] --configDir=<dir> --listenPort=<port>`
/// with inherited stdout and stderr.
#[derive(Debug, Default, Clone)]
pub struct ProcessBackend;

impl ProcessBackend {
    pub fn new() -> Self {
        Self
    }

    fn command(options: &StartOptions) -> Command {
        let mut command = Command::new(&options.engine_binary);
        command
            .args(&options.engine_args)
            .arg(format!("--configDir={}", options.config_dir.display()))
            .arg(format!("--listenPort={}", options.port))
            .env("IMPOSTER_LOG_LEVEL", options.log_level.to_uppercase())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Backend for ProcessBackend {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn prepare(&self, options: &StartOptions) -> Result<(), EngineError> {
        debug!(
            "using engine binary {} with config dir {}",
            options.engine_binary.display(),
            options.config_dir.display()
        );
        Ok(())
    }

    async fn launch(&self, options: &StartOptions) -> Result<Instance, EngineError> {
        let program = options.engine_binary.display().to_string();
        let mut child = Self::command(options)
            .spawn()
            .map_err(|e| EngineError::Spawn {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        let pid = child.id();
        let seq = LAUNCH_SEQ.fetch_add(1, Ordering::Relaxed);
        let id = match pid {
            Some(pid) => format!("process-{seq}-pid-{pid}"),
            None => format!("process-{seq}"),
        };
        info!("launched {program} as {id}");

        let instance = Instance::supervise(id, move |kill| async move {
            let waited = tokio::select! {
                status = child.wait() => Waited::Exited(status),
                _ = kill => Waited::KillRequested,
            };
            let status = match waited {
                Waited::Exited(status) => status,
                Waited::KillRequested => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            status
                .map(describe_exit)
                .map_err(|e| EngineError::Io(e.to_string()))
        });
        Ok(instance.with_pid(pid))
    }

    async fn terminate(&self, instance: &Instance, options: &StartOptions) {
        instance.mark_stopping();
        if !instance.is_running() {
            return;
        }

        match instance.pid() {
            Some(pid) => send_term(pid, instance),
            None => instance.kill(),
        }

        if tokio::time::timeout(options.stop_grace, instance.wait())
            .await
            .is_err()
        {
            warn!(
                "engine instance {} still running after {}s, killing it",
                instance.id(),
                options.stop_grace.as_secs()
            );
            instance.kill();
            instance.wait().await;
        }
    }
}

#[cfg(unix)]
fn send_term(pid: u32, instance: &Instance) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        instance.kill();
        return;
    };
    let ret = unsafe { libc::kill(pid, libc::SIGTERM) };
    if ret != 0 {
        debug!(
            "SIGTERM to {} failed: {}",
            instance.id(),
            std::io::Error::last_os_error()
        );
        instance.kill();
    }
}

#[cfg(not(unix))]
fn send_term(_pid: u32, instance: &Instance) {
    instance.kill();
}

fn describe_exit(status: ExitStatus) -> Exit {
    if status.success() {
        return Exit::Success;
    }
    if let Some(code) = status.code() {
        return Exit::Failure(format!("exit code {code}"));
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Exit::Failure(format!("terminated by signal {signal}"));
        }
    }
    Exit::Failure(status.to_string())
}
