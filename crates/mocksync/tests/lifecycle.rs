//! End-to-end engine lifecycle through the public API.
//!
//! The engine is a shell script run by the process engine, so these tests
//! need a unix `sh` but no docker daemon.

#![cfg(unix)]

use async_trait::async_trait;
use mocksync::config::{CrashPolicy, EngineType, StartOptions};
use mocksync::watch::DirWatcher;
use mocksync::{
    build_engine, ControlLoop, EngineError, InterruptHandle, LoopPhase, MockEngine, StopChannel,
};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for an engine that appends a line to `launches` on every start and
/// then runs `tail`.
fn script_engine(config_dir: &Path, launches: &Path, tail: &str) -> StartOptions {
    let mut options = StartOptions::new(config_dir);
    options.engine_binary = "sh".into();
    options.engine_args = vec![
        "-c".to_string(),
        format!("echo up >> \"$0\"; {tail}"),
        launches.display().to_string(),
    ];
    options.ready_timeout = None;
    options.stop_grace = Duration::from_secs(2);
    options
}

fn launch_count(launches: &Path) -> usize {
    std::fs::read_to_string(launches)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

async fn wait_for_launches(launches: &Path, expected: usize) {
    timeout(TEST_TIMEOUT, async {
        while launch_count(launches) < expected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("engine did not launch in time");
}

#[tokio::test]
async fn test_config_change_restarts_engine_until_interrupted() {
    let config_dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let launches = scratch.path().join("launches.log");
    std::fs::write(config_dir.path().join("pets-config.yaml"), "plugin: rest\n").unwrap();

    let engine = build_engine(
        EngineType::Process,
        script_engine(config_dir.path(), &launches, "exec sleep 30"),
    );
    let control = ControlLoop::new(engine).with_label("pets");
    let handle = control.interrupt_handle();
    let watcher = DirWatcher::watch(config_dir.path(), Duration::from_millis(200)).unwrap();
    let task = tokio::spawn(async move { control.run(Some(watcher)).await });

    wait_for_launches(&launches, 1).await;
    std::fs::write(
        config_dir.path().join("pets-config.yaml"),
        "plugin: rest\nresources: []\n",
    )
    .unwrap();
    wait_for_launches(&launches, 2).await;

    assert!(handle.interrupt().await);
    let outcome = timeout(TEST_TIMEOUT, task)
        .await
        .expect("control loop did not finish")
        .unwrap()
        .unwrap();
    assert!(outcome.restarts >= 1);
    assert_eq!(outcome.unexpected_stops, 0);
    assert!(outcome.interrupted);
}

#[tokio::test]
async fn test_engine_crash_ends_loop() {
    let config_dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let launches = scratch.path().join("launches.log");

    let engine = build_engine(
        EngineType::Process,
        script_engine(config_dir.path(), &launches, "exit 7"),
    );
    let outcome = timeout(TEST_TIMEOUT, ControlLoop::new(engine).run(None))
        .await
        .expect("control loop did not finish")
        .unwrap();

    assert_eq!(outcome.unexpected_stops, 1);
    assert!(!outcome.interrupted);
    assert_eq!(launch_count(&launches), 1);
}

#[tokio::test]
async fn test_engine_crash_with_restart_policy_relaunches() {
    let config_dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let launches = scratch.path().join("launches.log");

    let engine = build_engine(
        EngineType::Process,
        script_engine(config_dir.path(), &launches, "sleep 0.2; exit 7"),
    );
    let control = ControlLoop::new(engine).with_crash_policy(CrashPolicy::Restart);
    let handle = control.interrupt_handle();
    let task = tokio::spawn(async move { control.run(None).await });

    wait_for_launches(&launches, 3).await;
    handle.interrupt().await;
    let outcome = timeout(TEST_TIMEOUT, task)
        .await
        .expect("control loop did not finish")
        .unwrap()
        .unwrap();
    assert!(outcome.unexpected_stops >= 2);
    assert!(outcome.interrupted);
}

/// Delegates to a real engine, but fires the interrupt handler as a restart
/// begins, so removal wins the engine lock over the restart.
struct InterruptOnRestart {
    inner: Arc<dyn MockEngine>,
    handle: OnceLock<InterruptHandle>,
}

#[async_trait]
impl MockEngine for InterruptOnRestart {
    async fn start(&self) -> Result<(), EngineError> {
        self.inner.start().await
    }

    async fn restart(&self, stop: &StopChannel) -> Result<(), EngineError> {
        if let Some(handle) = self.handle.get() {
            handle.interrupt().await;
        }
        self.inner.restart(stop).await
    }

    async fn trigger_removal_and_notify(&self, stop: &StopChannel) {
        self.inner.trigger_removal_and_notify(stop).await
    }

    async fn notify_on_stop(&self, stop: &StopChannel) {
        self.inner.notify_on_stop(stop).await
    }
}

#[tokio::test]
async fn test_interrupt_racing_a_restart_still_ends_loop() {
    let config_dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let launches = scratch.path().join("launches.log");

    let engine = Arc::new(InterruptOnRestart {
        inner: build_engine(
            EngineType::Process,
            script_engine(config_dir.path(), &launches, "exec sleep 30"),
        ),
        handle: OnceLock::new(),
    });
    let control = ControlLoop::new(engine.clone());
    let _ = engine.handle.set(control.interrupt_handle());
    let state = control.state();
    let (tx, rx) = mpsc::channel(1);
    let task = tokio::spawn(async move { control.run(Some(DirWatcher::from_receiver(rx))).await });

    wait_for_launches(&launches, 1).await;
    tx.send(()).await.unwrap();

    let outcome = timeout(TEST_TIMEOUT, task)
        .await
        .expect("control loop did not finish")
        .unwrap()
        .unwrap();
    assert_eq!(outcome.restarts, 1);
    assert_eq!(outcome.unexpected_stops, 0);
    assert!(outcome.interrupted);
    assert_eq!(state.restarts_pending(), 0);
    assert_eq!(state.phase(), LoopPhase::Terminated);
    // The removed engine was not relaunched by the restart.
    assert_eq!(launch_count(&launches), 1);
}
