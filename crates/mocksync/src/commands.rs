//! Subcommand implementations.

use crate::cli::{ProxyArgs, UpArgs};
use crate::config::{
    get_or_default, validate_config_dir, CliConfig, CrashPolicy, EngineType, ProxyConfig,
    PullPolicy, StartOptions, DEFAULT_ENGINE_BINARY, DEFAULT_VERSION,
};
use crate::control::{trap_exit, ControlLoop};
use crate::engine::build_engine;
use crate::proxy::{recordable_headers, Exchange, ExchangeObserver, ProxyServer};
use crate::signals::shutdown_signal;
use crate::watch::DirWatcher;
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Logs every proxied exchange along with the headers worth recording.
pub struct ExchangeLogger;

impl ExchangeObserver for ExchangeLogger {
    fn on_exchange(&self, exchange: &Exchange) {
        info!(
            "{} {} -> {} ({} bytes in {:?})",
            exchange.method,
            exchange.path,
            exchange.status.as_u16(),
            exchange.response_body.len(),
            exchange.latency
        );
        for (name, value) in recordable_headers(&exchange.response_headers).iter() {
            debug!("  {}: {}", name, value.to_str().unwrap_or("<binary>"));
        }
    }
}

/// Resolve launch options from flags, falling back to the CLI config file.
pub fn start_options(
    args: &UpArgs,
    config: &CliConfig,
    config_dir: PathBuf,
    log_level: &str,
) -> StartOptions {
    let mut options = StartOptions::new(config_dir);
    options.port = args.port;
    options.version = get_or_default(
        args.version.clone(),
        config.version.clone(),
        DEFAULT_VERSION.to_string(),
    );
    options.pull_policy = if args.pull {
        PullPolicy::Always
    } else {
        config.pull_policy.unwrap_or_default()
    };
    options.log_level = log_level.to_string();
    options.engine_binary = get_or_default(
        args.engine_binary.clone(),
        config.engine_binary.clone(),
        PathBuf::from(DEFAULT_ENGINE_BINARY),
    );
    options.engine_args = config.engine_args.clone();
    options
}

pub fn crash_policy(args: &UpArgs, config: &CliConfig) -> CrashPolicy {
    if args.restart_on_crash {
        CrashPolicy::Restart
    } else {
        config.crash_policy
    }
}

/// `mocksync up`: run the engine until it stops or the process is interrupted.
pub async fn up(args: UpArgs, config: CliConfig, log_level: &str) -> anyhow::Result<()> {
    validate_config_dir(&args.config_dir)?;
    let config_dir = args
        .config_dir
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", args.config_dir.display()))?;

    let engine_type = EngineType::resolve(args.engine.as_deref(), config.engine.as_deref())?;
    let options = start_options(&args, &config, config_dir.clone(), log_level);
    info!(
        "starting {} engine {} for {}",
        engine_type.as_str(),
        options.version,
        config_dir.display()
    );

    let proxy = match args.proxy_port {
        Some(port) => Some(ProxyConfig {
            upstream: options.engine_url(),
            port,
            connection_pool: config.connection_pool.clone(),
        }),
        None => None,
    };

    let watcher = if args.auto_restart {
        let debounce = Duration::from_millis(config.watch_debounce_ms);
        Some(DirWatcher::watch(&config_dir, debounce)?)
    } else {
        debug!("auto-restart disabled");
        None
    };

    let engine = build_engine(engine_type, options);
    let control = ControlLoop::new(engine)
        .with_crash_policy(crash_policy(&args, &config))
        .with_label(config_dir.display().to_string());
    let trap = trap_exit(control.interrupt_handle(), shutdown_signal);

    let (proxy_shutdown, proxy_task) = match proxy {
        Some(proxy) => {
            let server = ProxyServer::new(&proxy, Arc::new(ExchangeLogger));
            let (tx, rx) = oneshot::channel::<()>();
            let task = tokio::spawn(server.run(async move {
                let _ = rx.await;
            }));
            (Some(tx), Some(task))
        }
        None => (None, None),
    };

    let result = control.run(watcher).await;
    trap.abort();

    if let Some(tx) = proxy_shutdown {
        let _ = tx.send(());
    }
    if let Some(task) = proxy_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("recording proxy failed: {e:#}"),
            Err(e) => warn!("recording proxy task failed: {e}"),
        }
    }

    let outcome = result.context("mock engine failed")?;
    info!(
        "mock engine stopped ({} restart(s), {} unexpected stop(s))",
        outcome.restarts, outcome.unexpected_stops
    );
    Ok(())
}

/// `mocksync proxy`: serve the recording proxy until interrupted.
pub async fn proxy(args: ProxyArgs, config: CliConfig) -> anyhow::Result<()> {
    let mut connection_pool = config.connection_pool;
    if let Some(secs) = args.request_timeout {
        connection_pool.request_timeout_secs = secs;
    }
    let proxy = ProxyConfig {
        upstream: args.upstream,
        port: args.port,
        connection_pool,
    };
    proxy.validate().map_err(anyhow::Error::msg)?;

    ProxyServer::new(&proxy, Arc::new(ExchangeLogger))
        .run(shutdown_signal())
        .await
}
