//! Command line interface.

use crate::config::DEFAULT_PORT;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_PROXY_PORT: u16 = 8081;

/// mocksync - run a mock engine and keep it in sync with its config
#[derive(Parser, Debug)]
#[command(name = "mocksync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, env = "MOCKSYNC_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// CLI config file (defaults to ~/.mocksync/config.yaml)
    #[arg(long, global = true, env = "MOCKSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a mock engine for a config directory
    Up(UpArgs),
    /// Run the recording proxy in front of a running engine
    Proxy(ProxyArgs),
}

#[derive(Args, Debug)]
pub struct UpArgs {
    /// Directory containing mock configuration files
    #[arg(default_value = ".")]
    pub config_dir: PathBuf,

    /// Engine type (docker, process)
    #[arg(short, long, env = "MOCKSYNC_ENGINE")]
    pub engine: Option<String>,

    /// Engine version
    #[arg(short = 'v', long)]
    pub version: Option<String>,

    /// Port the engine listens on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Pull the engine image even if it is already present
    #[arg(long)]
    pub pull: bool,

    /// Restart the engine when the config directory changes
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub auto_restart: bool,

    /// Start a new engine instance if the engine crashes
    #[arg(long)]
    pub restart_on_crash: bool,

    /// Engine program used by the process engine
    #[arg(long, env = "MOCKSYNC_ENGINE_BINARY")]
    pub engine_binary: Option<PathBuf>,

    /// Also run the recording proxy in front of the engine on this port
    #[arg(long)]
    pub proxy_port: Option<u16>,
}

#[derive(Args, Debug)]
pub struct ProxyArgs {
    /// Base URL of the engine, e.g. http://localhost:8080
    #[arg(short, long, env = "MOCKSYNC_UPSTREAM")]
    pub upstream: String,

    /// Port the proxy listens on
    #[arg(short, long, default_value_t = DEFAULT_PROXY_PORT)]
    pub port: u16,

    /// Upper bound in seconds on each proxied round trip
    #[arg(long)]
    pub request_timeout: Option<u64>,
}
