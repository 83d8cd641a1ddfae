// Library exports for the mocksync binary and integration tests

// ===== Engine lifecycle =====
pub mod control;
pub mod debounce;
pub mod engine;
pub mod watch;

// ===== Recording proxy =====
pub mod proxy;

// ===== Command line surface =====
pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod signals;

#[cfg(test)]
mod test_support;

pub use control::{trap_exit, ControlLoop, InterruptHandle, LoopOutcome, LoopPhase, LoopState};
pub use debounce::{StopChannel, StopEvent};
pub use engine::{build_engine, EngineError, MockEngine};
