//! Error taxonomy for the harness.
//!
//! Launcher and pool failures are infrastructure problems: they abort the
//! affected attempts and surface as `Errored` outcomes, never as product
//! failures. Step-level failures are classified separately in
//! [`crate::runner::state::FailureKind`].

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the service launcher.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The readiness endpoint never answered with a success status.
    #[error("service at {url} not ready after {waited_ms}ms")]
    StartupTimeout { url: String, waited_ms: u64 },

    /// Another launcher or host process already holds the port.
    #[error("port {port} is already in use")]
    PortConflict { port: u16 },

    /// The spawned process exited before it became ready.
    #[error("service process exited before becoming ready ({status})")]
    ServiceExited { status: String },

    /// The service command could not be spawned.
    #[error("failed to spawn service command `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled while waiting for service readiness")]
    Cancelled,
}

/// Errors raised by the browser session pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// No session slot became free within the acquire timeout.
    #[error("browser pool exhausted: no session available after {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("cancelled while waiting for a browser session")]
    Cancelled,

    /// The automation capability failed to create a context.
    #[error("browser failed to create a context: {0}")]
    Browser(#[from] DriverError),
}

/// Errors reported by the browser automation capability.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// No element matched the selector.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// The capability could not perform the action (navigation, click, fill...).
    #[error("{0}")]
    Action(String),

    /// The browser or context is gone; nothing on this session can succeed.
    #[error("browser connection lost: {0}")]
    Disconnected(String),
}

impl DriverError {
    pub fn action(err: impl std::fmt::Display) -> Self {
        DriverError::Action(err.to_string())
    }

    pub fn disconnected(err: impl std::fmt::Display) -> Self {
        DriverError::Disconnected(err.to_string())
    }
}

/// Configuration and scenario loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Run-level failures that prevent any scenario from executing.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("browser engine failed to launch: {0}")]
    Browser(#[from] DriverError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
