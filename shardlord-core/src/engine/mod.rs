//! Database engine collaborator
//!
//! The narrow interface through which nodes are initialized, started,
//! stopped and queried. The orchestrator never looks past it.

pub mod postgres;
pub mod simulated;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use postgres::{PostgresConfig, PostgresEngine};
pub use simulated::{ExecutedStatement, SimulatedEngine};

/// Errors reported by an engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// `initdb` (or equivalent) failed
    #[error("init failed: {0}")]
    Init(String),

    /// Server did not accept connections in time
    #[error("not ready after {0:?}")]
    StartTimeout(Duration),

    /// Server process exited during startup
    #[error("process exited ({status}): {log_tail}")]
    Crash { status: String, log_tail: String },

    /// Statement failed; carries the server's error text
    #[error("{0}")]
    Query(String),

    /// Server could not be stopped
    #[error("stop failed: {0}")]
    Stop(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Everything needed to launch one server process
#[derive(Debug, Clone)]
pub struct Launch {
    /// Initialized engine data directory
    pub data_dir: PathBuf,
    /// Listen port
    pub port: u16,
    /// File receiving server output
    pub log_file: PathBuf,
    /// How long to wait for the server to accept connections
    pub timeout: Duration,
}

/// Process lifecycle and statement execution for one engine build
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// A running server owned by a node
    type Process: Send + Sync;

    /// Populate an empty data directory
    async fn init(&self, data_dir: &Path) -> Result<(), EngineError>;

    /// Launch a server and wait until it accepts connections
    async fn start(&self, launch: &Launch) -> Result<Self::Process, EngineError>;

    /// Shut a server down gracefully
    async fn stop(&self, process: &mut Self::Process) -> Result<(), EngineError>;

    /// Run one statement against `database` on the server listening on `port`
    async fn execute(&self, port: u16, database: &str, statement: &str)
        -> Result<String, EngineError>;

    /// Returns true if nothing is listening on `port`
    async fn port_available(&self, port: u16) -> bool {
        tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok()
    }

    /// Configuration file rendered settings are appended to
    fn config_file(&self, data_dir: &Path) -> PathBuf {
        data_dir.join("postgresql.conf")
    }
}
