//! Node lifecycle
//!
//! One engine instance end to end: data directory, config, process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::identity::{ConnectionString, NodeIdentity};
use crate::engine::{Engine, EngineError, Launch};
use crate::error::{Result, ShardlordError};

/// Lifecycle phase of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    /// Allocated, nothing on disk yet
    Created,
    /// Data directory populated
    Initialized,
    /// Process accepting connections
    Running,
    /// Process shut down, data directory kept
    Stopped,
    /// Process gone, data directory removed
    CleanedUp,
}

/// Handle to one engine instance
///
/// Owns exactly one process and one directory subtree.
pub struct NodeHandle<E: Engine> {
    identity: NodeIdentity,
    engine: Arc<E>,
    phase: NodePhase,
    process: Option<E::Process>,
    start_timeout: Duration,
    /// Set once `init` has taken the data directory over
    claimed: bool,
}

impl<E: Engine> NodeHandle<E> {
    /// Allocate a handle; nothing is touched until `init`
    pub fn new(identity: NodeIdentity, engine: Arc<E>, start_timeout: Duration) -> Self {
        Self {
            identity,
            engine,
            phase: NodePhase::Created,
            process: None,
            start_timeout,
            claimed: false,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn port(&self) -> u16 {
        self.identity.port
    }

    pub fn phase(&self) -> NodePhase {
        self.phase
    }

    /// Engine data directory
    pub fn data_dir(&self) -> PathBuf {
        self.identity.engine_dir()
    }

    /// Server log file
    pub fn log_file(&self) -> PathBuf {
        self.identity.log_file()
    }

    pub fn connection_string(&self, dbname: &str) -> ConnectionString {
        self.identity.connection_string(dbname)
    }

    /// Create the data directory and default configuration
    ///
    /// Fails if the directory already has content or the port is taken.
    pub async fn init(&mut self) -> Result<&mut Self> {
        if self.phase != NodePhase::Created {
            return Err(self.init_error(format!("already {:?}", self.phase)));
        }

        let root = &self.identity.data_directory;
        if tokio::fs::try_exists(root).await.map_err(|e| self.init_error(e))? {
            let mut entries = tokio::fs::read_dir(root).await.map_err(|e| self.init_error(e))?;
            if entries.next_entry().await.map_err(|e| self.init_error(e))?.is_some() {
                return Err(self.init_error(format!(
                    "data directory {} is not empty",
                    root.display()
                )));
            }
        }

        if !self.engine.port_available(self.port()).await {
            return Err(self.init_error(format!("port {} already in use", self.port())));
        }

        self.claimed = true;
        let log_dir = self.identity.data_directory.join("logs");
        tokio::fs::create_dir_all(&log_dir)
            .await
            .map_err(|e| self.init_error(e))?;

        self.engine
            .init(&self.data_dir())
            .await
            .map_err(|e| self.init_error(e))?;

        self.phase = NodePhase::Initialized;
        info!(node = %self.name(), port = self.port(), "Node initialized");
        Ok(self)
    }

    /// Append rendered configuration to the node's config file
    ///
    /// Settings appended while running only apply after a restart.
    pub async fn append_config(&mut self, text: &str) -> Result<&mut Self> {
        match self.phase {
            NodePhase::Created | NodePhase::CleanedUp => {
                return Err(ShardlordError::Precondition {
                    reason: format!(
                        "cannot append config to node {} while {:?}",
                        self.name(),
                        self.phase
                    ),
                });
            }
            NodePhase::Running => {
                warn!(
                    node = %self.name(),
                    "Config appended to running node; takes effect after restart"
                );
            }
            NodePhase::Initialized | NodePhase::Stopped => {}
        }

        let path = self.engine.config_file(&self.data_dir());
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| self.init_error(format!("cannot open {}: {}", path.display(), e)))?;

        let mut block = String::with_capacity(text.len() + 1);
        block.push('\n');
        block.push_str(text);
        if !text.ends_with('\n') {
            block.push('\n');
        }

        file.write_all(block.as_bytes())
            .await
            .map_err(|e| self.init_error(format!("cannot write {}: {}", path.display(), e)))?;
        file.flush().await.map_err(|e| self.init_error(e))?;

        debug!(node = %self.name(), bytes = block.len(), "Config appended");
        Ok(self)
    }

    /// Launch the process and wait until it accepts connections
    pub async fn start(&mut self) -> Result<&mut Self> {
        if !matches!(self.phase, NodePhase::Initialized | NodePhase::Stopped) {
            return Err(ShardlordError::Precondition {
                reason: format!("cannot start node {} while {:?}", self.name(), self.phase),
            });
        }

        let launch = Launch {
            data_dir: self.data_dir(),
            port: self.port(),
            log_file: self.log_file(),
            timeout: self.start_timeout,
        };

        let process = self.engine.start(&launch).await.map_err(|e| match e {
            EngineError::StartTimeout(timeout) => ShardlordError::Start {
                node: self.name().to_string(),
                timeout,
            },
            EngineError::Crash { status, log_tail } => ShardlordError::Crash {
                node: self.name().to_string(),
                status,
                log_tail,
            },
            other => ShardlordError::Crash {
                node: self.name().to_string(),
                status: "unknown".into(),
                log_tail: other.to_string(),
            },
        })?;

        self.process = Some(process);
        self.phase = NodePhase::Running;
        info!(node = %self.name(), port = self.port(), "Node started");
        Ok(self)
    }

    /// Execute one statement against `database`
    pub async fn run_sql(&self, database: &str, statement: &str) -> Result<String> {
        if self.phase != NodePhase::Running {
            return Err(self.query_error(statement, format!("node is {:?}", self.phase)));
        }

        debug!(node = %self.name(), %statement, "Executing");
        self.engine
            .execute(self.port(), database, statement)
            .await
            .map_err(|e| self.query_error(statement, e.to_string()))
    }

    /// Shut the process down gracefully; no-op unless running
    pub async fn stop(&mut self) -> Result<()> {
        if self.phase != NodePhase::Running {
            return Ok(());
        }

        if let Some(process) = self.process.as_mut() {
            self.engine
                .stop(process)
                .await
                .map_err(|e| ShardlordError::Cleanup {
                    node: self.identity.name.clone(),
                    reason: e.to_string(),
                })?;
        }

        self.process = None;
        self.phase = NodePhase::Stopped;
        info!(node = %self.name(), "Node stopped");
        Ok(())
    }

    /// Stop if running and remove the data directory
    ///
    /// Idempotent: cleaning an already clean node does nothing. A directory
    /// `init` refused to take over is left alone.
    pub async fn cleanup(&mut self) -> Result<()> {
        if self.phase == NodePhase::CleanedUp {
            return Ok(());
        }

        self.stop().await?;

        if !self.claimed {
            self.phase = NodePhase::CleanedUp;
            return Ok(());
        }

        match tokio::fs::remove_dir_all(&self.identity.data_directory).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ShardlordError::Cleanup {
                    node: self.name().to_string(),
                    reason: format!(
                        "cannot remove {}: {}",
                        self.identity.data_directory.display(),
                        e
                    ),
                });
            }
        }

        self.phase = NodePhase::CleanedUp;
        info!(node = %self.name(), "Node cleaned up");
        Ok(())
    }

    fn init_error(&self, reason: impl ToString) -> ShardlordError {
        ShardlordError::Init {
            node: self.name().to_string(),
            reason: reason.to_string(),
        }
    }

    fn query_error(&self, statement: &str, message: String) -> ShardlordError {
        ShardlordError::Query {
            node: self.name().to_string(),
            statement: statement.to_string(),
            message,
        }
    }
}
