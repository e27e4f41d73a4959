//! In-process simulated engine
//!
//! Materializes data directories and config files on disk but runs no
//! server. Tracks which ports are "listening", records every statement,
//! and can be told to fail in specific ways. Backs `--dry-run` and the
//! test suite.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{Engine, EngineError, Launch};

/// Marker file written by `init`
const VERSION_FILE: &str = "PG_VERSION";

/// A statement the engine was asked to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    pub port: u16,
    pub database: String,
    pub statement: String,
}

#[derive(Default)]
struct SimState {
    running: HashSet<u16>,
    occupied: HashSet<u16>,
    statements: Vec<ExecutedStatement>,
    failing_statements: Vec<(String, String)>,
    crash_on_start: HashSet<u16>,
    stall_on_start: HashSet<u16>,
    fail_next_stop: HashSet<u16>,
}

/// Handle to a simulated server
#[derive(Debug)]
pub struct SimulatedProcess {
    port: u16,
}

/// Engine that simulates servers in memory
#[derive(Default)]
pub struct SimulatedEngine {
    state: Mutex<SimState>,
}

impl SimulatedEngine {
    /// Create a new engine with no faults configured
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every statement containing `needle` (case-insensitive) with `message`
    pub fn fail_statements_containing(&self, needle: &str, message: &str) {
        self.state
            .lock()
            .failing_statements
            .push((needle.to_lowercase(), message.to_string()));
    }

    /// Make servers on `port` exit during startup
    pub fn crash_on_start(&self, port: u16) {
        self.state.lock().crash_on_start.insert(port);
    }

    /// Make servers on `port` never become ready
    pub fn stall_on_start(&self, port: u16) {
        self.state.lock().stall_on_start.insert(port);
    }

    /// Fail the next stop of the server on `port`
    pub fn fail_next_stop(&self, port: u16) {
        self.state.lock().fail_next_stop.insert(port);
    }

    /// Pretend a foreign process is listening on `port`
    pub fn occupy_port(&self, port: u16) {
        self.state.lock().occupied.insert(port);
    }

    /// Ports with a running simulated server, ascending
    pub fn running_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.state.lock().running.iter().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Every statement executed so far, in order
    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.state.lock().statements.clone()
    }

    /// Statement texts executed against `port`, in order
    pub fn statements_on(&self, port: u16) -> Vec<String> {
        self.state
            .lock()
            .statements
            .iter()
            .filter(|s| s.port == port)
            .map(|s| s.statement.clone())
            .collect()
    }
}

#[async_trait]
impl Engine for SimulatedEngine {
    type Process = SimulatedProcess;

    async fn init(&self, data_dir: &Path) -> Result<(), EngineError> {
        if tokio::fs::try_exists(data_dir.join(VERSION_FILE)).await? {
            return Err(EngineError::Init(format!(
                "directory {} already holds a database cluster",
                data_dir.display()
            )));
        }

        tokio::fs::create_dir_all(data_dir).await?;
        tokio::fs::write(data_dir.join(VERSION_FILE), "simulated\n").await?;
        tokio::fs::write(self.config_file(data_dir), "# simulated engine defaults\n").await?;

        debug!("simulated init of {}", data_dir.display());
        Ok(())
    }

    async fn start(&self, launch: &Launch) -> Result<SimulatedProcess, EngineError> {
        if !tokio::fs::try_exists(launch.data_dir.join(VERSION_FILE)).await? {
            return Err(EngineError::Crash {
                status: "exit status: 2".into(),
                log_tail: format!(
                    "FATAL: \"{}\" is not a database cluster directory",
                    launch.data_dir.display()
                ),
            });
        }

        let stall = {
            let mut state = self.state.lock();
            if state.crash_on_start.contains(&launch.port) {
                return Err(EngineError::Crash {
                    status: "exit status: 1".into(),
                    log_tail: "FATAL: simulated startup crash".into(),
                });
            }
            if state.running.contains(&launch.port) || state.occupied.contains(&launch.port) {
                return Err(EngineError::Crash {
                    status: "exit status: 1".into(),
                    log_tail: format!(
                        "FATAL: could not bind IPv4 address \"127.0.0.1\": port {} in use",
                        launch.port
                    ),
                });
            }
            let stall = state.stall_on_start.contains(&launch.port);
            if !stall {
                state.running.insert(launch.port);
            }
            stall
        };

        if stall {
            tokio::time::sleep(launch.timeout).await;
            return Err(EngineError::StartTimeout(launch.timeout));
        }

        Ok(SimulatedProcess { port: launch.port })
    }

    async fn stop(&self, process: &mut SimulatedProcess) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.fail_next_stop.remove(&process.port) {
            return Err(EngineError::Stop(format!(
                "simulated stop failure on port {}",
                process.port
            )));
        }
        state.running.remove(&process.port);
        Ok(())
    }

    async fn execute(
        &self,
        port: u16,
        database: &str,
        statement: &str,
    ) -> Result<String, EngineError> {
        let mut state = self.state.lock();
        if !state.running.contains(&port) {
            return Err(EngineError::Query(format!(
                "could not connect to server on port {}: Connection refused",
                port
            )));
        }

        state.statements.push(ExecutedStatement {
            port,
            database: database.to_string(),
            statement: statement.to_string(),
        });

        let lowered = statement.to_lowercase();
        if let Some((_, message)) = state
            .failing_statements
            .iter()
            .find(|(needle, _)| lowered.contains(needle.as_str()))
        {
            return Err(EngineError::Query(message.clone()));
        }

        Ok(String::new())
    }

    async fn port_available(&self, port: u16) -> bool {
        let state = self.state.lock();
        !state.running.contains(&port) && !state.occupied.contains(&port)
    }
}
