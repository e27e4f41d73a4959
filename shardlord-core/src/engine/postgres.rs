//! PostgreSQL engine
//!
//! Drives the stock server binaries (`initdb`, `postgres`, `pg_isready`,
//! `pg_ctl`, `psql`) as child processes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::{Engine, EngineError, Launch};

/// Lines of server log attached to crash reports
const LOG_TAIL_LINES: usize = 20;

/// Configuration for the PostgreSQL engine
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Directory holding the server binaries (`PATH` lookup if unset)
    pub bin_dir: Option<PathBuf>,
    /// Host used by `psql` and `pg_isready`
    pub host: String,
    /// Readiness poll interval during startup
    pub poll_interval: Duration,
    /// Time `pg_ctl stop` may take before the process is killed
    pub stop_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            bin_dir: None,
            host: "127.0.0.1".into(),
            poll_interval: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(30),
        }
    }
}

impl PostgresConfig {
    /// Defaults, with `PG_BIN` as the binary directory when set
    pub fn from_env() -> Self {
        Self {
            bin_dir: std::env::var_os("PG_BIN").map(PathBuf::from),
            ..Default::default()
        }
    }
}

/// A running postmaster
///
/// Killed if dropped while still running.
pub struct PostgresProcess {
    child: Child,
    data_dir: PathBuf,
}

/// Engine backed by a local PostgreSQL installation
pub struct PostgresEngine {
    config: PostgresConfig,
}

impl PostgresEngine {
    /// Create a new engine
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }

    fn command(&self, program: &str) -> Command {
        let path = match &self.config.bin_dir {
            Some(dir) => dir.join(program),
            None => PathBuf::from(program),
        };
        let mut cmd = Command::new(path);
        cmd.stdin(Stdio::null());
        cmd
    }

    async fn is_ready(&self, port: u16) -> bool {
        let status = self
            .command("pg_isready")
            .arg("-q")
            .arg("-h")
            .arg(&self.config.host)
            .arg("-p")
            .arg(port.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        matches!(status, Ok(s) if s.success())
    }
}

#[async_trait]
impl Engine for PostgresEngine {
    type Process = PostgresProcess;

    async fn init(&self, data_dir: &Path) -> Result<(), EngineError> {
        let output = self
            .command("initdb")
            .arg("-D")
            .arg(data_dir)
            .arg("-N")
            .arg("--auth=trust")
            .output()
            .await
            .map_err(|e| EngineError::Init(format!("cannot run initdb: {}", e)))?;

        if !output.status.success() {
            return Err(EngineError::Init(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        debug!("initdb completed for {}", data_dir.display());
        Ok(())
    }

    async fn start(&self, launch: &Launch) -> Result<PostgresProcess, EngineError> {
        let log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&launch.log_file)
            .await?
            .into_std()
            .await;
        let err_log = log.try_clone()?;

        // TCP only; socket paths under deep temp dirs overflow sun_path
        let mut child = self
            .command("postgres")
            .arg("-D")
            .arg(&launch.data_dir)
            .arg("-p")
            .arg(launch.port.to_string())
            .arg("-k")
            .arg("")
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(err_log))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Crash {
                status: "not spawned".into(),
                log_tail: e.to_string(),
            })?;

        let deadline = Instant::now() + launch.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Err(EngineError::Crash {
                    status: status.to_string(),
                    log_tail: log_tail(&launch.log_file).await,
                });
            }

            if self.is_ready(launch.port).await {
                debug!("postgres on port {} accepting connections", launch.port);
                return Ok(PostgresProcess {
                    child,
                    data_dir: launch.data_dir.clone(),
                });
            }

            if Instant::now() >= deadline {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill unready postgres on port {}: {}", launch.port, e);
                }
                return Err(EngineError::StartTimeout(launch.timeout));
            }

            sleep(self.config.poll_interval).await;
        }
    }

    async fn stop(&self, process: &mut PostgresProcess) -> Result<(), EngineError> {
        if process.child.try_wait()?.is_some() {
            return Ok(());
        }

        let output = self
            .command("pg_ctl")
            .arg("-D")
            .arg(&process.data_dir)
            .args(["-m", "fast", "-w", "-t"])
            .arg(self.config.stop_timeout.as_secs().max(1).to_string())
            .arg("stop")
            .output()
            .await?;

        if output.status.success() {
            process.child.wait().await?;
            return Ok(());
        }

        warn!(
            "pg_ctl stop failed for {}: {}; killing postmaster",
            process.data_dir.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        process
            .child
            .kill()
            .await
            .map_err(|e| EngineError::Stop(e.to_string()))
    }

    async fn execute(
        &self,
        port: u16,
        database: &str,
        statement: &str,
    ) -> Result<String, EngineError> {
        let output = self
            .command("psql")
            .args(["-X", "-A", "-t", "-q", "-v", "ON_ERROR_STOP=1"])
            .arg("-h")
            .arg(&self.config.host)
            .arg("-p")
            .arg(port.to_string())
            .arg("-d")
            .arg(database)
            .arg("-c")
            .arg(statement)
            .output()
            .await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(EngineError::Query(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

async fn log_tail(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            let lines: Vec<&str> = text.lines().collect();
            let start = lines.len().saturating_sub(LOG_TAIL_LINES);
            lines[start..].join("\n")
        }
        Err(e) => format!("<log unavailable: {}>", e),
    }
}
