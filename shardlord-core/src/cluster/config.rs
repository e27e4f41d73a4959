//! Cluster configuration
//!
//! Defaults suit a local demo cluster. Every field can be overridden from
//! the environment:
//!
//! | Variable                              | Default             |
//! |---------------------------------------|---------------------|
//! | `SHARDLORD_DBNAME`                    | `postgres`          |
//! | `SHARDLORD_BASE_DIR`                  | `$TMPDIR/shardlord` |
//! | `SHARDLORD_START_TIMEOUT_SECS`        | `60`                |
//! | `SHARDLORD_WORKERS`                   | `3`                 |
//! | `SHARDLORD_CMD_RETRY_NAPTIME_MS`      | `500`               |
//! | `SHARDLORD_POLL_INTERVAL_MS`          | `500`               |
//! | `SHARDLORD_WAL_RECEIVER_TIMEOUT_SECS` | `60`                |
//! | `SHARDLORD_SYNC_REPLICAS`             | `false`             |

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::node::template::check_guc_millis;
use crate::node::{Ceilings, ConfigTemplate, RetryIntervals};
use crate::{DEFAULT_DBNAME, DEFAULT_START_TIMEOUT_SECS};

/// Configuration for a cluster run
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Database the coordinator manages and all statements target
    pub dbname: String,
    /// Parent of every node's data directory
    pub base_dir: PathBuf,
    /// How long a node may take to accept connections
    pub start_timeout: Duration,
    /// Workers the cluster is sized for; more are refused
    pub planned_workers: usize,
    /// Sleep between retries of a failing shardlord command
    pub cmd_retry_naptime: Duration,
    /// How often the shardlord polls nodes for progress
    pub poll_interval: Duration,
    /// Receive timeout on worker replication connections
    pub wal_receiver_timeout: Duration,
    /// Make partition replicas synchronous
    pub sync_replicas: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            dbname: DEFAULT_DBNAME.into(),
            base_dir: std::env::temp_dir().join("shardlord"),
            start_timeout: Duration::from_secs(DEFAULT_START_TIMEOUT_SECS),
            planned_workers: 3,
            cmd_retry_naptime: Duration::from_millis(500),
            poll_interval: Duration::from_millis(500),
            wal_receiver_timeout: Duration::from_secs(60),
            sync_replicas: false,
        }
    }
}

impl ClusterConfig {
    /// Defaults overlaid with `SHARDLORD_*` environment variables
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            dbname: env_str("SHARDLORD_DBNAME", &defaults.dbname),
            base_dir: std::env::var_os("SHARDLORD_BASE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.base_dir),
            start_timeout: Duration::from_secs(env_parse(
                "SHARDLORD_START_TIMEOUT_SECS",
                defaults.start_timeout.as_secs(),
            )),
            planned_workers: env_parse("SHARDLORD_WORKERS", defaults.planned_workers),
            cmd_retry_naptime: Duration::from_millis(env_parse(
                "SHARDLORD_CMD_RETRY_NAPTIME_MS",
                500,
            )),
            poll_interval: Duration::from_millis(env_parse("SHARDLORD_POLL_INTERVAL_MS", 500)),
            wal_receiver_timeout: Duration::from_secs(env_parse(
                "SHARDLORD_WAL_RECEIVER_TIMEOUT_SECS",
                defaults.wal_receiver_timeout.as_secs(),
            )),
            sync_replicas: env_bool("SHARDLORD_SYNC_REPLICAS", defaults.sync_replicas),
        }
    }

    /// Build the config template every node is rendered from
    ///
    /// Fails if a retry interval or the receive timeout is below one
    /// millisecond or too large for the server.
    pub fn template(&self) -> Result<ConfigTemplate> {
        let retry = RetryIntervals::new(self.cmd_retry_naptime, self.poll_interval)?;
        check_guc_millis("wal_receiver_timeout", self.wal_receiver_timeout)?;
        Ok(
            ConfigTemplate::new(&self.dbname, retry, Ceilings::for_workers(self.planned_workers))
                .with_wal_receiver_timeout(self.wal_receiver_timeout)
                .with_sync_replicas(self.sync_replicas),
        )
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::default();

        assert_eq!(config.dbname, "postgres");
        assert_eq!(config.planned_workers, 3);
        assert_eq!(config.cmd_retry_naptime, Duration::from_millis(500));
        assert!(config.base_dir.ends_with("shardlord"));
        assert!(config.template().is_ok());
    }

    #[test]
    fn test_env_override_applied() {
        std::env::set_var("SHARDLORD_WORKERS", "7");
        std::env::set_var("SHARDLORD_POLL_INTERVAL_MS", "not-a-number");
        let config = ClusterConfig::from_env();
        std::env::remove_var("SHARDLORD_WORKERS");
        std::env::remove_var("SHARDLORD_POLL_INTERVAL_MS");

        assert_eq!(config.planned_workers, 7);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = ClusterConfig {
            cmd_retry_naptime: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.template().is_err());
    }

    #[test]
    fn test_receiver_timeout_range_checked() {
        for timeout in [
            Duration::ZERO,
            Duration::from_micros(300),
            Duration::from_secs(3_000_000),
        ] {
            let config = ClusterConfig {
                wal_receiver_timeout: timeout,
                ..Default::default()
            };
            assert!(config.template().is_err(), "{:?} accepted", timeout);
        }

        let config = ClusterConfig {
            wal_receiver_timeout: Duration::from_millis(750),
            ..Default::default()
        };
        assert!(config.template().is_ok());
    }
}
