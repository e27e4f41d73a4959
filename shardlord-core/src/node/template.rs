//! Configuration templates
//!
//! Renders the `postgresql.conf` block appended to every node. Shared
//! settings must match on all nodes or replication and the shardlord
//! command-retry loop will not agree across the cluster.

use std::time::Duration;

use super::identity::{ConnectionString, NodeIdentity, NodeRole};
use crate::error::{Result, ShardlordError};
use crate::{PARTITIONING_EXTENSION, SHARDING_EXTENSION};

/// Connections kept free beyond the WAL senders; covers the server's
/// default `superuser_reserved_connections` of 3
const SENDER_HEADROOM: u32 = 10;

/// A single `key = value` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub key: &'static str,
    pub value: String,
}

impl Setting {
    fn new(key: &'static str, value: impl ToString) -> Self {
        Self {
            key,
            value: value.to_string(),
        }
    }
}

/// Retry and poll intervals of the shardlord command loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryIntervals {
    cmd_retry_naptime: Duration,
    poll_interval: Duration,
}

impl RetryIntervals {
    /// Both intervals are required and must be whole, positive milliseconds
    /// the server accepts
    pub fn new(cmd_retry_naptime: Duration, poll_interval: Duration) -> Result<Self> {
        check_guc_millis("cmd_retry_naptime", cmd_retry_naptime)?;
        check_guc_millis("poll_interval", poll_interval)?;
        Ok(Self {
            cmd_retry_naptime,
            poll_interval,
        })
    }

    pub fn cmd_retry_naptime(&self) -> Duration {
        self.cmd_retry_naptime
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Connection, replication and worker-process limits
///
/// Derived from the number of nodes the cluster is planned for. Every node
/// may end up replicating to every other one, so slot and sender counts
/// grow with the square of the node count. The floors are the values a
/// three-worker cluster has always been run with.
///
/// The server refuses to start unless `max_wal_senders` plus the reserved
/// superuser connections stays below `max_connections`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ceilings {
    pub max_connections: u32,
    pub max_replication_slots: u32,
    pub max_wal_senders: u32,
    pub max_logical_replication_workers: u32,
    pub max_worker_processes: u32,
}

impl Ceilings {
    /// Limits for a cluster of one coordinator and `workers` workers
    pub fn for_workers(workers: usize) -> Self {
        let nodes = u32::try_from(workers).unwrap_or(u32::MAX).saturating_add(1);
        let pairs = nodes.saturating_mul(nodes);

        let max_logical_replication_workers = pairs.max(50);
        let max_wal_senders = pairs.saturating_add(10).max(50);

        Self {
            max_connections: nodes
                .saturating_mul(20)
                .max(max_wal_senders.saturating_add(SENDER_HEADROOM))
                .max(200),
            max_replication_slots: pairs.saturating_mul(2).max(100),
            max_wal_senders,
            max_logical_replication_workers,
            max_worker_processes: max_logical_replication_workers.saturating_add(10),
        }
    }
}

/// Renders per-role configuration for cluster nodes
#[derive(Debug, Clone)]
pub struct ConfigTemplate {
    dbname: String,
    retry: RetryIntervals,
    ceilings: Ceilings,
    wal_receiver_timeout: Duration,
    sync_replicas: bool,
}

impl ConfigTemplate {
    /// Create a template for a cluster managing `dbname`
    pub fn new(dbname: impl Into<String>, retry: RetryIntervals, ceilings: Ceilings) -> Self {
        Self {
            dbname: dbname.into(),
            retry,
            ceilings,
            wal_receiver_timeout: Duration::from_secs(60),
            sync_replicas: false,
        }
    }

    /// Receive timeout for worker replication connections
    pub fn with_wal_receiver_timeout(mut self, timeout: Duration) -> Self {
        self.wal_receiver_timeout = timeout;
        self
    }

    /// Make partition replicas synchronous
    pub fn with_sync_replicas(mut self, sync_replicas: bool) -> Self {
        self.sync_replicas = sync_replicas;
        self
    }

    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    pub fn ceilings(&self) -> &Ceilings {
        &self.ceilings
    }

    /// Every setting for a node, in render order
    pub fn settings(
        &self,
        role: NodeRole,
        identity: &NodeIdentity,
        coordinator: &ConnectionString,
    ) -> Vec<Setting> {
        let mut settings = vec![
            Setting::new("port", identity.port),
            Setting::new("listen_addresses", "'localhost'"),
        ];

        match role {
            NodeRole::Coordinator => {
                settings.push(Setting::new("shardman.shardlord", "on"));
                settings.push(Setting::new("shardman.shardlord_dbname", &self.dbname));
                settings.push(Setting::new(
                    "shardman.shardlord_connstring",
                    format!("'{}'", coordinator),
                ));
                settings.push(Setting::new(
                    "shardman.cmd_retry_naptime",
                    self.retry.cmd_retry_naptime.as_millis(),
                ));
                settings.push(Setting::new(
                    "shardman.poll_interval",
                    self.retry.poll_interval.as_millis(),
                ));
            }
            NodeRole::Worker => {
                settings.push(Setting::new(
                    "max_logical_replication_workers",
                    self.ceilings.max_logical_replication_workers,
                ));
                settings.push(Setting::new(
                    "max_worker_processes",
                    self.ceilings.max_worker_processes,
                ));
                settings.push(Setting::new(
                    "wal_receiver_timeout",
                    guc_duration(self.wal_receiver_timeout),
                ));
            }
        }

        settings.extend(self.shared_settings());
        settings
    }

    /// Render the configuration block for a node
    ///
    /// `coordinator` is the coordinator's connection string; for the
    /// coordinator itself that is its own.
    pub fn render(
        &self,
        role: NodeRole,
        identity: &NodeIdentity,
        coordinator: &ConnectionString,
    ) -> String {
        let mut text = match role {
            NodeRole::Coordinator => format!("# shardlord: coordinator node '{}'\n", identity.name),
            NodeRole::Worker => format!(
                "# shardlord: worker node '{}' (coordinator: {})\n",
                identity.name, coordinator
            ),
        };

        for setting in self.settings(role, identity, coordinator) {
            text.push_str(setting.key);
            text.push_str(" = ");
            text.push_str(&setting.value);
            text.push('\n');
        }

        text
    }

    fn shared_settings(&self) -> Vec<Setting> {
        vec![
            Setting::new(
                "shared_preload_libraries",
                format!("'{}, {}'", PARTITIONING_EXTENSION, SHARDING_EXTENSION),
            ),
            Setting::new("log_min_messages", "DEBUG1"),
            Setting::new("client_min_messages", "NOTICE"),
            Setting::new("log_line_prefix", "'%m %z'"),
            Setting::new("log_replication_commands", "on"),
            Setting::new("synchronous_commit", "on"),
            Setting::new("wal_level", "logical"),
            Setting::new("max_replication_slots", self.ceilings.max_replication_slots),
            Setting::new("max_wal_senders", self.ceilings.max_wal_senders),
            Setting::new("max_connections", self.ceilings.max_connections),
            Setting::new("shardman.sync_replicas", on_off(self.sync_replicas)),
        ]
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

/// Reject durations a millisecond-valued integer GUC cannot hold
///
/// The server stores these as `int` milliseconds, so anything below one
/// millisecond renders as 0 and anything above `i32::MAX` is refused.
pub(crate) fn check_guc_millis(name: &str, duration: Duration) -> Result<()> {
    let millis = duration.as_millis();
    if millis == 0 || millis > i32::MAX as u128 {
        return Err(ShardlordError::InvalidConfig {
            reason: format!(
                "{} must be between 1ms and {}ms, got {:?}",
                name,
                i32::MAX,
                duration
            ),
        });
    }
    Ok(())
}

/// Format a duration the way the server parses time GUCs
fn guc_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn template(workers: usize) -> ConfigTemplate {
        let retry =
            RetryIntervals::new(Duration::from_millis(500), Duration::from_millis(500)).unwrap();
        ConfigTemplate::new("postgres", retry, Ceilings::for_workers(workers))
    }

    fn parse(text: &str) -> HashMap<String, Vec<String>> {
        let mut keys: HashMap<String, Vec<String>> = HashMap::new();
        for line in text.lines().filter(|l| !l.starts_with('#')) {
            let (key, value) = line.split_once(" = ").expect("key = value");
            keys.entry(key.to_string()).or_default().push(value.to_string());
        }
        keys
    }

    #[test]
    fn test_coordinator_block() {
        let lord = NodeIdentity::new("Lord", 5432, "/tmp/lord");
        let conn = lord.connection_string("postgres");
        let keys = parse(&template(3).render(NodeRole::Coordinator, &lord, &conn));

        assert_eq!(keys["shardman.shardlord"], vec!["on"]);
        assert_eq!(keys["shardman.shardlord_dbname"], vec!["postgres"]);
        assert_eq!(
            keys["shardman.shardlord_connstring"],
            vec!["'dbname=postgres port=5432'"]
        );
        assert_eq!(keys["shardman.cmd_retry_naptime"], vec!["500"]);
        assert_eq!(keys["shardman.poll_interval"], vec!["500"]);
        assert_eq!(keys["port"], vec!["5432"]);
        assert!(!keys.contains_key("wal_receiver_timeout"));
        assert!(!keys.contains_key("max_worker_processes"));
    }

    #[test]
    fn test_worker_block() {
        let lord = NodeIdentity::new("Lord", 5432, "/tmp/lord");
        let worker = NodeIdentity::new("W1", 5433, "/tmp/w1");
        let text = template(3).render(
            NodeRole::Worker,
            &worker,
            &lord.connection_string("postgres"),
        );
        let keys = parse(&text);

        assert_eq!(keys["max_logical_replication_workers"], vec!["50"]);
        assert_eq!(keys["max_worker_processes"], vec!["60"]);
        assert_eq!(keys["wal_receiver_timeout"], vec!["60s"]);
        assert_eq!(keys["port"], vec!["5433"]);
        assert!(!keys.contains_key("shardman.shardlord"));
        assert!(text.starts_with(
            "# shardlord: worker node 'W1' (coordinator: dbname=postgres port=5432)"
        ));
    }

    #[test]
    fn test_every_key_exactly_once() {
        let lord = NodeIdentity::new("Lord", 5432, "/tmp/lord");
        let conn = lord.connection_string("postgres");
        let template = template(3);

        for role in [NodeRole::Coordinator, NodeRole::Worker] {
            let keys = parse(&template.render(role, &lord, &conn));
            for (key, values) in &keys {
                assert_eq!(
                    values.len(),
                    1,
                    "{} rendered {} times for {}",
                    key,
                    values.len(),
                    role
                );
            }
            for shared in [
                "shared_preload_libraries",
                "log_min_messages",
                "client_min_messages",
                "log_line_prefix",
                "log_replication_commands",
                "synchronous_commit",
                "wal_level",
                "max_replication_slots",
                "max_wal_senders",
                "max_connections",
                "shardman.sync_replicas",
            ] {
                assert!(keys.contains_key(shared), "{} missing for {}", shared, role);
            }
            assert_eq!(keys["shared_preload_libraries"], vec!["'pg_pathman, pg_shardman'"]);
            assert_eq!(keys["wal_level"], vec!["logical"]);
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let worker = NodeIdentity::new("W1", 5433, "/tmp/w1");
        let conn = ConnectionString::new("postgres", 5432);
        let template = template(3);

        assert_eq!(
            template.render(NodeRole::Worker, &worker, &conn),
            template.render(NodeRole::Worker, &worker, &conn)
        );
    }

    #[test]
    fn test_ceiling_floors() {
        let ceilings = Ceilings::for_workers(3);

        assert_eq!(ceilings.max_connections, 200);
        assert_eq!(ceilings.max_replication_slots, 100);
        assert_eq!(ceilings.max_wal_senders, 50);
        assert_eq!(ceilings.max_logical_replication_workers, 50);
        assert_eq!(ceilings.max_worker_processes, 60);
    }

    #[test]
    fn test_ceilings_grow_with_workers() {
        let ceilings = Ceilings::for_workers(15);

        // 16 nodes
        assert_eq!(ceilings.max_connections, 320);
        assert_eq!(ceilings.max_replication_slots, 512);
        assert_eq!(ceilings.max_wal_senders, 266);
        assert_eq!(ceilings.max_logical_replication_workers, 256);
        assert_eq!(ceilings.max_worker_processes, 266);
        assert!(ceilings.max_connections as usize > 15 + 1);
    }

    #[test]
    fn test_senders_fit_under_connections() {
        for workers in [0, 3, 15, 18, 19, 30, 100, 1000] {
            let ceilings = Ceilings::for_workers(workers);
            assert!(
                ceilings.max_wal_senders + 3 < ceilings.max_connections,
                "{} workers: {} senders vs {} connections",
                workers,
                ceilings.max_wal_senders,
                ceilings.max_connections
            );
        }

        let ceilings = Ceilings::for_workers(19);
        assert_eq!(ceilings.max_wal_senders, 410);
        assert_eq!(ceilings.max_connections, 420);
    }

    #[test]
    fn test_retry_intervals_must_be_positive() {
        assert!(RetryIntervals::new(Duration::ZERO, Duration::from_millis(500)).is_err());
        assert!(RetryIntervals::new(Duration::from_millis(500), Duration::ZERO).is_err());
        assert!(RetryIntervals::new(Duration::from_millis(1), Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_retry_intervals_must_fit_the_server() {
        let sub_millisecond = Duration::from_micros(500);
        let too_long = Duration::from_secs(3_000_000);

        assert!(RetryIntervals::new(sub_millisecond, Duration::from_millis(500)).is_err());
        assert!(RetryIntervals::new(Duration::from_millis(500), too_long).is_err());
        assert!(RetryIntervals::new(
            Duration::from_millis(i32::MAX as u64),
            Duration::from_millis(500)
        )
        .is_ok());
    }

    #[test]
    fn test_guc_duration() {
        assert_eq!(guc_duration(Duration::from_secs(60)), "60s");
        assert_eq!(guc_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(guc_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(guc_duration(Duration::from_micros(2_000_400)), "2s");
    }
}
