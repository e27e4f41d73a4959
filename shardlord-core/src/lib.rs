//! Shardlord Core - bootstrap and lifecycle for local sharded Postgres clusters
//!
//! This crate brings up a coordinator (the "shardlord") and a set of worker
//! nodes, each a separate Postgres instance with the sharding extension
//! installed:
//! - Node data directories, configuration and processes
//! - Coordinator bootstrap and sequential worker onboarding
//! - Cluster-wide commands such as hash partitioning
//! - Teardown of every node, also after an interrupt

pub mod cluster;
pub mod engine;
pub mod error;
pub mod node;
pub mod runtime;

pub use cluster::{ClusterConfig, ClusterOrchestrator, ClusterState, HashPartitioning, ScopeExit};
pub use error::ShardlordError;
pub use runtime::ShutdownSignal;

/// Database every node serves and every statement targets by default
pub const DEFAULT_DBNAME: &str = "postgres";

/// Extension that turns a set of nodes into a sharded cluster
pub const SHARDING_EXTENSION: &str = "pg_shardman";

/// Partitioning extension the sharding extension builds on
pub const PARTITIONING_EXTENSION: &str = "pg_pathman";

/// Default time a node may take to accept connections
pub const DEFAULT_START_TIMEOUT_SECS: u64 = 60;
