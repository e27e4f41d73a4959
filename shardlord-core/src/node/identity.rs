//! Node identity
//!
//! Role, name, endpoint and data directory of a single engine instance.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Role a node plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// The shardlord: holds cluster metadata and issues partitioning commands
    Coordinator,
    /// Holds partition data, registered with the coordinator
    Worker,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Coordinator => write!(f, "coordinator"),
            NodeRole::Worker => write!(f, "worker"),
        }
    }
}

/// Identity of a node within one cluster run
///
/// Name, port and data directory are unique among the nodes of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Human-readable name, e.g. `"shardlord"`
    pub name: String,
    /// Listen port, also part of the connection string
    pub port: u16,
    /// Directory owned exclusively by this node
    pub data_directory: PathBuf,
}

impl NodeIdentity {
    /// Create a new identity
    pub fn new(name: impl Into<String>, port: u16, data_directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            port,
            data_directory: data_directory.into(),
        }
    }

    /// Identity whose data directory is `<base_dir>/<name>`
    pub fn under(base_dir: &Path, name: impl Into<String>, port: u16) -> Self {
        let name = name.into();
        let data_directory = base_dir.join(&name);
        Self::new(name, port, data_directory)
    }

    /// Connection string peers use to reach this node
    pub fn connection_string(&self, dbname: &str) -> ConnectionString {
        ConnectionString::new(dbname, self.port)
    }

    /// Engine data directory (`initdb` target)
    pub fn engine_dir(&self) -> PathBuf {
        self.data_directory.join("data")
    }

    /// Server log file
    pub fn log_file(&self) -> PathBuf {
        self.data_directory.join("logs").join("postgresql.log")
    }

    /// Returns true if the two identities cannot run side by side
    pub fn conflicts_with(&self, other: &NodeIdentity) -> bool {
        self.name == other.name
            || self.port == other.port
            || self.data_directory == other.data_directory
    }
}

/// libpq connection string for a node
///
/// Always derived from database name and port, never stored on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionString(String);

impl ConnectionString {
    /// Build the connection string for `dbname` on `port`
    pub fn new(dbname: &str, port: u16) -> Self {
        Self(format!("dbname={} port={}", dbname, port))
    }

    /// Borrow as str
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_format() {
        let identity = NodeIdentity::new("W1", 5433, "/tmp/w1");
        assert_eq!(identity.connection_string("postgres").as_str(), "dbname=postgres port=5433");
    }

    #[test]
    fn test_layout_under_base_dir() {
        let identity = NodeIdentity::under(Path::new("/var/tmp/cluster"), "Lord", 5432);

        assert_eq!(identity.data_directory, PathBuf::from("/var/tmp/cluster/Lord"));
        assert_eq!(identity.engine_dir(), PathBuf::from("/var/tmp/cluster/Lord/data"));
        assert_eq!(
            identity.log_file(),
            PathBuf::from("/var/tmp/cluster/Lord/logs/postgresql.log")
        );
    }

    #[test]
    fn test_conflicts() {
        let a = NodeIdentity::new("W1", 5433, "/tmp/a");

        assert!(a.conflicts_with(&NodeIdentity::new("W2", 5433, "/tmp/b")));
        assert!(a.conflicts_with(&NodeIdentity::new("W1", 5434, "/tmp/b")));
        assert!(a.conflicts_with(&NodeIdentity::new("W2", 5434, "/tmp/a")));
        assert!(!a.conflicts_with(&NodeIdentity::new("W2", 5434, "/tmp/b")));
    }
}
