//! Cluster command statements
//!
//! SQL issued against the sharding extension. The orchestrator treats the
//! results as opaque.

use serde::{Deserialize, Serialize};

use crate::node::ConnectionString;
use crate::SHARDING_EXTENSION;

/// Installs an extension together with the extensions it depends on
pub fn create_extension(extension: &str) -> String {
    format!("create extension {} cascade", extension)
}

/// Installs the sharding extension
pub fn install_sharding() -> String {
    create_extension(SHARDING_EXTENSION)
}

/// Registers a worker with the coordinator
pub fn register_node(worker: &ConnectionString) -> String {
    format!("select shardman.add_node({})", quote_literal(worker.as_str()))
}

/// Hash-partition a table across the registered workers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashPartitioning {
    /// Copies of every partition
    pub replication_factor: u32,
    /// Table to partition
    pub table: String,
    /// Column hashed to pick a partition
    pub key: String,
    /// Number of partitions
    pub partitions: u32,
    /// Partition right away instead of on the next command cycle
    pub immediate: bool,
}

impl HashPartitioning {
    /// Create a partitioning command
    pub fn new(table: impl Into<String>, key: impl Into<String>, partitions: u32) -> Self {
        Self {
            replication_factor: 1,
            table: table.into(),
            key: key.into(),
            partitions,
            immediate: true,
        }
    }

    pub fn with_replication_factor(mut self, replication_factor: u32) -> Self {
        self.replication_factor = replication_factor;
        self
    }

    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    /// Statement to run on the coordinator
    pub fn statement(&self) -> String {
        format!(
            "select shardman.create_hash_partitions({}, {}, {}, {}, {})",
            self.replication_factor,
            quote_literal(&self.table),
            quote_literal(&self.key),
            self.partitions,
            self.immediate
        )
    }
}

/// Quote a string as an SQL literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_statement() {
        assert_eq!(install_sharding(), "create extension pg_shardman cascade");
    }

    #[test]
    fn test_register_statement() {
        let conn = ConnectionString::new("postgres", 5433);
        assert_eq!(
            register_node(&conn),
            "select shardman.add_node('dbname=postgres port=5433')"
        );
    }

    #[test]
    fn test_partition_statement() {
        let cmd = HashPartitioning::new("pt", "id", 4).with_replication_factor(2);
        assert_eq!(
            cmd.statement(),
            "select shardman.create_hash_partitions(2, 'pt', 'id', 4, true)"
        );
    }

    #[test]
    fn test_literals_are_escaped() {
        assert_eq!(quote_literal("o'neil"), "'o''neil'");
        let cmd = HashPartitioning::new("x'); drop table y; --", "id", 2).with_immediate(false);
        assert!(cmd.statement().contains("'x''); drop table y; --'"));
        assert!(cmd.statement().ends_with("2, false)"));
    }
}
