//! Error types for shardlord
//!
//! Taxonomy covering node lifecycle, cluster orchestration and
//! configuration errors.

use std::time::Duration;
use thiserror::Error;

/// Primary error type for all shardlord operations
#[derive(Debug, Error)]
pub enum ShardlordError {
    // ========== Node Lifecycle Errors ==========

    /// Data directory or port conflict while initializing a node
    #[error("Failed to initialize node {node}: {reason}")]
    Init { node: String, reason: String },

    /// Node did not accept connections before the startup timeout
    #[error("Node {node} did not become ready within {timeout:?}")]
    Start { node: String, timeout: Duration },

    /// Node process exited while starting
    #[error("Node {node} crashed during startup ({status}): {log_tail}")]
    Crash {
        node: String,
        status: String,
        log_tail: String,
    },

    /// Statement execution failed
    #[error("Query on node {node} failed: {message} (statement: {statement})")]
    Query {
        node: String,
        statement: String,
        message: String,
    },

    /// Extension could not be installed
    #[error("Cannot install extension {extension} on node {node}: {message}")]
    Install {
        node: String,
        extension: String,
        message: String,
    },

    /// Process or data directory could not be released
    #[error("Cleanup of node {node} blocked: {reason}")]
    Cleanup { node: String, reason: String },

    // ========== Cluster Errors ==========

    /// Worker onboarding failed; the worker was released and is not a member
    #[error("Failed to add worker {worker}: {source}")]
    AddWorker {
        worker: String,
        #[source]
        source: Box<ShardlordError>,
    },

    /// Operation issued in the wrong cluster state
    #[error("Precondition failed: {reason}")]
    Precondition { reason: String },

    /// One or more nodes could not be cleaned up
    #[error("Teardown left {} node(s) behind: {}", .failures.len(), summarize(.failures))]
    Teardown { failures: Vec<ShardlordError> },

    // ========== Configuration / Runtime Errors ==========

    /// Invalid configuration value
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// I/O error outside of a specific node operation
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShardlordError {
    /// Returns true if this error aborts the whole run
    ///
    /// Worker onboarding failures and rejected commands leave the cluster
    /// usable and are not fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShardlordError::Install { .. }
                | ShardlordError::Internal { .. }
                | ShardlordError::InvalidConfig { .. }
        )
    }

    /// Name of the node this error concerns, if any
    pub fn node(&self) -> Option<&str> {
        match self {
            ShardlordError::Init { node, .. }
            | ShardlordError::Start { node, .. }
            | ShardlordError::Crash { node, .. }
            | ShardlordError::Query { node, .. }
            | ShardlordError::Install { node, .. }
            | ShardlordError::Cleanup { node, .. } => Some(node),
            ShardlordError::AddWorker { worker, .. } => Some(worker),
            _ => None,
        }
    }
}

fn summarize(failures: &[ShardlordError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for shardlord operations
pub type Result<T> = std::result::Result<T, ShardlordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_worker_reports_node_and_source() {
        let err = ShardlordError::AddWorker {
            worker: "W2".into(),
            source: Box::new(ShardlordError::Init {
                node: "W2".into(),
                reason: "port 5433 already in use".into(),
            }),
        };

        assert_eq!(err.node(), Some("W2"));
        assert!(err.to_string().contains("port 5433 already in use"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_teardown_lists_every_failure() {
        let err = ShardlordError::Teardown {
            failures: vec![
                ShardlordError::Cleanup { node: "W1".into(), reason: "busy".into() },
                ShardlordError::Cleanup { node: "W2".into(), reason: "locked".into() },
            ],
        };

        let text = err.to_string();
        assert!(text.starts_with("Teardown left 2 node(s) behind"));
        assert!(text.contains("W1") && text.contains("W2"));
    }
}
