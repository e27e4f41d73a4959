//! Cluster orchestration
//!
//! Bootstrap, membership, commands and teardown for a coordinator and its
//! workers.

pub mod command;
pub mod config;
pub mod orchestrator;
pub mod scope;
pub mod state;

pub use command::HashPartitioning;
pub use config::ClusterConfig;
pub use orchestrator::{ClusterOrchestrator, NodeSummary};
pub use scope::ScopeExit;
pub use state::ClusterState;
