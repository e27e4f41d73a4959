//! Cluster membership
//!
//! The coordinator and the workers registered with it, in registration
//! order. Only the orchestrator mutates this.

use serde::Serialize;

use crate::node::NodeIdentity;

/// Externally visible cluster membership
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterState {
    coordinator: Option<NodeIdentity>,
    workers: Vec<NodeIdentity>,
}

impl ClusterState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// The bootstrapped coordinator
    pub fn coordinator(&self) -> Option<&NodeIdentity> {
        self.coordinator.as_ref()
    }

    /// Registered workers, in registration order
    pub fn workers(&self) -> &[NodeIdentity] {
        &self.workers
    }

    /// Names of registered workers, in registration order
    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name.as_str()).collect()
    }

    /// Returns true if at least one worker is registered
    pub fn has_workers(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Look up a coordinator or worker by name
    pub fn find(&self, name: &str) -> Option<&NodeIdentity> {
        self.coordinator
            .iter()
            .chain(self.workers.iter())
            .find(|n| n.name == name)
    }

    pub(crate) fn set_coordinator(&mut self, identity: NodeIdentity) {
        self.coordinator = Some(identity);
    }

    pub(crate) fn push_worker(&mut self, identity: NodeIdentity) {
        self.workers.push(identity);
    }

    pub(crate) fn clear(&mut self) {
        self.coordinator = None;
        self.workers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_order_preserved() {
        let mut state = ClusterState::new();
        state.set_coordinator(NodeIdentity::new("Lord", 5432, "/tmp/lord"));
        state.push_worker(NodeIdentity::new("W2", 5434, "/tmp/w2"));
        state.push_worker(NodeIdentity::new("W1", 5433, "/tmp/w1"));

        assert_eq!(state.worker_names(), vec!["W2", "W1"]);
        assert_eq!(state.find("Lord").map(|n| n.port), Some(5432));
        assert_eq!(state.find("W1").map(|n| n.port), Some(5433));
        assert!(state.find("W3").is_none());
    }

    #[test]
    fn test_clear() {
        let mut state = ClusterState::new();
        state.set_coordinator(NodeIdentity::new("Lord", 5432, "/tmp/lord"));
        state.push_worker(NodeIdentity::new("W1", 5433, "/tmp/w1"));

        state.clear();

        assert!(state.coordinator().is_none());
        assert!(!state.has_workers());
    }
}
