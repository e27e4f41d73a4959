//! Cluster orchestrator
//!
//! Bootstraps the coordinator, onboards workers one at a time, dispatches
//! cluster-wide commands and tears everything down again.
//!
//! Every handle the orchestrator allocates stays owned by it (never by the
//! caller's future), so a teardown after an interrupt reaches nodes that
//! were only half set up.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::command::{self, HashPartitioning};
use super::config::ClusterConfig;
use super::state::ClusterState;
use crate::engine::Engine;
use crate::error::{Result, ShardlordError};
use crate::node::{
    ConfigTemplate, ConnectionString, NodeHandle, NodeIdentity, NodePhase, NodeRole,
};
use crate::SHARDING_EXTENSION;

/// Point-in-time view of one cluster member
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub name: String,
    pub role: NodeRole,
    pub port: u16,
    pub data_directory: PathBuf,
    pub log_file: PathBuf,
    pub connection_string: ConnectionString,
    pub phase: NodePhase,
}

/// Owns every node of one cluster run
pub struct ClusterOrchestrator<E: Engine> {
    engine: Arc<E>,
    config: ClusterConfig,
    template: ConfigTemplate,
    state: ClusterState,
    coordinator: Option<NodeHandle<E>>,
    /// Registered workers, same order as `state.workers`
    workers: Vec<NodeHandle<E>>,
    /// Worker between allocation and registration
    onboarding: Option<NodeHandle<E>>,
    /// Handles whose cleanup failed; retried by the next teardown
    stranded: Vec<NodeHandle<E>>,
}

impl<E: Engine> ClusterOrchestrator<E> {
    /// Create an orchestrator; no node is touched until bootstrap
    pub fn new(engine: Arc<E>, config: ClusterConfig) -> Result<Self> {
        let template = config.template()?;
        Ok(Self {
            engine,
            config,
            template,
            state: ClusterState::new(),
            coordinator: None,
            workers: Vec::new(),
            onboarding: None,
            stranded: Vec::new(),
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Current membership
    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Init, configure, start the coordinator and install the extension
    ///
    /// On failure the coordinator is cleaned up before the error returns.
    pub async fn bootstrap_coordinator(&mut self, name: &str, port: u16) -> Result<&NodeIdentity> {
        if self.coordinator.is_some() {
            return Err(ShardlordError::Precondition {
                reason: "coordinator already bootstrapped".into(),
            });
        }

        let identity = NodeIdentity::under(&self.config.base_dir, name, port);
        self.check_identity(&identity)?;

        info!(node = %name, port, "Bootstrapping coordinator");
        self.coordinator = Some(NodeHandle::new(
            identity,
            self.engine.clone(),
            self.config.start_timeout,
        ));

        if let Err(err) = self.bring_up_coordinator().await {
            error!(node = %name, error = %err, "Coordinator bootstrap failed");
            self.release_coordinator().await;
            return Err(err);
        }

        let identity = self
            .coordinator
            .as_ref()
            .map(|h| h.identity().clone())
            .ok_or_else(|| slot_missing("coordinator"))?;
        self.state.set_coordinator(identity);

        info!(node = %name, port, "Coordinator ready");
        self.state
            .coordinator()
            .ok_or_else(|| slot_missing("coordinator"))
    }

    async fn bring_up_coordinator(&mut self) -> Result<()> {
        let dbname = &self.config.dbname;
        let node = self
            .coordinator
            .as_mut()
            .ok_or_else(|| slot_missing("coordinator"))?;

        let own = node.connection_string(dbname);
        let text = self.template.render(NodeRole::Coordinator, node.identity(), &own);

        node.init().await?.append_config(&text).await?.start().await?;
        install_extension(node, dbname).await
    }

    /// Bring up a worker and register it with the coordinator
    ///
    /// The worker becomes visible in [`ClusterState`] only once registration
    /// succeeded. Any failure releases the worker and yields
    /// [`ShardlordError::AddWorker`]; the rest of the cluster stays usable.
    pub async fn add_worker(&mut self, name: &str, port: u16) -> Result<&NodeIdentity> {
        let coordinator_conn = match self.state.coordinator() {
            Some(coordinator) => coordinator.connection_string(&self.config.dbname),
            None => {
                return Err(ShardlordError::Precondition {
                    reason: "coordinator not bootstrapped".into(),
                })
            }
        };

        if self.state.workers().len() >= self.config.planned_workers {
            return Err(ShardlordError::Precondition {
                reason: format!(
                    "cluster is sized for {} workers; raise planned_workers to add {}",
                    self.config.planned_workers, name
                ),
            });
        }

        if let Some(stale) = self.onboarding.as_ref() {
            warn!(node = %stale.name(), "Releasing worker left over from an abandoned onboarding");
            self.release_onboarding().await;
        }

        let identity = NodeIdentity::under(&self.config.base_dir, name, port);
        if let Err(err) = self.check_identity(&identity) {
            return Err(ShardlordError::AddWorker {
                worker: name.to_string(),
                source: Box::new(err),
            });
        }

        info!(node = %name, port, "Adding worker");
        self.onboarding = Some(NodeHandle::new(
            identity,
            self.engine.clone(),
            self.config.start_timeout,
        ));

        if let Err(err) = self.onboard_worker(&coordinator_conn).await {
            warn!(node = %name, error = %err, "Worker onboarding failed; releasing it");
            self.release_onboarding().await;
            return Err(ShardlordError::AddWorker {
                worker: name.to_string(),
                source: Box::new(err),
            });
        }

        let handle = self
            .onboarding
            .take()
            .ok_or_else(|| slot_missing("onboarding"))?;
        self.state.push_worker(handle.identity().clone());
        self.workers.push(handle);

        info!(node = %name, workers = self.workers.len(), "Worker registered");
        self.state
            .workers()
            .last()
            .ok_or_else(|| slot_missing("workers"))
    }

    async fn onboard_worker(&mut self, coordinator_conn: &ConnectionString) -> Result<()> {
        let dbname = &self.config.dbname;
        let worker = self
            .onboarding
            .as_mut()
            .ok_or_else(|| slot_missing("onboarding"))?;
        let coordinator = self
            .coordinator
            .as_ref()
            .ok_or_else(|| slot_missing("coordinator"))?;

        let text = self
            .template
            .render(NodeRole::Worker, worker.identity(), coordinator_conn);

        worker.init().await?.append_config(&text).await?.start().await?;
        install_extension(worker, dbname).await?;

        let registration = command::register_node(&worker.connection_string(dbname));
        coordinator.run_sql(dbname, &registration).await?;
        Ok(())
    }

    /// Hash-partition a table across the registered workers
    pub async fn partition_table(&self, partitioning: &HashPartitioning) -> Result<String> {
        info!(
            table = %partitioning.table,
            partitions = partitioning.partitions,
            replication_factor = partitioning.replication_factor,
            "Partitioning table"
        );
        self.execute_on_coordinator(&partitioning.statement()).await
    }

    /// Dispatch a cluster-wide statement to the coordinator
    ///
    /// Requires at least one registered worker.
    pub async fn execute_on_coordinator(&self, statement: &str) -> Result<String> {
        if !self.state.has_workers() {
            return Err(ShardlordError::Precondition {
                reason: "no workers registered with the coordinator".into(),
            });
        }

        let coordinator = self
            .coordinator
            .as_ref()
            .ok_or_else(|| slot_missing("coordinator"))?;
        coordinator.run_sql(&self.config.dbname, statement).await
    }

    /// Run a statement on one cluster member, by name
    pub async fn run_on_node(&self, name: &str, statement: &str) -> Result<String> {
        let node = self.members().find(|h| h.name() == name).ok_or_else(|| {
            ShardlordError::Precondition {
                reason: format!("no node named {} in the cluster", name),
            }
        })?;
        node.run_sql(&self.config.dbname, statement).await
    }

    /// Coordinator and registered workers, in registration order
    pub fn nodes(&self) -> Vec<NodeSummary> {
        let dbname = &self.config.dbname;
        self.members()
            .map(|h| NodeSummary {
                name: h.name().to_string(),
                role: if self.state.workers().iter().any(|w| w.name == h.name()) {
                    NodeRole::Worker
                } else {
                    NodeRole::Coordinator
                },
                port: h.port(),
                data_directory: h.identity().data_directory.clone(),
                log_file: h.log_file(),
                connection_string: h.connection_string(dbname),
                phase: h.phase(),
            })
            .collect()
    }

    /// Clean up every node, workers first and the coordinator last
    ///
    /// Best effort: every node is attempted and all failures are reported
    /// together. Nodes that could not be cleaned are retried by the next
    /// call; with nothing left to clean this is a no-op.
    pub async fn teardown(&mut self) -> Result<()> {
        let mut handles: Vec<NodeHandle<E>> = self.stranded.drain(..).collect();
        handles.extend(self.onboarding.take());
        handles.extend(self.workers.drain(..));
        handles.extend(self.coordinator.take());
        self.state.clear();

        if handles.is_empty() {
            debug!("Nothing to tear down");
            return Ok(());
        }

        info!(nodes = handles.len(), "Tearing down cluster");
        let mut failures = Vec::new();
        for mut handle in handles {
            if let Err(err) = handle.cleanup().await {
                error!(node = %handle.name(), error = %err, "Node cleanup failed");
                failures.push(err);
                self.stranded.push(handle);
            }
        }

        if failures.is_empty() {
            info!("Teardown complete");
            Ok(())
        } else {
            Err(ShardlordError::Teardown { failures })
        }
    }

    /// Visible members: bootstrapped coordinator and registered workers
    fn members(&self) -> impl Iterator<Item = &NodeHandle<E>> + '_ {
        self.coordinator
            .iter()
            .filter(move |_| self.state.coordinator().is_some())
            .chain(self.workers.iter())
    }

    /// Every handle not yet handed back
    fn allocated(&self) -> impl Iterator<Item = &NodeHandle<E>> + '_ {
        self.coordinator
            .iter()
            .chain(self.workers.iter())
            .chain(self.onboarding.iter())
            .chain(self.stranded.iter())
    }

    fn check_identity(&self, identity: &NodeIdentity) -> Result<()> {
        let clash = self
            .allocated()
            .filter(|h| h.phase() != NodePhase::CleanedUp)
            .find(|h| h.identity().conflicts_with(identity));

        match clash {
            Some(existing) => Err(ShardlordError::Init {
                node: identity.name.clone(),
                reason: format!(
                    "conflicts with node {} (port {}, directory {})",
                    existing.name(),
                    existing.port(),
                    existing.identity().data_directory.display()
                ),
            }),
            None => Ok(()),
        }
    }

    // Cleanup runs while the handle is still in its slot, so a run
    // interrupted mid-release leaves it where teardown will find it.

    async fn release_coordinator(&mut self) {
        let Some(handle) = self.coordinator.as_mut() else {
            return;
        };
        let outcome = handle.cleanup().await;
        if let Some(handle) = self.coordinator.take() {
            self.settle(handle, outcome);
        }
    }

    async fn release_onboarding(&mut self) {
        let Some(handle) = self.onboarding.as_mut() else {
            return;
        };
        let outcome = handle.cleanup().await;
        if let Some(handle) = self.onboarding.take() {
            self.settle(handle, outcome);
        }
    }

    fn settle(&mut self, handle: NodeHandle<E>, outcome: Result<()>) {
        if let Err(err) = outcome {
            error!(node = %handle.name(), error = %err, "Release failed; node kept for teardown");
            self.stranded.push(handle);
        }
    }
}

impl<E: Engine> Drop for ClusterOrchestrator<E> {
    fn drop(&mut self) {
        let live = self
            .allocated()
            .filter(|h| h.phase() != NodePhase::CleanedUp)
            .count();
        if live > 0 {
            warn!(live, "Cluster orchestrator dropped without teardown");
        }
    }
}

async fn install_extension<E: Engine>(node: &NodeHandle<E>, dbname: &str) -> Result<()> {
    node.run_sql(dbname, &command::install_sharding())
        .await
        .map_err(|err| match err {
            ShardlordError::Query { node, message, .. } => ShardlordError::Install {
                node,
                extension: SHARDING_EXTENSION.into(),
                message,
            },
            other => other,
        })?;
    debug!(node = %node.name(), "Sharding extension installed");
    Ok(())
}

fn slot_missing(slot: &str) -> ShardlordError {
    ShardlordError::Internal {
        message: format!("{} slot unexpectedly empty", slot),
    }
}
