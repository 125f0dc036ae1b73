// controller-restore/src/cluster/restorer.rs
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{ControllerNode, Database, ReplicaSet, ReplicaSetMember};
use crate::errors::{RestoreError, Result};

/// Per-node outcome keyed by node IP. `Ok(())` means the call succeeded.
///
/// Nodes reporting the same IP share one entry, holding the first failure
/// if any of them failed.
pub type NodeResults = BTreeMap<String, anyhow::Result<()>>;

#[derive(Debug, Clone, Copy)]
enum AgentAction {
    Stop,
    Start,
}

/// One point-in-time view of the controller cluster.
///
/// The replica set is fetched once in [`Restorer::new`] and never refreshed;
/// a fresher view needs a new `Restorer`.
pub struct Restorer {
    database: Box<dyn Database>,
    replica_set: ReplicaSet,
    // Aligned with `replica_set.members`.
    nodes: Vec<Arc<dyn ControllerNode>>,
    primary: Option<usize>,
    self_member: Option<usize>,
    is_ha: bool,
}

impl Restorer {
    /// Snapshots the replica set and binds every member to its node.
    ///
    /// `converter` is called exactly once per member and must not perform
    /// network I/O; connectivity problems show up later through
    /// `ping`/`stop_agent`/`start_agent`.
    pub async fn new<F>(database: Box<dyn Database>, converter: F) -> Result<Self>
    where
        F: Fn(&ReplicaSetMember) -> Arc<dyn ControllerNode>,
    {
        let replica_set = database.replica_set().await.map_err(RestoreError::from)?;

        let mut primary = None;
        let mut self_member = None;
        let mut nodes = Vec::with_capacity(replica_set.members.len());
        for (index, member) in replica_set.members.iter().enumerate() {
            if member.is_primary() {
                primary = Some(index);
            }
            if member.self_ {
                self_member = Some(index);
            }
            nodes.push(converter(member));
        }
        debug!(
            members = replica_set.members.len(),
            "captured replica set snapshot"
        );

        Ok(Restorer {
            database,
            replica_set,
            nodes,
            primary,
            self_member,
            is_ha: false,
        })
    }

    pub fn replica_set(&self) -> &ReplicaSet {
        &self.replica_set
    }

    pub fn primary(&self) -> Option<&ReplicaSetMember> {
        self.primary.map(|index| &self.replica_set.members[index])
    }

    pub fn self_member(&self) -> Option<&ReplicaSetMember> {
        self.self_member.map(|index| &self.replica_set.members[index])
    }

    /// The database handle the snapshot came from. Closing it is the
    /// caller's job.
    pub fn database(&self) -> &dyn Database {
        self.database.as_ref()
    }

    /// Validates the snapshot. Does not go back to the database.
    pub fn check_database_state(&mut self) -> Result<()> {
        let unhealthy: Vec<ReplicaSetMember> = self
            .replica_set
            .members
            .iter()
            .filter(|member| member.is_problematic())
            .cloned()
            .collect();
        if !unhealthy.is_empty() {
            return Err(RestoreError::UnhealthyMembers(unhealthy));
        }

        let primary = self.primary.ok_or(RestoreError::NoPrimaryFound)?;
        if self.self_member.is_some_and(|index| index != primary) {
            return Err(RestoreError::NotRunningOnPrimary(
                self.replica_set.members[primary].clone(),
            ));
        }

        self.is_ha = self.replica_set.members.len() > 1;
        info!(
            primary = %self.replica_set.members[primary],
            ha = self.is_ha,
            "replica set is in a restorable state"
        );
        Ok(())
    }

    /// Whether the cluster has more than one member. Only meaningful after a
    /// successful [`Restorer::check_database_state`].
    pub fn is_ha(&self) -> bool {
        self.is_ha
    }

    /// Pings every node except the one we are running on.
    pub async fn check_secondary_controller_nodes(&self) -> NodeResults {
        let probes = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(index, _)| Some(*index) != self.self_member)
            .map(|(_, node)| async move {
                let ip = node.ip();
                let result = node.ping().await;
                match &result {
                    Ok(()) => debug!(%ip, "controller node reachable"),
                    Err(e) => warn!(%ip, error = %e, "controller node unreachable"),
                }
                (ip, result)
            });
        collect_results(join_all(probes).await)
    }

    /// Stops the agent on the local node, and on all other nodes when
    /// `include_secondaries` is set. Skipped nodes get no entry.
    pub async fn stop_agents(&self, include_secondaries: bool) -> NodeResults {
        self.manage_agents(AgentAction::Stop, include_secondaries).await
    }

    /// Starts the agent on the local node, and on all other nodes when
    /// `include_secondaries` is set. Skipped nodes get no entry.
    pub async fn start_agents(&self, include_secondaries: bool) -> NodeResults {
        self.manage_agents(AgentAction::Start, include_secondaries).await
    }

    async fn manage_agents(&self, action: AgentAction, include_secondaries: bool) -> NodeResults {
        let calls = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(index, _)| include_secondaries || self.is_local(*index))
            .map(|(_, node)| async move {
                let ip = node.ip();
                let result = match action {
                    AgentAction::Stop => node.stop_agent().await,
                    AgentAction::Start => node.start_agent().await,
                };
                match &result {
                    Ok(()) => info!(%ip, ?action, "agent action succeeded"),
                    Err(e) => warn!(%ip, ?action, error = %e, "agent action failed"),
                }
                (ip, result)
            });
        collect_results(join_all(calls).await)
    }

    // The self member when known, otherwise the primary.
    fn is_local(&self, index: usize) -> bool {
        match self.self_member {
            Some(self_index) => self_index == index,
            None => self.primary == Some(index),
        }
    }
}

fn collect_results(results: Vec<(String, anyhow::Result<()>)>) -> NodeResults {
    let mut collected = NodeResults::new();
    for (ip, result) in results {
        if let Some(existing) = collected.get(&ip) {
            warn!(%ip, "several controller nodes share this ip");
            if existing.is_err() {
                continue;
            }
        }
        collected.insert(ip, result);
    }
    collected
}
