// controller-restore/src/cluster/mod.rs
//! Decision core of the restore: snapshot the replica set, decide whether it
//! is safe to restore, and drive agents across the controller nodes.
pub(crate) mod replica_set;
pub(crate) mod restorer;

use anyhow::Result;
use async_trait::async_trait;

pub use replica_set::{ReplicaSet, ReplicaSetMember};
pub use restorer::{NodeResults, Restorer};

/// Source of replica set topology.
#[async_trait]
pub trait Database: Send + Sync {
    /// Returns the current replica set as the database sees it.
    async fn replica_set(&self) -> Result<ReplicaSet>;

    /// Releases the underlying connection. Called by whoever owns the handle.
    async fn close(&self);
}

/// Remote control handle for one controller machine.
#[async_trait]
pub trait ControllerNode: Send + Sync {
    /// Network identifier, used as the key in every result map.
    fn ip(&self) -> String;

    async fn ping(&self) -> Result<()>;

    async fn stop_agent(&self) -> Result<()>;

    async fn start_agent(&self) -> Result<()>;
}
