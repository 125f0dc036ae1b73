use thiserror::Error;

use crate::cluster::ReplicaSetMember;

/// Verdicts produced while building and validating a `Restorer`.
#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("getting replica set status: {0}")]
    DataSource(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("unhealthy replica set members: {}", join_members(.0))]
    UnhealthyMembers(Vec<ReplicaSetMember>),

    #[error("no primary found in replica set")]
    NoPrimaryFound,

    #[error("not running on primary replica set member, primary is {0}")]
    NotRunningOnPrimary(ReplicaSetMember),
}

impl RestoreError {
    pub fn is_unhealthy_members(&self) -> bool {
        matches!(self, RestoreError::UnhealthyMembers(_))
    }

    /// Members reported as unhealthy, empty for every other variant.
    pub fn unhealthy_members(&self) -> &[ReplicaSetMember] {
        match self {
            RestoreError::UnhealthyMembers(members) => members,
            _ => &[],
        }
    }
}

impl From<anyhow::Error> for RestoreError {
    fn from(err: anyhow::Error) -> Self {
        RestoreError::DataSource(err.into())
    }
}

/// Reports whether `err` carries a `RestoreError::UnhealthyMembers`.
pub fn is_unhealthy_members_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<RestoreError>()
        .is_some_and(RestoreError::is_unhealthy_members)
}

fn join_members(members: &[ReplicaSetMember]) -> String {
    members
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, RestoreError>;
