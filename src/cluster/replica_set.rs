// controller-restore/src/cluster/replica_set.rs
use std::fmt;

pub const STATE_PRIMARY: &str = "PRIMARY";
pub const STATE_SECONDARY: &str = "SECONDARY";

/// One row of replica set membership as reported by the database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaSetMember {
    pub id: i32,
    /// Host, optionally with a port.
    pub name: String,
    /// `PRIMARY`, `SECONDARY`, or anything else for an abnormal state.
    pub state: String,
    pub healthy: bool,
    /// True for the member the tool is running on.
    pub self_: bool,
    /// Empty if the member could not be mapped back to a machine.
    pub juju_machine_id: String,
}

impl ReplicaSetMember {
    pub fn is_primary(&self) -> bool {
        self.state == STATE_PRIMARY
    }

    /// A member the restore must not act on: unhealthy, in a replication
    /// state we can't classify, or not tied to a machine.
    pub fn is_problematic(&self) -> bool {
        !self.healthy
            || (self.state != STATE_PRIMARY && self.state != STATE_SECONDARY)
            || self.juju_machine_id.is_empty()
    }
}

impl fmt::Display for ReplicaSetMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} (juju machine {})", self.id, self.name, self.juju_machine_id)
    }
}

/// Replica set topology in the database's reporting order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaSet {
    pub members: Vec<ReplicaSetMember>,
}
