// controller-restore/src/machine/mod.rs
//! Controller nodes driven over SSH, or directly for the node we run on.
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::SshConfig;
use crate::cluster::{ControllerNode, ReplicaSetMember};
use crate::utils::run_command;

#[derive(Debug, Clone)]
enum Transport {
    Local,
    Ssh(SshConfig),
}

/// A controller machine hosting one replica set member.
#[derive(Debug, Clone)]
pub struct SshControllerNode {
    ip: String,
    machine_id: String,
    transport: Transport,
    timeout: Duration,
}

/// Returns the converter binding replica set members to controller nodes.
///
/// The member we are running on gets a local node; all others are reached
/// over SSH.
pub fn controller_node_converter(
    ssh: SshConfig,
    timeout: Duration,
) -> impl Fn(&ReplicaSetMember) -> Arc<dyn ControllerNode> {
    move |member: &ReplicaSetMember| {
        let transport = if member.self_ {
            Transport::Local
        } else {
            Transport::Ssh(ssh.clone())
        };
        Arc::new(SshControllerNode {
            ip: host_from_member_name(&member.name).to_string(),
            machine_id: member.juju_machine_id.clone(),
            transport,
            timeout,
        }) as Arc<dyn ControllerNode>
    }
}

/// Strips a trailing `:port`, keeping bracketed IPv6 hosts intact.
pub fn host_from_member_name(name: &str) -> &str {
    if let Some(rest) = name.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    match name.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => name,
    }
}

impl SshControllerNode {
    fn agent_service(&self) -> String {
        format!("jujud-machine-{}", self.machine_id)
    }

    fn command(&self, remote_args: &[&str]) -> Command {
        match &self.transport {
            Transport::Local => {
                let mut command = Command::new(remote_args[0]);
                command.args(&remote_args[1..]);
                command
            }
            Transport::Ssh(ssh) => {
                let mut command = Command::new("ssh");
                command
                    .arg("-o")
                    .arg("BatchMode=yes")
                    .arg("-o")
                    .arg(format!("ConnectTimeout={}", ssh.connect_timeout.as_secs()));
                if let Some(identity_file) = &ssh.identity_file {
                    command.arg("-i").arg(identity_file);
                }
                command.arg(format!("{}@{}", ssh.user, self.ip));
                command.args(remote_args);
                command
            }
        }
    }

    async fn run(&self, remote_args: &[&str], log_context: &str) -> Result<()> {
        debug!(ip = %self.ip, command = ?remote_args, "running on controller node");
        run_command(self.command(remote_args), self.timeout, log_context).await?;
        Ok(())
    }

    async fn systemctl(&self, verb: &str) -> Result<()> {
        let service = self.agent_service();
        self.run(
            &["sudo", "systemctl", verb, &service],
            &format!("systemctl {} {}", verb, service),
        )
        .await
        .with_context(|| format!("Failed to {} agent on {}", verb, self.ip))
    }
}

#[async_trait]
impl ControllerNode for SshControllerNode {
    fn ip(&self) -> String {
        self.ip.clone()
    }

    async fn ping(&self) -> Result<()> {
        self.run(&["true"], "ping")
            .await
            .with_context(|| format!("Failed to reach controller node {}", self.ip))
    }

    async fn stop_agent(&self) -> Result<()> {
        self.systemctl("stop").await
    }

    async fn start_agent(&self) -> Result<()> {
        self.systemctl("start").await
    }
}
