// controller-restore/src/db/mongo_shell.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::cluster::{Database, ReplicaSet, ReplicaSetMember};
use crate::utils::{find_executable, run_command, write_private_file};

/// Shell binaries tried in order; controllers ship the snap-packaged one.
const MONGO_SHELLS: &[&str] = &["mongo", "juju-db.mongo", "mongosh"];
const JUJU_MACHINE_ID_TAG: &str = "juju-machine-id";
const REPLICA_SET_SCRIPT: &str = "JSON.stringify({status: rs.status(), config: rs.conf()})";

#[derive(Debug, Deserialize)]
struct ShellOutput {
    status: StatusDoc,
    config: ConfigDoc,
}

#[derive(Debug, Deserialize)]
struct StatusDoc {
    members: Vec<StatusMember>,
}

#[derive(Debug, Deserialize)]
struct StatusMember {
    #[serde(rename = "_id")]
    id: i32,
    name: String,
    health: f64,
    #[serde(rename = "stateStr")]
    state_str: String,
    #[serde(rename = "self", default)]
    self_: bool,
}

#[derive(Debug, Deserialize)]
struct ConfigDoc {
    members: Vec<ConfigMember>,
}

#[derive(Debug, Deserialize)]
struct ConfigMember {
    #[serde(rename = "_id")]
    id: i32,
    #[serde(default)]
    tags: HashMap<String, String>,
}

/// Reads replica set topology through the mongo shell on the controller.
pub struct MongoShellDatabase {
    config: DatabaseConfig,
    timeout: Duration,
}

impl MongoShellDatabase {
    pub fn new(config: DatabaseConfig, timeout: Duration) -> Self {
        MongoShellDatabase { config, timeout }
    }

    fn find_shell() -> Result<PathBuf> {
        MONGO_SHELLS
            .iter()
            .find_map(|name| find_executable(name).ok())
            .with_context(|| {
                format!(
                    "no mongo shell found in PATH (tried {})",
                    MONGO_SHELLS.join(", ")
                )
            })
    }

    /// Script run by the shell. Authenticates from inside the script so the
    /// password never appears on the command line.
    fn script(&self) -> Result<String> {
        Ok(format!(
            "db.getSiblingDB(\"admin\").auth({}, {});\nprint({});\n",
            serde_json::to_string(&self.config.username)?,
            serde_json::to_string(&self.config.password)?,
            REPLICA_SET_SCRIPT
        ))
    }

    fn shell_command(&self, shell_path: &Path, script_path: &Path) -> Command {
        let mut command = Command::new(shell_path);
        command
            .arg("--quiet")
            .arg("--host")
            .arg(&self.config.hostname)
            .arg("--port")
            .arg(self.config.port.to_string());
        if self.config.ssl {
            command.arg("--ssl").arg("--sslAllowInvalidCertificates");
        }
        command.arg(script_path);
        command
    }
}

#[async_trait]
impl Database for MongoShellDatabase {
    async fn replica_set(&self) -> Result<ReplicaSet> {
        let shell_path = Self::find_shell()?;
        debug!(
            host = %self.config.hostname,
            port = self.config.port,
            shell = %shell_path.display(),
            "querying replica set status"
        );
        let script = write_private_file(".js", &self.script()?)?;
        let output = run_command(
            self.shell_command(&shell_path, script.path()),
            self.timeout,
            "mongo shell",
        )
        .await?;
        parse_replica_set(&String::from_utf8_lossy(&output.stdout))
    }

    async fn close(&self) {
        // Each query runs its own shell process; nothing stays open.
    }
}

/// Builds a `ReplicaSet` from the JSON printed by `REPLICA_SET_SCRIPT`.
/// Only the last non-empty line is parsed; older shells print banners first.
pub fn parse_replica_set(stdout: &str) -> Result<ReplicaSet> {
    let json_line = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .context("mongo shell printed no replica set status")?;
    let parsed: ShellOutput =
        serde_json::from_str(json_line).context("Failed to parse replica set status from mongo shell")?;

    let machine_ids: HashMap<i32, String> = parsed
        .config
        .members
        .into_iter()
        .filter_map(|m| {
            m.tags
                .get(JUJU_MACHINE_ID_TAG)
                .map(|machine_id| (m.id, machine_id.clone()))
        })
        .collect();

    let members = parsed
        .status
        .members
        .into_iter()
        .map(|m| ReplicaSetMember {
            id: m.id,
            juju_machine_id: machine_ids.get(&m.id).cloned().unwrap_or_default(),
            name: m.name,
            state: m.state_str,
            healthy: m.health >= 1.0,
            self_: m.self_,
        })
        .collect();
    Ok(ReplicaSet { members })
}
