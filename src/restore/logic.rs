// controller-restore/src/restore/logic.rs
use anyhow::{Context, Result};
use chrono::Local;
use std::io::{stdin, stdout, Write};
use std::path::{Path, PathBuf};
use tempfile::Builder as TempDirBuilder;
use tracing::{info, warn};

use super::archive::{extract_tar_gz_archive, find_dump_dir};
use super::mongo_restore::restore_dump;
use super::s3_download::download_backup;
use crate::config::{AppConfig, RestoreConfig};
use crate::cluster::{NodeResults, Restorer};
use crate::db::MongoShellDatabase;
use crate::errors::is_unhealthy_members_error;
use crate::machine::controller_node_converter;

/// Snapshots the replica set through the mongo shell.
async fn build_restorer(app_config: &AppConfig) -> Result<Restorer> {
    let database = MongoShellDatabase::new(app_config.database.clone(), app_config.command_timeout);
    let converter = controller_node_converter(app_config.ssh.clone(), app_config.command_timeout);
    Restorer::new(Box::new(database), converter)
        .await
        .context("Failed to read replica set topology")
}

/// Nodes whose call failed, formatted as `ip: error`.
pub fn failed_nodes(results: &NodeResults) -> Vec<String> {
    results
        .iter()
        .filter_map(|(ip, result)| result.as_ref().err().map(|e| format!("{}: {:#}", ip, e)))
        .collect()
}

fn report(action: &str, results: &NodeResults) {
    for (ip, result) in results {
        match result {
            Ok(()) => println!("  ✓ {} {}", action, ip),
            Err(e) => println!("  ✗ {} {}: {:#}", action, ip, e),
        }
    }
}

/// Runs the safety checks: replica set state, then reachability of every
/// other controller when the cluster is HA.
pub async fn verify_cluster(restorer: &mut Restorer) -> Result<()> {
    if let Err(err) = restorer.check_database_state() {
        for member in err.unhealthy_members() {
            warn!(
                member = %member,
                state = %member.state,
                healthy = member.healthy,
                "replica set member is not fit for restore"
            );
        }
        let err = anyhow::Error::from(err);
        if is_unhealthy_members_error(&err) {
            return Err(err.context(
                "Replica set members must all be healthy and mapped to a machine before restoring",
            ));
        }
        return Err(err).context("Controller is not in a restorable state");
    }

    if restorer.is_ha() {
        info!("checking connectivity to secondary controller nodes");
        let results = restorer.check_secondary_controller_nodes().await;
        report("reach", &results);
        let unreachable = failed_nodes(&results);
        if !unreachable.is_empty() {
            return Err(anyhow::anyhow!(
                "Unable to reach controller nodes: {}",
                unreachable.join("; ")
            ));
        }
    }
    Ok(())
}

fn print_summary(restorer: &Restorer) {
    let members = &restorer.replica_set().members;
    println!("Replica set members ({}):", members.len());
    for member in members {
        println!("  {} [{}]", member, member.state);
    }
    if let Some(primary) = restorer.primary() {
        println!("Primary: {}", primary);
    }
    match restorer.self_member() {
        Some(member) => println!("Running on: {}", member),
        None => println!("Running on: a host outside the replica set"),
    }
    println!("HA: {}", if restorer.is_ha() { "yes" } else { "no" });
}

/// Validates the controller without touching it.
pub async fn perform_check(app_config: &AppConfig) -> Result<()> {
    let mut restorer = build_restorer(app_config).await?;
    let result = verify_cluster(&mut restorer).await;
    restorer.database().close().await;
    result?;

    print_summary(&restorer);
    println!("✅ Controller is in a restorable state.");
    Ok(())
}

/// Orchestrates a full restore: checks, backup retrieval, agent shutdown,
/// mongorestore and agent startup.
pub async fn perform_restore_orchestration(
    app_config: &AppConfig,
    restore_config: &RestoreConfig,
) -> Result<()> {
    let mut restorer = build_restorer(app_config).await?;
    let result = restore_with_restorer(&mut restorer, app_config, restore_config).await;
    restorer.database().close().await;
    result
}

async fn restore_with_restorer(
    restorer: &mut Restorer,
    app_config: &AppConfig,
    restore_config: &RestoreConfig,
) -> Result<()> {
    verify_cluster(restorer).await?;
    print_summary(restorer);

    let include_secondaries = manages_secondaries(restore_config);
    println!("Backup: {}", restore_config.backup_file);
    if include_secondaries {
        println!("Agents will be stopped on all controller nodes.");
    } else {
        println!("Only the local agent will be stopped; secondary agents are managed manually.");
    }

    if !restore_config.assume_yes
        && !confirm("All controller data will be replaced by the backup. Continue? (y/N): ")?
    {
        anyhow::bail!("Restore cancelled by user");
    }

    let work_dir = TempDirBuilder::new()
        .prefix("controller_restore_")
        .tempdir()
        .context("Failed to create temporary working directory")?;
    let archive_path = obtain_backup(app_config, restore_config, work_dir.path()).await?;
    let extracted = extract_tar_gz_archive(&archive_path, &work_dir.path().join("extract"))?;
    let dump_dir = find_dump_dir(&extracted)?;

    let database = &app_config.database;
    let dump_path = dump_dir.as_path();
    let limit = restore_config.restore_timeout;
    restore_with_agents_stopped(restorer, include_secondaries, move || {
        restore_dump(database, dump_path, limit)
    })
    .await?;

    println!(
        "Restore completed at {}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

/// Agents on secondaries are driven by the tool unless the operator manages
/// them by hand.
fn manages_secondaries(restore_config: &RestoreConfig) -> bool {
    !restore_config.manual_agent_control
}

/// Stops agents, runs `restore_step`, then starts agents again.
///
/// A failed stop aborts before `restore_step` runs and starts the agents
/// that were acted on. A failed `restore_step` still starts agents before
/// the error is returned.
async fn restore_with_agents_stopped<F, Fut>(
    restorer: &Restorer,
    include_secondaries: bool,
    restore_step: F,
) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    info!("stopping controller agents");
    let stopped = restorer.stop_agents(include_secondaries).await;
    report("stop agent on", &stopped);
    let stop_failures = failed_nodes(&stopped);
    if !stop_failures.is_empty() {
        warn!("restarting agents after failed stop");
        let restarted = restorer.start_agents(include_secondaries).await;
        report("start agent on", &restarted);
        return Err(anyhow::anyhow!(
            "Failed to stop agents on {}; the database was not touched",
            stop_failures.join("; ")
        ));
    }

    let restore_result = restore_step().await;

    info!("starting controller agents");
    let started = restorer.start_agents(include_secondaries).await;
    report("start agent on", &started);

    restore_result.context("Database restore failed; agents were restarted on the old data")?;

    let start_failures = failed_nodes(&started);
    if !start_failures.is_empty() {
        return Err(anyhow::anyhow!(
            "Database restored, but agents failed to start on {}",
            start_failures.join("; ")
        ));
    }
    Ok(())
}

/// Returns a local path to the backup, downloading it first if needed.
async fn obtain_backup(
    app_config: &AppConfig,
    restore_config: &RestoreConfig,
    work_dir: &Path,
) -> Result<PathBuf> {
    if restore_config.download_from_spaces {
        let spaces_config = app_config
            .spaces_config
            .as_ref()
            .context("S3 download requested but s3_storage is not configured")?;
        return download_backup(spaces_config, &restore_config.backup_file, work_dir).await;
    }

    let path = PathBuf::from(&restore_config.backup_file);
    if !path.is_file() {
        return Err(anyhow::anyhow!(
            "Backup file not found: {}",
            path.display()
        ));
    }
    Ok(path)
}

fn confirm(question: &str) -> Result<bool> {
    print!("{}", question);
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ControllerNode, Database, ReplicaSet, ReplicaSetMember};
    use async_trait::async_trait;
    use std::future::{ready, Ready};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct StaticDatabase(ReplicaSet);

    #[async_trait]
    impl Database for StaticDatabase {
        async fn replica_set(&self) -> Result<ReplicaSet> {
            Ok(self.0.clone())
        }

        async fn close(&self) {}
    }

    type CallLog = Arc<Mutex<Vec<String>>>;

    struct Node {
        ip: String,
        reachable: bool,
        stops: bool,
        log: CallLog,
    }

    impl Node {
        fn record(&self, call: &str) {
            self.log.lock().unwrap().push(format!("{} {}", self.ip, call));
        }
    }

    #[async_trait]
    impl ControllerNode for Node {
        fn ip(&self) -> String {
            self.ip.clone()
        }

        async fn ping(&self) -> Result<()> {
            if self.reachable {
                Ok(())
            } else {
                Err(anyhow::anyhow!("connection timed out"))
            }
        }

        async fn stop_agent(&self) -> Result<()> {
            self.record("stop");
            if self.stops {
                Ok(())
            } else {
                Err(anyhow::anyhow!("unit is masked"))
            }
        }

        async fn start_agent(&self) -> Result<()> {
            self.record("start");
            Ok(())
        }
    }

    fn member(id: i32, name: &str, state: &str, self_: bool) -> ReplicaSetMember {
        ReplicaSetMember {
            id,
            name: name.to_string(),
            state: state.to_string(),
            healthy: true,
            self_,
            juju_machine_id: id.to_string(),
        }
    }

    async fn restorer(members: Vec<ReplicaSetMember>, unreachable: &'static str) -> Restorer {
        recording_restorer(members, unreachable, "", CallLog::default()).await
    }

    /// Nodes named `unreachable` fail pings, nodes named `stuck` fail stops.
    async fn recording_restorer(
        members: Vec<ReplicaSetMember>,
        unreachable: &'static str,
        stuck: &'static str,
        log: CallLog,
    ) -> Restorer {
        Restorer::new(
            Box::new(StaticDatabase(ReplicaSet { members })),
            move |m: &ReplicaSetMember| {
                Arc::new(Node {
                    ip: m.name.clone(),
                    reachable: m.name != unreachable,
                    stops: m.name != stuck,
                    log: log.clone(),
                }) as Arc<dyn ControllerNode>
            },
        )
        .await
        .expect("restorer builds")
    }

    fn two_node_cluster() -> Vec<ReplicaSetMember> {
        vec![
            member(0, "10.0.0.1", "PRIMARY", true),
            member(1, "10.0.0.2", "SECONDARY", false),
        ]
    }

    fn restore_config(manual_agent_control: bool) -> RestoreConfig {
        RestoreConfig {
            backup_file: "/var/backups/juju-backup.tar.gz".to_string(),
            download_from_spaces: false,
            manual_agent_control,
            assume_yes: true,
            restore_timeout: Duration::from_secs(60),
        }
    }

    fn restore_step(log: &CallLog, outcome: Result<()>) -> impl FnOnce() -> Ready<Result<()>> {
        let log = log.clone();
        move || {
            log.lock().unwrap().push("restore".to_string());
            ready(outcome)
        }
    }

    fn calls(log: &CallLog) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn test_failed_nodes() {
        let mut results = NodeResults::new();
        results.insert("10.0.0.1".to_string(), Ok(()));
        results.insert("10.0.0.2".to_string(), Err(anyhow::anyhow!("kaboom")));
        assert_eq!(failed_nodes(&results), vec!["10.0.0.2: kaboom"]);
    }

    #[tokio::test]
    async fn test_verify_cluster_ok() -> Result<()> {
        let mut r = restorer(
            vec![
                member(0, "10.0.0.1", "PRIMARY", true),
                member(1, "10.0.0.2", "SECONDARY", false),
            ],
            "",
        )
        .await;
        verify_cluster(&mut r).await?;
        assert!(r.is_ha());
        Ok(())
    }

    #[tokio::test]
    async fn test_verify_cluster_unreachable_secondary() {
        let mut r = restorer(
            vec![
                member(0, "10.0.0.1", "PRIMARY", true),
                member(1, "10.0.0.2", "SECONDARY", false),
            ],
            "10.0.0.2",
        )
        .await;
        let err = verify_cluster(&mut r).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to reach controller nodes: 10.0.0.2: connection timed out"
        );
    }

    #[tokio::test]
    async fn test_verify_cluster_keeps_unhealthy_predicate() {
        let mut r = restorer(vec![member(0, "10.0.0.1", "RECOVERING", true)], "").await;
        let err = verify_cluster(&mut r).await.unwrap_err();
        assert!(is_unhealthy_members_error(&err));
    }

    #[tokio::test]
    async fn test_verify_cluster_not_on_primary() {
        let mut r = restorer(
            vec![
                member(0, "10.0.0.1", "SECONDARY", true),
                member(1, "10.0.0.2", "PRIMARY", false),
            ],
            "",
        )
        .await;
        let err = verify_cluster(&mut r).await.unwrap_err();
        assert!(!is_unhealthy_members_error(&err));
        assert!(format!("{:#}", err).contains("not running on primary replica set member"));
    }

    #[tokio::test]
    async fn test_restore_runs_between_stop_and_start() -> Result<()> {
        let log = CallLog::default();
        let r = recording_restorer(two_node_cluster(), "", "", log.clone()).await;

        restore_with_agents_stopped(&r, true, restore_step(&log, Ok(()))).await?;
        assert_eq!(
            calls(&log),
            vec![
                "10.0.0.1 stop",
                "10.0.0.2 stop",
                "restore",
                "10.0.0.1 start",
                "10.0.0.2 start",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_stop_skips_restore_and_restarts_agents() {
        let log = CallLog::default();
        let r = recording_restorer(two_node_cluster(), "", "10.0.0.2", log.clone()).await;

        let err = restore_with_agents_stopped(&r, true, restore_step(&log, Ok(())))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to stop agents on 10.0.0.2: unit is masked; the database was not touched"
        );
        assert_eq!(
            calls(&log),
            vec!["10.0.0.1 stop", "10.0.0.2 stop", "10.0.0.1 start", "10.0.0.2 start"]
        );
    }

    #[tokio::test]
    async fn test_failed_restore_still_starts_agents() {
        let log = CallLog::default();
        let r = recording_restorer(two_node_cluster(), "", "", log.clone()).await;

        let err = restore_with_agents_stopped(
            &r,
            true,
            restore_step(&log, Err(anyhow::anyhow!("mongorestore failed with status: 1"))),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Database restore failed; agents were restarted on the old data"
        );
        assert!(format!("{:#}", err).contains("mongorestore failed with status: 1"));
        assert_eq!(
            calls(&log),
            vec![
                "10.0.0.1 stop",
                "10.0.0.2 stop",
                "restore",
                "10.0.0.1 start",
                "10.0.0.2 start",
            ]
        );
    }

    #[tokio::test]
    async fn test_manual_agent_control_leaves_secondaries_alone() -> Result<()> {
        assert!(manages_secondaries(&restore_config(false)));

        let log = CallLog::default();
        let r = recording_restorer(two_node_cluster(), "", "", log.clone()).await;
        let include_secondaries = manages_secondaries(&restore_config(true));

        restore_with_agents_stopped(&r, include_secondaries, restore_step(&log, Ok(()))).await?;
        assert_eq!(calls(&log), vec!["10.0.0.1 stop", "restore", "10.0.0.1 start"]);
        Ok(())
    }
}
