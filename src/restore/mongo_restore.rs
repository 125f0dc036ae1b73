// controller-restore/src/restore/mongo_restore.rs
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::utils::{find_executable, run_command, write_private_file};

const MONGORESTORE_EXECUTABLES: &[&str] = &["mongorestore", "juju-db.mongorestore"];

fn find_mongorestore_executable() -> Result<std::path::PathBuf> {
    MONGORESTORE_EXECUTABLES
        .iter()
        .find_map(|name| find_executable(name).ok())
        .with_context(|| {
            format!(
                "mongorestore executable not found in PATH (tried {})",
                MONGORESTORE_EXECUTABLES.join(", ")
            )
        })
}

/// YAML accepted by `mongorestore --config`. A JSON string is a valid YAML
/// double-quoted scalar.
fn credentials_config(db: &DatabaseConfig) -> Result<String> {
    Ok(format!("password: {}\n", serde_json::to_string(&db.password)?))
}

/// Builds the `mongorestore` invocation replacing the live databases with
/// the contents of `dump_dir`. The password is read from `config_path`.
fn mongorestore_command(
    executable: &Path,
    db: &DatabaseConfig,
    config_path: &Path,
    dump_dir: &Path,
) -> Command {
    let mut command = Command::new(executable);
    command
        .arg("--host")
        .arg(&db.hostname)
        .arg("--port")
        .arg(db.port.to_string())
        .arg("--username")
        .arg(&db.username)
        .arg("--config")
        .arg(config_path)
        .arg("--authenticationDatabase")
        .arg("admin");
    if db.ssl {
        command.arg("--ssl").arg("--sslAllowInvalidCertificates");
    }
    command
        .arg("--drop")
        .arg("--oplogReplay")
        .arg("--stopOnError")
        .arg(dump_dir);
    command
}

/// Restores the database from an extracted mongodump directory.
pub async fn restore_dump(db: &DatabaseConfig, dump_dir: &Path, limit: Duration) -> Result<()> {
    if !dump_dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Dump directory for restore not found: {}",
            dump_dir.display()
        ));
    }

    let executable = find_mongorestore_executable()?;
    info!(
        dump = %dump_dir.display(),
        host = %db.hostname,
        port = db.port,
        "restoring database with mongorestore"
    );
    let credentials = write_private_file(".yaml", &credentials_config(db)?)?;
    run_command(
        mongorestore_command(&executable, db, credentials.path(), dump_dir),
        limit,
        "mongorestore",
    )
    .await?;
    info!(dump = %dump_dir.display(), "database restored");
    Ok(())
}
