mod logic;
pub(crate) mod archive; // Backup extraction
pub(crate) mod mongo_restore; // Database restoration with mongorestore
pub(crate) mod s3_download; // S3 download of remote backups

use anyhow::Result;
use crate::config::AppConfig;

/// Public entry point for the pre-restore checks.
pub async fn run_check_flow(app_config: &AppConfig) -> Result<()> {
    logic::perform_check(app_config).await
}

/// Public entry point for the restore process.
/// This function will orchestrate the restore flow using the provided configuration.
pub async fn run_restore_flow(app_config: &AppConfig) -> Result<()> {
    let restore_config = match &app_config.operation {
        Some(crate::config::OperationConfig::Restore(cfg)) => cfg,
        _ => anyhow::bail!("Restore operation selected but no restore configuration found."),
    };

    logic::perform_restore_orchestration(app_config, restore_config).await
}
