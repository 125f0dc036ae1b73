// controller-restore/src/utils/mod.rs
use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;
use tempfile::{Builder as TempFileBuilder, NamedTempFile};
use tokio::process::Command;
use tokio::time::timeout;
use which::which;

/// Finds an executable in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which(name).with_context(|| {
        format!(
            "{} executable not found in PATH. Please ensure it is installed and in your PATH.",
            name
        )
    })
}

/// Runs `command` to completion, bounded by `limit`, and fails unless it
/// exits successfully. `log_context` names the command in errors.
pub async fn run_command(mut command: Command, limit: Duration, log_context: &str) -> Result<Output> {
    command.kill_on_drop(true);
    let output = match timeout(limit, command.output()).await {
        Ok(result) => result.with_context(|| format!("Failed to execute {}", log_context))?,
        Err(_) => {
            return Err(anyhow::anyhow!(
                "{} timed out after {:?}",
                log_context,
                limit
            ));
        }
    };

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} failed with status: {}\nStdout: {}\nStderr: {}",
            log_context,
            output.status,
            String::from_utf8_lossy(&output.stdout).trim(),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(output)
}

/// Writes `contents` to a temporary file readable only by the current user,
/// so credentials can be handed to a tool without showing up in its argv.
/// The file is removed when the returned handle is dropped.
pub fn write_private_file(suffix: &str, contents: &str) -> Result<NamedTempFile> {
    let mut file = TempFileBuilder::new()
        .prefix("controller_restore_")
        .suffix(suffix)
        .tempfile()
        .context("Failed to create temporary credentials file")?;
    file.write_all(contents.as_bytes())
        .context("Failed to write temporary credentials file")?;
    file.flush().context("Failed to write temporary credentials file")?;
    Ok(file)
}
