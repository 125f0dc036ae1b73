//! Controller Restore Tool
//!
//! Checks that a controller's replica set is safe to restore and drives the
//! restore across every controller node.

// controller-restore/src/main.rs
mod config;
mod cluster;
mod db;
mod errors;
mod machine;
mod restore;
mod utils;

use anyhow::{Context, Result};
use config::{AppConfig, OperationConfig, load_restore_config_from_json};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Main entry point for the restore tool
#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    // Usage: controller-restore [check|restore] [config.json]
    let config_path = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut app_config = AppConfig::load_from_json(&config_path).context(format!(
        "Failed to load application configuration from {}",
        config_path.display()
    ))?;

    let choice = match args.get(1) {
        Some(arg) => arg.trim().to_string(),
        None => prompt_choice()?,
    };

    let spaces_is_configured = app_config.spaces_config.is_some();

    match choice.as_str() {
        "1" | "check" => {
            println!("🔍 Checking controller state...");
            app_config.operation = Some(OperationConfig::Check);
            restore::run_check_flow(&app_config)
                .await
                .context("Controller check failed")?;
        }
        "2" | "restore" => {
            println!("🔄 Starting Restore Process...");
            let restore_config =
                load_restore_config_from_json(&app_config.raw_json_config, spaces_is_configured)
                    .context("Failed to load restore configuration from JSON")?;
            app_config.operation = Some(OperationConfig::Restore(restore_config));
            restore::run_restore_flow(&app_config)
                .await
                .context("Restore process failed")?;
        }
        _ => {
            println!("❌ Invalid choice. Please enter '1' (check) or '2' (restore).");
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

/// Prompts user to select check or restore operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    use std::io::{Write, stdin, stdout};

    println!("Select an operation:");
    println!("1. Check controller (or type 'check')");
    println!("2. Restore backup (or type 'restore')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
