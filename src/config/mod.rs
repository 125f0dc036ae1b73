// controller-restore/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const DEFAULT_DB_HOSTNAME: &str = "localhost";
const DEFAULT_DB_PORT: u16 = 37017;
const DEFAULT_SSH_USER: &str = "ubuntu";
const DEFAULT_SSH_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RESTORE_TIMEOUT_SECS: u64 = 3600;

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonDatabaseConfig {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonSshConfig {
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRestoreOptions {
    pub backup_file: Option<String>,
    pub manual_agent_control: Option<bool>,
    pub assume_yes: Option<bool>,
    pub command_timeout_secs: Option<u64>,
    pub restore_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonS3StorageConfig {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub database: Option<JsonDatabaseConfig>,
    pub ssh: Option<JsonSshConfig>,
    pub restore: Option<JsonRestoreOptions>,
    pub s3_storage: Option<JsonS3StorageConfig>,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub ssl: bool,
}

#[derive(Debug, Clone)]
pub struct SshConfig {
    pub user: String,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SpacesConfig {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub backup_file: String,
    pub download_from_spaces: bool,
    /// When set, only the local agent is stopped and started.
    pub manual_agent_control: bool,
    pub assume_yes: bool,
    /// Upper bound for the mongorestore run.
    pub restore_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub operation: Option<OperationConfig>,
    pub database: DatabaseConfig,
    pub ssh: SshConfig,
    /// Upper bound for any single remote or external command.
    pub command_timeout: Duration,
    pub spaces_config: Option<SpacesConfig>,
    pub raw_json_config: RawJsonConfig,
}

#[derive(Debug, Clone)]
pub enum OperationConfig {
    Check,
    Restore(RestoreConfig),
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        Self::parse_json(&config_content).with_context(|| {
            format!(
                "Failed to load config file at {}",
                config_path.display()
            )
        })
    }

    pub fn parse_json(config_content: &str) -> Result<Self> {
        let raw_json_config: RawJsonConfig =
            serde_json::from_str(config_content).context("Failed to parse config JSON")?;

        let database = load_database_config(&raw_json_config)?;
        let ssh = load_ssh_config(&raw_json_config);
        let command_timeout = Duration::from_secs(
            raw_json_config
                .restore
                .as_ref()
                .and_then(|r| r.command_timeout_secs)
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
        );
        let spaces_config = raw_json_config.s3_storage.as_ref().and_then(load_spaces_config);

        Ok(AppConfig {
            operation: None, // To be filled by main after parsing CLI args
            database,
            ssh,
            command_timeout,
            spaces_config,
            raw_json_config,
        })
    }
}

fn load_database_config(raw_config: &RawJsonConfig) -> Result<DatabaseConfig> {
    let db = raw_config
        .database
        .as_ref()
        .context("database must be defined in config.json")?;
    let username = db
        .username
        .clone()
        .filter(|s| !s.is_empty())
        .context("database.username must be set in config.json")?;
    let password = db
        .password
        .clone()
        .filter(|s| !s.is_empty())
        .context("database.password must be set in config.json")?;

    Ok(DatabaseConfig {
        hostname: db
            .hostname
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_DB_HOSTNAME.to_string()),
        port: db.port.unwrap_or(DEFAULT_DB_PORT),
        username,
        password,
        ssl: db.ssl.unwrap_or(true),
    })
}

fn load_ssh_config(raw_config: &RawJsonConfig) -> SshConfig {
    let ssh = raw_config.ssh.as_ref();
    SshConfig {
        user: ssh
            .and_then(|s| s.user.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
        identity_file: ssh.and_then(|s| s.identity_file.clone()),
        connect_timeout: Duration::from_secs(
            ssh.and_then(|s| s.connect_timeout_secs)
                .unwrap_or(DEFAULT_SSH_CONNECT_TIMEOUT_SECS),
        ),
    }
}

fn load_spaces_config(s3_raw: &JsonS3StorageConfig) -> Option<SpacesConfig> {
    // The bucket comes from the `s3://bucket/key` backup URI.
    if let (Some(region), Some(key_id), Some(secret), Some(endpoint)) = (
        s3_raw.region.as_ref().filter(|s| !s.is_empty()),
        s3_raw.access_key_id.as_ref().filter(|s| !s.is_empty()),
        s3_raw.secret_access_key.as_ref().filter(|s| !s.is_empty()),
        s3_raw.endpoint_url.as_ref().filter(|s| !s.is_empty()),
    ) {
        Some(SpacesConfig {
            region: region.clone(),
            access_key_id: key_id.clone(),
            secret_access_key: secret.clone(),
            endpoint_url: endpoint.clone(),
        })
    } else {
        warn!(
            "s3_storage is present in config.json but some required fields (region, access_key_id, secret_access_key, endpoint_url) are missing or empty; S3 downloads are disabled"
        );
        None
    }
}

pub fn load_restore_config_from_json(
    raw_config: &RawJsonConfig,
    spaces_is_configured: bool,
) -> Result<RestoreConfig> {
    let restore_opts = raw_config
        .restore
        .as_ref()
        .context("restore must be defined in config.json for restore")?;
    let backup_file = restore_opts
        .backup_file
        .as_ref()
        .context("restore.backup_file must be set in config.json for restore")?
        .clone();

    if backup_file.trim().is_empty() {
        return Err(anyhow::anyhow!(
            "restore.backup_file cannot be empty in config.json."
        ));
    }

    let download_from_spaces = backup_file.starts_with("s3://");
    if download_from_spaces && !spaces_is_configured {
        return Err(anyhow::anyhow!(
            "restore.backup_file in config.json is an S3 URI, but S3 storage (s3_storage) is not fully configured or is missing required fields."
        ));
    }

    Ok(RestoreConfig {
        backup_file,
        download_from_spaces,
        manual_agent_control: restore_opts.manual_agent_control.unwrap_or(false),
        assume_yes: restore_opts.assume_yes.unwrap_or(false),
        restore_timeout: Duration::from_secs(
            restore_opts
                .restore_timeout_secs
                .unwrap_or(DEFAULT_RESTORE_TIMEOUT_SECS),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn minimal() -> serde_json::Value {
        json!({
            "database": {"username": "machine-0", "password": "sekrit"}
        })
    }

    #[test]
    fn test_defaults_are_applied() -> anyhow::Result<()> {
        let config = AppConfig::parse_json(&minimal().to_string())?;

        assert_eq!(config.database.hostname, "localhost");
        assert_eq!(config.database.port, 37017);
        assert!(config.database.ssl);
        assert_eq!(config.ssh.user, "ubuntu");
        assert_eq!(config.ssh.identity_file, None);
        assert_eq!(config.ssh.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.command_timeout, Duration::from_secs(120));
        assert!(config.spaces_config.is_none());
        assert!(config.operation.is_none());
        Ok(())
    }

    #[test]
    fn test_database_credentials_required() {
        let no_password = json!({"database": {"username": "machine-0"}});
        let err = AppConfig::parse_json(&no_password.to_string()).unwrap_err();
        assert!(err.to_string().contains("database.password"));

        let no_database = json!({"ssh": {"user": "ubuntu"}});
        assert!(AppConfig::parse_json(&no_database.to_string()).is_err());
    }

    #[test]
    fn test_load_from_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        let content = json!({
            "database": {
                "hostname": "10.0.0.2",
                "port": 37018,
                "username": "machine-0",
                "password": "sekrit",
                "ssl": false
            },
            "ssh": {"user": "jenkins", "identity_file": "/home/jenkins/.ssh/id_ed25519", "connect_timeout_secs": 3},
            "restore": {"backup_file": "/var/backups/juju-backup.tar.gz", "command_timeout_secs": 30}
        });
        file.write_all(content.to_string().as_bytes())?;

        let config = AppConfig::load_from_json(file.path())?;
        assert_eq!(config.database.hostname, "10.0.0.2");
        assert_eq!(config.database.port, 37018);
        assert!(!config.database.ssl);
        assert_eq!(config.ssh.user, "jenkins");
        assert_eq!(
            config.ssh.identity_file,
            Some(PathBuf::from("/home/jenkins/.ssh/id_ed25519"))
        );
        assert_eq!(config.ssh.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        let result = AppConfig::load_from_json(Path::new("/nonexistent/config.json"));
        assert!(result.is_err());
    }

    #[test]
    fn test_incomplete_s3_storage_is_disabled() -> anyhow::Result<()> {
        let mut content = minimal();
        content["s3_storage"] = json!({"region": "", "access_key_id": "key"});
        let config = AppConfig::parse_json(&content.to_string())?;
        assert!(config.spaces_config.is_none());
        Ok(())
    }

    #[test]
    fn test_restore_config_local_file() -> anyhow::Result<()> {
        let mut content = minimal();
        content["restore"] = json!({
            "backup_file": "/var/backups/juju-backup.tar.gz",
            "manual_agent_control": true
        });
        let config = AppConfig::parse_json(&content.to_string())?;
        let restore = load_restore_config_from_json(&config.raw_json_config, false)?;

        assert_eq!(restore.backup_file, "/var/backups/juju-backup.tar.gz");
        assert!(!restore.download_from_spaces);
        assert!(restore.manual_agent_control);
        assert!(!restore.assume_yes);
        assert_eq!(restore.restore_timeout, Duration::from_secs(3600));
        Ok(())
    }

    #[test]
    fn test_restore_config_s3_requires_storage() -> anyhow::Result<()> {
        let mut content = minimal();
        content["restore"] = json!({"backup_file": "s3://backups/juju-backup.tar.gz"});
        content["s3_storage"] = json!({
            "region": "fra1",
            "access_key_id": "key",
            "secret_access_key": "secret",
            "endpoint_url": "https://fra1.digitaloceanspaces.com"
        });
        let config = AppConfig::parse_json(&content.to_string())?;
        assert!(config.spaces_config.is_some());

        let restore = load_restore_config_from_json(&config.raw_json_config, true)?;
        assert!(restore.download_from_spaces);

        let result = load_restore_config_from_json(&config.raw_json_config, false);
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_s3_bucket_taken_from_backup_uri() -> anyhow::Result<()> {
        let mut content = minimal();
        content["restore"] = json!({"backup_file": "s3://real-bucket/b.tar.gz"});
        content["s3_storage"] = json!({
            "region": "fra1",
            "access_key_id": "key",
            "secret_access_key": "secret",
            "endpoint_url": "https://fra1.digitaloceanspaces.com"
        });
        let config = AppConfig::parse_json(&content.to_string())?;
        assert!(config.spaces_config.is_some());

        let restore = load_restore_config_from_json(
            &config.raw_json_config,
            config.spaces_config.is_some(),
        )?;
        assert!(restore.download_from_spaces);
        assert_eq!(restore.backup_file, "s3://real-bucket/b.tar.gz");
        Ok(())
    }

    #[test]
    fn test_restore_config_requires_backup_file() -> anyhow::Result<()> {
        let mut content = minimal();
        content["restore"] = json!({"backup_file": "  "});
        let config = AppConfig::parse_json(&content.to_string())?;
        assert!(load_restore_config_from_json(&config.raw_json_config, false).is_err());

        let config = AppConfig::parse_json(&minimal().to_string())?;
        assert!(load_restore_config_from_json(&config.raw_json_config, false).is_err());
        Ok(())
    }
}
