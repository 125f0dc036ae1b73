// controller-restore/src/restore/s3_download.rs
use anyhow::{Context, Result};
use aws_sdk_s3 as s3;
use s3::config::Region;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::config::SpacesConfig;

/// Parses an S3 URI (s3://bucket/key) into bucket and key.
pub fn parse_s3_uri(s3_uri: &str) -> Result<(String, String)> {
    let uri = url::Url::parse(s3_uri)
        .with_context(|| format!("Invalid S3 URI format: {}", s3_uri))?;
    if uri.scheme() != "s3" {
        return Err(anyhow::anyhow!("S3 URI must start with s3://"));
    }
    let bucket = uri.host_str().context("S3 URI missing bucket name")?.to_string();
    let key = uri.path().trim_start_matches('/').to_string();
    if key.is_empty() {
        return Err(anyhow::anyhow!("S3 URI missing key (object path)"));
    }
    Ok((bucket, key))
}

/// Downloads a backup from S3-compatible storage into `destination_dir`,
/// keeping the object's file name.
pub async fn download_backup(
    spaces_config: &SpacesConfig,
    s3_uri: &str,
    destination_dir: &Path,
) -> Result<PathBuf> {
    let (bucket, key) = parse_s3_uri(s3_uri)?;
    let file_name = Path::new(&key)
        .file_name()
        .with_context(|| format!("S3 key has no file name: {}", key))?;
    let destination_path = destination_dir.join(file_name);

    info!(%bucket, %key, destination = %destination_path.display(), "downloading backup");

    let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
        .endpoint_url(&spaces_config.endpoint_url)
        .region(Region::new(spaces_config.region.clone()))
        .credentials_provider(s3::config::Credentials::new(
            &spaces_config.access_key_id,
            &spaces_config.secret_access_key,
            None, // session_token
            None, // expiry
            "Static", // provider_name
        ))
        .load()
        .await;

    let client = s3::Client::new(&sdk_config);

    let mut output_file = File::create(&destination_path)
        .await
        .with_context(|| format!("Failed to create destination file: {}", destination_path.display()))?;

    let mut object = client
        .get_object()
        .bucket(&bucket)
        .key(&key)
        .send()
        .await
        .with_context(|| format!("Failed to get object s3://{}/{}", bucket, key))?;

    let mut total_bytes_downloaded = 0;
    while let Some(bytes_chunk) = object
        .body
        .try_next()
        .await
        .with_context(|| format!("Failed to read object s3://{}/{}", bucket, key))?
    {
        output_file
            .write_all(&bytes_chunk)
            .await
            .with_context(|| format!("Failed to write to destination file: {}", destination_path.display()))?;
        total_bytes_downloaded += bytes_chunk.len();
    }
    output_file
        .flush()
        .await
        .with_context(|| format!("Failed to flush destination file: {}", destination_path.display()))?;

    info!(bytes = total_bytes_downloaded, "backup downloaded");
    Ok(destination_path)
}
