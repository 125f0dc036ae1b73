// controller-restore/src/restore/archive.rs
use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

/// Name of the mongodump directory inside a controller backup.
const DUMP_DIR_NAME: &str = "dump";

/// Extracts a GZipped TAR archive to a destination directory.
///
/// # Arguments
/// * `archive_path` - Path to the `.tar.gz` backup file.
/// * `extract_to_dir` - The directory where the contents will be extracted.
///
/// # Returns
/// Path to the directory where files were extracted.
pub fn extract_tar_gz_archive(archive_path: &Path, extract_to_dir: &Path) -> Result<PathBuf> {
    if !archive_path.is_file() {
        return Err(anyhow::anyhow!(
            "Archive for extraction is not a file: {}",
            archive_path.display()
        ));
    }

    if !extract_to_dir.exists() {
        std::fs::create_dir_all(extract_to_dir).with_context(|| {
            format!(
                "Failed to create extraction directory: {}",
                extract_to_dir.display()
            )
        })?;
    } else if !extract_to_dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Extraction path exists but is not a directory: {}",
            extract_to_dir.display()
        ));
    }

    info!(
        archive = %archive_path.display(),
        destination = %extract_to_dir.display(),
        "extracting backup archive"
    );

    let archive_file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive file: {}", archive_path.display()))?;
    let gz_decoder = flate2::read::GzDecoder::new(archive_file);
    let mut archive = tar::Archive::new(gz_decoder);

    archive.unpack(extract_to_dir).with_context(|| {
        format!(
            "Failed to unpack archive {} to {}",
            archive_path.display(),
            extract_to_dir.display()
        )
    })?;

    Ok(extract_to_dir.to_path_buf())
}

/// Locates the mongodump directory in an extracted backup, shallowest first.
pub fn find_dump_dir(extracted_dir: &Path) -> Result<PathBuf> {
    WalkDir::new(extracted_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir() && entry.file_name() == DUMP_DIR_NAME)
        .min_by_key(|entry| entry.depth())
        .map(|entry| entry.into_path())
        .with_context(|| {
            format!(
                "No '{}' directory found in backup extracted at {}",
                DUMP_DIR_NAME,
                extracted_dir.display()
            )
        })
}
