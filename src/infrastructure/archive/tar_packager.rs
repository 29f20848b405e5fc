use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

use crate::application::ports::Packager;
use crate::error::ArchiveError;

/// Packs with the system `tar` into `<out_dir>/<name>.tar.gz`.
#[derive(Debug, Clone, Default)]
pub struct TarPackager;

impl TarPackager {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Packager for TarPackager {
    async fn pack(&self, source_dir: &Path, name: &str, out_dir: &Path) -> Result<PathBuf, ArchiveError> {
        let parent = source_dir.parent().ok_or_else(|| ArchiveError::Failed {
            source_dir: source_dir.to_path_buf(),
            code: None,
            stderr: "source directory has no parent".to_string(),
        })?;
        let entry = source_dir.file_name().ok_or_else(|| ArchiveError::Failed {
            source_dir: source_dir.to_path_buf(),
            code: None,
            stderr: "source directory has no name".to_string(),
        })?;

        let archive_path = out_dir.join(format!("{}.tar.gz", name));
        info!("Packing {:?} into {:?}", source_dir, archive_path);

        let output = Command::new("tar")
            .arg("-czf")
            .arg(&archive_path)
            .arg("-C")
            .arg(parent)
            .arg(entry)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ArchiveError::ToolUnavailable {
                    tool: "tar".to_string(),
                    message: e.to_string(),
                },
                _ => ArchiveError::Io(e),
            })?;

        if !output.status.success() {
            // tar may leave a truncated file behind
            let _ = tokio::fs::remove_file(&archive_path).await;
            return Err(ArchiveError::Failed {
                source_dir: source_dir.to_path_buf(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(archive_path)
    }
}
