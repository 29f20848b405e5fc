use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::ArchiveError;

/// Packs `source_dir` into one compressed archive inside `out_dir`.
///
/// The archive holds `source_dir` as its single top-level entry, so extracting
/// with one stripped path component reproduces the tree.
#[async_trait]
pub trait Packager: Send + Sync {
    async fn pack(&self, source_dir: &Path, name: &str, out_dir: &Path) -> Result<PathBuf, ArchiveError>;
}
