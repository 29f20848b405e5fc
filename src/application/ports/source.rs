use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::CommandError;

pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub name: String,
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

/// Fetches a repository into an existing, empty directory.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, repo: &RepositoryRef, dest: &Path) -> Result<(), CommandError>;
}
