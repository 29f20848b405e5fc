use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::application::ports::{CommandOutput, CommandRequest, CommandRunner, RepositoryRef, SourceFetcher};
use crate::error::CommandError;
use crate::infrastructure::process::LocalCommandRunner;

/// Shallow `git clone` of a single branch.
///
/// When the requested branch does not exist, the remote's default branch (from
/// `git ls-remote --symref`) is tried once.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    runner: LocalCommandRunner,
    timeout: Duration,
}

impl GitFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            runner: LocalCommandRunner::captured(),
            timeout,
        }
    }

    fn git(&self, args: Vec<String>, cwd: &Path) -> CommandRequest {
        CommandRequest {
            program: "git".to_string(),
            args,
            cwd: cwd.to_path_buf(),
            env: vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())],
            timeout: Some(self.timeout),
        }
    }

    async fn clone_branch(&self, url: &str, branch: &str, dest: &Path) -> Result<CommandOutput, CommandError> {
        let cwd = dest.parent().unwrap_or(dest);
        let args = vec![
            "clone".to_string(),
            "--depth".to_string(),
            "1".to_string(),
            "--branch".to_string(),
            branch.to_string(),
            url.to_string(),
            dest.to_string_lossy().to_string(),
        ];
        self.runner.run(&self.git(args, cwd)).await
    }

    async fn default_branch(&self, url: &str, cwd: &Path) -> Option<String> {
        let args = vec![
            "ls-remote".to_string(),
            "--symref".to_string(),
            url.to_string(),
            "HEAD".to_string(),
        ];
        let output = self.runner.run(&self.git(args, cwd)).await.ok()?;
        if !output.success() {
            return None;
        }
        parse_symref_head(&output.stdout)
    }
}

/// Branch from `git ls-remote --symref <url> HEAD` output:
/// `ref: refs/heads/<branch>\tHEAD`.
pub fn parse_symref_head(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("ref: refs/heads/")?;
        let branch = rest.split_whitespace().next()?;
        (!branch.is_empty()).then(|| branch.to_string())
    })
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(&self, repo: &RepositoryRef, dest: &Path) -> Result<(), CommandError> {
        info!("Cloning repository: {} (branch {})", repo.url, repo.branch);

        let output = self.clone_branch(&repo.url, &repo.branch, dest).await?;
        if output.success() {
            return Ok(());
        }

        if output.stderr.contains("not found in upstream origin") {
            let cwd = dest.parent().unwrap_or(dest);
            if let Some(branch) = self.default_branch(&repo.url, cwd).await {
                if branch != repo.branch {
                    warn!("Branch '{}' not found, retrying with default branch '{}'", repo.branch, branch);
                    if dest.exists() {
                        let _ = tokio::fs::remove_dir_all(dest).await;
                    }
                    return self
                        .clone_branch(&repo.url, &branch, dest)
                        .await?
                        .into_result("git clone")
                        .map(|_| ());
                }
            }
        }

        warn!("Git clone failed: {}", output.stderr.trim());
        output.into_result("git clone").map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symref_head() {
        let output = "ref: refs/heads/master\tHEAD\n3f2a9c0d1e\tHEAD\n";
        assert_eq!(parse_symref_head(output), Some("master".to_string()));
    }

    #[test]
    fn test_parse_symref_head_missing() {
        assert_eq!(parse_symref_head("3f2a9c0d1e\tHEAD\n"), None);
        assert_eq!(parse_symref_head(""), None);
    }

    #[tokio::test]
    async fn test_clone_of_missing_repository_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let fetcher = GitFetcher::new(Duration::from_secs(10));
        let repo = RepositoryRef {
            name: "nope".to_string(),
            url: dir.path().join("does-not-exist").to_string_lossy().to_string(),
            branch: "main".to_string(),
        };

        let result = fetcher.fetch(&repo, &dir.path().join("clone")).await;
        assert!(result.is_err());
    }
}
