//! Parsers for textual output of remote commands and for repository URLs.
//! Each function documents the exact input it expects.

use serde::Serialize;

use crate::application::ports::{RepositoryRef, DEFAULT_BRANCH};

/// One line of `docker ps --format "{{.Names}}:{{.Status}}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLine {
    pub name: String,
    pub status: String,
}

/// Lines of `docker ps [-a] --format "{{.Names}}:{{.Status}}"` whose name is exactly
/// `container`. `docker ps --filter name=` is a substring match, so `api-app`
/// would otherwise also match `my-api-app`.
pub fn parse_container_lines(output: &str, container: &str) -> Vec<ContainerLine> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            let (name, status) = line.split_once(':').unwrap_or((line, ""));
            (name.trim() == container).then(|| ContainerLine {
                name: name.trim().to_string(),
                status: status.trim().to_string(),
            })
        })
        .collect()
}

/// Host port from the first mapping in either format:
/// - `docker port`: `8000/tcp -> 0.0.0.0:8000`
/// - `docker ps` Ports column: `0.0.0.0:8080->8080/tcp`
pub fn parse_published_port(output: &str) -> Option<u16> {
    output.lines().find_map(|line| {
        let (left, right) = line.split_once("->")?;
        let host_side = if left.contains('/') { right } else { left };
        host_side.trim().rsplit(':').next()?.trim().parse().ok()
    })
}

/// Application state reported by the verify step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AppStatus {
    Running { container: String, port: Option<u16> },
    Stopped { container: String },
    NotFound,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Running { .. } => "running",
            AppStatus::Stopped { .. } => "stopped",
            AppStatus::NotFound => "not_found",
        }
    }
}

/// Combine `docker ps`, `docker ps -a` and `docker port` output into a status.
pub fn classify_container(
    running_output: &str,
    all_output: &str,
    port_output: &str,
    container: &str,
) -> AppStatus {
    if let Some(line) = parse_container_lines(running_output, container).into_iter().next() {
        return AppStatus::Running {
            container: format!("{}:{}", line.name, line.status),
            port: parse_published_port(port_output),
        };
    }

    match parse_container_lines(all_output, container).into_iter().next() {
        Some(line) => AppStatus::Stopped {
            container: format!("{}:{}", line.name, line.status),
        },
        None => AppStatus::NotFound,
    }
}

/// Parse a repository URL.
///
/// Accepted forms:
/// - `https://host/owner/repo`
/// - `https://host/owner/repo.git`
/// - `https://host/owner/repo/tree/<branch>` (branch may contain `/`)
/// - `git@host:owner/repo.git`
///
/// The branch is `main` unless the URL names one.
pub fn parse_repository_url(input: &str) -> Option<RepositoryRef> {
    let input = input.trim().trim_end_matches('/');

    if let Some(rest) = input.strip_prefix("git@") {
        let (_, path) = rest.split_once(':')?;
        let repo = path.rsplit('/').next()?;
        let name = repo.trim_end_matches(".git");
        if name.is_empty() {
            return None;
        }
        return Some(RepositoryRef {
            name: name.to_string(),
            url: input.to_string(),
            branch: DEFAULT_BRANCH.to_string(),
        });
    }

    let (scheme, rest) = input.split_once("://")?;
    if scheme != "https" && scheme != "http" {
        return None;
    }

    let mut parts = rest.split('/');
    let host = parts.next().filter(|h| !h.is_empty())?;
    let owner = parts.next().filter(|o| !o.is_empty())?;
    let repo = parts.next().filter(|r| !r.is_empty())?;
    let name = repo.trim_end_matches(".git");
    if name.is_empty() {
        return None;
    }

    let remainder: Vec<&str> = parts.collect();
    let branch = match remainder.as_slice() {
        [] => DEFAULT_BRANCH.to_string(),
        ["tree", branch @ ..] if !branch.is_empty() => branch.join("/"),
        _ => return None,
    };

    Some(RepositoryRef {
        name: name.to_string(),
        url: format!("{}://{}/{}/{}", scheme, host, owner, repo),
        branch,
    })
}
