use std::path::PathBuf;
use thiserror::Error;

/// 탐지 중 건너뛴 경로. 치명적이지 않으며 DetectionResult에 모아서 보고한다.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("skipped {path:?}: {message}")]
pub struct DetectionError {
    pub path: Option<PathBuf>,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed YAML config {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("malformed JSON config {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Local or remote command failure.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {message}")]
    Spawn { command: String, message: String },

    #[error("`{command}` exited with code {code:?}: {stderr}")]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("connection to {target} failed: {message}")]
    Connection { target: String, message: String },

    #[error("remote {operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("upload of {local:?} to {remote} failed: {message}")]
    Transfer {
        local: PathBuf,
        remote: String,
        message: String,
    },

    #[error("remote session is closed")]
    Closed,

    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("packaging tool `{tool}` is unavailable: {message}")]
    ToolUnavailable { tool: String, message: String },

    #[error("packaging {source_dir:?} failed with code {code:?}: {stderr}")]
    Failed {
        source_dir: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Early exit of one DeploymentWorkflow run. `Stopped` marks the session `stopped`,
/// every other variant marks it `failed`.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("clone failed: {0}")]
    Clone(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("{step} failed: {detail}")]
    Step { step: String, detail: String },

    #[error("deployment stopped by request")]
    Stopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    pub fn step(step: impl Into<String>, detail: impl Into<String>) -> Self {
        DeployError::Step {
            step: step.into(),
            detail: detail.into(),
        }
    }
}
