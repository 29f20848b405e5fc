use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::CommandError;

/// One local process invocation.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl CommandRequest {
    /// Build from argv tokens; the first token is the program.
    pub fn from_tokens(tokens: &[String], cwd: impl Into<PathBuf>) -> Option<Self> {
        let (program, args) = tokens.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd: cwd.into(),
            env: Vec::new(),
            timeout: None,
        })
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Turns a non-zero exit into `CommandError::NonZeroExit`.
    pub fn into_result(self, command: &str) -> Result<CommandOutput, CommandError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CommandError::NonZeroExit {
                command: command.to_string(),
                code: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Trait for running local processes
///
/// Non-zero exits come back as `Ok` with the status set; `Err` is reserved for
/// spawn failures and timeouts.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError>;
}
