use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::application::ports::{CommandOutput, CommandRequest, CommandRunner};
use crate::error::CommandError;

/// Runs local processes with tokio.
///
/// With `inherit_stdio` the child writes straight to our terminal and the
/// captured output is empty.
#[derive(Debug, Clone, Default)]
pub struct LocalCommandRunner {
    inherit_stdio: bool,
}

impl LocalCommandRunner {
    pub fn captured() -> Self {
        Self { inherit_stdio: false }
    }

    pub fn inherited() -> Self {
        Self { inherit_stdio: true }
    }
}

#[async_trait]
impl CommandRunner for LocalCommandRunner {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
        let command_line = request.display();
        debug!(command = %command_line, cwd = %request.cwd.display(), "Spawning local command");

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .current_dir(&request.cwd)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if self.inherit_stdio {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let child = cmd.spawn().map_err(|e| CommandError::Spawn {
            command: command_line.clone(),
            message: e.to_string(),
        })?;

        let wait = child.wait_with_output();
        let output = match request.timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(command = %command_line, "Local command timed out");
                    return Err(CommandError::Timeout {
                        command: command_line,
                        secs: limit.as_secs(),
                    });
                }
            },
            None => wait.await,
        }
        .map_err(|e| CommandError::Spawn {
            command: command_line.clone(),
            message: e.to_string(),
        })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
