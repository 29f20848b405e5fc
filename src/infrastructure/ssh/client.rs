use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::application::ports::{
    Credential, ExecOutput, RemoteConnector, RemoteSession, RemoteTarget,
};
use crate::error::RemoteError;

/// Opens sessions through the system OpenSSH client.
///
/// `connect` starts a multiplexing master (`ControlMaster`), and every `exec` and
/// `put_file` afterwards rides on that one connection through its control socket.
/// Password credentials need `sshpass` on the PATH.
#[derive(Debug, Clone)]
pub struct OpenSshConnector {
    connect_timeout: Duration,
    exec_timeout: Duration,
}

impl OpenSshConnector {
    pub fn new(connect_timeout: Duration, exec_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            exec_timeout,
        }
    }
}

pub struct OpenSshSession {
    target: RemoteTarget,
    control_dir: TempDir,
    exec_timeout: Duration,
    closed: bool,
}

impl OpenSshSession {
    fn control_path(&self) -> PathBuf {
        self.control_dir.path().join("ctl")
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.target.user, self.target.host)
    }
}

/// Options shared by the master and the multiplexed clients.
fn common_options(target: &RemoteTarget, connect_timeout: Duration) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)),
        "-o".to_string(),
        "ServerAliveInterval=15".to_string(),
        "-o".to_string(),
        "ServerAliveCountMax=3".to_string(),
    ];

    match &target.credential {
        Credential::IdentityFile(path) => {
            args.push("-i".to_string());
            args.push(path.to_string_lossy().to_string());
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }
        Credential::Agent => {
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }
        Credential::Password(_) => {
            args.extend([
                "-o".to_string(),
                "PreferredAuthentications=password,keyboard-interactive".to_string(),
                "-o".to_string(),
                "PubkeyAuthentication=no".to_string(),
            ]);
        }
    }

    args
}

#[async_trait]
impl RemoteConnector for OpenSshConnector {
    type Session = OpenSshSession;

    async fn connect(&self, target: &RemoteTarget) -> Result<OpenSshSession, RemoteError> {
        let connection_error = |message: String| RemoteError::Connection {
            target: target.to_string(),
            message,
        };

        let control_dir = tempfile::Builder::new()
            .prefix("automata-ssh")
            .tempdir()
            .map_err(|e| connection_error(format!("cannot create control directory: {}", e)))?;
        let control_path = control_dir.path().join("ctl");
        let log_path = control_dir.path().join("master.log");
        let log_file = std::fs::File::create(&log_path)
            .map_err(|e| connection_error(format!("cannot create master log: {}", e)))?;

        let mut ssh_args = vec![
            "-M".to_string(),
            "-S".to_string(),
            control_path.to_string_lossy().to_string(),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            "-f".to_string(),
            "-N".to_string(),
            "-p".to_string(),
            target.port.to_string(),
        ];
        ssh_args.extend(common_options(target, self.connect_timeout));
        ssh_args.push(format!("{}@{}", target.user, target.host));

        let mut cmd = match &target.credential {
            Credential::Password(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg("ssh").args(&ssh_args).env("SSHPASS", password);
                cmd
            }
            _ => {
                let mut cmd = Command::new("ssh");
                cmd.args(&ssh_args);
                cmd
            }
        };

        // The backgrounded master keeps inherited descriptors open, so stderr goes
        // to a file instead of a pipe we would wait on forever.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log_file))
            .kill_on_drop(true);

        info!("Opening SSH master connection to {}", target);
        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => connection_error(format!(
                "{} is not installed",
                if matches!(target.credential, Credential::Password(_)) { "sshpass" } else { "ssh" }
            )),
            _ => connection_error(e.to_string()),
        })?;

        let limit = self.connect_timeout + Duration::from_secs(5);
        let status = match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status.map_err(|e| connection_error(e.to_string()))?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(RemoteError::Timeout {
                    operation: format!("connect to {}", target),
                    secs: limit.as_secs(),
                });
            }
        };

        if !status.success() {
            let log = std::fs::read_to_string(&log_path).unwrap_or_default();
            warn!("SSH master connection to {} failed: {}", target, log.trim());
            return Err(connection_error(if log.trim().is_empty() {
                format!("ssh exited with {:?}", status.code())
            } else {
                log.trim().to_string()
            }));
        }

        Ok(OpenSshSession {
            target: target.clone(),
            control_dir,
            exec_timeout: self.exec_timeout,
            closed: false,
        })
    }
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, RemoteError> {
        if self.closed {
            return Err(RemoteError::Closed);
        }

        debug!(target = %self.target, command = %command, "Remote exec");

        let output = Command::new("ssh")
            .arg("-S")
            .arg(self.control_path())
            .args(["-o", "ControlMaster=no", "-o", "BatchMode=yes"])
            .arg("-p")
            .arg(self.target.port.to_string())
            .arg(self.destination())
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.exec_timeout, output)
            .await
            .map_err(|_| RemoteError::Timeout {
                operation: format!("exec `{}`", command),
                secs: self.exec_timeout.as_secs(),
            })??;

        Ok(ExecOutput {
            exit_status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn put_file(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        if self.closed {
            return Err(RemoteError::Closed);
        }

        debug!(target = %self.target, local = %local.display(), remote = %remote, "Remote upload");

        let output = Command::new("scp")
            .arg("-q")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path().display()))
            .args(["-o", "BatchMode=yes"])
            .arg("-P")
            .arg(self.target.port.to_string())
            .arg(local)
            .arg(format!("{}:{}", self.destination(), remote))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.exec_timeout, output)
            .await
            .map_err(|_| RemoteError::Timeout {
                operation: format!("upload {}", local.display()),
                secs: self.exec_timeout.as_secs(),
            })?
            .map_err(|e| RemoteError::Transfer {
                local: local.to_path_buf(),
                remote: remote.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(RemoteError::Transfer {
                local: local.to_path_buf(),
                remote: remote.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let status = Command::new("ssh")
            .arg("-S")
            .arg(self.control_path())
            .args(["-O", "exit"])
            .arg(self.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        if !status.success() {
            debug!("SSH master for {} was already gone", self.target);
        }
        Ok(())
    }
}

impl Drop for OpenSshSession {
    fn drop(&mut self) {
        if !self.closed {
            let _ = std::process::Command::new("ssh")
                .arg("-S")
                .arg(self.control_path())
                .args(["-O", "exit"])
                .arg(self.destination())
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}
