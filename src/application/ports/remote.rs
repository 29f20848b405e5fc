use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::RemoteError;

#[derive(Clone)]
pub enum Credential {
    Password(String),
    IdentityFile(PathBuf),
    /// Whatever the local ssh agent / default keys provide.
    Agent,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Password(_) => write!(f, "Password(***)"),
            Credential::IdentityFile(path) => f.debug_tuple("IdentityFile").field(path).finish(),
            Credential::Agent => write!(f, "Agent"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub credential: Credential,
}

impl std::fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// An open remote command + file-transfer channel.
///
/// Operations take `&mut self`, so commands on one session are strictly sequential.
/// A non-zero exit is reported in `ExecOutput`, never as an error.
#[async_trait]
pub trait RemoteSession: Send {
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, RemoteError>;

    async fn put_file(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError>;

    /// Idempotent.
    async fn close(&mut self) -> Result<(), RemoteError>;
}

#[async_trait]
pub trait RemoteConnector: Send + Sync {
    type Session: RemoteSession + 'static;

    async fn connect(&self, target: &RemoteTarget) -> Result<Self::Session, RemoteError>;
}
