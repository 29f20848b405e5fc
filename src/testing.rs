//! Fakes for the port traits, shared by service tests.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::application::ports::{
    CommandOutput, CommandRequest, CommandRunner, ExecOutput, Packager, RemoteConnector,
    RemoteSession, RemoteTarget, RepositoryRef, SourceFetcher,
};
use crate::error::{ArchiveError, CommandError, RemoteError};

/// Records every request; commands containing a configured substring exit 1.
#[derive(Default)]
pub struct FakeCommandRunner {
    pub requests: Mutex<Vec<CommandRequest>>,
    failing: Vec<String>,
}

impl FakeCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, needle: &str) -> Self {
        self.failing.push(needle.to_string());
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.display()).collect()
    }
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
        self.requests.lock().unwrap().push(request.clone());
        let display = request.display();
        let failed = self.failing.iter().any(|n| display.contains(n.as_str()));

        Ok(CommandOutput {
            status: Some(if failed { 1 } else { 0 }),
            stdout: String::new(),
            stderr: if failed { "simulated failure".to_string() } else { String::new() },
        })
    }
}

/// What a fake remote host saw.
#[derive(Debug, Default)]
pub struct RemoteLog {
    pub connects: usize,
    pub commands: Vec<String>,
    pub uploads: Vec<(PathBuf, String)>,
    pub closes: usize,
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub log: Arc<Mutex<RemoteLog>>,
    refuse: Option<String>,
    /// (substring, output) pairs; first match wins, otherwise exit 0 with empty output.
    responses: Vec<(String, ExecOutput)>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing(message: &str) -> Self {
        Self {
            refuse: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn respond(mut self, needle: &str, exit_status: i32, stdout: &str) -> Self {
        self.responses.push((
            needle.to_string(),
            ExecOutput {
                exit_status,
                stdout: stdout.to_string(),
                stderr: if exit_status == 0 { String::new() } else { "remote failure".to_string() },
            },
        ));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().commands.clone()
    }
}

pub struct FakeSession {
    log: Arc<Mutex<RemoteLog>>,
    responses: Vec<(String, ExecOutput)>,
    closed: bool,
}

#[async_trait]
impl RemoteConnector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self, target: &RemoteTarget) -> Result<FakeSession, RemoteError> {
        self.log.lock().unwrap().connects += 1;
        if let Some(message) = &self.refuse {
            return Err(RemoteError::Connection {
                target: target.to_string(),
                message: message.clone(),
            });
        }
        Ok(FakeSession {
            log: self.log.clone(),
            responses: self.responses.clone(),
            closed: false,
        })
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, RemoteError> {
        if self.closed {
            return Err(RemoteError::Closed);
        }
        self.log.lock().unwrap().commands.push(command.to_string());
        Ok(self
            .responses
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }

    async fn put_file(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        if self.closed {
            return Err(RemoteError::Closed);
        }
        if !local.exists() {
            return Err(RemoteError::Transfer {
                local: local.to_path_buf(),
                remote: remote.to_string(),
                message: "local file missing".to_string(),
            });
        }
        self.log
            .lock()
            .unwrap()
            .uploads
            .push((local.to_path_buf(), remote.to_string()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        if !self.closed {
            self.closed = true;
            self.log.lock().unwrap().closes += 1;
        }
        Ok(())
    }
}

type Hook = Arc<dyn Fn() + Send + Sync>;

/// Writes a fixed set of files instead of cloning.
#[derive(Clone, Default)]
pub struct FakeFetcher {
    files: Vec<(String, String)>,
    fail: bool,
    hook: Option<Hook>,
    pub destinations: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeFetcher {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        Self {
            files: files.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Runs after the files are written.
    pub fn on_fetch(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, repo: &RepositoryRef, dest: &Path) -> Result<(), CommandError> {
        self.destinations.lock().unwrap().push(dest.to_path_buf());
        if self.fail {
            return Err(CommandError::NonZeroExit {
                command: format!("git clone {}", repo.url),
                code: Some(128),
                stderr: "repository not found".to_string(),
            });
        }
        for (rel, content) in &self.files {
            let path = dest.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, content).unwrap();
        }
        if let Some(hook) = &self.hook {
            hook();
        }
        Ok(())
    }
}

/// Writes a placeholder archive and remembers where.
#[derive(Clone, Default)]
pub struct FakePackager {
    fail: bool,
    pub archives: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakePackager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Packager for FakePackager {
    async fn pack(&self, source_dir: &Path, name: &str, out_dir: &Path) -> Result<PathBuf, ArchiveError> {
        if self.fail {
            return Err(ArchiveError::ToolUnavailable {
                tool: "tar".to_string(),
                message: "not installed".to_string(),
            });
        }
        let path = out_dir.join(format!("{}.tar.gz", name));
        std::fs::write(&path, source_dir.to_string_lossy().as_bytes())?;
        self.archives.lock().unwrap().push(path.clone());
        Ok(path)
    }
}

/// Log lines written while the returned guard is alive on this thread.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn start() -> (Self, tracing::subscriber::DefaultGuard) {
        let logs = Self::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    pub fn contains(&self, needle: &str) -> bool {
        String::from_utf8_lossy(&self.0.lock().unwrap()).contains(needle)
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
