use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::application::events::{Event, EventBus};
use crate::application::ports::{
    Credential, ExecOutput, Packager, RemoteConnector, RemoteSession, RemoteTarget, RepositoryRef,
    SourceFetcher,
};
use crate::application::services::output_parsers::{classify_container, AppStatus};
use crate::application::services::remote_steps::{self, FailurePolicy, RemoteStep};
use crate::error::DeployError;
use crate::infrastructure::logging::{BoundaryLogger, Timer};
use crate::project::{
    normalize_project_name, ConfigModel, ContainerSettings, DetectionResult,
    PipelineConfig, ProjectDetector, DEFAULT_CONFIG_FILE,
};
use crate::state::{SessionHandle, SessionRegistry, SessionStatus};

/// Remote host the repository is deployed to.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSpec {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Parent directory; the project lands in `<deploy_path>/<project>`.
    #[serde(default = "default_deploy_path")]
    pub deploy_path: String,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

fn default_deploy_path() -> String {
    "/opt".to_string()
}

impl ServerSpec {
    pub fn target(&self) -> RemoteTarget {
        let credential = match (&self.identity_file, &self.password) {
            (Some(key), _) => Credential::IdentityFile(key.clone()),
            (None, Some(password)) if !password.is_empty() => Credential::Password(password.clone()),
            _ => Credential::Agent,
        };
        RemoteTarget {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            credential,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentRequest {
    pub server: ServerSpec,
    pub repository: RepositoryRef,
}

/// Named transitions of one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Started,
    Cloned,
    Analyzed,
    ConfigGenerated,
    Packaged,
    Connected,
    Uploaded,
    DependenciesInstalled,
    Launched,
    Verified,
    Completed,
    Failed,
    Stopped,
}

impl WorkflowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStep::Started => "started",
            WorkflowStep::Cloned => "cloned",
            WorkflowStep::Analyzed => "analyzed",
            WorkflowStep::ConfigGenerated => "config_generated",
            WorkflowStep::Packaged => "packaged",
            WorkflowStep::Connected => "connected",
            WorkflowStep::Uploaded => "uploaded",
            WorkflowStep::DependenciesInstalled => "dependencies_installed",
            WorkflowStep::Launched => "launched",
            WorkflowStep::Verified => "verified",
            WorkflowStep::Completed => "completed",
            WorkflowStep::Failed => "failed",
            WorkflowStep::Stopped => "stopped",
        }
    }
}

/// One message on a deployment's progress stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Step { step: WorkflowStep, message: String },
    Detail { message: String },
    Finished {
        status: SessionStatus,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        app: Option<AppStatus>,
    },
}

impl ProgressEvent {
    pub fn message(&self) -> &str {
        match self {
            ProgressEvent::Step { message, .. }
            | ProgressEvent::Detail { message }
            | ProgressEvent::Finished { message, .. } => message,
        }
    }
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Result of `test_connection`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub success: bool,
    pub message: String,
}

/// Fans progress out to the caller's channel and the event bus.
struct Progress<'a, EB: EventBus> {
    tx: &'a ProgressSender,
    event_bus: &'a EB,
    session_id: &'a str,
}

impl<'a, EB: EventBus> Progress<'a, EB> {
    async fn step(&self, step: WorkflowStep, message: String) {
        info!("[{}] {}: {}", self.session_id, step.as_str(), message);
        self.event_bus
            .emit(Event::deployment_log(self.session_id, step.as_str(), message.clone()))
            .await;
        // A caller that went away does not stop the deployment.
        let _ = self.tx.send(ProgressEvent::Step { step, message });
    }

    async fn detail(&self, message: String) {
        self.event_bus
            .emit(Event::deployment_log(self.session_id, "detail", message.clone()))
            .await;
        let _ = self.tx.send(ProgressEvent::Detail { message });
    }
}

/// Local scratch space of one run; removed when dropped.
struct Workspace {
    clone_root: TempDir,
    archive_dir: TempDir,
}

impl Workspace {
    fn create() -> std::io::Result<Self> {
        Ok(Self {
            clone_root: tempfile::Builder::new().prefix("automata-clone").tempdir()?,
            archive_dir: tempfile::Builder::new().prefix("automata-archive").tempdir()?,
        })
    }

    fn clone_dir(&self, project: &str) -> PathBuf {
        self.clone_root.path().join(project)
    }

    fn close(self) {
        for dir in [self.clone_root, self.archive_dir] {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("Failed to remove {:?}: {}", path, e);
            }
        }
    }
}

/// What the local half of the run hands to the remote half.
struct Prepared {
    archive: PathBuf,
    detection: DetectionResult,
    settings: ContainerSettings,
}

/// DeploymentWorkflow - 저장소를 원격 서버에 배포
///
/// 책임:
/// - clone → 분석 → 설정 생성 → 패키징 → 업로드 → 설치 → 실행 → 검증 순서 실행
/// - 단계마다 진행 메시지 발행 (호출자 채널 + EventBus)
/// - 세션 레지스트리 상태 기록, 단계 사이에서 중지 요청 확인
/// - 모든 종료 경로에서 로컬 clone/아카이브 삭제, 원격 세션 종료
pub struct DeploymentWorkflow<C, F, P, EB>
where
    C: RemoteConnector,
    F: SourceFetcher,
    P: Packager,
    EB: EventBus,
{
    connector: Arc<C>,
    fetcher: Arc<F>,
    packager: Arc<P>,
    registry: Arc<SessionRegistry>,
    event_bus: EB,
    logger: Arc<BoundaryLogger>,
    detector: ProjectDetector,
    verify_delay: Duration,
    http_probe: Option<reqwest::Client>,
}

impl<C, F, P, EB> DeploymentWorkflow<C, F, P, EB>
where
    C: RemoteConnector,
    F: SourceFetcher,
    P: Packager,
    EB: EventBus,
{
    pub fn new(
        connector: Arc<C>,
        fetcher: Arc<F>,
        packager: Arc<P>,
        registry: Arc<SessionRegistry>,
        event_bus: EB,
        logger: Arc<BoundaryLogger>,
    ) -> Self {
        let http_probe = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| warn!("HTTP probe disabled: {}", e))
            .ok();

        Self {
            connector,
            fetcher,
            packager,
            registry,
            event_bus,
            logger,
            detector: ProjectDetector::new(),
            verify_delay: Duration::from_secs(2),
            http_probe,
        }
    }

    /// Pause between starting the container and checking on it.
    pub fn with_verify_delay(mut self, delay: Duration) -> Self {
        self.verify_delay = delay;
        self
    }

    pub fn without_http_probe(mut self) -> Self {
        self.http_probe = None;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Register the session. Call `run` with the returned handle to execute it.
    pub async fn start(&self, request: &DeploymentRequest) -> SessionHandle {
        let project = normalize_project_name(&request.repository.name);
        let handle = self.registry.create(&project).await;
        self.event_bus
            .emit(Event::deployment_status(&handle.id, &project, SessionStatus::Running))
            .await;
        handle
    }

    /// `start` followed by `run`.
    pub async fn deploy(&self, request: &DeploymentRequest, progress: &ProgressSender) -> (SessionHandle, SessionStatus) {
        let handle = self.start(request).await;
        let status = self.run(&handle, request, progress).await;
        (handle, status)
    }

    /// Execute a started session to its terminal status. Never panics on step
    /// failures; the outcome is in the returned status, the registry and the
    /// final progress event.
    pub async fn run(&self, handle: &SessionHandle, request: &DeploymentRequest, progress: &ProgressSender) -> SessionStatus {
        let timer = Timer::start();
        let trace_id = handle.id.as_str();
        self.logger
            .service_entry(trace_id, "API", "DeploymentWorkflow", "run", &request.repository.url);

        let reporter = Progress {
            tx: progress,
            event_bus: &self.event_bus,
            session_id: trace_id,
        };
        let target = request.server.target();
        reporter
            .step(
                WorkflowStep::Started,
                format!("Deploying {} ({}) to {}", request.repository.url, request.repository.branch, target),
            )
            .await;

        let result = match Workspace::create() {
            Ok(workspace) => {
                let result = self.execute(handle, request, &target, &workspace, &reporter).await;
                workspace.close();
                result
            }
            Err(e) => Err(DeployError::Io(e)),
        };

        let (status, step, message, app) = match result {
            Ok(app) => {
                let message = match &app {
                    AppStatus::Running { port: Some(port), .. } => {
                        format!("Deployment completed: http://{}:{}", target.host, port)
                    }
                    other => format!("Deployment completed, application is {}", other.as_str()),
                };
                (SessionStatus::Completed, WorkflowStep::Completed, message, Some(app))
            }
            Err(DeployError::Stopped) => (
                SessionStatus::Stopped,
                WorkflowStep::Stopped,
                "Deployment stopped by request".to_string(),
                None,
            ),
            Err(e) => {
                self.logger.service_error(trace_id, "API", "DeploymentWorkflow", "run", &e);
                (SessionStatus::Failed, WorkflowStep::Failed, format!("Deployment failed: {}", e), None)
            }
        };

        let failure_message = (status == SessionStatus::Failed).then(|| message.clone());
        self.registry.finish(&handle.id, status, failure_message).await;

        self.event_bus
            .emit(Event::deployment_log(trace_id, step.as_str(), message.clone()))
            .await;
        if status == SessionStatus::Failed {
            self.event_bus
                .emit(Event::error(Some(trace_id), message.clone()))
                .await;
        }
        self.event_bus
            .emit(Event::deployment_status(trace_id, &handle.project, status))
            .await;
        let _ = progress.send(ProgressEvent::Finished { status, message, app });

        self.logger
            .service_exit(trace_id, "API", "DeploymentWorkflow", "run", timer.elapsed_ms());
        status
    }

    async fn execute(
        &self,
        handle: &SessionHandle,
        request: &DeploymentRequest,
        target: &RemoteTarget,
        workspace: &Workspace,
        reporter: &Progress<'_, EB>,
    ) -> Result<AppStatus, DeployError> {
        let prepared = self.prepare_locally(handle, request, workspace, reporter).await?;

        checkpoint(handle)?;
        self.logger
            .external_call(&handle.id, "DeploymentWorkflow", "SSH", "connect");
        let timer = Timer::start();
        let mut session = match self.connector.connect(target).await {
            Ok(session) => session,
            Err(e) => {
                self.logger
                    .external_error(&handle.id, "DeploymentWorkflow", "SSH", "connect", &e);
                return Err(e.into());
            }
        };
        self.logger
            .external_done(&handle.id, "DeploymentWorkflow", "SSH", "connect", timer.elapsed_ms());
        reporter
            .step(WorkflowStep::Connected, format!("Connected to {}", target))
            .await;

        let remote_path = remote_steps::remote_project_path(&request.server.deploy_path, &handle.project);
        let result = self
            .run_remote(handle, &mut session, &remote_path, &target.host, &prepared, reporter)
            .await;

        if let Err(e) = session.close().await {
            warn!("[{}] Closing remote session failed: {}", handle.id, e);
        }
        result
    }

    /// Clone, analyze, write config and Dockerfile, package.
    async fn prepare_locally(
        &self,
        handle: &SessionHandle,
        request: &DeploymentRequest,
        workspace: &Workspace,
        reporter: &Progress<'_, EB>,
    ) -> Result<Prepared, DeployError> {
        let project = handle.project.as_str();
        let clone_dir = workspace.clone_dir(project);

        checkpoint(handle)?;
        self.logger
            .external_call(&handle.id, "DeploymentWorkflow", "Git", "clone");
        let timer = Timer::start();
        if let Err(e) = self.fetcher.fetch(&request.repository, &clone_dir).await {
            self.logger
                .external_error(&handle.id, "DeploymentWorkflow", "Git", "clone", &e);
            return Err(DeployError::Clone(e.to_string()));
        }
        self.logger
            .external_done(&handle.id, "DeploymentWorkflow", "Git", "clone", timer.elapsed_ms());
        reporter
            .step(
                WorkflowStep::Cloned,
                format!("Cloned {} ({})", request.repository.url, request.repository.branch),
            )
            .await;

        checkpoint(handle)?;
        let detection = self.detector.detect(&clone_dir);
        for skipped in &detection.skipped {
            reporter.detail(format!("Skipped during analysis: {}", skipped)).await;
        }
        reporter
            .step(
                WorkflowStep::Analyzed,
                format!(
                    "Detected [{}] in {} files",
                    detection.tag_list(),
                    detection.file_count
                ),
            )
            .await;

        checkpoint(handle)?;
        let (config, generated) = load_or_generate(&clone_dir, project, &detection)?;
        let settings = config.container_settings(project);
        ConfigModel::ensure_dockerfile(&clone_dir, &settings.dockerfile, &detection)?;
        reporter
            .step(
                WorkflowStep::ConfigGenerated,
                if generated {
                    format!("Generated {} (image {}, port {})", DEFAULT_CONFIG_FILE, settings.image, settings.port)
                } else {
                    format!("Using repository {} (image {}, port {})", DEFAULT_CONFIG_FILE, settings.image, settings.port)
                },
            )
            .await;

        checkpoint(handle)?;
        self.logger
            .external_call(&handle.id, "DeploymentWorkflow", "Archive", "pack");
        let timer = Timer::start();
        let archive = match self
            .packager
            .pack(&clone_dir, project, workspace.archive_dir.path())
            .await
        {
            Ok(archive) => archive,
            Err(e) => {
                self.logger
                    .external_error(&handle.id, "DeploymentWorkflow", "Archive", "pack", &e);
                return Err(e.into());
            }
        };
        self.logger
            .external_done(&handle.id, "DeploymentWorkflow", "Archive", "pack", timer.elapsed_ms());
        let size_kb = std::fs::metadata(&archive).map(|m| m.len() / 1024).unwrap_or(0);
        reporter
            .step(WorkflowStep::Packaged, format!("Packaged project ({} KB)", size_kb))
            .await;

        Ok(Prepared {
            archive,
            detection,
            settings,
        })
    }

    async fn run_remote(
        &self,
        handle: &SessionHandle,
        session: &mut C::Session,
        remote_path: &str,
        host: &str,
        prepared: &Prepared,
        reporter: &Progress<'_, EB>,
    ) -> Result<AppStatus, DeployError> {
        checkpoint(handle)?;
        self.exec(session, &remote_steps::prepare_dir_step(remote_path), reporter)
            .await?;
        let remote_archive = remote_steps::remote_archive_path(remote_path);
        session.put_file(&prepared.archive, &remote_archive).await?;
        for step in remote_steps::unpack_steps(remote_path) {
            self.exec(session, &step, reporter).await?;
        }
        reporter
            .step(WorkflowStep::Uploaded, format!("Uploaded to {}", remote_path))
            .await;

        checkpoint(handle)?;
        self.exec(session, &remote_steps::docker_install_step(), reporter)
            .await?;
        for &tag in &prepared.detection.tags {
            for step in remote_steps::install_steps(tag, remote_path) {
                self.exec(session, &step, reporter).await?;
            }
        }
        reporter
            .step(WorkflowStep::DependenciesInstalled, "Dependencies installed".to_string())
            .await;

        checkpoint(handle)?;
        for step in remote_steps::launch_steps(&prepared.settings, remote_path) {
            self.exec(session, &step, reporter).await?;
        }
        reporter
            .step(
                WorkflowStep::Launched,
                format!("Started container {}", prepared.settings.container_name),
            )
            .await;

        checkpoint(handle)?;
        if !self.verify_delay.is_zero() {
            tokio::time::sleep(self.verify_delay).await;
        }
        let app = self.verify(session, &prepared.settings.container_name).await?;
        if let AppStatus::Running { port: Some(port), .. } = &app {
            self.probe(host, *port, reporter).await;
        }
        reporter
            .step(WorkflowStep::Verified, format!("Application status: {}", app.as_str()))
            .await;

        Ok(app)
    }

    async fn verify(&self, session: &mut C::Session, container: &str) -> Result<AppStatus, DeployError> {
        let commands = remote_steps::verify_commands(container);
        let running = session.exec(&commands.running).await?;

        let app = if running.stdout.trim().is_empty() {
            let all = session.exec(&commands.all).await?;
            classify_container("", &all.stdout, "", container)
        } else {
            let ports = session.exec(&commands.port).await?;
            classify_container(&running.stdout, "", &ports.stdout, container)
        };
        Ok(app)
    }

    /// Never fails the deployment.
    async fn probe(&self, host: &str, port: u16, reporter: &Progress<'_, EB>) {
        let Some(client) = &self.http_probe else {
            return;
        };
        let url = format!("http://{}:{}/", host, port);
        match client.get(&url).send().await {
            Ok(response) => {
                reporter
                    .detail(format!("HTTP probe {} -> {}", url, response.status()))
                    .await
            }
            Err(e) => reporter.detail(format!("HTTP probe {} failed: {}", url, e)).await,
        }
    }

    async fn exec(
        &self,
        session: &mut C::Session,
        step: &RemoteStep,
        reporter: &Progress<'_, EB>,
    ) -> Result<ExecOutput, DeployError> {
        reporter.detail(format!("$ {}", step.command)).await;
        let output = session.exec(&step.command).await?;
        if output.success() {
            return Ok(output);
        }

        let detail = failure_detail(&output);
        match step.policy {
            FailurePolicy::Abort => Err(DeployError::step(step.label.clone(), detail)),
            FailurePolicy::BestEffort => {
                reporter
                    .detail(format!("{} failed (ignored): {}", step.label, detail))
                    .await;
                Ok(output)
            }
        }
    }

    /// Connect, run a trivial command, close.
    pub async fn test_connection(&self, target: &RemoteTarget) -> ConnectionReport {
        let trace_id = uuid::Uuid::new_v4().to_string();
        self.logger
            .external_call(&trace_id, "DeploymentWorkflow", "SSH", "test_connection");

        let mut session = match self.connector.connect(target).await {
            Ok(session) => session,
            Err(e) => {
                self.logger
                    .external_error(&trace_id, "DeploymentWorkflow", "SSH", "test_connection", &e);
                return ConnectionReport {
                    success: false,
                    message: e.to_string(),
                };
            }
        };

        let report = match session.exec("echo \"SSH connection successful\"").await {
            Ok(out) if out.success() => ConnectionReport {
                success: true,
                message: out.stdout.trim().to_string(),
            },
            Ok(out) => ConnectionReport {
                success: false,
                message: failure_detail(&out),
            },
            Err(e) => ConnectionReport {
                success: false,
                message: e.to_string(),
            },
        };
        let _ = session.close().await;
        report
    }
}

fn checkpoint(handle: &SessionHandle) -> Result<(), DeployError> {
    if handle.is_stop_requested() {
        Err(DeployError::Stopped)
    } else {
        Ok(())
    }
}

fn failure_detail(output: &ExecOutput) -> String {
    let text = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    // Keep the tail; installers print a lot before the actual error.
    let tail: Vec<&str> = text.lines().rev().take(5).collect();
    let tail: Vec<&str> = tail.into_iter().rev().collect();
    format!("exit {}: {}", output.exit_status, tail.join("\n"))
}

fn load_or_generate(
    clone_dir: &Path,
    project: &str,
    detection: &DetectionResult,
) -> Result<(PipelineConfig, bool), DeployError> {
    if let Some(config) = ConfigModel::load(&clone_dir.join(DEFAULT_CONFIG_FILE))? {
        return Ok((config, false));
    }
    ConfigModel::write_generated(clone_dir, project, detection, true)?;
    Ok((ConfigModel::generate(project, detection), true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::BroadcastEventBus;
    use crate::testing::{CapturedLogs, FakeConnector, FakeFetcher, FakePackager};
    use std::sync::Mutex;

    type TestWorkflow = DeploymentWorkflow<FakeConnector, FakeFetcher, FakePackager, BroadcastEventBus>;

    struct Harness {
        workflow: TestWorkflow,
        connector: FakeConnector,
        fetcher: FakeFetcher,
        packager: FakePackager,
    }

    fn harness(connector: FakeConnector, fetcher: FakeFetcher, packager: FakePackager) -> Harness {
        let logger = Arc::new(BoundaryLogger::new());
        let workflow = DeploymentWorkflow::new(
            Arc::new(connector.clone()),
            Arc::new(fetcher.clone()),
            Arc::new(packager.clone()),
            Arc::new(SessionRegistry::new()),
            BroadcastEventBus::new_default(logger.clone()),
            logger,
        )
        .with_verify_delay(Duration::ZERO)
        .without_http_probe();

        Harness {
            workflow,
            connector,
            fetcher,
            packager,
        }
    }

    fn python_repo() -> FakeFetcher {
        FakeFetcher::with_files(&[("requirements.txt", "flask\n"), ("app.py", "print('hi')\n")])
    }

    fn running_host() -> FakeConnector {
        FakeConnector::new()
            .respond("docker ps --filter", 0, "demo-app:Up 2 seconds\n")
            .respond("docker port", 0, "8000/tcp -> 0.0.0.0:8000\n")
    }

    fn request() -> DeploymentRequest {
        DeploymentRequest {
            server: ServerSpec {
                host: "10.0.0.7".to_string(),
                port: 22,
                user: "deploy".to_string(),
                password: Some("secret".to_string()),
                identity_file: None,
                deploy_path: "/opt".to_string(),
            },
            repository: RepositoryRef {
                name: "Demo".to_string(),
                url: "https://github.com/acme/demo".to_string(),
                branch: "main".to_string(),
            },
        }
    }

    async fn collect(
        h: &Harness,
        before_run: impl FnOnce(&SessionHandle),
    ) -> (SessionHandle, SessionStatus, Vec<ProgressEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let req = request();
        let handle = h.workflow.start(&req).await;
        before_run(&handle);
        let status = h.workflow.run(&handle, &req, &tx).await;
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (handle, status, events)
    }

    fn steps(events: &[ProgressEvent]) -> Vec<WorkflowStep> {
        events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Step { step, .. } => Some(*step),
                _ => None,
            })
            .collect()
    }

    fn finished(events: &[ProgressEvent]) -> Vec<&ProgressEvent> {
        events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Finished { .. }))
            .collect()
    }

    fn assert_cleaned(h: &Harness) {
        for dest in h.fetcher.destinations.lock().unwrap().iter() {
            assert!(!dest.exists(), "clone dir {:?} left behind", dest);
        }
        for archive in h.packager.archives.lock().unwrap().iter() {
            assert!(!archive.exists(), "archive {:?} left behind", archive);
        }
    }

    #[tokio::test]
    async fn test_successful_deployment() {
        let h = harness(running_host(), python_repo(), FakePackager::new());

        let (handle, status, events) = collect(&h, |_| {}).await;

        assert_eq!(status, SessionStatus::Completed);
        assert_eq!(
            steps(&events),
            vec![
                WorkflowStep::Started,
                WorkflowStep::Cloned,
                WorkflowStep::Analyzed,
                WorkflowStep::ConfigGenerated,
                WorkflowStep::Packaged,
                WorkflowStep::Connected,
                WorkflowStep::Uploaded,
                WorkflowStep::DependenciesInstalled,
                WorkflowStep::Launched,
                WorkflowStep::Verified,
            ]
        );
        match finished(&events).as_slice() {
            [ProgressEvent::Finished { status, message, app }] => {
                assert_eq!(*status, SessionStatus::Completed);
                assert!(message.contains("http://10.0.0.7:8000"));
                assert!(matches!(app, Some(AppStatus::Running { port: Some(8000), .. })));
            }
            other => panic!("unexpected final events: {:?}", other),
        }

        let commands = h.connector.commands();
        assert_eq!(commands[0], "mkdir -p /opt/demo");
        assert!(commands.iter().any(|c| c.contains("pip3 install -r requirements.txt")));
        assert!(commands.iter().any(|c| c.contains("docker build -f Dockerfile -t demo:latest .")));
        assert!(commands.iter().any(|c| c.starts_with("docker run -d --restart unless-stopped --name demo-app")));

        let log = h.connector.log.lock().unwrap();
        assert_eq!(log.uploads[0].1, "/opt/demo/project.tar.gz");
        assert_eq!(log.closes, 1);
        drop(log);

        let session = h.workflow.registry().get(&handle.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_cleaned(&h);
    }

    #[tokio::test]
    async fn test_connection_failure_emits_one_failure_and_cleans_up() {
        let h = harness(FakeConnector::refusing("Authentication failed"), python_repo(), FakePackager::new());

        let (handle, status, events) = collect(&h, |_| {}).await;

        assert_eq!(status, SessionStatus::Failed);
        assert_eq!(finished(&events).len(), 1);
        assert!(events.last().unwrap().message().contains("Authentication failed"));
        assert!(!steps(&events).contains(&WorkflowStep::Connected));

        let session = h.workflow.registry().get(&handle.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert!(!h.fetcher.destinations.lock().unwrap().is_empty());
        assert!(!h.packager.archives.lock().unwrap().is_empty());
        assert_cleaned(&h);
    }

    #[tokio::test]
    async fn test_stop_before_start_skips_everything() {
        let h = harness(running_host(), python_repo(), FakePackager::new());

        let (handle, status, events) = collect(&h, |handle| handle.request_stop()).await;

        assert_eq!(status, SessionStatus::Stopped);
        assert_eq!(steps(&events), vec![WorkflowStep::Started]);
        assert!(h.fetcher.destinations.lock().unwrap().is_empty());
        assert_eq!(h.connector.log.lock().unwrap().connects, 0);

        let session = h.workflow.registry().get(&handle.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stop_between_steps() {
        let slot: Arc<Mutex<Option<SessionHandle>>> = Arc::new(Mutex::new(None));
        let hook_slot = slot.clone();
        let fetcher = python_repo().on_fetch(move || {
            if let Some(handle) = hook_slot.lock().unwrap().as_ref() {
                handle.request_stop();
            }
        });
        let h = harness(running_host(), fetcher, FakePackager::new());

        let (_, status, events) = collect(&h, |handle| {
            *slot.lock().unwrap() = Some(handle.clone());
        })
        .await;

        assert_eq!(status, SessionStatus::Stopped);
        assert_eq!(steps(&events), vec![WorkflowStep::Started, WorkflowStep::Cloned]);
        assert_eq!(h.connector.log.lock().unwrap().connects, 0);
        assert_cleaned(&h);
    }

    #[tokio::test]
    async fn test_failed_install_aborts_and_closes_session() {
        let connector = running_host().respond("pip3 install", 1, "");
        let h = harness(connector, python_repo(), FakePackager::new());

        let (_, status, events) = collect(&h, |_| {}).await;

        assert_eq!(status, SessionStatus::Failed);
        assert!(events.last().unwrap().message().contains("install python requirements"));
        assert!(!h.connector.commands().iter().any(|c| c.starts_with("docker run")));
        assert_eq!(h.connector.log.lock().unwrap().closes, 1);
        assert_cleaned(&h);
    }

    #[tokio::test]
    async fn test_best_effort_failure_is_ignored() {
        let connector = running_host().respond("--upgrade pip", 1, "");
        let h = harness(connector, python_repo(), FakePackager::new());

        let (_, status, _) = collect(&h, |_| {}).await;
        assert_eq!(status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_stopped_container_still_completes() {
        let connector = FakeConnector::new().respond("docker ps -a", 0, "demo-app:Exited (1) 1 second ago\n");
        let h = harness(connector, python_repo(), FakePackager::new());

        let (_, status, events) = collect(&h, |_| {}).await;

        assert_eq!(status, SessionStatus::Completed);
        match finished(&events).as_slice() {
            [ProgressEvent::Finished { app: Some(app), .. }] => assert_eq!(app.as_str(), "stopped"),
            other => panic!("unexpected final events: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_container_completes_as_not_found() {
        let h = harness(FakeConnector::new(), python_repo(), FakePackager::new());

        let (handle, status, events) = collect(&h, |_| {}).await;

        assert_eq!(status, SessionStatus::Completed);
        match finished(&events).as_slice() {
            [ProgressEvent::Finished { app: Some(app), message, .. }] => {
                assert_eq!(*app, AppStatus::NotFound);
                assert!(message.contains("not_found"));
            }
            other => panic!("unexpected final events: {:?}", other),
        }
        let commands = h.connector.commands();
        assert!(commands.iter().any(|c| c.starts_with("docker ps -a")));
        let session = h.workflow.registry().get(&handle.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_clone_and_pack_boundaries_are_closed() {
        let (logs, _guard) = CapturedLogs::start();
        let h = harness(running_host(), python_repo(), FakePackager::new());

        collect(&h, |_| {}).await;

        assert!(logs.contains("[DeploymentWorkflow→Git] clone [←DONE]"));
        assert!(logs.contains("[DeploymentWorkflow→Archive] pack [←DONE]"));
    }

    #[tokio::test]
    async fn test_pack_failure_is_logged_at_boundary() {
        let (logs, _guard) = CapturedLogs::start();
        let h = harness(running_host(), python_repo(), FakePackager::failing());

        collect(&h, |_| {}).await;

        assert!(logs.contains("[DeploymentWorkflow→Git] clone [←DONE]"));
        assert!(logs.contains("[DeploymentWorkflow→Archive] pack [←FAIL]"));
    }

    #[tokio::test]
    async fn test_clone_failure() {
        let h = harness(running_host(), FakeFetcher::failing(), FakePackager::new());

        let (_, status, events) = collect(&h, |_| {}).await;

        assert_eq!(status, SessionStatus::Failed);
        assert!(events.last().unwrap().message().contains("clone failed"));
        assert_eq!(h.connector.log.lock().unwrap().connects, 0);
        assert_cleaned(&h);
    }

    #[tokio::test]
    async fn test_packaging_failure_never_connects() {
        let h = harness(running_host(), python_repo(), FakePackager::failing());

        let (_, status, events) = collect(&h, |_| {}).await;

        assert_eq!(status, SessionStatus::Failed);
        assert_eq!(finished(&events).len(), 1);
        assert_eq!(h.connector.log.lock().unwrap().connects, 0);
        assert_cleaned(&h);
    }

    #[tokio::test]
    async fn test_events_reach_the_bus() {
        let h = harness(running_host(), python_repo(), FakePackager::new());
        let mut rx = h.workflow.event_bus.subscribe();

        let (handle, _, _) = collect(&h, |_| {}).await;

        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::DeploymentStatus { session_id, status, .. } = event {
                assert_eq!(session_id, handle.id);
                statuses.push(status);
            }
        }
        assert_eq!(statuses, vec![SessionStatus::Running, SessionStatus::Completed]);
    }

    #[tokio::test]
    async fn test_connection_check() {
        let h = harness(
            FakeConnector::new().respond("echo", 0, "SSH connection successful\n"),
            python_repo(),
            FakePackager::new(),
        );
        let report = h.workflow.test_connection(&request().server.target()).await;
        assert!(report.success);
        assert_eq!(report.message, "SSH connection successful");

        let refused = harness(FakeConnector::refusing("timeout"), python_repo(), FakePackager::new());
        let report = refused.workflow.test_connection(&request().server.target()).await;
        assert!(!report.success);
    }
}
