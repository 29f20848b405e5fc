use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::application::ports::{
    CommandRequest, CommandRunner, Packager, RemoteConnector, RemoteSession, RemoteTarget,
};
use crate::application::services::remote_steps::{self, RemoteStep};
use crate::error::ConfigError;
use crate::infrastructure::logging::{BoundaryLogger, Timer};
use crate::project::{
    project_name_from_dir, ConfigModel, DetectionResult, PipelineConfig, ProjectDetector,
    StageSpec, TechnologyTag,
};

/// Local pipeline states, entered in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Detect,
    Build,
    Test,
    Deploy,
    Done,
}

impl PipelineStage {
    pub fn next(self) -> Self {
        match self {
            PipelineStage::Detect => PipelineStage::Build,
            PipelineStage::Build => PipelineStage::Test,
            PipelineStage::Test => PipelineStage::Deploy,
            PipelineStage::Deploy | PipelineStage::Done => PipelineStage::Done,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Detect => "detect",
            PipelineStage::Build => "build",
            PipelineStage::Test => "test",
            PipelineStage::Deploy => "deploy",
            PipelineStage::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFilter {
    All,
    Only(PipelineStage),
}

impl StageFilter {
    pub fn includes(&self, stage: PipelineStage) -> bool {
        match self {
            StageFilter::All => true,
            StageFilter::Only(only) => *only == stage,
        }
    }
}

impl FromStr for StageFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(StageFilter::All),
            "detect" => Ok(StageFilter::Only(PipelineStage::Detect)),
            "build" => Ok(StageFilter::Only(PipelineStage::Build)),
            "test" => Ok(StageFilter::Only(PipelineStage::Test)),
            "deploy" => Ok(StageFilter::Only(PipelineStage::Deploy)),
            other => Err(format!(
                "unknown stage '{}' (expected all, detect, build, test or deploy)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    CommandFailed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub label: String,
    pub command: String,
    pub outcome: StepOutcome,
    /// Failures of best-effort steps (stopping a container that is not there) are expected.
    pub best_effort: bool,
}

impl StepReport {
    pub fn failed(&self) -> bool {
        !self.best_effort && matches!(self.outcome, StepOutcome::CommandFailed(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub stage: PipelineStage,
    pub steps: Vec<StepReport>,
}

impl PhaseReport {
    fn new(stage: PipelineStage) -> Self {
        Self {
            stage,
            steps: Vec::new(),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.failed())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub detection: DetectionResult,
    pub config_generated: bool,
    pub phases: Vec<PhaseReport>,
}

impl PipelineReport {
    pub fn has_failures(&self) -> bool {
        self.phases.iter().any(|p| p.failures().next().is_some())
    }

    pub fn phase(&self, stage: PipelineStage) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.stage == stage)
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    /// Relative paths resolve against `root`.
    pub config_path: PathBuf,
    pub filter: StageFilter,
}

/// StageRunner - 로컬 파이프라인 실행 (detect → build → test → deploy)
///
/// 책임:
/// - 탐지된 태그별 StageSpec 명령 실행
/// - 명령 실패는 억제하고 PhaseReport에 기록 (다음 태그/단계로 진행)
/// - 설정 파일이 없으면 생성 후 진행
pub struct StageRunner<R, C, P>
where
    R: CommandRunner,
    C: RemoteConnector,
    P: Packager,
{
    runner: Arc<R>,
    connector: Arc<C>,
    packager: Arc<P>,
    detector: ProjectDetector,
    logger: Arc<BoundaryLogger>,
    command_timeout: Option<Duration>,
}

impl<R, C, P> StageRunner<R, C, P>
where
    R: CommandRunner,
    C: RemoteConnector,
    P: Packager,
{
    pub fn new(runner: Arc<R>, connector: Arc<C>, packager: Arc<P>, logger: Arc<BoundaryLogger>) -> Self {
        Self {
            runner,
            connector,
            packager,
            detector: ProjectDetector::new(),
            logger,
            command_timeout: None,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Only an unreadable or malformed config is an error; command failures end up in the report.
    pub async fn run(&self, options: &RunOptions) -> Result<PipelineReport, ConfigError> {
        let trace_id = uuid::Uuid::new_v4().to_string();
        let timer = Timer::start();
        self.logger.service_entry(&trace_id, "CLI", "StageRunner", "run", &options);

        let result = self.run_stages(options).await;
        match &result {
            Ok(_) => self.logger.service_exit(&trace_id, "CLI", "StageRunner", "run", timer.elapsed_ms()),
            Err(e) => self.logger.service_error(&trace_id, "CLI", "StageRunner", "run", e),
        }
        result
    }

    async fn run_stages(&self, options: &RunOptions) -> Result<PipelineReport, ConfigError> {
        let root = options.root.as_path();
        let mut report = PipelineReport {
            detection: DetectionResult::default(),
            config_generated: false,
            phases: Vec::new(),
        };
        let mut config = PipelineConfig::default();

        let mut stage = PipelineStage::Detect;
        loop {
            match stage {
                PipelineStage::Detect => {
                    report.detection = self.detector.detect(root);
                    info!(
                        "Detected [{}] in {} files",
                        report.detection.tag_list(),
                        report.detection.file_count
                    );
                    if options.filter == StageFilter::Only(PipelineStage::Detect) {
                        return Ok(report);
                    }
                    let (loaded, generated) = self.load_or_generate(root, &options.config_path, &report.detection)?;
                    config = loaded;
                    report.config_generated = generated;
                }
                PipelineStage::Build | PipelineStage::Test | PipelineStage::Deploy => {
                    if options.filter.includes(stage) {
                        let phase = self.run_phase(stage, root, &config, &report.detection).await;
                        report.phases.push(phase);
                    }
                }
                PipelineStage::Done => break,
            }
            stage = stage.next();
        }

        Ok(report)
    }

    fn load_or_generate(
        &self,
        root: &Path,
        config_path: &Path,
        detection: &DetectionResult,
    ) -> Result<(PipelineConfig, bool), ConfigError> {
        let path = if config_path.is_absolute() {
            config_path.to_path_buf()
        } else {
            root.join(config_path)
        };

        if let Some(config) = ConfigModel::load(&path)? {
            return Ok((config, false));
        }

        info!("No config found at {:?}, auto-generating", path);
        let name = project_name_from_dir(root);
        let config = ConfigModel::generate(&name, detection);
        if !path.exists() {
            ConfigModel::save(&config, &path)?;
        }
        let dockerfile = config.container_settings(&name).dockerfile;
        if ConfigModel::ensure_dockerfile(root, &dockerfile, detection)? {
            info!("Generated starter {} for {}", dockerfile, name);
        }
        Ok((config, true))
    }

    async fn run_phase(
        &self,
        stage: PipelineStage,
        root: &Path,
        config: &PipelineConfig,
        detection: &DetectionResult,
    ) -> PhaseReport {
        info!("Stage {} started", stage.as_str());
        let phase = match stage {
            PipelineStage::Build => self.run_tag_specs(stage, root, &config.build, detection, false).await,
            PipelineStage::Test => self.run_tag_specs(stage, root, &config.test, detection, true).await,
            PipelineStage::Deploy => self.run_deploy(root, config).await,
            PipelineStage::Detect | PipelineStage::Done => PhaseReport::new(stage),
        };

        let failures = phase.failures().count();
        if failures > 0 {
            warn!("Stage {} finished with {} failed step(s)", stage.as_str(), failures);
        } else {
            info!("Stage {} finished", stage.as_str());
        }
        phase
    }

    async fn run_tag_specs(
        &self,
        stage: PipelineStage,
        root: &Path,
        specs: &std::collections::BTreeMap<TechnologyTag, StageSpec>,
        detection: &DetectionResult,
        with_pythonpath: bool,
    ) -> PhaseReport {
        let mut phase = PhaseReport::new(stage);

        for tag in &detection.tags {
            let Some(spec) = specs.get(tag) else {
                continue;
            };
            if spec.command.is_empty() {
                warn!("{} {}: empty command, skipping", stage.as_str(), tag);
                continue;
            }
            let Some(mut request) = CommandRequest::from_tokens(&spec.command.tokens(), root) else {
                continue;
            };
            for (key, value) in &spec.env {
                request = request.env(key.clone(), value.clone());
            }
            if with_pythonpath {
                request = request.env("PYTHONPATH", pythonpath_with(root));
            }

            let label = format!("{} {}", stage.as_str(), tag);
            phase.steps.push(self.run_local(&label, request, false).await);
        }

        phase
    }

    async fn run_deploy(&self, root: &Path, config: &PipelineConfig) -> PhaseReport {
        let mut phase = PhaseReport::new(PipelineStage::Deploy);
        let dir_name = project_name_from_dir(root);
        let project = config.project_name(&dir_name).to_string();
        let settings = config.container_settings(&project);

        let docker = |args: Vec<String>| {
            let tokens: Vec<String> = std::iter::once("docker".to_string()).chain(args).collect();
            CommandRequest::from_tokens(&tokens, root)
        };
        let args = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let mut steps: Vec<(&str, Option<CommandRequest>, bool)> = vec![(
            "build image",
            docker(args(&["build", "-f", &settings.dockerfile, "-t", &settings.image, "."])),
            false,
        )];
        if settings.push {
            steps.push(("push image", docker(args(&["push", &settings.image])), false));
        }
        steps.push(("stop container", docker(args(&["stop", &settings.container_name])), true));
        steps.push(("remove container", docker(args(&["rm", &settings.container_name])), true));

        let port_mapping = format!("{}:{}", settings.port, settings.port);
        let mut run_args = args(&["run", "-d", "--rm", "--name", &settings.container_name, "-p", &port_mapping]);
        run_args.extend(settings.env_args());
        run_args.push(settings.image.clone());
        steps.push(("start container", docker(run_args), false));

        for (label, request, best_effort) in steps {
            if let Some(request) = request {
                phase.steps.push(self.run_local(label, request, best_effort).await);
            }
        }
        info!(
            "Application container {} on http://localhost:{}",
            settings.container_name, settings.port
        );

        if let Some(remote) = config.deploy.remote.as_ref() {
            if let Some(target) = remote.target() {
                self.deploy_remote(&mut phase, root, &project, &target, remote.deploy_path(), remote.restart_command())
                    .await;
            }
        }

        phase
    }

    /// Ship the project tree to `deploy_path` and run the restart command.
    /// Stops at the first failed step, but the failure stays in the report.
    async fn deploy_remote(
        &self,
        phase: &mut PhaseReport,
        root: &Path,
        project: &str,
        target: &RemoteTarget,
        deploy_path: &str,
        restart: &str,
    ) {
        let scratch = match tempfile::Builder::new().prefix("automata-pack").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                phase.steps.push(failed_step("package", "", e.to_string()));
                return;
            }
        };

        let archive = match self.packager.pack(root, project, scratch.path()).await {
            Ok(path) => {
                phase.steps.push(ok_step("package", &path.display().to_string()));
                path
            }
            Err(e) => {
                warn!("Packaging failed: {}", e);
                phase.steps.push(failed_step("package", &root.display().to_string(), e.to_string()));
                return;
            }
        };

        let mut session = match self.connector.connect(target).await {
            Ok(session) => {
                phase.steps.push(ok_step("connect", &target.to_string()));
                session
            }
            Err(e) => {
                warn!("Remote connection failed: {}", e);
                phase.steps.push(failed_step("connect", &target.to_string(), e.to_string()));
                return;
            }
        };

        let remote_archive = remote_steps::remote_archive_path(deploy_path);
        let prepare = remote_steps::prepare_dir_step(deploy_path);
        if exec_step(&mut session, &prepare, phase).await {
            match session.put_file(&archive, &remote_archive).await {
                Ok(()) => phase.steps.push(ok_step("upload", &remote_archive)),
                Err(e) => phase.steps.push(failed_step("upload", &remote_archive, e.to_string())),
            }

            if !phase.steps.last().map(StepReport::failed).unwrap_or(false) {
                let mut follow_up = remote_steps::unpack_steps(deploy_path);
                follow_up.push(RemoteStep {
                    label: "restart".to_string(),
                    command: remote_steps::in_dir(deploy_path, restart),
                    policy: remote_steps::FailurePolicy::Abort,
                });
                for step in &follow_up {
                    if !exec_step(&mut session, step, phase).await {
                        break;
                    }
                }
            }
        }

        if let Err(e) = session.close().await {
            warn!("Closing remote session failed: {}", e);
        }
    }

    async fn run_local(&self, label: &str, mut request: CommandRequest, best_effort: bool) -> StepReport {
        if request.timeout.is_none() {
            request.timeout = self.command_timeout;
        }
        let command = request.display();
        info!("Running {}: {}", label, command);

        let outcome = match self.runner.run(&request).await {
            Ok(output) => match output.into_result(&command) {
                Ok(_) => StepOutcome::Ok,
                Err(e) => StepOutcome::CommandFailed(e.to_string()),
            },
            Err(e) => StepOutcome::CommandFailed(e.to_string()),
        };

        if let StepOutcome::CommandFailed(detail) = &outcome {
            if best_effort {
                info!("{} skipped: {}", label, detail);
            } else {
                warn!("{} failed, continuing: {}", label, detail);
            }
        }

        StepReport {
            label: label.to_string(),
            command,
            outcome,
            best_effort,
        }
    }
}

/// Record one remote step; returns whether the sequence may continue.
async fn exec_step<S: RemoteSession>(session: &mut S, step: &RemoteStep, phase: &mut PhaseReport) -> bool {
    let best_effort = step.policy == remote_steps::FailurePolicy::BestEffort;
    let outcome = match session.exec(&step.command).await {
        Ok(out) if out.success() => StepOutcome::Ok,
        Ok(out) => StepOutcome::CommandFailed(format!("exit {}: {}", out.exit_status, out.stderr.trim())),
        Err(e) => StepOutcome::CommandFailed(e.to_string()),
    };
    let report = StepReport {
        label: step.label.clone(),
        command: step.command.clone(),
        outcome,
        best_effort,
    };
    let proceed = !report.failed();
    if !proceed {
        warn!("Remote step '{}' failed", step.label);
    }
    phase.steps.push(report);
    proceed
}

fn ok_step(label: &str, command: &str) -> StepReport {
    StepReport {
        label: label.to_string(),
        command: command.to_string(),
        outcome: StepOutcome::Ok,
        best_effort: false,
    }
}

fn failed_step(label: &str, command: &str, detail: String) -> StepReport {
    StepReport {
        label: label.to_string(),
        command: command.to_string(),
        outcome: StepOutcome::CommandFailed(detail),
        best_effort: false,
    }
}

/// `root` prepended to the inherited PYTHONPATH.
fn pythonpath_with(root: &Path) -> String {
    let mut paths = vec![root.to_path_buf()];
    if let Some(existing) = std::env::var_os("PYTHONPATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| root.to_string_lossy().to_string())
}
