mod api;
mod application;
mod error;
mod events;
mod infrastructure;
mod project;
mod settings;
mod state;
#[cfg(test)]
mod testing;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::stream::{self, Stream, StreamExt};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use application::ports::RepositoryRef;
use application::services::{
    parse_repository_url, DeploymentRequest, PipelineStage, RunOptions, ServerSpec, StageFilter,
    StageRunner, StepOutcome,
};
use infrastructure::archive::TarPackager;
use infrastructure::logging::{init_tracing, BoundaryLogger};
use infrastructure::process::LocalCommandRunner;
use infrastructure::ssh::OpenSshConnector;
use project::{project_name_from_dir, ConfigModel, ProjectDetector, DEFAULT_CONFIG_FILE};
use settings::{AgentSettings, LogSettings};
use state::{AppContext, SessionRegistry, SessionStatus};

#[derive(Parser)]
#[command(name = "automata")]
#[command(version, about = "Detect, build, test and deploy projects locally or to a remote host")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the local pipeline (detect → build → test → deploy)
    Run {
        #[arg(long, default_value = ".", help = "Project directory")]
        cwd: PathBuf,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE, help = "Config file, relative to --cwd unless absolute")]
        config: PathBuf,
        #[arg(long, default_value = "all", help = "Stage to run: all, detect, build, test, deploy")]
        stage: StageFilter,
        #[arg(long, help = "Exit with status 1 when any step failed")]
        strict: bool,
    },

    /// Write automata.yml (and a starter Dockerfile) from a fresh detection
    Generate {
        #[arg(long, default_value = ".", help = "Project directory")]
        cwd: PathBuf,
        #[arg(long, short, help = "Overwrite an existing automata.yml")]
        force: bool,
    },

    /// Clone a repository and deploy it to a remote host over SSH
    Deploy {
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
        #[arg(long, default_value = "root")]
        user: String,
        #[arg(long, env = "AUTOMATA_SSH_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        #[arg(long)]
        identity_file: Option<PathBuf>,
        #[arg(long, default_value = "/opt", help = "Parent directory on the remote host")]
        path: String,
        #[arg(long, help = "Repository URL (https://host/owner/repo[/tree/<branch>])")]
        repo: String,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long, help = "Project name (defaults to the repository name)")]
        name: Option<String>,
    },

    /// Serve the deployment HTTP API
    Serve {
        #[arg(long, env = "AUTOMATA_BIND")]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing(&LogSettings::from_env());

    let cli = Cli::parse();
    let settings = AgentSettings::from_env();

    let result = match cli.command {
        Commands::Run {
            cwd,
            config,
            stage,
            strict,
        } => run_pipeline(&settings, cwd, config, stage, strict).await,
        Commands::Generate { cwd, force } => generate(cwd, force),
        Commands::Deploy {
            host,
            port,
            user,
            password,
            identity_file,
            path,
            repo,
            branch,
            name,
        } => {
            let server = ServerSpec {
                host,
                port,
                user,
                password,
                identity_file,
                deploy_path: path,
            };
            deploy(settings, server, &repo, branch, name).await
        }
        Commands::Serve { bind } => serve(settings, bind).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_pipeline(
    settings: &AgentSettings,
    cwd: PathBuf,
    config: PathBuf,
    filter: StageFilter,
    strict: bool,
) -> Result<ExitCode> {
    let root = cwd
        .canonicalize()
        .with_context(|| format!("Project directory not found: {:?}", cwd))?;

    let mut runner = StageRunner::new(
        Arc::new(LocalCommandRunner::inherited()),
        Arc::new(OpenSshConnector::new(
            settings.ssh_connect_timeout,
            settings.ssh_exec_timeout,
        )),
        Arc::new(TarPackager::new()),
        Arc::new(BoundaryLogger::new()),
    );
    if let Some(limit) = settings.command_timeout {
        runner = runner.with_command_timeout(limit);
    }

    let report = runner
        .run(&RunOptions {
            root,
            config_path: config,
            filter,
        })
        .await?;

    if filter == StageFilter::Only(PipelineStage::Detect) {
        println!("{}", serde_json::to_string_pretty(&report.detection)?);
        return Ok(ExitCode::SUCCESS);
    }

    for phase in &report.phases {
        for step in phase.failures() {
            if let StepOutcome::CommandFailed(detail) = &step.outcome {
                warn!("{} / {}: {}", phase.stage.as_str(), step.label, detail);
            }
        }
    }

    if strict && report.has_failures() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn generate(cwd: PathBuf, force: bool) -> Result<ExitCode> {
    let root = cwd
        .canonicalize()
        .with_context(|| format!("Project directory not found: {:?}", cwd))?;
    let detection = ProjectDetector::new().detect(&root);
    let name = project_name_from_dir(&root);

    if ConfigModel::write_generated(&root, &name, &detection, force)? {
        info!("Wrote {} for {} [{}]", DEFAULT_CONFIG_FILE, name, detection.tag_list());
    } else {
        warn!("{} already exists, use --force to overwrite", DEFAULT_CONFIG_FILE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn deploy(
    settings: AgentSettings,
    server: ServerSpec,
    repo: &str,
    branch: Option<String>,
    name: Option<String>,
) -> Result<ExitCode> {
    let Some(parsed) = parse_repository_url(repo) else {
        bail!("Unsupported repository URL: {}", repo);
    };
    let request = DeploymentRequest {
        server,
        repository: RepositoryRef {
            name: name.unwrap_or(parsed.name),
            url: parsed.url,
            branch: branch.unwrap_or(parsed.branch),
        },
    };

    let ctx = AppContext::new(settings);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let workflow = ctx.workflow.clone();
    let task = tokio::spawn(async move { workflow.deploy(&request, &tx).await });
    tokio::spawn(watch_interrupts(
        Box::pin(ctrl_c_stream()),
        ctx.registry.clone(),
        task.abort_handle(),
    ));

    while let Some(event) = rx.recv().await {
        println!("{}", event.message());
    }

    let (handle, status) = match task.await {
        Ok(finished) => finished,
        Err(e) if e.is_cancelled() => return Ok(ExitCode::from(130)),
        Err(e) => return Err(e).context("Deployment task panicked"),
    };
    info!("Session {} finished: {}", handle.id, status);

    Ok(match status {
        SessionStatus::Completed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn ctrl_c_stream() -> impl Stream<Item = ()> {
    stream::unfold((), |_| async { tokio::signal::ctrl_c().await.ok().map(|_| ((), ())) })
}

/// First interrupt flags running sessions so the workflow stops at its next
/// step boundary; a second one aborts the deployment task outright.
async fn watch_interrupts<S>(mut interrupts: S, registry: Arc<SessionRegistry>, deployment: AbortHandle)
where
    S: Stream<Item = ()> + Unpin,
{
    if interrupts.next().await.is_none() {
        return;
    }
    warn!("Stop requested, finishing current step (press Ctrl-C again to abort)");
    registry.stop_all().await;

    if interrupts.next().await.is_some() {
        warn!("Aborting deployment");
        deployment.abort();
    }
}

async fn serve(settings: AgentSettings, bind: Option<String>) -> Result<ExitCode> {
    let ctx = AppContext::new(settings);
    let bind = bind.unwrap_or_else(|| ctx.settings.bind.clone());
    let app = api::app(ctx.clone());

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("API server listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
            let stopping = ctx.registry.stop_all().await;
            if stopping > 0 {
                info!("Requested stop for {} running deployment(s)", stopping);
            }
        })
        .await
        .context("API server failed")?;

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from(["automata", "run", "--stage", "detect"]).unwrap();
        match cli.command {
            Commands::Run { stage, strict, config, .. } => {
                assert_eq!(stage, StageFilter::Only(PipelineStage::Detect));
                assert!(!strict);
                assert_eq!(config, PathBuf::from("automata.yml"));
            }
            _ => panic!("expected run"),
        }
    }

    #[tokio::test]
    async fn test_first_interrupt_requests_stop() {
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.create("demo").await;
        let deployment = tokio::spawn(std::future::pending::<()>());

        watch_interrupts(stream::iter([()]), registry.clone(), deployment.abort_handle()).await;

        assert!(handle.is_stop_requested());
        assert!(!deployment.is_finished());
        deployment.abort();
    }

    #[tokio::test]
    async fn test_second_interrupt_aborts_deployment() {
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.create("demo").await;
        let deployment = tokio::spawn(std::future::pending::<()>());

        watch_interrupts(stream::iter([(), ()]), registry, deployment.abort_handle()).await;

        assert!(handle.is_stop_requested());
        assert!(deployment.await.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_cli_rejects_unknown_stage() {
        assert!(Cli::try_parse_from(["automata", "run", "--stage", "release"]).is_err());
    }

    #[test]
    fn test_cli_parses_deploy_defaults() {
        let cli = Cli::try_parse_from([
            "automata",
            "deploy",
            "--host",
            "10.0.0.1",
            "--repo",
            "https://github.com/acme/widget",
        ])
        .unwrap();
        match cli.command {
            Commands::Deploy { port, user, path, .. } => {
                assert_eq!(port, 22);
                assert_eq!(user, "root");
                assert_eq!(path, "/opt");
            }
            _ => panic!("expected deploy"),
        }
    }
}
