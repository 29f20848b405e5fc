use crate::project::{ContainerSettings, TechnologyTag};

/// Whether a non-zero exit of a remote command ends the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Abort,
    BestEffort,
}

/// One remote shell command issued by the deployment workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStep {
    pub label: String,
    pub command: String,
    pub policy: FailurePolicy,
}

impl RemoteStep {
    fn abort(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
            policy: FailurePolicy::Abort,
        }
    }

    fn best_effort(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
            policy: FailurePolicy::BestEffort,
        }
    }
}

pub const REMOTE_ARCHIVE_NAME: &str = "project.tar.gz";

/// POSIX single-quote quoting.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '=' | '@'))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `<deploy_path>/<project>` without doubled slashes.
pub fn remote_project_path(deploy_path: &str, project: &str) -> String {
    let base = deploy_path.trim_end_matches('/');
    if base.is_empty() {
        format!("/{}", project)
    } else {
        format!("{}/{}", base, project)
    }
}

pub fn in_dir(remote_path: &str, command: &str) -> String {
    format!("cd {} && {}", shell_quote(remote_path), command)
}

pub fn remote_archive_path(remote_path: &str) -> String {
    format!("{}/{}", remote_path, REMOTE_ARCHIVE_NAME)
}

pub fn prepare_dir_step(remote_path: &str) -> RemoteStep {
    RemoteStep::abort("create remote directory", format!("mkdir -p {}", shell_quote(remote_path)))
}

/// Extraction and archive removal, run after the upload.
pub fn unpack_steps(remote_path: &str) -> Vec<RemoteStep> {
    vec![
        RemoteStep::abort(
            "extract archive",
            in_dir(remote_path, &format!("tar -xzf {} --strip-components=1", REMOTE_ARCHIVE_NAME)),
        ),
        RemoteStep::best_effort(
            "remove archive",
            format!("rm -f {}", shell_quote(&remote_archive_path(remote_path))),
        ),
    ]
}

pub fn docker_install_step() -> RemoteStep {
    RemoteStep::abort(
        "install docker",
        "which docker || (curl -fsSL https://get.docker.com -o get-docker.sh && sh get-docker.sh)",
    )
}

/// Host-side dependency installation for one detected tag.
pub fn install_steps(tag: TechnologyTag, remote_path: &str) -> Vec<RemoteStep> {
    match tag {
        TechnologyTag::Python => vec![
            RemoteStep::best_effort(
                "upgrade pip",
                in_dir(remote_path, "python3 -m pip install --upgrade pip"),
            ),
            RemoteStep::abort(
                "install python requirements",
                in_dir(
                    remote_path,
                    "if [ -f requirements.txt ]; then pip3 install -r requirements.txt; fi",
                ),
            ),
        ],
        TechnologyTag::Node => vec![
            RemoteStep::best_effort(
                "install node",
                "which node || (curl -fsSL https://deb.nodesource.com/setup_18.x | sudo -E bash - && sudo apt-get install -y nodejs)",
            ),
            RemoteStep::abort("install node packages", in_dir(remote_path, "npm install")),
        ],
        TechnologyTag::Java => vec![
            RemoteStep::best_effort(
                "install jdk",
                "which java || (apt-get update && apt-get install -y openjdk-17-jdk)",
            ),
            RemoteStep::abort(
                "build java project",
                in_dir(
                    remote_path,
                    "if ls build.gradle* >/dev/null 2>&1; then chmod +x gradlew && ./gradlew build -x test; \
                     elif [ -f pom.xml ]; then (which mvn || apt-get install -y maven) && mvn clean package -DskipTests; fi",
                ),
            ),
        ],
        // Built inside the image.
        TechnologyTag::Go | TechnologyTag::Rust | TechnologyTag::Docker => Vec::new(),
    }
}

pub fn launch_steps(settings: &ContainerSettings, remote_path: &str) -> Vec<RemoteStep> {
    let container = shell_quote(&settings.container_name);
    let image = shell_quote(&settings.image);

    let mut run = vec![
        "docker run -d --restart unless-stopped".to_string(),
        format!("--name {}", container),
        format!("-p {}:{}", settings.port, settings.port),
    ];
    run.extend(
        settings
            .env
            .iter()
            .map(|(k, v)| format!("-e {}", shell_quote(&format!("{}={}", k, v)))),
    );
    run.push(image.clone());

    vec![
        RemoteStep::abort(
            "build image",
            in_dir(
                remote_path,
                &format!("docker build -f {} -t {} .", shell_quote(&settings.dockerfile), image),
            ),
        ),
        RemoteStep::best_effort(
            "remove previous container",
            format!("docker rm -f {} 2>/dev/null || true", container),
        ),
        RemoteStep::abort("start container", run.join(" ")),
    ]
}

/// Commands whose output feeds `output_parsers::classify_container`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyCommands {
    pub running: String,
    pub all: String,
    pub port: String,
}

pub fn verify_commands(container: &str) -> VerifyCommands {
    let name = shell_quote(container);
    VerifyCommands {
        running: format!("docker ps --filter name={} --format '{{{{.Names}}}}:{{{{.Status}}}}'", name),
        all: format!("docker ps -a --filter name={} --format '{{{{.Names}}}}:{{{{.Status}}}}'", name),
        port: format!("docker port {}", name),
    }
}
