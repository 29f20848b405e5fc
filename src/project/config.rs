use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::models::{DetectionResult, TechnologyTag};
use crate::application::ports::{Credential, RemoteTarget};
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "automata.yml";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// A command either as a shell line or as argv tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandSpec {
    Shell(String),
    Argv(Vec<String>),
}

impl CommandSpec {
    pub fn shell(line: impl Into<String>) -> Self {
        CommandSpec::Shell(line.into())
    }

    /// Program and arguments. Shell lines are wrapped in `sh -c`.
    pub fn tokens(&self) -> Vec<String> {
        match self {
            CommandSpec::Shell(line) => vec!["sh".to_string(), "-c".to_string(), line.clone()],
            CommandSpec::Argv(tokens) => tokens.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CommandSpec::Shell(line) => line.trim().is_empty(),
            CommandSpec::Argv(tokens) => tokens.is_empty(),
        }
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandSpec::Shell(line) => write!(f, "{}", line),
            CommandSpec::Argv(tokens) => write!(f, "{}", tokens.join(" ")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageSpec {
    pub command: CommandSpec,
    #[serde(rename = "output", default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl StageSpec {
    fn build(command: &str, output: &str) -> Self {
        Self {
            command: CommandSpec::shell(command),
            output_path: Some(output.to_string()),
            coverage: None,
            env: BTreeMap::new(),
        }
    }

    fn test(command: &str, coverage: bool) -> Self {
        Self {
            command: CommandSpec::shell(command),
            output_path: None,
            coverage: coverage.then_some(true),
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    #[serde(rename = "image", default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(rename = "file", default, skip_serializing_if = "Option::is_none")]
    pub dockerfile_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteTargetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    #[serde(rename = "path", default, skip_serializing_if = "Option::is_none")]
    pub deploy_path: Option<String>,
    #[serde(rename = "restart", default, skip_serializing_if = "Option::is_none")]
    pub restart_command: Option<String>,
}

impl RemoteTargetSpec {
    /// Connection target, or `None` when no host is configured.
    pub fn target(&self) -> Option<RemoteTarget> {
        let host = self.host.as_deref().filter(|h| !h.trim().is_empty())?;
        let credential = match (&self.password, &self.identity_file) {
            (_, Some(key)) => Credential::IdentityFile(PathBuf::from(key)),
            (Some(password), None) => Credential::Password(password.clone()),
            (None, None) => Credential::Agent,
        };

        Some(RemoteTarget {
            host: host.to_string(),
            port: self.port.unwrap_or(22),
            user: self.user.clone().unwrap_or_else(|| "root".to_string()),
            credential,
        })
    }

    pub fn deploy_path(&self) -> &str {
        self.deploy_path.as_deref().unwrap_or("/opt/app")
    }

    pub fn restart_command(&self) -> &str {
        self.restart_command.as_deref().unwrap_or("echo deployed")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploySpec {
    #[serde(rename = "docker", default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerSpec>,
    #[serde(rename = "ssh", default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteTargetSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub build: BTreeMap<TechnologyTag, StageSpec>,
    #[serde(default)]
    pub test: BTreeMap<TechnologyTag, StageSpec>,
    #[serde(default)]
    pub deploy: DeploySpec,
}

/// Container settings with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSettings {
    pub image: String,
    pub dockerfile: String,
    pub port: u16,
    pub push: bool,
    pub env: BTreeMap<String, String>,
    pub container_name: String,
}

impl ContainerSettings {
    /// `-e KEY=VALUE` pairs for `docker run`.
    pub fn env_args(&self) -> Vec<String> {
        self.env
            .iter()
            .flat_map(|(k, v)| ["-e".to_string(), format!("{}={}", k, v)])
            .collect()
    }
}

pub fn container_name(project_name: &str) -> String {
    format!("{}-app", project_name)
}

impl PipelineConfig {
    /// Effective project name: the configured one, else `fallback`.
    pub fn project_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.name.trim().is_empty() {
            fallback
        } else {
            &self.name
        }
    }

    pub fn container_settings(&self, project_name: &str) -> ContainerSettings {
        let spec = self.deploy.container.clone().unwrap_or_default();
        ContainerSettings {
            image: spec
                .image_name
                .unwrap_or_else(|| format!("{}:latest", project_name)),
            dockerfile: spec
                .dockerfile_path
                .unwrap_or_else(|| DEFAULT_DOCKERFILE.to_string()),
            port: spec.port.unwrap_or(DEFAULT_PORT),
            push: spec.push,
            env: spec.env,
            container_name: container_name(project_name),
        }
    }
}

/// ConfigModel - 파이프라인 설정 로드/생성
pub struct ConfigModel;

impl ConfigModel {
    /// Load a persisted config. `Ok(None)` when the file is absent or has an
    /// extension we do not decode.
    pub fn load(path: &Path) -> Result<Option<PipelineConfig>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "yml" | "yaml" => {
                if text.trim().is_empty() {
                    return Ok(Some(PipelineConfig::default()));
                }
                serde_yaml::from_str(&text)
                    .map(Some)
                    .map_err(|source| ConfigError::Yaml {
                        path: path.to_path_buf(),
                        source,
                    })
            }
            "json" => {
                if text.trim().is_empty() {
                    return Ok(Some(PipelineConfig::default()));
                }
                serde_json::from_str(&text)
                    .map(Some)
                    .map_err(|source| ConfigError::Json {
                        path: path.to_path_buf(),
                        source,
                    })
            }
            other => {
                warn!("Unsupported config format '{}' at {:?}, treating as empty", other, path);
                Ok(None)
            }
        }
    }

    /// Build a config from a detection result. Pure and deterministic.
    pub fn generate(project_name: &str, detection: &DetectionResult) -> PipelineConfig {
        let mut build = BTreeMap::new();
        let mut test = BTreeMap::new();

        for &tag in &detection.tags {
            if let Some(spec) = build_spec(tag) {
                build.insert(tag, spec);
            }
            if let Some(spec) = test_spec(tag) {
                test.insert(tag, spec);
            }
        }

        let mut env = BTreeMap::new();
        if detection.has(TechnologyTag::Node) {
            env.insert("NODE_ENV".to_string(), "production".to_string());
            env.insert("PORT".to_string(), DEFAULT_PORT.to_string());
        }
        if detection.has(TechnologyTag::Python) {
            env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
            env.insert("PORT".to_string(), DEFAULT_PORT.to_string());
        }

        PipelineConfig {
            name: project_name.to_string(),
            version: Some("1.0.0".to_string()),
            description: Some(format!("Auto-generated config for {}", project_name)),
            build,
            test,
            deploy: DeploySpec {
                container: Some(ContainerSpec {
                    image_name: Some(format!("{}:latest", project_name)),
                    dockerfile_path: Some(DEFAULT_DOCKERFILE.to_string()),
                    port: Some(DEFAULT_PORT),
                    push: false,
                    env,
                }),
                remote: Some(RemoteTargetSpec {
                    host: Some("localhost".to_string()),
                    port: None,
                    user: Some("root".to_string()),
                    password: None,
                    identity_file: None,
                    deploy_path: Some(format!("/opt/{}", project_name)),
                    restart_command: Some(format!("systemctl restart {}", project_name)),
                }),
            },
        }
    }

    pub fn save(config: &PipelineConfig, path: &Path) -> Result<(), ConfigError> {
        let text = serde_yaml::to_string(config).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write `automata.yml` (and a starter Dockerfile when missing) into `dir`.
    /// Returns `false` without touching anything when a config exists and `force` is off.
    pub fn write_generated(
        dir: &Path,
        project_name: &str,
        detection: &DetectionResult,
        force: bool,
    ) -> Result<bool, ConfigError> {
        let config_path = dir.join(DEFAULT_CONFIG_FILE);
        if config_path.exists() && !force {
            info!("Config already exists: {:?}", config_path);
            return Ok(false);
        }

        let config = Self::generate(project_name, detection);
        Self::save(&config, &config_path)?;
        info!("Generated {:?}", config_path);

        let settings = config.container_settings(project_name);
        if Self::ensure_dockerfile(dir, &settings.dockerfile, detection)? {
            info!("Generated starter Dockerfile for {}", project_name);
        }

        Ok(true)
    }

    /// Write the starter Dockerfile at `dir/<dockerfile>` unless one is there.
    /// Returns whether a file was written.
    pub fn ensure_dockerfile(
        dir: &Path,
        dockerfile: &str,
        detection: &DetectionResult,
    ) -> Result<bool, ConfigError> {
        let path = dir.join(dockerfile);
        if path.exists() {
            return Ok(false);
        }
        let io_error = |source: std::io::Error| ConfigError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(&path, dockerfile_template(detection)).map_err(io_error)?;
        Ok(true)
    }
}

fn build_spec(tag: TechnologyTag) -> Option<StageSpec> {
    match tag {
        TechnologyTag::Python => Some(StageSpec::build("pip install -r requirements.txt", "dist/")),
        TechnologyTag::Node => Some(StageSpec::build("npm ci && npm run build", "dist/")),
        TechnologyTag::Java => Some(StageSpec::build("mvn clean package -DskipTests", "target/*.jar")),
        TechnologyTag::Go => Some(StageSpec::build("go build -o bin/app .", "bin/")),
        TechnologyTag::Rust => Some(StageSpec::build("cargo build --release", "target/release/")),
        TechnologyTag::Docker => None,
    }
}

fn test_spec(tag: TechnologyTag) -> Option<StageSpec> {
    match tag {
        TechnologyTag::Python => Some(StageSpec::test("pytest -v", true)),
        TechnologyTag::Node => Some(StageSpec::test("npm test", true)),
        TechnologyTag::Java => Some(StageSpec::test("mvn test", true)),
        TechnologyTag::Go => Some(StageSpec::test("go test ./...", false)),
        TechnologyTag::Rust => Some(StageSpec::test("cargo test --all", false)),
        TechnologyTag::Docker => None,
    }
}

/// Project name derived from a directory: lower-cased, spaces and underscores become `-`.
pub fn project_name_from_dir(dir: &Path) -> String {
    normalize_project_name(dir.file_name().and_then(|n| n.to_str()).unwrap_or_default())
}

/// Lower-case name usable as a docker repository and container name.
/// Only `[a-z0-9.-]` survive, a `.` never touches another separator, and the
/// name starts and ends alphanumeric.
pub fn normalize_project_name(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    for c in raw.trim().to_lowercase().chars() {
        let c = match c {
            ' ' | '_' => '-',
            'a'..='z' | '0'..='9' | '.' | '-' => c,
            _ => continue,
        };
        match (name.chars().last(), c) {
            (None, '.' | '-') => continue,
            (Some('.'), '.' | '-') | (Some('-'), '.') => continue,
            _ => name.push(c),
        }
    }
    let name = name.trim_end_matches(['.', '-']);
    if name.is_empty() {
        "app".to_string()
    } else {
        name.to_string()
    }
}

pub fn dockerfile_template(detection: &DetectionResult) -> &'static str {
    if detection.has(TechnologyTag::Python) {
        "FROM python:3.11-slim\n\
         WORKDIR /app\n\
         COPY requirements.txt ./\n\
         RUN pip install --no-cache-dir -r requirements.txt\n\
         COPY . .\n\
         EXPOSE 8000\n\
         CMD [\"python\", \"app.py\"]\n"
    } else if detection.has(TechnologyTag::Node) {
        "FROM node:18-alpine\n\
         WORKDIR /app\n\
         COPY package*.json ./\n\
         RUN npm ci --only=production\n\
         COPY . .\n\
         EXPOSE 8000\n\
         CMD [\"node\", \"index.js\"]\n"
    } else {
        "FROM ubuntu:22.04\n\
         WORKDIR /app\n\
         COPY . .\n\
         EXPOSE 8000\n\
         CMD [\"echo\", \"Hello from container\"]\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn detection(tags: &[TechnologyTag]) -> DetectionResult {
        DetectionResult {
            tags: tags.to_vec(),
            file_count: tags.len(),
            skipped: vec![],
        }
    }

    #[test]
    fn test_generate_python_project() {
        let config = ConfigModel::generate("hello-py", &detection(&[TechnologyTag::Python]));

        let build = config.build.get(&TechnologyTag::Python).unwrap();
        assert_eq!(build.command, CommandSpec::shell("pip install -r requirements.txt"));
        assert_eq!(config.test[&TechnologyTag::Python].command.to_string(), "pytest -v");

        let container = config.deploy.container.as_ref().unwrap();
        assert_eq!(container.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
        assert_eq!(container.image_name.as_deref(), Some("hello-py:latest"));

        let remote = config.deploy.remote.as_ref().unwrap();
        assert_eq!(remote.deploy_path(), "/opt/hello-py");
        assert_eq!(remote.restart_command(), "systemctl restart hello-py");
    }

    #[test]
    fn test_generate_is_idempotent() {
        let d = detection(&[TechnologyTag::Node, TechnologyTag::Java, TechnologyTag::Docker]);
        assert_eq!(ConfigModel::generate("svc", &d), ConfigModel::generate("svc", &d));
    }

    #[test]
    fn test_docker_tag_has_no_build_spec() {
        let config = ConfigModel::generate("x", &detection(&[TechnologyTag::Docker]));
        assert!(config.build.is_empty());
        assert!(config.test.is_empty());
    }

    #[test]
    fn test_container_defaults_when_deploy_omitted() {
        let config: PipelineConfig = serde_yaml::from_str("name: web\nbuild: {}\n").unwrap();
        let settings = config.container_settings("web");

        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.image, "web:latest");
        assert_eq!(settings.dockerfile, "Dockerfile");
        assert_eq!(settings.container_name, "web-app");
    }

    #[test]
    fn test_container_port_falls_back_when_missing() {
        let yaml = "name: web\ndeploy:\n  docker:\n    image: web:v2\n";
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        let settings = config.container_settings("web");

        assert_eq!(settings.port, 8000);
        assert_eq!(settings.image, "web:v2");
    }

    #[test]
    fn test_command_accepts_string_or_tokens() {
        let yaml = "name: m\nbuild:\n  go:\n    command: [go, build, ./...]\n  rust:\n    command: cargo build\n";
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.build[&TechnologyTag::Go].command.tokens(), vec!["go", "build", "./..."]);
        assert_eq!(
            config.build[&TechnologyTag::Rust].command.tokens(),
            vec!["sh", "-c", "cargo build"]
        );
    }

    #[test]
    fn test_save_then_load_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        let config = ConfigModel::generate("demo", &detection(&[TechnologyTag::Node]));

        ConfigModel::save(&config, &path).unwrap();
        let loaded = ConfigModel::load(&path).unwrap().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(ConfigModel::load(&dir.path().join("automata.yml")).unwrap().is_none());
    }

    #[test]
    fn test_load_malformed_yaml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("automata.yml");
        std::fs::write(&path, "build: [unclosed").unwrap();

        assert!(matches!(ConfigModel::load(&path), Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn test_load_json_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("automata.json");
        std::fs::write(
            &path,
            r#"{"name":"j","test":{"python":{"command":"pytest -q"}},"deploy":{"docker":{"port":9000}}}"#,
        )
        .unwrap();

        let config = ConfigModel::load(&path).unwrap().unwrap();
        assert_eq!(config.test[&TechnologyTag::Python].command.to_string(), "pytest -q");
        assert_eq!(config.container_settings("j").port, 9000);
    }

    #[test]
    fn test_remote_target_requires_host() {
        let spec = RemoteTargetSpec::default();
        assert!(spec.target().is_none());

        let spec = RemoteTargetSpec {
            host: Some("10.0.0.5".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let target = spec.target().unwrap();
        assert_eq!(target.port, 22);
        assert_eq!(target.user, "root");
        assert!(matches!(target.credential, Credential::Password(_)));
    }

    #[test]
    fn test_write_generated_respects_existing_config() {
        let dir = TempDir::new().unwrap();
        let d = detection(&[TechnologyTag::Python]);

        assert!(ConfigModel::write_generated(dir.path(), "p", &d, false).unwrap());
        assert!(dir.path().join("Dockerfile").exists());
        assert!(!ConfigModel::write_generated(dir.path(), "p", &d, false).unwrap());
        assert!(ConfigModel::write_generated(dir.path(), "p", &d, true).unwrap());
    }

    #[test]
    fn test_project_name_from_dir() {
        assert_eq!(project_name_from_dir(Path::new("/tmp/My_Cool App")), "my-cool-app");
        assert_eq!(project_name_from_dir(Path::new("/")), "app");
        assert_eq!(project_name_from_dir(Path::new("/tmp/.tmpPkWaxt")), "tmppkwaxt");
    }

    #[test]
    fn test_normalized_names_are_docker_safe() {
        assert_eq!(normalize_project_name("Widget (v2)!"), "widget-v2");
        assert_eq!(normalize_project_name("..hidden..dir.."), "hidden.dir");
        assert_eq!(normalize_project_name("-_- api _-"), "api");
        assert_eq!(normalize_project_name("café"), "caf");
        assert_eq!(normalize_project_name("???"), "app");
    }
}
