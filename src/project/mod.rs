pub mod config;
pub mod detector;
pub mod models;

pub use config::{
    normalize_project_name, project_name_from_dir, ConfigModel, ContainerSettings, PipelineConfig,
    StageSpec, DEFAULT_CONFIG_FILE,
};
pub use detector::ProjectDetector;
pub use models::{DetectionResult, TechnologyTag};
