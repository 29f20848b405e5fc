pub mod deployment_workflow;
pub mod output_parsers;
pub mod remote_steps;
pub mod stage_runner;

pub use deployment_workflow::{
    ConnectionReport, DeploymentRequest, DeploymentWorkflow, ProgressEvent, ServerSpec,
};
pub use output_parsers::parse_repository_url;
pub use stage_runner::{PipelineStage, RunOptions, StageFilter, StageRunner, StepOutcome};
