pub mod command_runner;
pub mod packager;
pub mod remote;
pub mod source;

pub use command_runner::{CommandOutput, CommandRequest, CommandRunner};
pub use packager::Packager;
pub use remote::{Credential, ExecOutput, RemoteConnector, RemoteSession, RemoteTarget};
pub use source::{RepositoryRef, SourceFetcher, DEFAULT_BRANCH};
