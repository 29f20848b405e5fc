use std::sync::Arc;
use tokio::sync::broadcast;

use crate::application::events::{BroadcastEventBus, Event, EventBus};
use crate::application::services::DeploymentWorkflow;
use crate::infrastructure::archive::TarPackager;
use crate::infrastructure::git::GitFetcher;
use crate::infrastructure::logging::BoundaryLogger;
use crate::infrastructure::ssh::OpenSshConnector;
use crate::settings::AgentSettings;
use crate::state::SessionRegistry;

pub type Workflow = DeploymentWorkflow<OpenSshConnector, GitFetcher, TarPackager, BroadcastEventBus>;

/// AppContext - 서비스 기반 DI 컨테이너
///
/// 인프라스트럭처 구현(OpenSSH, git, tar)을 조립해 워크플로우에 주입합니다.
/// 세션 레지스트리는 여기서 하나만 만들어 공유합니다.
#[derive(Clone)]
pub struct AppContext {
    // Services
    pub workflow: Arc<Workflow>,

    // Infrastructure
    pub registry: Arc<SessionRegistry>,
    pub event_bus: BroadcastEventBus,
    pub logger: Arc<BoundaryLogger>,

    // Config
    pub settings: AgentSettings,
}

impl AppContext {
    pub fn new(settings: AgentSettings) -> Self {
        let logger = Arc::new(BoundaryLogger::new());
        let event_bus = BroadcastEventBus::new(settings.event_capacity, logger.clone());
        let registry = Arc::new(SessionRegistry::new());

        let workflow = Arc::new(DeploymentWorkflow::new(
            Arc::new(OpenSshConnector::new(
                settings.ssh_connect_timeout,
                settings.ssh_exec_timeout,
            )),
            Arc::new(GitFetcher::new(settings.clone_timeout)),
            Arc::new(TarPackager::new()),
            registry.clone(),
            event_bus.clone(),
            logger.clone(),
        ));

        Self {
            workflow,
            registry,
            event_bus,
            logger,
            settings,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_bus.subscribe()
    }
}
