use async_trait::async_trait;
use crate::events::Event;
use tokio::sync::broadcast;

/// Process-wide channel for deployment events.
///
/// 모든 세션의 상태/로그 이벤트가 여기로 모인다. 구독자가 없으면 버려진다.
#[async_trait]
pub trait EventBus: Send + Sync + Clone {
    async fn emit(&self, event: Event);

    /// Receivers only see events emitted after they subscribed.
    fn subscribe(&self) -> broadcast::Receiver<Event>;
}
