pub mod broadcast_event_bus;
pub mod event_bus;

pub use crate::events::Event;
pub use broadcast_event_bus::BroadcastEventBus;
pub use event_bus::EventBus;
