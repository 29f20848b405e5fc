pub mod app_context;
pub mod session_registry;

pub use app_context::AppContext;
pub use session_registry::{SessionHandle, SessionRegistry, SessionStatus};
