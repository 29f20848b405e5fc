pub mod boundary_logger;
pub mod setup;

pub use boundary_logger::{BoundaryLogger, Timer};
pub use setup::init_tracing;
