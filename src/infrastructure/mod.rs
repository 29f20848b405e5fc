pub mod archive;
pub mod git;
pub mod logging;
pub mod process;
pub mod ssh;
