pub mod version;
pub mod logging;

pub mod cli;
pub use cli::OptProcess;

pub mod core;
pub mod analyze;
