pub mod config;
pub use config::AnalyzeConfig;

pub mod analyze_impl;
pub use analyze_impl::Analysis;

pub mod command;
pub use command::AnalyzeCommand;
