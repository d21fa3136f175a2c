pub mod agent;
pub mod config;
pub mod errors;
pub mod executor;
pub mod flow;
pub mod orchestrator;
pub mod plan;
pub mod report;
pub mod ui;
pub mod validation;

pub use config::{RunMode, RunOptions, ValidationMode};
pub use flow::Flow;
pub use report::RepoUpgradeReport;
