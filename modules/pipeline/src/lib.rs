//! The staged orchestration engine: run context, stage contract, DAG
//! scheduler, and the notifier seam.

pub mod config;
pub mod context;
pub mod engine;
pub mod notify;
pub mod report;
pub mod stage;

pub use config::ScanConfig;
pub use context::RunContext;
pub use engine::Pipeline;
pub use notify::Notifier;
pub use report::{RunReport, StageResult};
pub use stage::{SkipReason, Stage, StageOutcome, StageState};
