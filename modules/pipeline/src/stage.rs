//! The stage contract: a named, resumable unit of work with declared
//! dependencies and explicit outcome variants.

use async_trait::async_trait;

use artifacts::Artifact;

use crate::context::RunContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Pending,
    Running,
    Ok,
    Failed,
    Skipped,
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageState::Pending => f.write_str("pending"),
            StageState::Running => f.write_str("running"),
            StageState::Ok => f.write_str("ok"),
            StageState::Failed => f.write_str("failed"),
            StageState::Skipped => f.write_str("skipped"),
        }
    }
}

/// Why a stage did not run. Skips are expected operational outcomes and
/// never fail the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ToolMissing(Vec<String>),
    PassiveOnly,
    Dependency(String),
    CircuitOpen(String),
    NoOutput(String),
    Timeout,
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ToolMissing(tools) => write!(f, "tool-missing: {}", tools.join(", ")),
            SkipReason::PassiveOnly => f.write_str("excluded by --passive-only"),
            SkipReason::Dependency(dep) => write!(f, "dependency {dep} did not complete"),
            SkipReason::CircuitOpen(host) => write!(f, "circuit-open: {host}"),
            SkipReason::NoOutput(detail) => write!(f, "no usable tool output: {detail}"),
            SkipReason::Timeout => f.write_str("stage budget exceeded"),
            SkipReason::Cancelled => f.write_str("run cancelled"),
        }
    }
}

/// Terminal result of one stage execution.
#[derive(Debug)]
pub enum StageOutcome {
    Ok(Vec<Artifact>),
    Skipped(SkipReason),
    Failed(String),
}

impl StageOutcome {
    pub fn state(&self) -> StageState {
        match self {
            StageOutcome::Ok(_) => StageState::Ok,
            StageOutcome::Skipped(_) => StageState::Skipped,
            StageOutcome::Failed(_) => StageState::Failed,
        }
    }
}

/// One unit of pipeline work. Implementations own their declared output
/// paths exclusively and read (never mutate) their dependencies' artifacts.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stages that must reach a terminal state before this one starts.
    fn depends_on(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Dependencies that must be OK (not merely terminal) for this stage to
    /// run. Defaults to every declared dependency; stages with optional
    /// inputs (merge over a skipped brute-force list, the aggregator over
    /// whatever completed) override this.
    fn requires_ok(&self, dep: &str) -> bool {
        let _ = dep;
        true
    }

    /// External binaries this stage cannot run without.
    fn required_tools(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// True only for stages safe to run under `--passive-only`: passive
    /// enumeration and pure artifact post-processing. Defaults to false so
    /// an un-annotated stage is treated as active and excluded.
    fn passive(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome;
}
