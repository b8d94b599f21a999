//! Per-run summary types consumed by the aggregator and the console table.

use std::time::Duration;

use crate::stage::StageState;

#[derive(Debug, Clone)]
pub struct StageResult {
    pub name: String,
    pub state: StageState,
    pub reason: Option<String>,
    pub duration: Duration,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub target: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration: Duration,
    pub cancelled: bool,
    pub results: Vec<StageResult>,
}

impl RunReport {
    pub fn state_of(&self, stage: &str) -> Option<StageState> {
        self.results.iter().find(|r| r.name == stage).map(|r| r.state)
    }

    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.state == StageState::Failed)
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.state == StageState::Skipped)
            .count()
    }
}
