//! DAG scheduler: validates the stage graph, fans out ready stages, applies
//! the skip policy, and journals every terminal transition.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use artifacts::journal::{Journal, StageRecord};
use artifacts::store::now_rfc3339;
use recon_core::EngineError;

use crate::context::RunContext;
use crate::report::{RunReport, StageResult};
use crate::stage::{SkipReason, Stage, StageOutcome, StageState};

pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Build and validate the stage DAG. Duplicate names, references to
    /// unknown stages, and cycles are plan-time errors, not runtime ones.
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Result<Self, EngineError> {
        let mut names = HashSet::new();
        for stage in &stages {
            if !names.insert(stage.name()) {
                return Err(EngineError::InvalidInvocation(format!(
                    "duplicate stage name: {}",
                    stage.name()
                )));
            }
        }
        for stage in &stages {
            for dep in stage.depends_on() {
                if !names.contains(dep) {
                    return Err(EngineError::InvalidInvocation(format!(
                        "stage {} depends on unknown stage {dep}",
                        stage.name()
                    )));
                }
            }
        }
        // Kahn's algorithm; anything left over sits on a cycle.
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for stage in &stages {
            indegree.entry(stage.name()).or_insert(0);
            for dep in stage.depends_on() {
                *indegree.entry(stage.name()).or_insert(0) += 1;
                dependents.entry(dep).or_default().push(stage.name());
            }
        }
        let mut ready: Vec<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut visited = 0usize;
        while let Some(name) = ready.pop() {
            visited += 1;
            for next in dependents.get(name).into_iter().flatten() {
                let d = indegree.get_mut(next).expect("indegree entry");
                *d -= 1;
                if *d == 0 {
                    ready.push(next);
                }
            }
        }
        if visited != stages.len() {
            return Err(EngineError::InvalidInvocation(
                "stage graph contains a cycle".into(),
            ));
        }
        Ok(Pipeline { stages })
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Execute the DAG to completion or cancellation. Stage failures are
    /// recorded and contained; only journal I/O trouble is logged, never
    /// propagated mid-run.
    pub async fn run(
        &self,
        ctx: Arc<RunContext>,
        mut journal: Journal,
        resume: HashMap<String, StageRecord>,
    ) -> RunReport {
        let started = Instant::now();
        let started_at = now_rfc3339();

        let mut states: HashMap<&'static str, StageState> = self
            .stages
            .iter()
            .map(|s| (s.name(), StageState::Pending))
            .collect();
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, StageOutcome, Duration)>();
        let mut cancelled = false;

        loop {
            // Launch every stage whose dependencies are terminal. Immediate
            // skips unblock further stages, so sweep until a fixpoint.
            let mut progressed = true;
            while progressed {
                progressed = false;
                for stage in &self.stages {
                    let name = stage.name();
                    if states[name] != StageState::Pending {
                        continue;
                    }
                    let deps = stage.depends_on();
                    if !deps.iter().all(|d| is_terminal(states[*d])) {
                        continue;
                    }
                    progressed = true;

                    if cancelled || ctx.cancel.is_cancelled() {
                        cancelled = true;
                        self.finish(
                            &ctx,
                            &mut journal,
                            &mut states,
                            name,
                            StageOutcome::Skipped(SkipReason::Cancelled),
                            Duration::ZERO,
                        );
                        continue;
                    }
                    if let Some(record) = resume.get(name) {
                        states.insert(name, StageState::Ok);
                        info!(stage = name, "resumed from journal, skipping execution");
                        ctx.record_result(StageResult {
                            name: name.to_string(),
                            state: StageState::Ok,
                            reason: record.reason.clone(),
                            duration: Duration::from_millis(record.duration_ms),
                            outputs: record.outputs.clone(),
                        });
                        continue;
                    }
                    if let Some(dep) = deps
                        .iter()
                        .find(|d| stage.requires_ok(d) && states[**d] != StageState::Ok)
                    {
                        self.finish(
                            &ctx,
                            &mut journal,
                            &mut states,
                            name,
                            StageOutcome::Skipped(SkipReason::Dependency(dep.to_string())),
                            Duration::ZERO,
                        );
                        continue;
                    }
                    if ctx.config.passive_only && !stage.passive() {
                        self.finish(
                            &ctx,
                            &mut journal,
                            &mut states,
                            name,
                            StageOutcome::Skipped(SkipReason::PassiveOnly),
                            Duration::ZERO,
                        );
                        continue;
                    }
                    let required = stage.required_tools();
                    let missing = ctx.registry.missing(&required);
                    if !missing.is_empty() {
                        self.finish(
                            &ctx,
                            &mut journal,
                            &mut states,
                            name,
                            StageOutcome::Skipped(SkipReason::ToolMissing(missing)),
                            Duration::ZERO,
                        );
                        continue;
                    }

                    states.insert(name, StageState::Running);
                    info!(stage = name, "starting");
                    let budget = ctx.config.budget_for(name);
                    let stage = stage.clone();
                    let ctx_task = ctx.clone();
                    let tx_task = tx.clone();
                    tokio::spawn(async move {
                        let start = Instant::now();
                        let outcome = match tokio::time::timeout(budget, stage.run(&ctx_task)).await
                        {
                            Ok(outcome) => outcome,
                            Err(_) => StageOutcome::Skipped(SkipReason::Timeout),
                        };
                        let _ = tx_task.send((stage.name().to_string(), outcome, start.elapsed()));
                    });
                }
            }

            if states.values().all(|s| is_terminal(*s)) {
                break;
            }

            tokio::select! {
                completed = rx.recv() => {
                    // The engine holds a sender, so recv never yields None here.
                    if let Some((name, outcome, duration)) = completed {
                        let name: &'static str = self
                            .stages
                            .iter()
                            .map(|s| s.name())
                            .find(|n| *n == name)
                            .expect("completion for known stage");
                        self.finish(&ctx, &mut journal, &mut states, name, outcome, duration);
                    }
                }
                _ = ctx.cancel.cancelled(), if !cancelled => {
                    warn!("cancellation requested, draining in-flight stages");
                    cancelled = true;
                }
            }
        }

        if cancelled {
            ctx.store.sweep_tmp();
        }

        // Results in catalog order regardless of completion order.
        let mut results = ctx.results_snapshot();
        let order: HashMap<&str, usize> = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name(), i))
            .collect();
        results.sort_by_key(|r| order.get(r.name.as_str()).copied().unwrap_or(usize::MAX));

        RunReport {
            run_id: ctx.store.run_id().to_string(),
            target: ctx.target.fqdn().to_string(),
            started_at,
            ended_at: now_rfc3339(),
            duration: started.elapsed(),
            cancelled,
            results,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        ctx: &RunContext,
        journal: &mut Journal,
        states: &mut HashMap<&'static str, StageState>,
        name: &'static str,
        outcome: StageOutcome,
        duration: Duration,
    ) {
        let state = outcome.state();
        states.insert(name, state);

        let (reason, outputs) = match &outcome {
            StageOutcome::Ok(artifacts) => {
                info!(stage = name, duration_ms = duration.as_millis() as u64, "ok");
                (None, artifacts.iter().map(|a| a.rel_path.clone()).collect())
            }
            StageOutcome::Skipped(reason) => {
                warn!(stage = name, %reason, "skipped");
                (Some(reason.to_string()), Vec::new())
            }
            StageOutcome::Failed(err) => {
                error!(stage = name, error = %err, "failed");
                (Some(err.clone()), Vec::new())
            }
        };

        // Re-recording an identical terminal state (a skip replayed on
        // resume) would only churn the journal file.
        let unchanged = journal
            .stage(name)
            .map(|r| r.state == state.to_string() && r.reason == reason && r.outputs == outputs)
            .unwrap_or(false);
        if !unchanged {
            journal.record(StageRecord {
                name: name.to_string(),
                state: state.to_string(),
                reason: reason.clone(),
                duration_ms: duration.as_millis() as u64,
                outputs: outputs.clone(),
            });
            if let Err(e) = journal.save(&ctx.store) {
                error!(error = %e, "journal write failed");
            }
        }

        ctx.record_result(StageResult {
            name: name.to_string(),
            state,
            reason,
            duration,
            outputs,
        });
    }
}

fn is_terminal(state: StageState) -> bool {
    matches!(
        state,
        StageState::Ok | StageState::Failed | StageState::Skipped
    )
}
