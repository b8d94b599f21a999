//! Engine behavior tests against stub stages: dependency ordering, skip
//! policy, resume, budgets, cancellation, and the global concurrency bound.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use artifacts::journal::{Journal, StageRecord};
use artifacts::ArtifactStore;
use pipeline::{Pipeline, RunContext, ScanConfig, SkipReason, Stage, StageOutcome, StageState};
use recon_core::target::{Scope, Target};
use runner::ToolRegistry;

#[derive(Clone, Default)]
struct Probe {
    order: Arc<Mutex<Vec<String>>>,
    executions: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

struct Step {
    name: &'static str,
    deps: Vec<&'static str>,
    soft_deps: Vec<&'static str>,
    tools: Vec<&'static str>,
    passive: bool,
    delay: Duration,
    fail: bool,
    use_governor: bool,
    probe: Probe,
}

impl Step {
    fn new(name: &'static str, probe: &Probe) -> Self {
        Step {
            name,
            deps: Vec::new(),
            soft_deps: Vec::new(),
            tools: Vec::new(),
            passive: true,
            delay: Duration::from_millis(5),
            fail: false,
            use_governor: false,
            probe: probe.clone(),
        }
    }

    fn deps(mut self, deps: &[&'static str]) -> Self {
        self.deps = deps.to_vec();
        self
    }

    fn soft(mut self, soft: &[&'static str]) -> Self {
        self.soft_deps = soft.to_vec();
        self
    }

    fn tools(mut self, tools: &[&'static str]) -> Self {
        self.tools = tools.to_vec();
        self
    }

    fn active(mut self) -> Self {
        self.passive = false;
        self
    }

    fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn governed(mut self) -> Self {
        self.use_governor = true;
        self
    }
}

#[async_trait]
impl Stage for Step {
    fn name(&self) -> &'static str {
        self.name
    }

    fn depends_on(&self) -> Vec<&'static str> {
        self.deps.clone()
    }

    fn requires_ok(&self, dep: &str) -> bool {
        !self.soft_deps.contains(&dep)
    }

    fn required_tools(&self) -> Vec<&'static str> {
        self.tools.clone()
    }

    fn passive(&self) -> bool {
        self.passive
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        self.probe.executions.fetch_add(1, Ordering::SeqCst);
        self.probe.order.lock().unwrap().push(self.name.to_string());

        let _permit = if self.use_governor {
            match ctx.governor.admit(&ctx.cancel).await {
                Ok(p) => Some(p),
                Err(_) => return StageOutcome::Skipped(SkipReason::Cancelled),
            }
        } else {
            None
        };
        let now = self.probe.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.peak.fetch_max(now, Ordering::SeqCst);

        let outcome = tokio::select! {
            _ = tokio::time::sleep(self.delay) => {
                if self.fail {
                    StageOutcome::Failed("injected failure".into())
                } else {
                    match ctx.store.write_lines(
                        self.name,
                        &format!("reports/{}.txt", self.name),
                        [self.name],
                    ) {
                        Ok(artifact) => StageOutcome::Ok(vec![artifact]),
                        Err(e) => StageOutcome::Failed(e.to_string()),
                    }
                }
            }
            _ = ctx.cancel.cancelled() => StageOutcome::Skipped(SkipReason::Cancelled),
        };
        self.probe.live.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

fn context(dir: &std::path::Path, config: ScanConfig) -> Arc<RunContext> {
    let store = ArtifactStore::create(dir, "example.com").unwrap();
    make_context(store, config, CancellationToken::new())
}

fn make_context(
    store: ArtifactStore,
    config: ScanConfig,
    cancel: CancellationToken,
) -> Arc<RunContext> {
    Arc::new(RunContext::new(
        Target::parse("example.com").unwrap(),
        Scope::default(),
        config,
        store,
        ToolRegistry::new(HashMap::new(), None),
        cancel,
    ))
}

fn journal_for(ctx: &RunContext) -> Journal {
    Journal::new(ctx.store.run_id(), "test-hash")
}

#[tokio::test]
async fn dependencies_complete_before_dependents_start() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Probe::default();
    let pipeline = Pipeline::new(vec![
        Arc::new(Step::new("a", &probe)) as Arc<dyn Stage>,
        Arc::new(Step::new("b", &probe).deps(&["a"])),
        Arc::new(Step::new("c", &probe).deps(&["a"])),
        Arc::new(Step::new("d", &probe).deps(&["b", "c"])),
    ])
    .unwrap();

    let ctx = context(dir.path(), ScanConfig::default());
    let journal = journal_for(&ctx);
    let report = pipeline.run(ctx.clone(), journal, HashMap::new()).await;

    assert!(report.results.iter().all(|r| r.state == StageState::Ok));
    let order = probe.order.lock().unwrap().clone();
    assert_eq!(order.first().map(String::as_str), Some("a"));
    assert_eq!(order.last().map(String::as_str), Some("d"));

    let journal = Journal::load(&ctx.store).unwrap();
    assert_eq!(journal.completed.len(), 4);
    assert!(journal.completed.iter().all(|r| r.state == "ok"));
}

#[tokio::test]
async fn failed_dependency_skips_dependents_without_aborting() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Probe::default();
    let pipeline = Pipeline::new(vec![
        Arc::new(Step::new("a", &probe).failing()) as Arc<dyn Stage>,
        Arc::new(Step::new("b", &probe).deps(&["a"])),
        Arc::new(Step::new("c", &probe)),
    ])
    .unwrap();

    let ctx = context(dir.path(), ScanConfig::default());
    let report = pipeline
        .run(ctx.clone(), journal_for(&ctx), HashMap::new())
        .await;

    assert_eq!(report.state_of("a"), Some(StageState::Failed));
    assert_eq!(report.state_of("b"), Some(StageState::Skipped));
    assert_eq!(report.state_of("c"), Some(StageState::Ok));
    let b = report.results.iter().find(|r| r.name == "b").unwrap();
    assert!(b.reason.as_deref().unwrap_or("").contains("dependency"));
}

#[tokio::test]
async fn soft_dependency_allows_running_after_skip() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Probe::default();
    let pipeline = Pipeline::new(vec![
        Arc::new(Step::new("brute", &probe).tools(&["definitely-not-installed-tool"]))
            as Arc<dyn Stage>,
        Arc::new(Step::new("merge", &probe).deps(&["brute"]).soft(&["brute"])),
    ])
    .unwrap();

    let ctx = context(dir.path(), ScanConfig::default());
    let report = pipeline
        .run(ctx.clone(), journal_for(&ctx), HashMap::new())
        .await;

    assert_eq!(report.state_of("brute"), Some(StageState::Skipped));
    assert_eq!(report.state_of("merge"), Some(StageState::Ok));
    let brute = report.results.iter().find(|r| r.name == "brute").unwrap();
    assert!(brute.reason.as_deref().unwrap_or("").contains("tool-missing"));
}

#[tokio::test]
async fn passive_only_excludes_active_stages() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Probe::default();
    let pipeline = Pipeline::new(vec![
        Arc::new(Step::new("quiet", &probe)) as Arc<dyn Stage>,
        Arc::new(Step::new("noisy", &probe).active()),
    ])
    .unwrap();

    let mut config = ScanConfig::default();
    config.passive_only = true;
    let ctx = context(dir.path(), config);
    let report = pipeline
        .run(ctx.clone(), journal_for(&ctx), HashMap::new())
        .await;

    assert_eq!(report.state_of("quiet"), Some(StageState::Ok));
    assert_eq!(report.state_of("noisy"), Some(StageState::Skipped));
    assert_eq!(probe.executions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resume_does_not_rerun_ok_stages() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Probe::default();
    let build = |probe: &Probe| {
        Pipeline::new(vec![
            Arc::new(Step::new("a", probe)) as Arc<dyn Stage>,
            Arc::new(Step::new("b", probe).deps(&["a"])),
        ])
        .unwrap()
    };

    let ctx = context(dir.path(), ScanConfig::default());
    let run_root = ctx.store.run_root().to_path_buf();
    build(&probe)
        .run(ctx.clone(), journal_for(&ctx), HashMap::new())
        .await;
    assert_eq!(probe.executions.load(Ordering::SeqCst), 2);

    // Second run over the same directory, resuming from the journal.
    let store = ArtifactStore::open(&run_root).unwrap();
    let journal = Journal::load(&store).unwrap();
    let mut resume: HashMap<String, StageRecord> = HashMap::new();
    for name in journal.resumable_ok_stages(&store) {
        resume.insert(name.clone(), journal.stage(&name).unwrap().clone());
    }
    assert_eq!(resume.len(), 2);

    let ctx2 = make_context(store, ScanConfig::default(), CancellationToken::new());
    let report = build(&probe).run(ctx2, journal, resume).await;

    assert_eq!(probe.executions.load(Ordering::SeqCst), 2, "no re-execution");
    assert!(report.results.iter().all(|r| r.state == StageState::Ok));
}

#[tokio::test]
async fn independent_stages_overlap_in_time() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Probe::default();
    let pipeline = Pipeline::new(vec![
        Arc::new(Step::new("x", &probe).delay(Duration::from_millis(150))) as Arc<dyn Stage>,
        Arc::new(Step::new("y", &probe).delay(Duration::from_millis(150))),
    ])
    .unwrap();

    let ctx = context(dir.path(), ScanConfig::default());
    let start = Instant::now();
    pipeline
        .run(ctx.clone(), journal_for(&ctx), HashMap::new())
        .await;
    assert!(start.elapsed() < Duration::from_millis(280));
    assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn governor_bounds_fanout_across_stages() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Probe::default();
    let stages: Vec<Arc<dyn Stage>> = [
        "s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8",
    ]
    .iter()
    .map(|n| {
        Arc::new(Step::new(*n, &probe).governed().delay(Duration::from_millis(30)))
            as Arc<dyn Stage>
    })
    .collect();
    let pipeline = Pipeline::new(stages).unwrap();

    let mut config = ScanConfig::default();
    config.permits = 3;
    let ctx = context(dir.path(), config);
    pipeline
        .run(ctx.clone(), journal_for(&ctx), HashMap::new())
        .await;

    assert!(probe.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(probe.executions.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn stage_budget_times_out_runaway_stage() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Probe::default();
    let pipeline = Pipeline::new(vec![Arc::new(
        Step::new("slow", &probe).delay(Duration::from_secs(30)),
    ) as Arc<dyn Stage>])
    .unwrap();

    let mut config = ScanConfig::default();
    config.stage_budget = Duration::from_millis(80);
    let ctx = context(dir.path(), config);
    let start = Instant::now();
    let report = pipeline
        .run(ctx.clone(), journal_for(&ctx), HashMap::new())
        .await;

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(report.state_of("slow"), Some(StageState::Skipped));
    let slow = report.results.iter().find(|r| r.name == "slow").unwrap();
    assert!(slow.reason.as_deref().unwrap_or("").contains("budget"));
}

#[tokio::test]
async fn cancellation_drains_promptly_and_skips_pending() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Probe::default();
    let pipeline = Pipeline::new(vec![
        Arc::new(Step::new("long", &probe).delay(Duration::from_secs(30))) as Arc<dyn Stage>,
        Arc::new(Step::new("after", &probe).deps(&["long"])),
    ])
    .unwrap();

    let cancel = CancellationToken::new();
    let store = ArtifactStore::create(dir.path(), "example.com").unwrap();
    let ctx = make_context(store, ScanConfig::default(), cancel.clone());

    let killer = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        killer.cancel();
    });

    let start = Instant::now();
    let report = pipeline
        .run(ctx.clone(), journal_for(&ctx), HashMap::new())
        .await;

    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(report.cancelled);
    assert_eq!(report.state_of("long"), Some(StageState::Skipped));
    assert_eq!(report.state_of("after"), Some(StageState::Skipped));
}

#[test]
fn plan_time_validation_rejects_bad_graphs() {
    let probe = Probe::default();
    let cycle = Pipeline::new(vec![
        Arc::new(Step::new("a", &probe).deps(&["b"])) as Arc<dyn Stage>,
        Arc::new(Step::new("b", &probe).deps(&["a"])),
    ]);
    assert!(cycle.is_err());

    let unknown = Pipeline::new(vec![
        Arc::new(Step::new("a", &probe).deps(&["ghost"])) as Arc<dyn Stage>
    ]);
    assert!(unknown.is_err());

    let duplicate = Pipeline::new(vec![
        Arc::new(Step::new("a", &probe)) as Arc<dyn Stage>,
        Arc::new(Step::new("a", &probe)),
    ]);
    assert!(duplicate.is_err());
}
