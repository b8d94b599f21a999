//! The run context threaded explicitly through every stage: config
//! snapshot, registry, governor, breakers, artifact store, cancellation.

use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use artifacts::ArtifactStore;
use recon_core::breaker::BreakerMap;
use recon_core::governor::Governor;
use recon_core::target::{Scope, Target};
use recon_core::EngineError;
use runner::{InvocationResult, ProcessRunner, ToolInvocation, ToolRegistry};

use crate::config::ScanConfig;
use crate::report::StageResult;

pub struct RunContext {
    pub target: Target,
    pub scope: Scope,
    pub config: ScanConfig,
    pub store: ArtifactStore,
    pub registry: ToolRegistry,
    pub runner: ProcessRunner,
    pub governor: Governor,
    pub breakers: BreakerMap,
    pub cancel: CancellationToken,
    /// RFC3339 stamp taken when the context was built.
    pub started_at: String,
    /// Monotonic twin of `started_at` for duration math.
    pub started: std::time::Instant,
    /// Terminal results so far, appended by the engine as stages finish.
    /// The aggregator reads this to build the stage table.
    pub results: Mutex<Vec<StageResult>>,
}

impl RunContext {
    pub fn new(
        target: Target,
        scope: Scope,
        config: ScanConfig,
        store: ArtifactStore,
        registry: ToolRegistry,
        cancel: CancellationToken,
    ) -> Self {
        let governor = Governor::new(config.permits);
        let breakers = BreakerMap::new(config.breaker.clone());
        let runner = ProcessRunner::new(config.env_allow.clone());
        RunContext {
            target,
            scope,
            config,
            store,
            registry,
            runner,
            governor,
            breakers,
            cancel,
            started_at: artifacts::store::now_rfc3339(),
            started: std::time::Instant::now(),
            results: Mutex::new(Vec::new()),
        }
    }

    /// Resolve, admit through the governor, and invoke one tool. This is
    /// the single path every external invocation takes, so the global
    /// concurrency bound holds across all stages and their fan-outs.
    pub async fn run_tool(
        &self,
        tool: &str,
        args: Vec<String>,
        deadline: Duration,
    ) -> Result<InvocationResult, EngineError> {
        self.run_tool_with_stdin(tool, args, deadline, None).await
    }

    pub async fn run_tool_with_stdin(
        &self,
        tool: &str,
        args: Vec<String>,
        deadline: Duration,
        stdin: Option<Vec<u8>>,
    ) -> Result<InvocationResult, EngineError> {
        let binary = self
            .registry
            .locate(tool)
            .ok_or_else(|| EngineError::ToolMissing(tool.to_string()))?;
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(binary.to_string_lossy().into_owned());
        argv.extend(args);

        let permit = self.governor.admit(&self.cancel).await?;
        debug!(tool, "governor permit acquired");
        let mut invocation = ToolInvocation::new(tool, argv, deadline);
        invocation.stdin = stdin;
        let result = self.runner.invoke(invocation, &self.cancel).await;
        drop(permit);
        result
    }

    pub fn record_result(&self, result: StageResult) {
        self.results.lock().expect("results lock").push(result);
    }

    pub fn results_snapshot(&self) -> Vec<StageResult> {
        self.results.lock().expect("results lock").clone()
    }
}
