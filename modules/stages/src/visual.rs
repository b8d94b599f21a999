//! Screenshot capture of live hosts via gowitness, in breaker-aware chunks.

use async_trait::async_trait;
use tracing::{info, warn};

use pipeline::{RunContext, SkipReason, Stage, StageOutcome};
use recon_core::breaker::Admission;
use recon_core::EngineError;

use crate::{host_of_url, outcome_for};

const CHUNK: usize = 10;

pub struct Screenshot;

#[async_trait]
impl Stage for Screenshot {
    fn name(&self) -> &'static str {
        "screenshot"
    }

    fn depends_on(&self) -> Vec<&'static str> {
        vec!["probe_http"]
    }

    fn required_tools(&self) -> Vec<&'static str> {
        vec!["gowitness"]
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        let urls = ctx.store.read_lines("subdomains/live.txt").unwrap_or_default();
        let (admitted, blocked): (Vec<String>, Vec<String>) = urls.into_iter().partition(|url| {
            host_of_url(url)
                .map(|h| ctx.breakers.admit(&h) != Admission::Blocked)
                .unwrap_or(false)
        });
        for url in &blocked {
            warn!(url = url.as_str(), reason = "circuit-open", "skipping screenshot");
        }
        if admitted.is_empty() {
            if !blocked.is_empty() {
                return StageOutcome::Skipped(SkipReason::CircuitOpen(
                    blocked.first().cloned().unwrap_or_default(),
                ));
            }
            return StageOutcome::Ok(Vec::new());
        }

        let shots_dir = match ctx.store.tool_output_path("screenshots/.keep") {
            Ok(keep) => keep.parent().expect("screenshots dir").to_path_buf(),
            Err(e) => return outcome_for(e),
        };

        let mut chunk_failures = 0usize;
        for (index, chunk) in admitted.chunks(CHUNK).enumerate() {
            if ctx.cancel.is_cancelled() {
                return StageOutcome::Skipped(SkipReason::Cancelled);
            }
            let input_rel = format!("screenshots/.chunk_{index}.txt");
            let input = match ctx.store.tool_output_path(&input_rel) {
                Ok(p) => p,
                Err(e) => return outcome_for(e),
            };
            if let Err(e) = std::fs::write(&input, chunk.join("\n")) {
                return StageOutcome::Failed(format!("chunk write: {e}"));
            }
            let args = vec![
                "file".to_string(),
                "-f".to_string(),
                input.display().to_string(),
                "--screenshot-path".to_string(),
                shots_dir.display().to_string(),
                "--disable-logging".to_string(),
            ];
            match ctx.run_tool("gowitness", args, ctx.config.long_stage_budget).await {
                Ok(res) if res.success() => {}
                Ok(res) => {
                    // Individual hosts failing to render is routine.
                    chunk_failures += 1;
                    warn!(chunk = index, exit = ?res.exit_code, timed_out = res.timed_out, "gowitness chunk incomplete");
                }
                Err(EngineError::Cancelled) => {
                    return StageOutcome::Skipped(SkipReason::Cancelled)
                }
                Err(e) => return outcome_for(e),
            }
            let _ = std::fs::remove_file(&input);
        }

        let mut outputs = Vec::new();
        match ctx.store.list_dir("screenshots", ".png") {
            Ok(pngs) => {
                for rel in pngs {
                    match ctx.store.register_existing(self.name(), &rel) {
                        Ok(artifact) => outputs.push(artifact),
                        Err(e) => warn!(rel = rel.as_str(), error = %e, "could not register screenshot"),
                    }
                }
            }
            Err(e) => return outcome_for(e),
        }
        info!(
            captured = outputs.len(),
            hosts = admitted.len(),
            failed_chunks = chunk_failures,
            "screenshot capture finished"
        );
        StageOutcome::Ok(outputs)
    }
}
