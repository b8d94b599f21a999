//! Hidden parameter discovery via arjun over a capped URL sample.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{info, warn};

use pipeline::{RunContext, SkipReason, Stage, StageOutcome};
use recon_core::breaker::Admission;

use crate::{exit_means_ok_empty, host_of_url, outcome_for, sanitize_host_filename};

pub struct ParamDiscover;

#[async_trait]
impl Stage for ParamDiscover {
    fn name(&self) -> &'static str {
        "param_discover"
    }

    fn depends_on(&self) -> Vec<&'static str> {
        vec!["probe_http", "crawl"]
    }

    // Crawled endpoints are preferred input but live hosts suffice.
    fn requires_ok(&self, dep: &str) -> bool {
        dep != "crawl"
    }

    fn required_tools(&self) -> Vec<&'static str> {
        vec!["arjun"]
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        let mut urls = ctx.store.read_lines("endpoints/urls.txt").unwrap_or_default();
        if urls.is_empty() {
            urls = ctx.store.read_lines("subdomains/live.txt").unwrap_or_default();
        }
        let urls: Vec<String> = urls.into_iter().take(ctx.config.param_urls).collect();

        let scans = urls.iter().enumerate().map(|(index, url)| async move {
            let host = host_of_url(url)?;
            if ctx.breakers.admit(&host) == Admission::Blocked {
                warn!(url = url.as_str(), reason = "circuit-open", "skipping parameter discovery");
                return None;
            }
            let out_rel = format!("params/.arjun_{}_{index}.txt", sanitize_host_filename(&host));
            let out = ctx.store.tool_output_path(&out_rel).ok()?;
            let args = vec![
                "-u".to_string(),
                runner::sanitize_header_value(url),
                "-oT".to_string(),
                out.display().to_string(),
                "-t".to_string(),
                "10".to_string(),
            ];
            let result = ctx
                .run_tool("arjun", args, ctx.config.stage_budget)
                .await
                .ok()?;
            if !exit_means_ok_empty("arjun", result.exit_code) && !result.timed_out {
                warn!(url = url.as_str(), exit = ?result.exit_code, "arjun exited abnormally");
            }
            let found = ctx.store.read_lines(&out_rel).unwrap_or_default();
            let _ = std::fs::remove_file(&out);
            Some(found)
        });

        let mut params: BTreeSet<String> = BTreeSet::new();
        for found in futures::future::join_all(scans).await.into_iter().flatten() {
            params.extend(parse_arjun_lines(found));
        }
        if ctx.cancel.is_cancelled() {
            return StageOutcome::Skipped(SkipReason::Cancelled);
        }
        info!(parameters = params.len(), urls = urls.len(), "parameter discovery finished");

        match ctx
            .store
            .write_lines(self.name(), "params/parameters.txt", &params)
        {
            Ok(artifact) => StageOutcome::Ok(vec![artifact]),
            Err(e) => outcome_for(e),
        }
    }
}

/// arjun's text output: either bare parameter names or `url?a=&b=` lines.
pub fn parse_arjun_lines(lines: Vec<String>) -> BTreeSet<String> {
    let mut params = BTreeSet::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((_, query)) = line.split_once('?') {
            for pair in query.split('&') {
                let name = pair.split('=').next().unwrap_or_default().trim();
                if !name.is_empty() {
                    params.insert(name.to_string());
                }
            }
        } else if !line.contains('/') && line.len() < 64 {
            params.insert(line.to_string());
        }
    }
    params
}
