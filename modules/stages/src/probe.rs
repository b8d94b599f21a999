//! HTTP probing of resolved hosts via httpx, feeding the breaker map and
//! every web-facing stage downstream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pipeline::{RunContext, SkipReason, Stage, StageOutcome};
use recon_core::breaker::is_breaker_failure;
use recon_core::EngineError;

use crate::resolve::ResolvedHost;
use crate::{host_of_url, outcome_for};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEntry {
    pub url: String,
    pub host: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tech: Vec<String>,
}

pub struct ProbeHttp;

#[async_trait]
impl Stage for ProbeHttp {
    fn name(&self) -> &'static str {
        "probe_http"
    }

    fn depends_on(&self) -> Vec<&'static str> {
        vec!["dns_resolve"]
    }

    fn required_tools(&self) -> Vec<&'static str> {
        vec!["httpx"]
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        let resolved: Vec<ResolvedHost> = ctx
            .store
            .read_json("subdomains/resolved.json")
            .unwrap_or_default();
        let hosts: Vec<String> = if resolved.is_empty() {
            ctx.store.read_lines("subdomains/all.txt").unwrap_or_default()
        } else {
            resolved.into_iter().map(|r| r.host).collect()
        };
        if hosts.is_empty() {
            return empty_outputs(self.name(), ctx);
        }

        let stdin = hosts.join("\n").into_bytes();
        let args: Vec<String> = [
            "-json",
            "-silent",
            "-status-code",
            "-title",
            "-tech-detect",
            "-follow-redirects",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let result = match ctx
            .run_tool_with_stdin("httpx", args, ctx.config.stage_budget, Some(stdin))
            .await
        {
            Ok(res) => res,
            Err(EngineError::Cancelled) => return StageOutcome::Skipped(SkipReason::Cancelled),
            Err(e) => return outcome_for(e),
        };

        let entries = parse_httpx_output(&result.stdout_utf8());
        if entries.is_empty() && result.timed_out {
            return StageOutcome::Skipped(SkipReason::Timeout);
        }

        // Every response updates the per-host breaker; WAF pushback here
        // suppresses the noisier stages that follow.
        for entry in &entries {
            if is_breaker_failure(entry.status) {
                ctx.breakers.record_failure(&entry.host);
            } else {
                ctx.breakers.record_success(&entry.host);
            }
        }
        let tripped = ctx.breakers.tripped_hosts();
        if !tripped.is_empty() {
            warn!(hosts = ?tripped, "breakers tripped during http probing");
        }
        info!(live = entries.len(), probed = hosts.len(), "http probing finished");

        let urls: Vec<&str> = entries.iter().map(|e| e.url.as_str()).collect();
        let live = match ctx.store.write_lines(self.name(), "subdomains/live.txt", urls) {
            Ok(a) => a,
            Err(e) => return outcome_for(e),
        };
        match ctx.store.write_json(self.name(), "http/httpx.json", &entries) {
            Ok(raw) => StageOutcome::Ok(vec![live, raw]),
            Err(e) => outcome_for(e),
        }
    }
}

fn empty_outputs(stage: &str, ctx: &RunContext) -> StageOutcome {
    let no_urls: Vec<&str> = Vec::new();
    let empty: Vec<HttpEntry> = Vec::new();
    let live = match ctx.store.write_lines(stage, "subdomains/live.txt", no_urls) {
        Ok(a) => a,
        Err(e) => return outcome_for(e),
    };
    match ctx.store.write_json(stage, "http/httpx.json", &empty) {
        Ok(raw) => StageOutcome::Ok(vec![live, raw]),
        Err(e) => outcome_for(e),
    }
}

/// httpx JSONL → normalized entries, sorted by URL. Unparseable lines are
/// dropped; a stream of garbage simply yields nothing.
pub fn parse_httpx_output(raw: &str) -> Vec<HttpEntry> {
    let mut entries: Vec<HttpEntry> = raw
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
        .filter_map(|v| {
            let url = v["url"].as_str()?.to_string();
            let status = v["status_code"]
                .as_u64()
                .or_else(|| v["status-code"].as_u64())? as u16;
            // httpx's own "host" field carries the resolved IP; breaker
            // keys want the hostname, so the URL wins.
            let host = host_of_url(&url)
                .or_else(|| v["input"].as_str().map(|h| h.to_ascii_lowercase()))
                .or_else(|| v["host"].as_str().map(|h| h.to_ascii_lowercase()))?;
            let title = v["title"].as_str().map(String::from);
            let tech: Vec<String> = v["tech"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|t| t.as_str().map(String::from))
                .collect();
            Some(HttpEntry { url, host, status, title, tech })
        })
        .collect();
    entries.sort_by(|a, b| a.url.cmp(&b.url));
    entries.dedup_by(|a, b| a.url == b.url);
    entries
}
