//! Directory fuzzing via ffuf over a capped, breaker-gated host sample.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pipeline::{RunContext, SkipReason, Stage, StageOutcome};
use recon_core::breaker::Admission;

use crate::wordlist::{resolve_wordlist, BUILTIN_DIR_PATHS, DIR_WORDLIST_LOCATIONS};
use crate::{exit_means_ok_empty, host_of_url, outcome_for, sanitize_host_filename};

const MATCH_CODES: &str = "200,204,301,302,307,401,403,405";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirHit {
    pub url: String,
    pub status: u16,
    pub length: u64,
}

pub struct DirFuzz;

#[async_trait]
impl Stage for DirFuzz {
    fn name(&self) -> &'static str {
        "dir_fuzz"
    }

    fn depends_on(&self) -> Vec<&'static str> {
        vec!["probe_http"]
    }

    fn required_tools(&self) -> Vec<&'static str> {
        vec!["ffuf"]
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        let targets: Vec<String> = ctx
            .store
            .read_lines("subdomains/live.txt")
            .unwrap_or_default()
            .into_iter()
            .take(ctx.config.dir_fuzz_hosts)
            .collect();
        if targets.is_empty() {
            return StageOutcome::Ok(Vec::new());
        }

        let wordlist = match resolve_wordlist(ctx.config.dir_wordlist.as_deref(), DIR_WORDLIST_LOCATIONS) {
            Some(path) => path,
            None => {
                // Materialize the embedded list so ffuf has a file to read.
                let path = match ctx.store.tool_output_path("endpoints/dirs/.wordlist.txt") {
                    Ok(p) => p,
                    Err(e) => return outcome_for(e),
                };
                if let Err(e) = std::fs::write(&path, BUILTIN_DIR_PATHS.join("\n")) {
                    return StageOutcome::Failed(format!("builtin wordlist write: {e}"));
                }
                path
            }
        };

        let fuzzes = targets.iter().map(|base| {
            let wordlist = wordlist.clone();
            async move {
                let host = host_of_url(base)?;
                if ctx.breakers.admit(&host) == Admission::Blocked {
                    warn!(url = base.as_str(), reason = "circuit-open", "skipping dir fuzz");
                    return None;
                }
                let base_trimmed = runner::sanitize_header_value(base.trim_end_matches('/'));
                let out_rel = format!("endpoints/dirs/.raw_{}.json", sanitize_host_filename(&host));
                let out = ctx.store.tool_output_path(&out_rel).ok()?;
                let args = vec![
                    "-u".to_string(),
                    format!("{base_trimmed}/FUZZ"),
                    "-w".to_string(),
                    wordlist.display().to_string(),
                    "-mc".to_string(),
                    MATCH_CODES.to_string(),
                    "-o".to_string(),
                    out.display().to_string(),
                    "-of".to_string(),
                    "json".to_string(),
                    "-s".to_string(),
                ];
                let result = ctx
                    .run_tool("ffuf", args, ctx.config.long_stage_budget)
                    .await
                    .ok()?;
                if !exit_means_ok_empty("ffuf", result.exit_code) && !result.timed_out {
                    warn!(url = base.as_str(), exit = ?result.exit_code, "ffuf exited abnormally");
                }
                let raw = ctx.store.read_to_string(&out_rel).unwrap_or_default();
                let _ = std::fs::remove_file(&out);
                Some((host, parse_ffuf_dirs(&raw)))
            }
        });

        let mut outputs = Vec::new();
        let mut total_hits = 0usize;
        for item in futures::future::join_all(fuzzes).await.into_iter().flatten() {
            let (host, hits) = item;
            total_hits += hits.len();
            let rel = format!("endpoints/dirs/{}.json", sanitize_host_filename(&host));
            match ctx.store.write_json(self.name(), &rel, &hits) {
                Ok(artifact) => outputs.push(artifact),
                Err(e) => return outcome_for(e),
            }
        }
        if ctx.cancel.is_cancelled() {
            return StageOutcome::Skipped(SkipReason::Cancelled);
        }
        info!(hosts = targets.len(), hits = total_hits, "directory fuzzing finished");
        StageOutcome::Ok(outputs)
    }
}

/// ffuf JSON report → sorted directory hits.
pub fn parse_ffuf_dirs(raw: &str) -> Vec<DirHit> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return Vec::new();
    };
    let mut hits: Vec<DirHit> = value["results"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|r| {
            Some(DirHit {
                url: r["url"].as_str()?.to_string(),
                status: r["status"].as_u64()? as u16,
                length: r["length"].as_u64().unwrap_or(0),
            })
        })
        .collect();
    hits.sort_by(|a, b| a.url.cmp(&b.url));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ffuf_results() {
        let raw = r#"{"results":[
            {"url":"https://a.example.com/admin","status":301,"length":120},
            {"url":"https://a.example.com/.env","status":200,"length":412}
        ]}"#;
        let hits = parse_ffuf_dirs(raw);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://a.example.com/.env");
        assert_eq!(hits[0].status, 200);
    }

    #[test]
    fn malformed_report_is_empty() {
        assert!(parse_ffuf_dirs("").is_empty());
        assert!(parse_ffuf_dirs("{}").is_empty());
    }
}
