//! DNS resolution of the merged subdomain inventory via dnsx.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pipeline::{RunContext, SkipReason, Stage, StageOutcome};
use recon_core::EngineError;

use crate::outcome_for;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedHost {
    pub host: String,
    pub addresses: Vec<String>,
}

pub struct DnsResolve;

#[async_trait]
impl Stage for DnsResolve {
    fn name(&self) -> &'static str {
        "dns_resolve"
    }

    fn depends_on(&self) -> Vec<&'static str> {
        vec!["merge_subdomains"]
    }

    fn required_tools(&self) -> Vec<&'static str> {
        vec!["dnsx"]
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        let hosts = match ctx.store.read_lines("subdomains/all.txt") {
            Ok(lines) => lines,
            Err(e) => return StageOutcome::Failed(format!("missing subdomain inventory: {e}")),
        };
        if hosts.is_empty() {
            let empty: Vec<ResolvedHost> = Vec::new();
            return match ctx
                .store
                .write_json(self.name(), "subdomains/resolved.json", &empty)
            {
                Ok(artifact) => StageOutcome::Ok(vec![artifact]),
                Err(e) => outcome_for(e),
            };
        }

        let stdin = hosts.join("\n").into_bytes();
        let args: Vec<String> = ["-json", "-silent", "-a", "-resp"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let result = match ctx
            .run_tool_with_stdin("dnsx", args, ctx.config.stage_budget, Some(stdin))
            .await
        {
            Ok(res) => res,
            Err(EngineError::Cancelled) => return StageOutcome::Skipped(SkipReason::Cancelled),
            Err(e) => return outcome_for(e),
        };

        let stdout = result.stdout_utf8();
        if result.timed_out && stdout.trim().is_empty() {
            return StageOutcome::Skipped(SkipReason::Timeout);
        }
        let resolved = parse_dnsx_output(&stdout);
        if resolved.is_empty() && !stdout.trim().is_empty() {
            return StageOutcome::Failed("dnsx output unparseable".into());
        }
        info!(
            resolved = resolved.len(),
            total = hosts.len(),
            "dns resolution finished"
        );
        if !result.success() && !result.timed_out {
            warn!(exit = ?result.exit_code, "dnsx exited nonzero, keeping parsed output");
        }
        match ctx
            .store
            .write_json(self.name(), "subdomains/resolved.json", &resolved)
        {
            Ok(artifact) => StageOutcome::Ok(vec![artifact]),
            Err(e) => outcome_for(e),
        }
    }
}

/// dnsx JSONL → resolved hosts with their A records, sorted by host so the
/// artifact is independent of resolution order.
pub fn parse_dnsx_output(raw: &str) -> Vec<ResolvedHost> {
    let mut resolved: Vec<ResolvedHost> = raw
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
        .filter_map(|v| {
            let host = v["host"].as_str()?.to_ascii_lowercase();
            let mut addresses: Vec<String> = v["a"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|a| a.as_str().map(String::from))
                .collect();
            addresses.sort();
            Some(ResolvedHost { host, addresses })
        })
        .collect();
    resolved.sort_by(|a, b| a.host.cmp(&b.host));
    resolved.dedup_by(|a, b| a.host == b.host);
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dnsx_lines_in_any_order() {
        let raw = concat!(
            r#"{"host":"b.example.com","a":["10.9.8.7"]}"#,
            "\n",
            r#"{"host":"A.example.com","a":["1.2.3.4","1.2.3.5"]}"#,
            "\nnot json\n",
        );
        let resolved = parse_dnsx_output(raw);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].host, "a.example.com");
        assert_eq!(resolved[0].addresses, vec!["1.2.3.4", "1.2.3.5"]);
        assert_eq!(resolved[1].host, "b.example.com");
    }

    #[test]
    fn duplicate_hosts_collapse() {
        let raw = concat!(
            r#"{"host":"a.example.com","a":["1.1.1.1"]}"#,
            "\n",
            r#"{"host":"a.example.com","a":["1.1.1.1"]}"#,
            "\n",
        );
        assert_eq!(parse_dnsx_output(raw).len(), 1);
    }

    #[test]
    fn garbage_only_input_yields_nothing() {
        assert!(parse_dnsx_output("garbage\nmore garbage\n").is_empty());
    }
}
