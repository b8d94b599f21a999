//! Subdomain takeover detection: nuclei's takeover templates when
//! available, subzy as the fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pipeline::{RunContext, SkipReason, Stage, StageOutcome};
use recon_core::EngineError;

use crate::{exit_means_ok_empty, outcome_for};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeoverFinding {
    pub host: String,
    pub service: String,
    pub severity: String,
    pub evidence: String,
}

pub struct TakeoverCheck;

#[async_trait]
impl Stage for TakeoverCheck {
    fn name(&self) -> &'static str {
        "takeover_check"
    }

    fn depends_on(&self) -> Vec<&'static str> {
        vec!["probe_http"]
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        let inventory = match ctx.store.artifact_path("subdomains/all.txt") {
            Ok(p) => p,
            Err(e) => return outcome_for(e),
        };

        let findings = if ctx.registry.locate("nuclei").is_some() {
            let args = vec![
                "-l".to_string(),
                inventory.display().to_string(),
                "-tags".to_string(),
                "takeover".to_string(),
                "-jsonl".to_string(),
                "-silent".to_string(),
            ];
            match ctx.run_tool("nuclei", args, ctx.config.stage_budget).await {
                Ok(res) => {
                    if !exit_means_ok_empty("nuclei", res.exit_code) && !res.timed_out {
                        warn!(exit = ?res.exit_code, "nuclei exited abnormally during takeover scan");
                    }
                    parse_nuclei_takeovers(&res.stdout_utf8())
                }
                Err(EngineError::Cancelled) => {
                    return StageOutcome::Skipped(SkipReason::Cancelled)
                }
                Err(e) => return outcome_for(e),
            }
        } else if ctx.registry.locate("subzy").is_some() {
            let out = match ctx.store.tool_output_path("vulns/.subzy.txt") {
                Ok(p) => p,
                Err(e) => return outcome_for(e),
            };
            let args = vec![
                "run".to_string(),
                "--targets".to_string(),
                inventory.display().to_string(),
                "--output".to_string(),
                out.display().to_string(),
                "--hide_fails".to_string(),
            ];
            match ctx.run_tool("subzy", args, ctx.config.stage_budget).await {
                Ok(_) => {
                    let raw = ctx.store.read_to_string("vulns/.subzy.txt").unwrap_or_default();
                    let _ = std::fs::remove_file(&out);
                    parse_subzy_output(&raw)
                }
                Err(EngineError::Cancelled) => {
                    return StageOutcome::Skipped(SkipReason::Cancelled)
                }
                Err(e) => return outcome_for(e),
            }
        } else {
            return StageOutcome::Skipped(SkipReason::ToolMissing(vec![
                "nuclei".into(),
                "subzy".into(),
            ]));
        };

        if !findings.is_empty() {
            warn!(count = findings.len(), "potential subdomain takeovers found");
        } else {
            info!("no takeover candidates");
        }
        match ctx.store.write_json(self.name(), "vulns/takeovers.json", &findings) {
            Ok(artifact) => StageOutcome::Ok(vec![artifact]),
            Err(e) => outcome_for(e),
        }
    }
}

/// nuclei JSONL (takeover templates) → findings sorted by host.
pub fn parse_nuclei_takeovers(raw: &str) -> Vec<TakeoverFinding> {
    let mut findings: Vec<TakeoverFinding> = raw
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
        .filter_map(|v| {
            let host = v["host"].as_str().or_else(|| v["matched-at"].as_str())?;
            Some(TakeoverFinding {
                host: host.to_ascii_lowercase(),
                service: v["template-id"].as_str().unwrap_or("unknown").to_string(),
                severity: v["info"]["severity"].as_str().unwrap_or("high").to_string(),
                evidence: v["matched-at"].as_str().unwrap_or(host).to_string(),
            })
        })
        .collect();
    findings.sort_by(|a, b| a.host.cmp(&b.host));
    findings
}

/// subzy's text report: vulnerable lines look like
/// `[ VULNERABLE ] sub.example.com [github]`.
pub fn parse_subzy_output(raw: &str) -> Vec<TakeoverFinding> {
    let mut findings: Vec<TakeoverFinding> = raw
        .lines()
        .filter(|l| {
            let upper = l.to_ascii_uppercase();
            upper.contains("VULNERABLE") && !upper.contains("NOT VULNERABLE")
        })
        .filter_map(|line| {
            let host = line
                .split_whitespace()
                .find(|tok| tok.contains('.') && !tok.starts_with('['))?
                .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '.' && c != '-')
                .to_ascii_lowercase();
            if host.is_empty() {
                return None;
            }
            let service = line
                .rsplit('[')
                .next()
                .and_then(|s| s.split(']').next())
                .unwrap_or("unknown")
                .to_string();
            Some(TakeoverFinding {
                host,
                service,
                severity: "high".into(),
                evidence: line.trim().to_string(),
            })
        })
        .collect();
    findings.sort_by(|a, b| a.host.cmp(&b.host));
    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nuclei_takeover_lines_parse() {
        let raw = concat!(
            r#"{"template-id":"github-takeover","host":"gh.example.com","matched-at":"https://gh.example.com","info":{"severity":"high"}}"#,
            "\n",
            r#"{"template-id":"heroku-takeover","host":"app.example.com","info":{"severity":"medium"}}"#,
            "\n",
        );
        let findings = parse_nuclei_takeovers(raw);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].host, "app.example.com");
        assert_eq!(findings[1].service, "github-takeover");
        assert_eq!(findings[1].severity, "high");
    }

    #[test]
    fn subzy_vulnerable_lines_parse() {
        let raw = "[ VULNERABLE ] blog.example.com [tumblr]\n[ NOT VULNERABLE ] www.example.com\n";
        let findings = parse_subzy_output(raw);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].host, "blog.example.com");
        assert_eq!(findings[0].service, "tumblr");
    }

    #[test]
    fn empty_scan_is_empty_not_error() {
        assert!(parse_nuclei_takeovers("").is_empty());
        assert!(parse_subzy_output("").is_empty());
    }
}
