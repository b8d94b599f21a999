//! Vulnerability scanning of live hosts via nuclei with the configured
//! severity filter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pipeline::{RunContext, SkipReason, Stage, StageOutcome};
use recon_core::EngineError;

use crate::{exit_means_ok_empty, outcome_for};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnFinding {
    pub template: String,
    pub name: String,
    pub severity: String,
    pub host: String,
    pub matched_at: String,
}

pub struct VulnScan;

#[async_trait]
impl Stage for VulnScan {
    fn name(&self) -> &'static str {
        "vuln_scan"
    }

    fn depends_on(&self) -> Vec<&'static str> {
        vec!["probe_http"]
    }

    fn required_tools(&self) -> Vec<&'static str> {
        vec!["nuclei"]
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        let live = match ctx.store.artifact_path("subdomains/live.txt") {
            Ok(p) => p,
            Err(e) => return outcome_for(e),
        };
        let args = vec![
            "-l".to_string(),
            live.display().to_string(),
            "-severity".to_string(),
            ctx.config.nuclei_severity.clone(),
            "-jsonl".to_string(),
            "-silent".to_string(),
        ];
        let result = match ctx.run_tool("nuclei", args, ctx.config.long_stage_budget).await {
            Ok(res) => res,
            Err(EngineError::Cancelled) => return StageOutcome::Skipped(SkipReason::Cancelled),
            Err(e) => return outcome_for(e),
        };
        if !exit_means_ok_empty("nuclei", result.exit_code) && !result.timed_out {
            warn!(exit = ?result.exit_code, "nuclei exited abnormally");
        }

        let findings = parse_nuclei_output(&result.stdout_utf8());
        if findings.is_empty() && result.timed_out {
            return StageOutcome::Skipped(SkipReason::Timeout);
        }
        info!(findings = findings.len(), "vulnerability scan finished");
        match ctx.store.write_json(self.name(), "vulns/nuclei.json", &findings) {
            Ok(artifact) => StageOutcome::Ok(vec![artifact]),
            Err(e) => outcome_for(e),
        }
    }
}

/// nuclei JSONL → normalized findings sorted by (severity rank, host).
pub fn parse_nuclei_output(raw: &str) -> Vec<VulnFinding> {
    let mut findings: Vec<VulnFinding> = raw
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
        .filter_map(|v| {
            let template = v["template-id"].as_str()?.to_string();
            Some(VulnFinding {
                name: v["info"]["name"].as_str().unwrap_or(&template).to_string(),
                severity: v["info"]["severity"].as_str().unwrap_or("info").to_ascii_lowercase(),
                host: v["host"].as_str().unwrap_or_default().to_ascii_lowercase(),
                matched_at: v["matched-at"].as_str().unwrap_or_default().to_string(),
                template,
            })
        })
        .collect();
    findings.sort_by(|a, b| {
        severity_rank(&a.severity)
            .cmp(&severity_rank(&b.severity))
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.template.cmp(&b.template))
    });
    findings
}

/// Lower rank = more severe, so criticals lead every report.
pub fn severity_rank(severity: &str) -> u8 {
    match severity {
        "critical" => 0,
        "high" => 1,
        "medium" => 2,
        "low" => 3,
        _ => 4,
    }
}
