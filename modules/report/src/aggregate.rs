//! Builds summary.json from the completed-stage artifacts. Every number is
//! recomputed from the files themselves so the summary is reproducible
//! from the artifact directory alone.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use artifacts::store::now_rfc3339;
use artifacts::ArtifactStore;
use pipeline::{RunContext, Stage, StageOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageLine {
    pub name: String,
    pub state: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanInfo {
    pub target: String,
    pub run_id: String,
    pub start: String,
    pub end: String,
    pub duration_secs: u64,
    pub version: String,
    pub stages: Vec<StageLine>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub subdomains_found: usize,
    pub live_hosts: usize,
    pub vulnerabilities: usize,
    pub endpoints_discovered: usize,
    pub js_files_analyzed: usize,
    pub broken_links: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub scan_info: ScanInfo,
    pub statistics: Statistics,
    pub findings: FindingCounts,
}

/// Stage names the aggregator waits on. Completion in any state is enough;
/// the aggregator works with whatever actually finished.
const UPSTREAM: &[&str] = &[
    "passive_enum",
    "wordlist_enum",
    "merge_subdomains",
    "dns_resolve",
    "probe_http",
    "screenshot",
    "takeover_check",
    "crawl",
    "js_analyze",
    "param_discover",
    "dir_fuzz",
    "port_scan",
    "vuln_scan",
    "broken_links",
];

pub struct Aggregate;

#[async_trait]
impl Stage for Aggregate {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn depends_on(&self) -> Vec<&'static str> {
        UPSTREAM.to_vec()
    }

    fn requires_ok(&self, _dep: &str) -> bool {
        false
    }

    // Reads artifacts only; always runs, passive mode included.
    fn passive(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        let mut stages: Vec<StageLine> = ctx
            .results_snapshot()
            .into_iter()
            .map(|r| StageLine {
                name: r.name,
                state: r.state.to_string(),
                duration_ms: r.duration.as_millis() as u64,
                reason: r.reason,
            })
            .collect();
        stages.sort_by(|a, b| a.name.cmp(&b.name));

        let statistics = compute_statistics(&ctx.store);
        let findings = compute_findings(&ctx.store);
        let summary = Summary {
            scan_info: ScanInfo {
                target: ctx.target.fqdn().to_string(),
                run_id: ctx.store.run_id().to_string(),
                start: ctx.started_at.clone(),
                end: now_rfc3339(),
                duration_secs: ctx.started.elapsed().as_secs(),
                version: recon_core::version().to_string(),
                stages,
            },
            statistics,
            findings,
        };

        info!(
            subdomains = summary.statistics.subdomains_found,
            live = summary.statistics.live_hosts,
            vulns = summary.statistics.vulnerabilities,
            "aggregation finished"
        );
        match ctx.store.write_json(self.name(), "summary.json", &summary) {
            Ok(artifact) => StageOutcome::Ok(vec![artifact]),
            Err(e) => StageOutcome::Failed(e.to_string()),
        }
    }
}

/// Counts derived purely from artifact files.
pub fn compute_statistics(store: &ArtifactStore) -> Statistics {
    Statistics {
        subdomains_found: store.line_count("subdomains/all.txt"),
        live_hosts: store.line_count("subdomains/live.txt"),
        vulnerabilities: json_array_len(store, "vulns/nuclei.json")
            + json_array_len(store, "vulns/takeovers.json"),
        endpoints_discovered: store.line_count("endpoints/urls.txt"),
        js_files_analyzed: store.line_count("js/files.txt"),
        broken_links: store.line_count("reports/broken_links.txt"),
    }
}

/// Severity histogram over the vulnerability and takeover artifacts.
pub fn compute_findings(store: &ArtifactStore) -> FindingCounts {
    let mut counts = FindingCounts::default();
    for rel in ["vulns/nuclei.json", "vulns/takeovers.json"] {
        let entries: Vec<serde_json::Value> = store.read_json(rel).unwrap_or_default();
        for entry in entries {
            match entry["severity"].as_str().unwrap_or("info") {
                "critical" => counts.critical += 1,
                "high" => counts.high += 1,
                "medium" => counts.medium += 1,
                "low" => counts.low += 1,
                _ => counts.info += 1,
            }
        }
    }
    counts
}

fn json_array_len(store: &ArtifactStore, rel: &str) -> usize {
    store
        .read_json::<Vec<serde_json::Value>>(rel)
        .map(|v| v.len())
        .unwrap_or(0)
}
