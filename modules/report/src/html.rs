//! Static HTML report: one self-contained file, severity bars rendered
//! with inline CSS, no external fetches.

use artifacts::ArtifactStore;
use recon_core::redact;

use crate::aggregate::Summary;

const TOP_FINDINGS: usize = 25;

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn clean(s: &str) -> String {
    escape(&redact::redact(s))
}

pub fn render(store: &ArtifactStore, summary: &Summary) -> String {
    let info = &summary.scan_info;
    let stats = &summary.statistics;
    let f = &summary.findings;
    let total = (f.critical + f.high + f.medium + f.low + f.info).max(1);
    let bar = |count: usize| (count * 100 / total).max(if count > 0 { 2 } else { 0 });

    let mut severity_rows = String::new();
    for (label, count, color) in [
        ("critical", f.critical, "#c0392b"),
        ("high", f.high, "#e67e22"),
        ("medium", f.medium, "#f1c40f"),
        ("low", f.low, "#3498db"),
        ("info", f.info, "#95a5a6"),
    ] {
        severity_rows.push_str(&format!(
            r#"<div class="sevrow"><span class="sevlabel">{label}</span><div class="bar"><div class="fill" style="width:{}%;background:{color}"></div></div><span class="sevcount">{count}</span></div>
"#,
            bar(count)
        ));
    }

    let mut stage_rows = String::new();
    for stage in &info.stages {
        stage_rows.push_str(&format!(
            "<tr><td>{}</td><td class=\"state-{}\">{}</td><td>{}ms</td><td>{}</td></tr>\n",
            escape(&stage.name),
            escape(&stage.state),
            escape(&stage.state),
            stage.duration_ms,
            clean(stage.reason.as_deref().unwrap_or(""))
        ));
    }

    let vulns: Vec<serde_json::Value> = store.read_json("vulns/nuclei.json").unwrap_or_default();
    let mut finding_rows = String::new();
    for v in vulns.iter().take(TOP_FINDINGS) {
        finding_rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            clean(v["severity"].as_str().unwrap_or("info")),
            clean(v["name"].as_str().unwrap_or("finding")),
            clean(v["matched_at"].as_str().unwrap_or("")),
        ));
    }

    let takeovers: Vec<serde_json::Value> =
        store.read_json("vulns/takeovers.json").unwrap_or_default();
    let mut takeover_rows = String::new();
    for t in &takeovers {
        takeover_rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>\n",
            clean(t["host"].as_str().unwrap_or("unknown")),
            clean(t["service"].as_str().unwrap_or("unknown")),
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Reconnaissance Report: {target}</title>
<style>
body {{ font-family: Arial, sans-serif; line-height: 1.6; margin: 0; padding: 20px; color: #333; background: #f4f6f8; }}
h1, h2 {{ color: #2c3e50; }}
.container {{ max-width: 1100px; margin: 0 auto; }}
.card {{ background: #fff; border-radius: 5px; box-shadow: 0 2px 5px rgba(0,0,0,0.1); margin-bottom: 20px; padding: 20px; }}
table {{ width: 100%; border-collapse: collapse; }}
th, td {{ padding: 10px 12px; text-align: left; border-bottom: 1px solid #ddd; }}
th {{ background: #f8f9fa; }}
.statgrid {{ display: flex; flex-wrap: wrap; gap: 16px; }}
.stat {{ flex: 1 1 140px; text-align: center; padding: 12px; background: #f8f9fa; border-radius: 4px; }}
.stat .num {{ font-size: 1.8em; font-weight: bold; color: #2c3e50; }}
.sevrow {{ display: flex; align-items: center; gap: 10px; margin: 6px 0; }}
.sevlabel {{ width: 70px; }}
.sevcount {{ width: 40px; text-align: right; }}
.bar {{ flex: 1; background: #ecf0f1; border-radius: 3px; height: 16px; }}
.fill {{ height: 16px; border-radius: 3px; }}
.state-ok {{ color: #27ae60; }}
.state-failed {{ color: #c0392b; }}
.state-skipped {{ color: #7f8c8d; }}
.footer {{ text-align: center; font-size: 0.8em; color: #7f8c8d; margin-top: 30px; }}
</style>
</head>
<body>
<div class="container">
<h1>Reconnaissance Report: {target}</h1>
<p>Run {run_id} &middot; {start} &rarr; {end} &middot; v{version}</p>

<div class="card">
<h2>Statistics</h2>
<div class="statgrid">
<div class="stat"><div class="num">{subdomains}</div>Subdomains</div>
<div class="stat"><div class="num">{live}</div>Live hosts</div>
<div class="stat"><div class="num">{endpoints}</div>Endpoints</div>
<div class="stat"><div class="num">{js}</div>JS files</div>
<div class="stat"><div class="num">{vulncount}</div>Vulnerabilities</div>
<div class="stat"><div class="num">{broken}</div>Broken links</div>
</div>
</div>

<div class="card">
<h2>Findings by severity</h2>
{severity_rows}
</div>

<div class="card">
<h2>Potential takeovers</h2>
<table><tr><th>Host</th><th>Service</th></tr>
{takeover_rows}</table>
</div>

<div class="card">
<h2>Top findings</h2>
<table><tr><th>Severity</th><th>Finding</th><th>Matched at</th></tr>
{finding_rows}</table>
</div>

<div class="card">
<h2>Stage results</h2>
<table><tr><th>Stage</th><th>State</th><th>Duration</th><th>Note</th></tr>
{stage_rows}</table>
</div>

<div class="footer"><p>Generated by reconmaster v{version}</p></div>
</div>
</body>
</html>
"#,
        target = escape(&info.target),
        run_id = escape(&info.run_id),
        start = escape(&info.start),
        end = escape(&info.end),
        version = escape(&info.version),
        subdomains = stats.subdomains_found,
        live = stats.live_hosts,
        endpoints = stats.endpoints_discovered,
        js = stats.js_files_analyzed,
        vulncount = stats.vulnerabilities,
        broken = stats.broken_links,
        severity_rows = severity_rows,
        takeover_rows = takeover_rows,
        finding_rows = finding_rows,
        stage_rows = stage_rows,
    )
}
