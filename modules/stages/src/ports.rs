//! Port scanning of resolved hosts via nmap, capped to the configured
//! sample size.

use async_trait::async_trait;
use tracing::{info, warn};

use pipeline::{RunContext, SkipReason, Stage, StageOutcome};

use crate::resolve::ResolvedHost;
use crate::sanitize_host_filename;

pub struct PortScan;

#[async_trait]
impl Stage for PortScan {
    fn name(&self) -> &'static str {
        "port_scan"
    }

    fn depends_on(&self) -> Vec<&'static str> {
        vec!["dns_resolve"]
    }

    fn required_tools(&self) -> Vec<&'static str> {
        vec!["nmap"]
    }

    async fn run(&self, ctx: &RunContext) -> StageOutcome {
        let resolved: Vec<ResolvedHost> = ctx
            .store
            .read_json("subdomains/resolved.json")
            .unwrap_or_default();
        let hosts: Vec<String> = resolved
            .into_iter()
            .filter(|r| !r.addresses.is_empty())
            .map(|r| r.host)
            .take(ctx.config.port_scan_hosts)
            .collect();
        if hosts.is_empty() {
            return StageOutcome::Ok(Vec::new());
        }

        let scans = hosts.iter().map(|host| async move {
            let rel = format!("nmap/{}.txt", sanitize_host_filename(host));
            let out = ctx.store.tool_output_path(&rel).ok()?;
            let args = vec![
                "--top-ports".to_string(),
                "1000".to_string(),
                "-T4".to_string(),
                "--open".to_string(),
                "-oN".to_string(),
                out.display().to_string(),
                host.clone(),
            ];
            let result = ctx
                .run_tool("nmap", args, ctx.config.long_stage_budget)
                .await
                .ok()?;
            if !result.success() {
                warn!(host = host.as_str(), exit = ?result.exit_code, timed_out = result.timed_out, "nmap incomplete");
            }
            ctx.store.exists(&rel).then_some(rel)
        });

        let mut outputs = Vec::new();
        for rel in futures::future::join_all(scans).await.into_iter().flatten() {
            match ctx.store.register_existing(self.name(), &rel) {
                Ok(artifact) => outputs.push(artifact),
                Err(e) => warn!(rel = rel.as_str(), error = %e, "could not register nmap output"),
            }
        }
        if ctx.cancel.is_cancelled() {
            return StageOutcome::Skipped(SkipReason::Cancelled);
        }
        if outputs.is_empty() {
            return StageOutcome::Skipped(SkipReason::NoOutput(
                "nmap produced no reports".into(),
            ));
        }
        info!(scanned = outputs.len(), "port scanning finished");
        StageOutcome::Ok(outputs)
    }
}

/// Open ports from an `-oN` normal-format report.
pub fn parse_nmap_open_ports(raw: &str) -> Vec<u16> {
    let mut ports: Vec<u16> = raw
        .lines()
        .filter(|l| l.contains("/tcp") && l.contains("open"))
        .filter_map(|l| l.split('/').next()?.trim().parse().ok())
        .collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_open_ports_from_normal_output() {
        let raw = "\
# Nmap 7.94 scan initiated
PORT     STATE  SERVICE
22/tcp   open   ssh
80/tcp   open   http
443/tcp  open   https
8080/tcp closed http-proxy
";
        assert_eq!(parse_nmap_open_ports(raw), vec![22, 80, 443]);
    }

    #[test]
    fn empty_report_has_no_ports() {
        assert!(parse_nmap_open_ports("# Nmap done: 1 IP (0 hosts up)").is_empty());
    }
}
